//! Exclusive lock recipe.
//!
//! Each contender owns one ephemeral-sequential node under the lock
//! path; the contender whose node carries the lowest sequence holds the
//! lock. Everyone else watches only its immediate predecessor, so a
//! release wakes exactly one waiter and the herd stays asleep.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use rookery_core::CoordinationStore;

use crate::error::CoordinationError;
use crate::identity::ClientNodeIdentity;
use crate::retry::RetryPolicy;
use crate::seek::NodeSeeker;
use crate::seek::RecipeHandle;
use crate::seek::RecipeState;
use crate::seek::SeekDecision;
use crate::seek::SeekPolicy;

/// Exclusive mutual-exclusion lock over a store path.
///
/// [`start`] returns a handle onto a de-duplicated boolean signal:
/// `Seeking(false)` while another contender is ahead, terminating with
/// `Done(true)` once the lock is held. A terminal error fails the
/// signal; it never silently reads as "lock denied".
///
/// [`start`]: ExclusiveLock::start
pub struct ExclusiveLock<S: CoordinationStore + ?Sized> {
    store: Arc<S>,
    path: String,
    identity: ClientNodeIdentity,
    retry: RetryPolicy,
}

impl<S: CoordinationStore + ?Sized + 'static> ExclusiveLock<S> {
    /// Define a lock attempt at `path` for `identity`.
    pub fn new(store: Arc<S>, path: impl Into<String>, identity: ClientNodeIdentity, retry: RetryPolicy) -> Self {
        Self {
            store,
            path: path.into(),
            identity,
            retry,
        }
    }

    /// Begin contending for the lock.
    pub fn start(self) -> RecipeHandle {
        info!(path = %self.path, client = %self.identity.client_id(), "contending for exclusive lock");
        NodeSeeker::new(self.store, self.path, self.identity, self.retry).start(LockPolicy)
    }
}

/// Hold at index 0; otherwise wait for the immediate predecessor.
struct LockPolicy;

#[async_trait]
impl SeekPolicy for LockPolicy {
    async fn evaluate(&self, siblings: &[String], self_index: usize) -> Result<SeekDecision, CoordinationError> {
        if self_index == 0 {
            return Ok(SeekDecision::Done(true));
        }
        Ok(SeekDecision::WaitForVanish {
            value: false,
            node: siblings[self_index - 1].clone(),
        })
    }
}

/// Run `action` once the lock signal reports the lock as held.
///
/// There is no special handling for a connection lost while the lock is
/// held; the action runs regardless, so it is assumed idempotent. For
/// more involved handling, observe the handle's signal directly.
pub async fn run_when_held<F>(handle: &RecipeHandle, action: F) -> Result<(), CoordinationError>
where
    F: FnOnce(),
{
    let mut rx = handle.subscribe();
    let last = rx
        .wait_for(|state| state.is_terminal())
        .await
        .map_err(|_| CoordinationError::Store {
            source: rookery_core::StoreError::Internal {
                reason: "lock signal ended without a terminal state".to_string(),
            },
        })?
        .clone();

    match last {
        RecipeState::Done(true) => {
            action();
            Ok(())
        }
        RecipeState::Failed(error) => Err(error),
        // a lock signal only completes with `true`; anything else is
        // unreachable but must not invoke the action
        _ => Ok(()),
    }
}
