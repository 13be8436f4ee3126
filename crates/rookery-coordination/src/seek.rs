//! The seek-state engine behind the lock and one-for-all recipes.
//!
//! The engine drives one client's sequential node toward a goal a
//! [`SeekPolicy`] defines. Each iteration re-derives truth from a fresh,
//! sorted listing of the siblings at the path — never from state carried
//! across iterations:
//!
//! 1. List the children, sorted by sequence suffix.
//! 2. Look for this client's node by prefix. If it is absent, issue one
//!    ephemeral-sequential create and re-enter from step 1. A create
//!    that fails with the recoverable code is *not* retried: the
//!    acknowledgement may have been lost after the node was created
//!    server-side, so the next listing — not a blind retry — decides
//!    whether another create is needed. This is what keeps one client
//!    from ever holding two live sequence nodes.
//! 3. If the node is present, the policy decides: terminate the signal
//!    with a final value, or emit the current value and re-enter once a
//!    named sibling vanishes.
//!
//! Iteration *n+1* never starts before iteration *n*'s trigger has
//! settled, so a client never has concurrent reads against one path.

use std::sync::Arc;

use async_trait::async_trait;
use rookery_core::CoordinationStore;
use rookery_core::CreateMode;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::error::CoordinationError;
use crate::identity::ClientNodeIdentity;
use crate::retry::RetryPolicy;
use crate::retry::delays;
use crate::retry::recoverable;
use crate::retry::with_retry;
use crate::watch::ChildrenOptions;
use crate::watch::get_children;
use crate::watch::wait_vanished;

/// Observed state of a seek-driven signal.
///
/// The boolean carries the recipe's meaning ("holds the lock", "is the
/// leader"). `Done` and `Failed` are terminal: the signal's sender is
/// dropped right after one of them is published.
#[derive(Debug, Clone, PartialEq)]
pub enum RecipeState {
    /// No observation has been made yet.
    Pending,
    /// The latest observed value; the recipe is still seeking.
    Seeking(bool),
    /// The recipe reached its goal with this final value.
    Done(bool),
    /// The recipe failed; dependents must not read this as "false".
    Failed(CoordinationError),
}

impl RecipeState {
    /// The observed boolean value, when one exists.
    pub fn value(&self) -> Option<bool> {
        match self {
            RecipeState::Seeking(value) | RecipeState::Done(value) => Some(*value),
            RecipeState::Pending | RecipeState::Failed(_) => None,
        }
    }

    /// Whether the signal can still change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecipeState::Done(_) | RecipeState::Failed(_))
    }

    /// The failure, when the signal ended with one.
    pub fn error(&self) -> Option<&CoordinationError> {
        match self {
            RecipeState::Failed(error) => Some(error),
            _ => None,
        }
    }
}

/// What the policy wants after inspecting the siblings.
#[derive(Debug)]
pub enum SeekDecision {
    /// Terminate the signal with this final value.
    Done(bool),
    /// Publish `value`, wait for the sibling named `node` to vanish,
    /// then re-derive the siblings and evaluate again.
    WaitForVanish {
        /// The value to publish while waiting.
        value: bool,
        /// Sibling node name (no path prefix) whose vanish re-triggers.
        node: String,
    },
}

/// Recipe-specific half of the seek loop.
///
/// The engine owns listing, creating, and watching; the policy encodes
/// what "satisfied" means and which sibling to wait on.
#[async_trait]
pub trait SeekPolicy: Send + Sync {
    /// Decide from the sorted siblings and this client's index.
    async fn evaluate(&self, siblings: &[String], self_index: usize) -> Result<SeekDecision, CoordinationError>;
}

/// Drives one client node at a base path per a [`SeekPolicy`].
pub struct NodeSeeker<S: CoordinationStore + ?Sized> {
    store: Arc<S>,
    base_path: String,
    identity: ClientNodeIdentity,
    retry: RetryPolicy,
}

impl<S: CoordinationStore + ?Sized + 'static> NodeSeeker<S> {
    /// Create a seeker. Nothing touches the store until [`start`].
    ///
    /// [`start`]: NodeSeeker::start
    pub fn new(store: Arc<S>, base_path: impl Into<String>, identity: ClientNodeIdentity, retry: RetryPolicy) -> Self {
        Self {
            store,
            base_path: base_path.into(),
            identity,
            retry,
        }
    }

    /// Spawn the seek loop, returning the handle onto its signal.
    pub fn start<P>(self, policy: P) -> RecipeHandle
    where
        P: SeekPolicy + 'static,
    {
        let (state_tx, state_rx) = watch::channel(RecipeState::Pending);
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            tokio::select! {
                _ = loop_cancel.cancelled() => {
                    debug!("seek loop cancelled");
                }
                result = run_seek(&self, &policy, &state_tx) => {
                    let last = match result {
                        Ok(value) => RecipeState::Done(value),
                        Err(error) => {
                            warn!(error = %error, path = %self.base_path, "seek loop failed");
                            RecipeState::Failed(error)
                        }
                    };
                    let _ = state_tx.send(last);
                }
            }
        });

        RecipeHandle {
            state_rx,
            cancel,
            task: Some(task),
        }
    }
}

async fn run_seek<S, P>(
    seeker: &NodeSeeker<S>,
    policy: &P,
    state_tx: &watch::Sender<RecipeState>,
) -> Result<bool, CoordinationError>
where
    S: CoordinationStore + ?Sized,
    P: SeekPolicy,
{
    let prefix = seeker.identity.prefix();
    let parent = seeker.identity.parent_path(&seeker.base_path);
    let store = seeker.store.as_ref();
    let options = ChildrenOptions {
        filter: None,
        sort_by_sequence: true,
    };

    // Backoff budget for creates whose outcome came back unknown; reset
    // whenever our node shows up in a listing.
    let mut create_delays = delays(&seeker.retry);

    loop {
        let siblings = with_retry(&seeker.retry, recoverable, || get_children(store, &parent, &options)).await?;

        match siblings.iter().position(|node| node.starts_with(&prefix)) {
            None => {
                let node_path = format!("{parent}/{prefix}");
                match store.create(&node_path, None, CreateMode::EphemeralSequential).await {
                    Ok(created) => {
                        debug!(node = %created, "created client node");
                    }
                    Err(error) if error.is_recoverable() => {
                        // The node may exist server-side; only the next
                        // listing can tell. Back off, then re-derive.
                        match create_delays.next() {
                            Some(delay) => {
                                debug!(path = %node_path, delay_ms = delay.as_millis() as u64,
                                    "create outcome unknown, re-deriving from listing");
                                tokio::time::sleep(delay).await;
                            }
                            None => return Err(error.into()),
                        }
                    }
                    Err(error) => return Err(error.into()),
                }
            }
            Some(self_index) => {
                create_delays = delays(&seeker.retry);
                match policy.evaluate(&siblings, self_index).await? {
                    SeekDecision::Done(value) => return Ok(value),
                    SeekDecision::WaitForVanish { value, node } => {
                        publish(state_tx, RecipeState::Seeking(value));
                        let watch_path = format!("{parent}/{node}");
                        with_retry(&seeker.retry, recoverable, || wait_vanished(store, &watch_path)).await?;
                    }
                }
            }
        }
    }
}

/// Publish a state, suppressing consecutive duplicates so dependents
/// only observe true transitions.
fn publish(state_tx: &watch::Sender<RecipeState>, next: RecipeState) {
    state_tx.send_if_modified(|state| {
        if *state == next {
            false
        } else {
            *state = next;
            true
        }
    });
}

/// Handle onto a running recipe signal.
///
/// Dropping the handle cancels the loop and synchronously releases its
/// pending watches and timers.
pub struct RecipeHandle {
    state_rx: watch::Receiver<RecipeState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RecipeHandle {
    /// Assemble a handle around an externally driven signal.
    ///
    /// Used by facades that gate a recipe on another signal but expose
    /// the same handle surface.
    pub fn from_parts(
        state_rx: watch::Receiver<RecipeState>,
        cancel: CancellationToken,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            state_rx,
            cancel,
            task: Some(task),
        }
    }

    /// The most recently observed state.
    pub fn state(&self) -> RecipeState {
        self.state_rx.borrow().clone()
    }

    /// The observed boolean value, when one exists.
    pub fn value(&self) -> Option<bool> {
        self.state().value()
    }

    /// Subscribe to state transitions.
    ///
    /// The receiver holds the latest state immediately; duplicates are
    /// already suppressed at the sender.
    pub fn subscribe(&self) -> watch::Receiver<RecipeState> {
        self.state_rx.clone()
    }

    /// Cancel the loop and wait for it to wind down.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for RecipeHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
