//! One-for-all recipe: leader election around a once-per-group action.
//!
//! Generalizes the lock recipe: instead of watching the immediate
//! predecessor, every participant watches the global first sibling, and
//! an externally supplied predicate can declare the whole endeavor
//! satisfied. The participant whose node is first becomes the leader
//! and its action is invoked exactly once per transition into the
//! leader position; once the predicate reports the action done, every
//! participant's signal terminates with `false` — no leadership needed.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use tracing::info;

use rookery_core::CoordinationStore;

use crate::error::CoordinationError;
use crate::identity::ClientNodeIdentity;
use crate::retry::RetryPolicy;
use crate::seek::NodeSeeker;
use crate::seek::RecipeHandle;
use crate::seek::SeekDecision;
use crate::seek::SeekPolicy;

/// Leader election for an action that one member of the group performs
/// on behalf of all.
///
/// The observed boolean reads "this client is the leader". The signal
/// terminates with `Done(false)` when `action_done` reports the action
/// already satisfied.
pub struct OneForAll<S: CoordinationStore + ?Sized> {
    store: Arc<S>,
    path: String,
    identity: ClientNodeIdentity,
    retry: RetryPolicy,
    action: Arc<dyn Fn() + Send + Sync>,
    action_done: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl<S: CoordinationStore + ?Sized + 'static> OneForAll<S> {
    /// Define a one-for-all participation at `path`.
    ///
    /// `action` runs on this client when it transitions into the leader
    /// position; `action_done` is consulted before every wait and
    /// short-circuits the recipe once someone has satisfied the action.
    pub fn new(
        store: Arc<S>,
        path: impl Into<String>,
        identity: ClientNodeIdentity,
        retry: RetryPolicy,
        action: impl Fn() + Send + Sync + 'static,
        action_done: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            store,
            path: path.into(),
            identity,
            retry,
            action: Arc::new(action),
            action_done: Arc::new(action_done),
        }
    }

    /// Begin participating in the election.
    pub fn start(self) -> RecipeHandle {
        info!(path = %self.path, client = %self.identity.client_id(), "joining one-for-all group");
        let policy = OneForAllPolicy {
            action: self.action,
            action_done: self.action_done,
            leading: AtomicBool::new(false),
        };
        NodeSeeker::new(self.store, self.path, self.identity, self.retry).start(policy)
    }
}

/// Watch the global first sibling; lead when first; stop when done.
struct OneForAllPolicy {
    action: Arc<dyn Fn() + Send + Sync>,
    action_done: Arc<dyn Fn() -> bool + Send + Sync>,
    /// Whether the previous evaluation already saw us leading, so the
    /// action fires once per transition rather than once per
    /// re-derivation.
    leading: AtomicBool,
}

#[async_trait]
impl SeekPolicy for OneForAllPolicy {
    async fn evaluate(&self, siblings: &[String], self_index: usize) -> Result<SeekDecision, CoordinationError> {
        if (self.action_done)() {
            return Ok(SeekDecision::Done(false));
        }

        let leading = self_index == 0;
        if leading {
            if !self.leading.swap(true, Ordering::SeqCst) {
                info!("assumed leadership for one-for-all action");
                (self.action)();
            }
        } else {
            self.leading.store(false, Ordering::SeqCst);
        }

        Ok(SeekDecision::WaitForVanish {
            value: leading,
            node: siblings[0].clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use rookery_testing::SharedNamespace;
    use tokio::time::timeout;

    use super::*;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            initial_delay_ms: 1,
            delay_factor: 2.0,
            max_delay_ms: 2,
            max_retries: 3,
        }
    }

    fn identity(client: &str) -> ClientNodeIdentity {
        ClientNodeIdentity::new(client).unwrap()
    }

    async fn wait_for_value(handle: &RecipeHandle, expected: Option<bool>) {
        let mut rx = handle.subscribe();
        timeout(Duration::from_secs(1), rx.wait_for(|state| state.value() == expected))
            .await
            .expect("timed out waiting for election value")
            .expect("election signal closed");
    }

    #[tokio::test]
    async fn already_satisfied_action_terminates_without_leading() {
        let namespace = SharedNamespace::new();
        let fired = Arc::new(AtomicU32::new(0));
        let fired_in_action = fired.clone();

        let handle = OneForAll::new(
            namespace.client(),
            "/election",
            identity("a"),
            fast_retry(),
            move || {
                fired_in_action.fetch_add(1, Ordering::SeqCst);
            },
            || true,
        )
        .start();

        let mut rx = handle.subscribe();
        let last = timeout(Duration::from_secs(1), rx.wait_for(|state| state.is_terminal()))
            .await
            .unwrap()
            .unwrap()
            .clone();
        assert_eq!(last.value(), Some(false));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        handle.stop().await;
    }

    #[tokio::test]
    async fn first_participant_leads_and_fires_the_action_once() {
        let namespace = SharedNamespace::new();
        let store = namespace.client();
        let fired = Arc::new(AtomicU32::new(0));
        let fired_in_action = fired.clone();

        let handle = OneForAll::new(
            store.clone(),
            "/election",
            identity("a"),
            fast_retry(),
            move || {
                fired_in_action.fetch_add(1, Ordering::SeqCst);
            },
            || false,
        )
        .start();

        wait_for_value(&handle, Some(true)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // another participant joining must not disturb the leader
        store.create("/election/x-", None, rookery_core::CreateMode::EphemeralSequential).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.value(), Some(true));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        handle.stop().await;
    }

    #[tokio::test]
    async fn leadership_passes_to_the_next_participant_in_sequence_order() {
        let namespace = SharedNamespace::new();
        let stores: Vec<_> = (0..3).map(|_| namespace.client()).collect();
        let fire_counts: Vec<Arc<AtomicU32>> = (0..3).map(|_| Arc::new(AtomicU32::new(0))).collect();

        // participants join one after another so sequence order is 1,2,3
        let mut handles: Vec<RecipeHandle> = Vec::new();
        for (i, client) in ["one", "two", "three"].iter().enumerate() {
            let fired = fire_counts[i].clone();
            let handle = OneForAll::new(
                stores[i].clone(),
                "/election",
                identity(client),
                fast_retry(),
                move || {
                    fired.fetch_add(1, Ordering::SeqCst);
                },
                || false,
            )
            .start();
            wait_for_value(&handle, Some(i == 0)).await;
            handles.push(handle);
        }
        assert_eq!(fire_counts[0].load(Ordering::SeqCst), 1);
        assert_eq!(fire_counts[1].load(Ordering::SeqCst), 0);
        assert_eq!(fire_counts[2].load(Ordering::SeqCst), 0);

        // the leader's node vanishes; exactly the second participant takes over
        stores[0].remove("/election/one-0000000000").await.unwrap();
        wait_for_value(&handles[1], Some(true)).await;
        assert_eq!(fire_counts[1].load(Ordering::SeqCst), 1);
        assert_eq!(handles[2].value(), Some(false));
        assert_eq!(fire_counts[2].load(Ordering::SeqCst), 0);

        for handle in handles {
            handle.stop().await;
        }
    }

    #[tokio::test]
    async fn done_predicate_ends_every_participant_with_false() {
        let namespace = SharedNamespace::new();
        let done = Arc::new(AtomicBool::new(false));

        let store_a = namespace.client();
        let store_b = namespace.client();
        let done_a = done.clone();
        let done_b = done.clone();

        let handle_a = OneForAll::new(
            store_a.clone(),
            "/election",
            identity("a"),
            fast_retry(),
            || {},
            move || done_a.load(Ordering::SeqCst),
        )
        .start();
        wait_for_value(&handle_a, Some(true)).await;

        let handle_b = OneForAll::new(
            store_b,
            "/election",
            identity("b"),
            fast_retry(),
            || {},
            move || done_b.load(Ordering::SeqCst),
        )
        .start();
        wait_for_value(&handle_b, Some(false)).await;

        // the action is satisfied; the leader's node vanishing triggers
        // re-evaluation and both signals terminate without a new leader
        done.store(true, Ordering::SeqCst);
        store_a.remove("/election/a-0000000000").await.unwrap();

        let mut rx = handle_b.subscribe();
        let last = timeout(Duration::from_secs(1), rx.wait_for(|state| state.is_terminal()))
            .await
            .unwrap()
            .unwrap()
            .clone();
        assert_eq!(last.value(), Some(false));

        handle_a.stop().await;
        handle_b.stop().await;
    }
}
