//! The session state machine.
//!
//! One [`Session`] owns one connection to the store and maps its raw
//! event stream onto [`SessionState`], published through a hot,
//! replay-latest signal: a new subscriber observes the most recent
//! state, then live updates. Constructing a [`Session`] has no side
//! effects; [`Session::activate`] creates the connection. The driver
//! task is the sole owner of the connection and closes it exactly once
//! on every exit path — terminal failure, `stop`, or handle drop.

use std::sync::Arc;

use rookery_core::CoordinationStore;
use rookery_core::SessionEvent;
use rookery_core::StoreError;
use tokio::sync::broadcast;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::error::CoordinationError;

/// Observable state of the client's logical session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// The initial handshake has not completed yet.
    Connecting,
    /// The session is established.
    Connected {
        /// True when connected to a read-only replica.
        read_only: bool,
    },
    /// The connection dropped; the session may still recover.
    Disconnected,
    /// The session expired server-side. Terminal.
    Expired,
    /// The session's credentials were rejected. Terminal.
    AuthFailed,
}

impl SessionState {
    /// Whether the session is currently usable for store operations.
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected { .. })
    }

    /// Whether this state ends the session for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Expired | SessionState::AuthFailed)
    }

    /// The failure a terminal state propagates to dependents.
    pub fn terminal_error(&self) -> Option<CoordinationError> {
        match self {
            SessionState::Expired => Some(CoordinationError::SessionExpired),
            SessionState::AuthFailed => Some(CoordinationError::AuthenticationFailed),
            _ => None,
        }
    }
}

/// Factory producing one fresh connection per invocation.
pub type ConnectionFactory = dyn Fn() -> Arc<dyn CoordinationStore> + Send + Sync;

/// A reconnectable session definition.
///
/// Holds only the connection factory; each [`activate`] call builds one
/// connection and one driver. Activation is explicit so a facade can
/// re-activate from scratch after a terminal failure.
///
/// [`activate`]: Session::activate
#[derive(Clone)]
pub struct Session {
    factory: Arc<ConnectionFactory>,
}

impl Session {
    /// Define a session. No connection is made until [`Session::activate`].
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Arc<dyn CoordinationStore> + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
        }
    }

    /// Construct one connection, subscribe to its events, and issue the
    /// logical connect request.
    ///
    /// The event subscription is registered before the connect call so
    /// the handshake events cannot be missed.
    pub fn activate(&self) -> SessionHandle {
        let store = (self.factory)();
        let events = store.session_events();
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(drive_session(store.clone(), events, state_tx, cancel.clone()));

        SessionHandle {
            store,
            state_rx,
            cancel,
            task: Some(task),
        }
    }
}

/// Handle onto one activated session.
///
/// Dropping the handle cancels the driver, which closes the connection.
pub struct SessionHandle {
    store: Arc<dyn CoordinationStore>,
    state_rx: watch::Receiver<SessionState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// The most recently observed session state.
    pub fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    /// Subscribe to session state changes.
    ///
    /// The receiver holds the latest state immediately and is notified
    /// on every transition.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// The connection this session owns.
    ///
    /// Recipes issue node operations through this; only the session
    /// driver connects and closes.
    pub fn store(&self) -> Arc<dyn CoordinationStore> {
        self.store.clone()
    }

    /// Tear the session down and wait for the connection to be closed.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        // The driver observes the cancellation and closes the
        // connection on its way out.
        self.cancel.cancel();
    }
}

fn map_event(event: SessionEvent) -> Option<SessionState> {
    match event {
        SessionEvent::SyncConnected => Some(SessionState::Connected { read_only: false }),
        SessionEvent::ReadOnlyConnected => Some(SessionState::Connected { read_only: true }),
        SessionEvent::Disconnected => Some(SessionState::Disconnected),
        SessionEvent::AuthFailed => Some(SessionState::AuthFailed),
        SessionEvent::Expired => Some(SessionState::Expired),
        SessionEvent::Other => None,
    }
}

async fn drive_session(
    store: Arc<dyn CoordinationStore>,
    mut events: broadcast::Receiver<SessionEvent>,
    state_tx: watch::Sender<SessionState>,
    cancel: CancellationToken,
) {
    match store.connect().await {
        Ok(()) => {}
        Err(StoreError::AuthFailed) => {
            let _ = state_tx.send(SessionState::AuthFailed);
        }
        Err(StoreError::SessionExpired) => {
            let _ = state_tx.send(SessionState::Expired);
        }
        Err(error) => {
            // handshake outcome still arrives through the event stream
            warn!(error = %error, "connect request failed");
        }
    }

    if !state_tx.borrow().is_terminal() {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("session unsubscribed");
                    break;
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        let Some(next) = map_event(event) else {
                            continue;
                        };
                        debug!(state = ?next, "session state change");
                        let terminal = next.is_terminal();
                        state_tx.send_if_modified(|state| {
                            if *state == next {
                                false
                            } else {
                                *state = next.clone();
                                true
                            }
                        });
                        if terminal {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("session event stream ended");
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "session event stream lagged");
                    }
                }
            }
        }
    }

    // Sole close point: every exit path funnels through here, so the
    // connection is closed exactly once and listeners die with the task.
    if let Err(error) = store.close().await {
        warn!(error = %error, "error closing store connection");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use rookery_testing::DeterministicCoordinationStore;
    use tokio::time::timeout;

    use super::*;

    async fn wait_for_state(handle: &SessionHandle, expected: SessionState) {
        let mut rx = handle.subscribe();
        timeout(Duration::from_secs(1), rx.wait_for(|state| *state == expected))
            .await
            .expect("timed out waiting for session state")
            .expect("session signal closed");
    }

    #[tokio::test]
    async fn construction_has_no_side_effects() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_factory = calls.clone();
        let session = Session::new(move || {
            calls_in_factory.fetch_add(1, Ordering::SeqCst);
            DeterministicCoordinationStore::new() as Arc<dyn CoordinationStore>
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let handle = session.activate();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        handle.stop().await;
    }

    #[tokio::test]
    async fn sync_connected_maps_to_writable_connected() {
        let store = DeterministicCoordinationStore::new();
        let session = {
            let store = store.clone();
            Session::new(move || store.clone() as Arc<dyn CoordinationStore>)
        };
        let handle = session.activate();

        wait_for_state(&handle, SessionState::Connected { read_only: false }).await;
        handle.stop().await;
    }

    #[tokio::test]
    async fn read_only_connected_maps_to_read_only_state() {
        let store = DeterministicCoordinationStore::new().manual_events();
        let session = {
            let store = store.clone();
            Session::new(move || store.clone() as Arc<dyn CoordinationStore>)
        };
        let handle = session.activate();

        store.emit(SessionEvent::ReadOnlyConnected);
        wait_for_state(&handle, SessionState::Connected { read_only: true }).await;
        handle.stop().await;
    }

    #[tokio::test]
    async fn disconnected_is_recoverable_and_keeps_the_connection() {
        let store = DeterministicCoordinationStore::new();
        let session = {
            let store = store.clone();
            Session::new(move || store.clone() as Arc<dyn CoordinationStore>)
        };
        let handle = session.activate();
        wait_for_state(&handle, SessionState::Connected { read_only: false }).await;

        store.emit(SessionEvent::Disconnected);
        wait_for_state(&handle, SessionState::Disconnected).await;
        assert_eq!(store.close_count(), 0);

        store.emit(SessionEvent::SyncConnected);
        wait_for_state(&handle, SessionState::Connected { read_only: false }).await;
        handle.stop().await;
    }

    #[tokio::test]
    async fn auth_failure_is_terminal_and_closes_exactly_once() {
        let store = DeterministicCoordinationStore::new();
        let session = {
            let store = store.clone();
            Session::new(move || store.clone() as Arc<dyn CoordinationStore>)
        };
        let handle = session.activate();
        wait_for_state(&handle, SessionState::Connected { read_only: false }).await;

        store.emit(SessionEvent::AuthFailed);
        wait_for_state(&handle, SessionState::AuthFailed).await;

        // no further events are processed after the terminal state
        store.emit(SessionEvent::SyncConnected);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.state(), SessionState::AuthFailed);
        assert_eq!(store.close_count(), 1);

        handle.stop().await;
        assert_eq!(store.close_count(), 1);
    }

    #[tokio::test]
    async fn expiry_surfaces_a_terminal_error() {
        let store = DeterministicCoordinationStore::new();
        let session = {
            let store = store.clone();
            Session::new(move || store.clone() as Arc<dyn CoordinationStore>)
        };
        let handle = session.activate();
        wait_for_state(&handle, SessionState::Connected { read_only: false }).await;

        store.expire_session().await;
        wait_for_state(&handle, SessionState::Expired).await;
        assert!(matches!(
            handle.state().terminal_error(),
            Some(CoordinationError::SessionExpired)
        ));
        handle.stop().await;
    }

    #[tokio::test]
    async fn other_events_are_ignored() {
        let store = DeterministicCoordinationStore::new();
        let session = {
            let store = store.clone();
            Session::new(move || store.clone() as Arc<dyn CoordinationStore>)
        };
        let handle = session.activate();
        wait_for_state(&handle, SessionState::Connected { read_only: false }).await;

        store.emit(SessionEvent::Other);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.state(), SessionState::Connected { read_only: false });
        handle.stop().await;
    }

    #[tokio::test]
    async fn dropping_the_handle_closes_the_connection() {
        let store = DeterministicCoordinationStore::new();
        let session = {
            let store = store.clone();
            Session::new(move || store.clone() as Arc<dyn CoordinationStore>)
        };
        let handle = session.activate();
        wait_for_state(&handle, SessionState::Connected { read_only: false }).await;

        drop(handle);
        timeout(Duration::from_secs(1), async {
            while store.close_count() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("connection was not closed after drop");
        assert_eq!(store.close_count(), 1);
    }
}
