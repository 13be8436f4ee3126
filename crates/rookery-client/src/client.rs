//! The facade client.

use std::sync::Arc;

use rookery_coordination::ClientNodeIdentity;
use rookery_coordination::CoordinationError;
use rookery_coordination::ExclusiveLock;
use rookery_coordination::OneForAll;
use rookery_coordination::RecipeHandle;
use rookery_coordination::RecipeState;
use rookery_coordination::Session;
use rookery_coordination::SessionState;
use rookery_coordination::with_retry;
use rookery_core::CoordinationStore;
use rookery_core::StoreError;
use parking_lot::Mutex;
use tokio::sync::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::ClientConfig;

type SharedStore = Arc<dyn CoordinationStore>;

/// The running session supervisor.
struct Supervisor {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Client facade over the session, retry policies, and recipes.
///
/// One logical session per client instance. Observations returned by
/// [`observe_lock`] and [`observe_leader`] are gated on the session
/// signal: they deterministically read "not holding" while the session
/// is anything other than connected, and fail once the session fails
/// for good.
///
/// [`observe_lock`]: RookeryClient::observe_lock
/// [`observe_leader`]: RookeryClient::observe_leader
pub struct RookeryClient {
    session: Session,
    config: ClientConfig,
    state_tx: Arc<watch::Sender<SessionState>>,
    state_rx: watch::Receiver<SessionState>,
    store_slot: Arc<RwLock<Option<SharedStore>>>,
    supervisor: Mutex<Option<Supervisor>>,
}

impl RookeryClient {
    /// Create a client around a connection factory.
    ///
    /// Nothing touches the store until [`connect`].
    ///
    /// [`connect`]: RookeryClient::connect
    pub fn new<F>(factory: F, config: ClientConfig) -> Self
    where
        F: Fn() -> SharedStore + Send + Sync + 'static,
    {
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        Self {
            session: Session::new(factory),
            config,
            state_tx: Arc::new(state_tx),
            state_rx,
            store_slot: Arc::new(RwLock::new(None)),
            supervisor: Mutex::new(None),
        }
    }

    /// Activate the shared session signal. Idempotent.
    ///
    /// The whole session is run under the session retry policy: a fatal
    /// failure reconnects from scratch after backoff until the budget
    /// is exhausted, at which point the terminal state is published to
    /// every dependent.
    pub fn connect(&self) {
        let mut slot = self.supervisor.lock();
        if slot.is_some() {
            debug!("client already connected");
            return;
        }
        info!("activating shared session");
        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervise(
            self.session.clone(),
            self.config.clone(),
            self.state_tx.clone(),
            self.store_slot.clone(),
            cancel.clone(),
        ));
        *slot = Some(Supervisor { cancel, task });
    }

    /// Release the session subscription and close the connection.
    /// Idempotent.
    pub async fn disconnect(&self) {
        let supervisor = self.supervisor.lock().take();
        match supervisor {
            Some(Supervisor { cancel, task }) => {
                info!("releasing shared session");
                cancel.cancel();
                let _ = task.await;
            }
            None => debug!("client already disconnected"),
        }
    }

    /// The most recently observed session state.
    pub fn session_state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    /// Subscribe to the merged session signal.
    pub fn subscribe_session(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Observe an exclusive lock at `path`.
    ///
    /// A fresh client id is generated when `identity` is not supplied.
    pub fn observe_lock(&self, path: impl Into<String>, identity: Option<ClientNodeIdentity>) -> RecipeHandle {
        let path = path.into();
        let identity = identity.unwrap_or_else(ClientNodeIdentity::generated);
        let retry = self.config.recipe_retry.clone();
        debug!(path = %path, client = %identity.client_id(), "observing exclusive lock");
        self.spawn_gated(move |store| {
            ExclusiveLock::new(store, path.clone(), identity.clone(), retry.clone()).start()
        })
    }

    /// Observe a one-for-all leader election at `path`.
    ///
    /// `action` runs on this client whenever it transitions into the
    /// leader position; `action_done` short-circuits the election once
    /// the action is satisfied.
    pub fn observe_leader(
        &self,
        path: impl Into<String>,
        identity: Option<ClientNodeIdentity>,
        action: impl Fn() + Send + Sync + 'static,
        action_done: impl Fn() -> bool + Send + Sync + 'static,
    ) -> RecipeHandle {
        let path = path.into();
        let identity = identity.unwrap_or_else(ClientNodeIdentity::generated);
        let retry = self.config.recipe_retry.clone();
        let action: Arc<dyn Fn() + Send + Sync> = Arc::new(action);
        let action_done: Arc<dyn Fn() -> bool + Send + Sync> = Arc::new(action_done);
        debug!(path = %path, client = %identity.client_id(), "observing leader election");
        self.spawn_gated(move |store| {
            let action = action.clone();
            let action_done = action_done.clone();
            OneForAll::new(
                store,
                path.clone(),
                identity.clone(),
                retry.clone(),
                move || (action)(),
                move || (action_done)(),
            )
            .start()
        })
    }

    fn spawn_gated<F>(&self, make_recipe: F) -> RecipeHandle
    where
        F: Fn(SharedStore) -> RecipeHandle + Send + 'static,
    {
        let (state_tx, state_rx) = watch::channel(RecipeState::Pending);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(gate_recipe(
            self.state_rx.clone(),
            self.store_slot.clone(),
            make_recipe,
            state_tx,
            cancel.clone(),
        ));
        RecipeHandle::from_parts(state_rx, cancel, task)
    }
}

impl Drop for RookeryClient {
    fn drop(&mut self) {
        // The supervisor observes the cancellation and winds the
        // session down on its way out.
        if let Some(supervisor) = self.supervisor.lock().take() {
            supervisor.cancel.cancel();
        }
    }
}

fn publish_session(state_tx: &watch::Sender<SessionState>, next: SessionState) {
    state_tx.send_if_modified(|state| {
        if *state == next {
            false
        } else {
            *state = next;
            true
        }
    });
}

fn publish_recipe(state_tx: &watch::Sender<RecipeState>, next: RecipeState) {
    state_tx.send_if_modified(|state| {
        if *state == next {
            false
        } else {
            *state = next;
            true
        }
    });
}

/// Drive sessions under the retry policy until cancelled or exhausted.
async fn supervise(
    session: Session,
    config: ClientConfig,
    state_tx: Arc<watch::Sender<SessionState>>,
    store_slot: Arc<RwLock<Option<SharedStore>>>,
    cancel: CancellationToken,
) {
    let supervised = with_retry(&config.session_retry, |_| true, || {
        run_session_once(&session, &state_tx, &store_slot)
    });

    tokio::select! {
        _ = cancel.cancelled() => {
            debug!("session supervisor cancelled");
            *store_slot.write().await = None;
            publish_session(&state_tx, SessionState::Disconnected);
        }
        result = supervised => {
            if let Err(error) = result {
                warn!(error = %error, "session retry budget exhausted");
                *store_slot.write().await = None;
                let terminal = match error {
                    CoordinationError::AuthenticationFailed => SessionState::AuthFailed,
                    CoordinationError::SessionExpired => SessionState::Expired,
                    _ => SessionState::Disconnected,
                };
                publish_session(&state_tx, terminal);
            }
        }
    }
}

/// Run one session to its terminal failure, forwarding its states.
///
/// Terminal session states are not forwarded here: while the
/// supervisor still has retry budget, dependents observe a
/// reconnecting session as disconnected. The terminal error becomes
/// this function's return value and, once the budget is exhausted,
/// the published state.
async fn run_session_once(
    session: &Session,
    state_tx: &watch::Sender<SessionState>,
    store_slot: &RwLock<Option<SharedStore>>,
) -> Result<(), CoordinationError> {
    let handle = session.activate();
    *store_slot.write().await = Some(handle.store());
    let mut states = handle.subscribe();

    let error = loop {
        let state = states.borrow_and_update().clone();
        if let Some(error) = state.terminal_error() {
            break error;
        }
        publish_session(state_tx, state);
        if states.changed().await.is_err() {
            break CoordinationError::Store {
                source: StoreError::Internal {
                    reason: "session signal ended unexpectedly".to_string(),
                },
            };
        }
    };

    *store_slot.write().await = None;
    publish_session(state_tx, SessionState::Disconnected);
    handle.stop().await;
    Err(error)
}

/// Why the forwarding loop around one recipe activation ended.
enum GateOutcome {
    /// The recipe signal terminated; the gate is finished.
    Finished,
    /// The session left the connected state; tear down and re-gate.
    SessionLost,
    /// The observation was cancelled.
    Cancelled,
}

/// Gate one recipe on the session signal.
///
/// While the session is connected, the recipe drives the observed
/// state; otherwise the observation deterministically reads "not
/// holding". A terminal session state fails the observation.
async fn gate_recipe<F>(
    mut session_rx: watch::Receiver<SessionState>,
    store_slot: Arc<RwLock<Option<SharedStore>>>,
    make_recipe: F,
    state_tx: watch::Sender<RecipeState>,
    cancel: CancellationToken,
) where
    F: Fn(SharedStore) -> RecipeHandle + Send + 'static,
{
    loop {
        let session_state = session_rx.borrow_and_update().clone();
        if let Some(error) = session_state.terminal_error() {
            let _ = state_tx.send(RecipeState::Failed(error));
            return;
        }

        let store = if session_state.is_connected() {
            store_slot.read().await.clone()
        } else {
            None
        };

        let Some(store) = store else {
            publish_recipe(&state_tx, RecipeState::Seeking(false));
            tokio::select! {
                _ = cancel.cancelled() => return,
                changed = session_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
            continue;
        };

        let recipe = make_recipe(store);
        let mut recipe_rx = recipe.subscribe();

        let outcome = loop {
            let recipe_state = recipe_rx.borrow_and_update().clone();
            let terminal = recipe_state.is_terminal();
            if !matches!(recipe_state, RecipeState::Pending) {
                publish_recipe(&state_tx, recipe_state);
            }
            if terminal {
                break GateOutcome::Finished;
            }

            tokio::select! {
                _ = cancel.cancelled() => break GateOutcome::Cancelled,
                changed = recipe_rx.changed() => {
                    if changed.is_err() {
                        break GateOutcome::Finished;
                    }
                }
                changed = session_rx.changed() => {
                    if changed.is_err() {
                        break GateOutcome::Cancelled;
                    }
                    if !session_rx.borrow().is_connected() {
                        break GateOutcome::SessionLost;
                    }
                }
            }
        };

        recipe.stop().await;
        match outcome {
            GateOutcome::Finished | GateOutcome::Cancelled => return,
            GateOutcome::SessionLost => {
                debug!("session left connected state, suspending observation");
                publish_recipe(&state_tx, RecipeState::Seeking(false));
            }
        }
    }
}
