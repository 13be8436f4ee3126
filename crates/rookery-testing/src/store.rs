//! Deterministic in-memory coordination store.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use rookery_constants::coordination::SEQUENCE_SUFFIX_WIDTH;
use rookery_core::ChildrenReply;
use rookery_core::CoordinationStore;
use rookery_core::CreateMode;
use rookery_core::ExistsReply;
use rookery_core::NodeWatch;
use rookery_core::NodeWatchTrigger;
use rookery_core::SessionEvent;
use rookery_core::StoreError;
use tokio::sync::RwLock;
use tokio::sync::broadcast;

/// Capacity of each session's event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// One node in the namespace.
struct NodeRecord {
    /// Session that owns this node, when ephemeral.
    ephemeral_owner: Option<u64>,
    /// Global creation stamp, for ordered-by-creation listings.
    created_at: u64,
}

/// Namespace state shared by every session handle.
struct Namespace {
    /// Full path -> record.
    nodes: BTreeMap<String, NodeRecord>,
    /// Per-parent counter for sequential suffixes.
    next_sequence: HashMap<String, u64>,
    /// Global creation stamp source.
    created_counter: u64,
    /// One-shot watches on a parent's child set, keyed by parent path.
    child_watches: HashMap<String, Vec<NodeWatchTrigger>>,
    /// One-shot watches on a node's existence, keyed by node path.
    exists_watches: HashMap<String, Vec<NodeWatchTrigger>>,
}

impl Namespace {
    fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            next_sequence: HashMap::new(),
            created_counter: 0,
            child_watches: HashMap::new(),
            exists_watches: HashMap::new(),
        }
    }

    fn parent_of(path: &str) -> &str {
        match path.rfind('/') {
            Some(0) | None => "/",
            Some(idx) => &path[..idx],
        }
    }

    fn parent_exists(&self, parent: &str) -> bool {
        parent == "/" || self.nodes.contains_key(parent)
    }

    fn children_of(&self, parent: &str) -> Vec<String> {
        let prefix = if parent == "/" {
            "/".to_string()
        } else {
            format!("{parent}/")
        };
        let mut children: Vec<(u64, String)> = self
            .nodes
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter(|(path, _)| !path[prefix.len()..].contains('/'))
            .map(|(path, record)| (record.created_at, path[prefix.len()..].to_string()))
            .collect();
        children.sort_by_key(|(created_at, _)| *created_at);
        children.into_iter().map(|(_, name)| name).collect()
    }

    fn fire_child_watches(&mut self, parent: &str) {
        if let Some(triggers) = self.child_watches.remove(parent) {
            for trigger in triggers {
                trigger.fire();
            }
        }
    }

    fn fire_exists_watches(&mut self, path: &str) {
        if let Some(triggers) = self.exists_watches.remove(path) {
            for trigger in triggers {
                trigger.fire();
            }
        }
    }

    fn insert(&mut self, path: String, ephemeral_owner: Option<u64>) {
        self.created_counter += 1;
        let record = NodeRecord {
            ephemeral_owner,
            created_at: self.created_counter,
        };
        let parent = Self::parent_of(&path).to_string();
        self.nodes.insert(path.clone(), record);
        self.fire_exists_watches(&path);
        self.fire_child_watches(&parent);
    }

    fn delete(&mut self, path: &str) {
        self.nodes.remove(path);
        let parent = Self::parent_of(path).to_string();
        self.fire_exists_watches(path);
        self.fire_child_watches(&parent);
    }

    /// Remove every ephemeral node owned by `session_id`, firing watches.
    fn end_session(&mut self, session_id: u64) {
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, record)| record.ephemeral_owner == Some(session_id))
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            self.delete(&path);
        }
    }
}

/// A shared namespace that multiple session handles operate on.
///
/// Use this when a test needs several independent clients against one
/// logical store, e.g. two contenders for the same lock path.
pub struct SharedNamespace {
    state: Arc<RwLock<Namespace>>,
    next_session_id: AtomicU64,
}

impl Default for SharedNamespace {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedNamespace {
    /// Create an empty namespace.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(Namespace::new())),
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Open a new session handle onto this namespace.
    pub fn client(&self) -> Arc<DeterministicCoordinationStore> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(DeterministicCoordinationStore {
            state: self.state.clone(),
            session_id: self.next_session_id.fetch_add(1, Ordering::SeqCst),
            events,
            auto_connect_events: AtomicBool::new(true),
            fail_ops: AtomicU32::new(0),
            lose_create_ack: AtomicBool::new(false),
            connect_error: Mutex::new(None),
            connect_count: AtomicU32::new(0),
            close_count: AtomicU32::new(0),
            exists_calls: AtomicU64::new(0),
        })
    }
}

/// A deterministic in-memory coordination store session.
///
/// Implements the full store capability surface with predictable
/// behavior for testing. Each instance is one session; sessions created
/// from the same [`SharedNamespace`] see each other's nodes.
pub struct DeterministicCoordinationStore {
    state: Arc<RwLock<Namespace>>,
    session_id: u64,
    events: broadcast::Sender<SessionEvent>,
    auto_connect_events: AtomicBool,
    /// Remaining operations to fail with connection loss.
    fail_ops: AtomicU32,
    /// Apply the next create but report connection loss for it.
    lose_create_ack: AtomicBool,
    /// Error every `connect` call fails with, when set.
    connect_error: Mutex<Option<StoreError>>,
    connect_count: AtomicU32,
    close_count: AtomicU32,
    exists_calls: AtomicU64,
}

impl DeterministicCoordinationStore {
    /// Create a store with its own private namespace.
    pub fn new() -> Arc<Self> {
        SharedNamespace::new().client()
    }

    /// Suppress the automatic sync-connected event on `connect()`.
    ///
    /// Scripted tests then drive the session purely via [`emit`].
    ///
    /// [`emit`]: DeterministicCoordinationStore::emit
    pub fn manual_events(self: Arc<Self>) -> Arc<Self> {
        self.auto_connect_events.store(false, Ordering::SeqCst);
        self
    }

    /// Inject a session event.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Fail the next `count` node operations with connection loss.
    pub fn fail_ops(&self, count: u32) {
        self.fail_ops.store(count, Ordering::SeqCst);
    }

    /// Apply the next create server-side but lose its acknowledgement.
    ///
    /// This reproduces the ambiguous-create case: the node exists, the
    /// caller only sees a connection-loss error.
    pub fn lose_create_ack(&self) {
        self.lose_create_ack.store(true, Ordering::SeqCst);
    }

    /// Make every subsequent `connect` call fail with `error`.
    pub fn fail_connect(&self, error: StoreError) {
        *self.connect_error.lock().expect("connect_error lock poisoned") = Some(error);
    }

    /// End this session server-side: drop its ephemeral nodes, fire the
    /// affected watches, and emit the expired event.
    pub async fn expire_session(&self) {
        let mut state = self.state.write().await;
        state.end_session(self.session_id);
        drop(state);
        self.emit(SessionEvent::Expired);
    }

    /// Number of `connect` calls observed.
    pub fn connect_count(&self) -> u32 {
        self.connect_count.load(Ordering::SeqCst)
    }

    /// Number of `close` calls observed.
    pub fn close_count(&self) -> u32 {
        self.close_count.load(Ordering::SeqCst)
    }

    /// Number of `exists` calls observed. Watch-driven waiters should
    /// keep this near one call per actual change, never a poll storm.
    pub fn exists_calls(&self) -> u64 {
        self.exists_calls.load(Ordering::SeqCst)
    }

    /// Whether a node currently exists (test assertion helper).
    pub async fn node_exists(&self, path: &str) -> bool {
        self.state.read().await.nodes.contains_key(path)
    }

    /// Children of a node in creation order (test assertion helper).
    pub async fn children_of(&self, path: &str) -> Vec<String> {
        self.state.read().await.children_of(path)
    }

    fn take_injected_failure(&self) -> Option<StoreError> {
        let remaining = self.fail_ops.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_ops.store(remaining - 1, Ordering::SeqCst);
            return Some(StoreError::ConnectionLoss);
        }
        None
    }
}

#[async_trait]
impl CoordinationStore for DeterministicCoordinationStore {
    async fn connect(&self) -> Result<(), StoreError> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.connect_error.lock().expect("connect_error lock poisoned").clone() {
            return Err(error);
        }
        if self.auto_connect_events.load(Ordering::SeqCst) {
            self.emit(SessionEvent::SyncConnected);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.write().await;
        state.end_session(self.session_id);
        Ok(())
    }

    fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn create(&self, path: &str, _data: Option<Vec<u8>>, mode: CreateMode) -> Result<String, StoreError> {
        if let Some(err) = self.take_injected_failure() {
            return Err(err);
        }
        let lost_ack = self.lose_create_ack.swap(false, Ordering::SeqCst);

        let mut state = self.state.write().await;
        let parent = Namespace::parent_of(path).to_string();
        if !state.parent_exists(&parent) {
            return Err(StoreError::NoNode { path: parent });
        }

        let created_path = if mode.is_sequential() {
            let sequence = state.next_sequence.entry(parent.clone()).or_insert(0);
            let suffix = *sequence;
            *sequence += 1;
            format!("{path}{suffix:0width$}", width = SEQUENCE_SUFFIX_WIDTH)
        } else {
            if state.nodes.contains_key(path) {
                return Err(StoreError::NodeExists { path: path.to_string() });
            }
            path.to_string()
        };

        let owner = mode.is_ephemeral().then_some(self.session_id);
        state.insert(created_path.clone(), owner);
        drop(state);

        if lost_ack {
            return Err(StoreError::ConnectionLoss);
        }
        Ok(created_path)
    }

    async fn get_children(&self, path: &str, watch: bool) -> Result<ChildrenReply, StoreError> {
        if let Some(err) = self.take_injected_failure() {
            return Err(err);
        }
        let mut state = self.state.write().await;
        if !state.parent_exists(path) {
            return Err(StoreError::NoNode { path: path.to_string() });
        }
        let children = state.children_of(path);
        let watch = watch.then(|| {
            let (trigger, watch) = NodeWatch::pair();
            state.child_watches.entry(path.to_string()).or_default().push(trigger);
            watch
        });
        Ok(ChildrenReply { children, watch })
    }

    async fn exists(&self, path: &str, watch: bool) -> Result<ExistsReply, StoreError> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.take_injected_failure() {
            return Err(err);
        }
        let mut state = self.state.write().await;
        let exists = state.nodes.contains_key(path);
        let watch = watch.then(|| {
            let (trigger, watch) = NodeWatch::pair();
            state.exists_watches.entry(path.to_string()).or_default().push(trigger);
            watch
        });
        Ok(ExistsReply { exists, watch })
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        if let Some(err) = self.take_injected_failure() {
            return Err(err);
        }
        let mut state = self.state.write().await;
        if !state.nodes.contains_key(path) {
            return Err(StoreError::NoNode { path: path.to_string() });
        }
        let has_children = !state.children_of(path).is_empty();
        if has_children {
            return Err(StoreError::NotEmpty { path: path.to_string() });
        }
        state.delete(path);
        Ok(())
    }
}
