//! Node-watch primitives over the store capability surface.
//!
//! Uniform asynchronous operations the recipes are written against:
//! listing children (one-shot or continuously re-emitted), waiting for
//! a node to vanish, and thin create/remove wrappers. Waiting is always
//! push-based via the store's one-shot watches; nothing in this module
//! polls.

use std::sync::Arc;

use rookery_core::CoordinationStore;
use rookery_core::CreateMode;
use rookery_core::StoreError;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::CoordinationError;
use crate::identity::sorted_by_sequence;

/// Capacity of the channel behind [`watch_children`].
const CHILDREN_CHANNEL_CAPACITY: usize = 16;

/// Predicate applied to child node names.
pub type ChildFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Options for children listings.
#[derive(Default, Clone)]
pub struct ChildrenOptions {
    /// Keep only the children accepted by this predicate.
    pub filter: Option<ChildFilter>,
    /// Sort the (filtered) children by numeric sequence suffix.
    pub sort_by_sequence: bool,
}

fn apply_options(mut children: Vec<String>, options: &ChildrenOptions) -> Result<Vec<String>, CoordinationError> {
    if let Some(filter) = &options.filter {
        children.retain(|child| filter(child));
    }
    if options.sort_by_sequence {
        children = sorted_by_sequence(children)?;
    }
    Ok(children)
}

/// Create `path` and any missing intermediate nodes as persistent nodes.
///
/// Racing creators are tolerated: the node-exists code from a sibling's
/// concurrent create is not an error here.
pub async fn ensure_path<S>(store: &S, path: &str) -> Result<(), CoordinationError>
where
    S: CoordinationStore + ?Sized,
{
    let mut ancestor = String::new();
    for component in path.split('/').filter(|component| !component.is_empty()) {
        ancestor.push('/');
        ancestor.push_str(component);
        match store.create(&ancestor, None, CreateMode::Persistent).await {
            Ok(_) => {}
            Err(StoreError::NodeExists { .. }) => {}
            Err(error) => return Err(error.into()),
        }
    }
    Ok(())
}

/// List the children of `path` once, creating the path if needed.
///
/// Names come back without the parent prefix, filtered and sorted per
/// `options`.
pub async fn get_children<S>(store: &S, path: &str, options: &ChildrenOptions) -> Result<Vec<String>, CoordinationError>
where
    S: CoordinationStore + ?Sized,
{
    ensure_path(store, path).await?;
    let reply = store.get_children(path, false).await?;
    apply_options(reply.children, options)
}

/// Continuously observe the children of `path`.
///
/// Emits the current child set immediately and again after every
/// change, re-arming the one-shot store watch between emissions. The
/// stream never completes on its own: it ends only when the receiver
/// is dropped or an error is emitted as the final item.
pub fn watch_children<S>(
    store: Arc<S>,
    path: String,
    options: ChildrenOptions,
) -> mpsc::Receiver<Result<Vec<String>, CoordinationError>>
where
    S: CoordinationStore + ?Sized + 'static,
{
    let (tx, rx) = mpsc::channel(CHILDREN_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        if let Err(error) = drive_children_watch(store.as_ref(), &path, &options, &tx).await {
            let _ = tx.send(Err(error)).await;
        }
    });
    rx
}

async fn drive_children_watch<S>(
    store: &S,
    path: &str,
    options: &ChildrenOptions,
    tx: &mpsc::Sender<Result<Vec<String>, CoordinationError>>,
) -> Result<(), CoordinationError>
where
    S: CoordinationStore + ?Sized,
{
    ensure_path(store, path).await?;
    loop {
        let reply = store.get_children(path, true).await?;
        let children = apply_options(reply.children, options)?;
        if tx.send(Ok(children)).await.is_err() {
            debug!(path = %path, "children watch cancelled");
            return Ok(());
        }
        match reply.watch {
            Some(watch) => watch.triggered().await,
            None => return Err(missing_watch(path)),
        }
    }
}

/// Complete the instant `path` no longer exists.
///
/// Queries existence with a change watch and waits on the watch while
/// the node is present; emits once and returns when it is absent.
pub async fn wait_vanished<S>(store: &S, path: &str) -> Result<(), CoordinationError>
where
    S: CoordinationStore + ?Sized,
{
    loop {
        let reply = store.exists(path, true).await?;
        if !reply.exists {
            debug!(path = %path, "node vanished");
            return Ok(());
        }
        match reply.watch {
            Some(watch) => watch.triggered().await,
            None => return Err(missing_watch(path)),
        }
    }
}

/// Create a node, resolving with the actual created path.
pub async fn create_node<S>(store: &S, path: &str, mode: CreateMode) -> Result<String, CoordinationError>
where
    S: CoordinationStore + ?Sized,
{
    Ok(store.create(path, None, mode).await?)
}

/// Remove a node.
pub async fn remove_node<S>(store: &S, path: &str) -> Result<(), CoordinationError>
where
    S: CoordinationStore + ?Sized,
{
    Ok(store.remove(path).await?)
}

fn missing_watch(path: &str) -> CoordinationError {
    CoordinationError::Store {
        source: StoreError::Internal {
            reason: format!("store did not arm the requested watch on {path}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rookery_testing::DeterministicCoordinationStore;
    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn ensure_path_creates_intermediate_nodes() {
        let store = DeterministicCoordinationStore::new();
        ensure_path(store.as_ref(), "/locks/jobs/nightly").await.unwrap();

        assert!(store.node_exists("/locks").await);
        assert!(store.node_exists("/locks/jobs").await);
        assert!(store.node_exists("/locks/jobs/nightly").await);

        // a second call is a no-op, not a node-exists failure
        ensure_path(store.as_ref(), "/locks/jobs/nightly").await.unwrap();
    }

    #[tokio::test]
    async fn children_are_filtered_then_sorted() {
        let store = DeterministicCoordinationStore::new();
        store
            .create("/test", None, CreateMode::Persistent)
            .await
            .unwrap();
        for name in ["type-client-0000000003", "type-client-0000000001", "type-client-0000000002"] {
            store
                .create(&format!("/test/{name}"), None, CreateMode::Persistent)
                .await
                .unwrap();
        }

        let options = ChildrenOptions {
            filter: Some(Arc::new(|child: &str| !child.contains('2'))),
            sort_by_sequence: true,
        };
        let children = get_children(store.as_ref(), "/test", &options).await.unwrap();
        assert_eq!(children, vec![
            "type-client-0000000001".to_string(),
            "type-client-0000000003".to_string(),
        ]);
    }

    #[tokio::test]
    async fn watch_children_re_emits_on_change() {
        let store = DeterministicCoordinationStore::new();
        let mut stream = watch_children(store.clone(), "/queue".to_string(), ChildrenOptions::default());

        let first = stream.recv().await.unwrap().unwrap();
        assert!(first.is_empty());

        store
            .create("/queue/item", None, CreateMode::Persistent)
            .await
            .unwrap();
        let second = timeout(Duration::from_secs(1), stream.recv()).await.unwrap().unwrap().unwrap();
        assert_eq!(second, vec!["item".to_string()]);
    }

    #[tokio::test]
    async fn wait_vanished_wakes_on_removal_without_polling() {
        let store = DeterministicCoordinationStore::new();
        store.create("/gate", None, CreateMode::Persistent).await.unwrap();

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { wait_vanished(store.as_ref(), "/gate").await })
        };
        tokio::task::yield_now().await;

        store.remove("/gate").await.unwrap();
        timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap().unwrap();

        // one query to arm the watch, one to confirm absence
        assert_eq!(store.exists_calls(), 2);
    }

    #[tokio::test]
    async fn wait_vanished_returns_immediately_for_absent_node() {
        let store = DeterministicCoordinationStore::new();
        wait_vanished(store.as_ref(), "/never").await.unwrap();
        assert_eq!(store.exists_calls(), 1);
    }

    #[tokio::test]
    async fn create_and_remove_surface_store_errors_untranslated() {
        let store = DeterministicCoordinationStore::new();
        let err = remove_node(store.as_ref(), "/missing").await.unwrap_err();
        assert!(matches!(
            err,
            CoordinationError::Store {
                source: StoreError::NoNode { .. }
            }
        ));

        let created = create_node(store.as_ref(), "/a", CreateMode::Persistent).await.unwrap();
        assert_eq!(created, "/a");
    }
}
