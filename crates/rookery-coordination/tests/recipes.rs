//! End-to-end recipe behavior against the deterministic store.
//!
//! These tests compose the session state machine with the lock and
//! one-for-all recipes the way the facade does: every store handle
//! comes from an activated session, and sessions end the way real ones
//! do (close or expiry), taking their ephemeral nodes with them.

use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;

use rookery_coordination::ClientNodeIdentity;
use rookery_coordination::ExclusiveLock;
use rookery_coordination::OneForAll;
use rookery_coordination::RecipeHandle;
use rookery_coordination::RetryPolicy;
use rookery_coordination::Session;
use rookery_coordination::SessionHandle;
use rookery_coordination::SessionState;
use rookery_coordination::parse_client_node;
use rookery_core::CoordinationStore;
use rookery_testing::DeterministicCoordinationStore;
use rookery_testing::SharedNamespace;
use tokio::time::timeout;

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        initial_delay_ms: 1,
        delay_factor: 2.0,
        max_delay_ms: 2,
        max_retries: 3,
    }
}

fn identity(client: &str) -> ClientNodeIdentity {
    ClientNodeIdentity::new(client).expect("valid test identity")
}

async fn connected_session(store: Arc<DeterministicCoordinationStore>) -> SessionHandle {
    let session = Session::new(move || store.clone() as Arc<dyn CoordinationStore>);
    let handle = session.activate();
    let mut rx = handle.subscribe();
    timeout(Duration::from_secs(1), rx.wait_for(SessionState::is_connected))
        .await
        .expect("session never connected")
        .expect("session signal closed");
    handle
}

async fn wait_for_value(handle: &RecipeHandle, expected: Option<bool>) {
    let mut rx = handle.subscribe();
    timeout(Duration::from_secs(1), rx.wait_for(|state| state.value() == expected))
        .await
        .expect("timed out waiting for recipe value")
        .expect("recipe signal closed");
}

#[tokio::test]
async fn lock_passes_to_the_next_contender_when_a_session_expires() {
    let namespace = SharedNamespace::new();
    let store_a = namespace.client();
    let store_b = namespace.client();

    let session_a = connected_session(store_a.clone()).await;
    let session_b = connected_session(store_b.clone()).await;

    let lock_a = ExclusiveLock::new(session_a.store(), "/locks/job", identity("a"), fast_retry()).start();
    wait_for_value(&lock_a, Some(true)).await;

    let lock_b = ExclusiveLock::new(session_b.store(), "/locks/job", identity("b"), fast_retry()).start();
    wait_for_value(&lock_b, Some(false)).await;

    // A's session expires; its ephemeral node vanishes and B takes over
    store_a.expire_session().await;
    wait_for_value(&lock_b, Some(true)).await;

    lock_a.stop().await;
    lock_b.stop().await;
    session_a.stop().await;
    session_b.stop().await;
}

#[tokio::test]
async fn closing_the_leader_session_hands_leadership_over() {
    let namespace = SharedNamespace::new();
    let store_one = namespace.client();
    let store_two = namespace.client();

    let session_one = connected_session(store_one).await;
    let session_two = connected_session(store_two).await;

    let fired_one = Arc::new(AtomicU32::new(0));
    let fired_two = Arc::new(AtomicU32::new(0));

    let fired = fired_one.clone();
    let leader_one = OneForAll::new(
        session_one.store(),
        "/election",
        identity("one"),
        fast_retry(),
        move || {
            fired.fetch_add(1, Ordering::SeqCst);
        },
        || false,
    )
    .start();
    wait_for_value(&leader_one, Some(true)).await;

    let fired = fired_two.clone();
    let leader_two = OneForAll::new(
        session_two.store(),
        "/election",
        identity("two"),
        fast_retry(),
        move || {
            fired.fetch_add(1, Ordering::SeqCst);
        },
        || false,
    )
    .start();
    wait_for_value(&leader_two, Some(false)).await;
    assert_eq!(fired_two.load(Ordering::SeqCst), 0);

    // ending the leader's session removes its node; the survivor leads
    leader_one.stop().await;
    session_one.stop().await;
    wait_for_value(&leader_two, Some(true)).await;
    assert_eq!(fired_one.load(Ordering::SeqCst), 1);
    assert_eq!(fired_two.load(Ordering::SeqCst), 1);

    leader_two.stop().await;
    session_two.stop().await;
}

#[tokio::test]
async fn created_nodes_round_trip_through_the_parser() {
    let store = DeterministicCoordinationStore::new();
    let session = connected_session(store.clone()).await;

    let typed = identity("abc").with_type_id("job").expect("valid type id");
    let lock = ExclusiveLock::new(session.store(), "/locks/typed", typed.clone(), fast_retry()).start();
    wait_for_value(&lock, Some(true)).await;

    let children = store.children_of("/locks/typed").await;
    assert_eq!(children.len(), 1);
    let parsed = parse_client_node(&children[0], true).expect("created node must parse");
    assert_eq!(parsed.client, "abc");
    assert_eq!(parsed.type_id.as_deref(), Some("job"));
    assert_eq!(parsed.sequence, Some(0));

    lock.stop().await;
    session.stop().await;
}

#[tokio::test]
async fn grouped_identities_contend_in_separate_namespaces() {
    let namespace = SharedNamespace::new();
    let store_a = namespace.client();
    let store_b = namespace.client();

    let session_a = connected_session(store_a).await;
    let session_b = connected_session(store_b).await;

    let blue = identity("a").with_group_id("blue").expect("valid group");
    let green = identity("b").with_group_id("green").expect("valid group");

    // different groups never see each other's nodes, so both hold
    let lock_blue = ExclusiveLock::new(session_a.store(), "/locks/job", blue, fast_retry()).start();
    let lock_green = ExclusiveLock::new(session_b.store(), "/locks/job", green, fast_retry()).start();
    wait_for_value(&lock_blue, Some(true)).await;
    wait_for_value(&lock_green, Some(true)).await;

    lock_blue.stop().await;
    lock_green.stop().await;
    session_a.stop().await;
    session_b.stop().await;
}
