//! Integration tests for the StateStore state machine and queries
//!
//! Each test creates a fresh in-memory database unless it needs two stores
//! on one file, which stands in for two processes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use mirrorfs_core::config::ConfigBuilder;
use mirrorfs_core::domain::{IllegalTransition, InodeId, InodeState, Transition};
use mirrorfs_core::ports::IInodeStateStore;
use mirrorfs_state::{StateStore, StoreError};

// ============================================================================
// Test helpers
// ============================================================================

async fn setup() -> StateStore {
    StateStore::in_memory()
        .await
        .expect("Failed to create in-memory store")
}

fn inode(n: u64) -> InodeId {
    InodeId::new(n)
}

/// Puts `id` into CLEAN through the only legal path from ABSENT
async fn make_clean(store: &StateStore, id: InodeId) {
    store.mark_dirty(id).await.unwrap();
    store.mark_clean(id).await.unwrap();
}

fn assert_illegal(
    result: Result<(), StoreError>,
    transition: Transition,
    current: Option<InodeState>,
) {
    match result {
        Err(StoreError::IllegalTransition(IllegalTransition {
            transition: t,
            current: c,
            ..
        })) => {
            assert_eq!(t, transition);
            assert_eq!(c, current);
        }
        other => panic!("expected IllegalTransition, got {other:?}"),
    }
}

// ============================================================================
// Single transitions
// ============================================================================

#[tokio::test]
async fn test_untracked_inode_is_absent() {
    let store = setup().await;
    assert_eq!(store.state_of(inode(1)).await.unwrap(), None);
}

#[tokio::test]
async fn test_mark_dirty_then_clean_yields_clean() {
    let store = setup().await;

    for n in [1, 2, 500, u64::MAX] {
        store.mark_dirty(inode(n)).await.unwrap();
        assert_eq!(
            store.state_of(inode(n)).await.unwrap(),
            Some(InodeState::Dirty)
        );
        store.mark_clean(inode(n)).await.unwrap();
        assert_eq!(
            store.state_of(inode(n)).await.unwrap(),
            Some(InodeState::Clean)
        );
    }
}

#[tokio::test]
async fn test_mark_remote_requires_clean() {
    let store = setup().await;

    // ABSENT
    assert_illegal(
        store.mark_remote(inode(1)).await,
        Transition::MarkRemote,
        None,
    );

    // DIRTY
    store.mark_dirty(inode(1)).await.unwrap();
    assert_illegal(
        store.mark_remote(inode(1)).await,
        Transition::MarkRemote,
        Some(InodeState::Dirty),
    );

    // TODELETE
    store.mark_todelete(inode(1)).await.unwrap();
    assert_illegal(
        store.mark_remote(inode(1)).await,
        Transition::MarkRemote,
        Some(InodeState::ToDelete),
    );

    // CLEAN
    make_clean(&store, inode(2)).await;
    store.mark_remote(inode(2)).await.unwrap();
    assert_eq!(
        store.state_of(inode(2)).await.unwrap(),
        Some(InodeState::Remote)
    );

    // REMOTE
    assert_illegal(
        store.mark_remote(inode(2)).await,
        Transition::MarkRemote,
        Some(InodeState::Remote),
    );
}

#[tokio::test]
async fn test_illegal_transition_leaves_state_unchanged() {
    let store = setup().await;
    make_clean(&store, inode(4)).await;
    store.mark_remote(inode(4)).await.unwrap();

    assert!(store.mark_dirty(inode(4)).await.is_err());
    assert!(store.mark_clean(inode(4)).await.is_err());
    assert!(store.mark_todelete(inode(4)).await.is_err());
    assert!(store.mark_deleted(inode(4)).await.is_err());

    assert_eq!(
        store.state_of(inode(4)).await.unwrap(),
        Some(InodeState::Remote)
    );
}

#[tokio::test]
async fn test_absent_is_reported_as_illegal_transition() {
    let store = setup().await;

    for transition in Transition::ALL {
        if transition == Transition::MarkDirty {
            continue;
        }
        assert_illegal(store.transition(inode(9), transition).await, transition, None);
    }
    assert_eq!(store.state_of(inode(9)).await.unwrap(), None);
}

#[tokio::test]
async fn test_mark_deleted_requires_todelete_and_removes_record() {
    let store = setup().await;

    store.mark_dirty(inode(5)).await.unwrap();
    assert_illegal(
        store.mark_deleted(inode(5)).await,
        Transition::MarkDeleted,
        Some(InodeState::Dirty),
    );

    store.mark_todelete(inode(5)).await.unwrap();
    store.mark_deleted(inode(5)).await.unwrap();
    assert_eq!(store.state_of(inode(5)).await.unwrap(), None);

    for state in InodeState::ALL {
        let ids: Vec<_> = store.inodes_in_state(state).await.unwrap().collect();
        assert!(!ids.contains(&inode(5)), "inode 5 still listed as {state}");
    }

    let row_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM states WHERE inode = 5")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(row_count, 0);
}

#[tokio::test]
async fn test_mark_todelete_is_idempotent() {
    let store = setup().await;
    make_clean(&store, inode(6)).await;

    store.mark_todelete(inode(6)).await.unwrap();
    store.mark_todelete(inode(6)).await.unwrap();
    assert_eq!(
        store.state_of(inode(6)).await.unwrap(),
        Some(InodeState::ToDelete)
    );
}

#[tokio::test]
async fn test_mark_dirty_is_idempotent_and_revives_todelete() {
    let store = setup().await;

    store.mark_dirty(inode(8)).await.unwrap();
    store.mark_dirty(inode(8)).await.unwrap();
    store.mark_todelete(inode(8)).await.unwrap();
    store.mark_dirty(inode(8)).await.unwrap();

    assert_eq!(
        store.state_of(inode(8)).await.unwrap(),
        Some(InodeState::Dirty)
    );
}

#[tokio::test]
async fn test_transitions_touch_only_their_inode() {
    let store = setup().await;
    store.mark_dirty(inode(1)).await.unwrap();
    store.mark_dirty(inode(2)).await.unwrap();

    store.mark_clean(inode(1)).await.unwrap();

    assert_eq!(
        store.state_of(inode(1)).await.unwrap(),
        Some(InodeState::Clean)
    );
    assert_eq!(
        store.state_of(inode(2)).await.unwrap(),
        Some(InodeState::Dirty)
    );
}

// ============================================================================
// End-to-end sequences
// ============================================================================

#[tokio::test]
async fn test_lifecycle_from_absent_through_deletion() {
    let store = setup().await;
    let id = inode(7);

    assert_eq!(store.state_of(id).await.unwrap(), None);
    store.mark_dirty(id).await.unwrap();
    assert_eq!(store.state_of(id).await.unwrap(), Some(InodeState::Dirty));
    store.mark_todelete(id).await.unwrap();
    assert_eq!(
        store.state_of(id).await.unwrap(),
        Some(InodeState::ToDelete)
    );
    store.mark_deleted(id).await.unwrap();
    assert_eq!(store.state_of(id).await.unwrap(), None);

    assert_illegal(
        store.mark_downloaded(id).await,
        Transition::MarkDownloaded,
        None,
    );
}

#[tokio::test]
async fn test_lifecycle_evict_download_modify() {
    let store = setup().await;
    let id = inode(3);
    make_clean(&store, id).await;

    store.mark_remote(id).await.unwrap();
    assert_eq!(store.state_of(id).await.unwrap(), Some(InodeState::Remote));
    store.mark_downloaded(id).await.unwrap();
    assert_eq!(store.state_of(id).await.unwrap(), Some(InodeState::Clean));
    store.mark_dirty(id).await.unwrap();
    assert_eq!(store.state_of(id).await.unwrap(), Some(InodeState::Dirty));

    assert_illegal(
        store.mark_remote(id).await,
        Transition::MarkRemote,
        Some(InodeState::Dirty),
    );
    assert_eq!(store.state_of(id).await.unwrap(), Some(InodeState::Dirty));
}

// ============================================================================
// Enumeration
// ============================================================================

#[tokio::test]
async fn test_dirty_inodes_returns_exactly_dirty_set() {
    let store = setup().await;

    for n in 1..=5 {
        store.mark_dirty(inode(n)).await.unwrap();
    }
    store.mark_clean(inode(2)).await.unwrap();
    store.mark_todelete(inode(4)).await.unwrap();
    make_clean(&store, inode(10)).await;
    store.mark_remote(inode(10)).await.unwrap();

    let dirty: HashSet<_> = store.dirty_inodes().await.unwrap().collect();
    assert_eq!(dirty, HashSet::from([inode(1), inode(3), inode(5)]));

    let todelete: HashSet<_> = store.todelete_inodes().await.unwrap().collect();
    assert_eq!(todelete, HashSet::from([inode(4)]));

    let remote: HashSet<_> = store
        .inodes_in_state(InodeState::Remote)
        .await
        .unwrap()
        .collect();
    assert_eq!(remote, HashSet::from([inode(10)]));
}

#[tokio::test]
async fn test_snapshot_is_not_affected_by_later_changes() {
    let store = setup().await;
    store.mark_dirty(inode(1)).await.unwrap();
    store.mark_dirty(inode(2)).await.unwrap();

    let snapshot = store.dirty_inodes().await.unwrap();
    assert_eq!(snapshot.len(), 2);

    store.mark_clean(inode(1)).await.unwrap();
    store.mark_dirty(inode(3)).await.unwrap();

    let ids: HashSet<_> = snapshot.collect();
    assert_eq!(ids, HashSet::from([inode(1), inode(2)]));
}

#[tokio::test]
async fn test_store_usable_while_iterating_snapshot() {
    let store = setup().await;
    for n in 1..=3 {
        store.mark_dirty(inode(n)).await.unwrap();
    }

    for id in store.dirty_inodes().await.unwrap() {
        store.mark_clean(id).await.unwrap();
    }

    assert_eq!(store.dirty_inodes().await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_count_by_state_includes_empty_states() {
    let store = setup().await;
    store.mark_dirty(inode(1)).await.unwrap();
    store.mark_dirty(inode(2)).await.unwrap();
    store.mark_todelete(inode(2)).await.unwrap();

    let counts = store.count_by_state().await.unwrap();
    assert_eq!(counts.len(), 4);
    assert_eq!(counts[&InodeState::Dirty], 1);
    assert_eq!(counts[&InodeState::ToDelete], 1);
    assert_eq!(counts[&InodeState::Clean], 0);
    assert_eq!(counts[&InodeState::Remote], 0);
}

#[tokio::test]
async fn test_unknown_label_in_database_is_serialization_error() {
    let store = setup().await;
    // Bypass the CHECK constraint to simulate a database written by a
    // different schema version.
    sqlx::query("PRAGMA ignore_check_constraints = ON")
        .execute(store.pool())
        .await
        .unwrap();
    sqlx::query("INSERT INTO states (inode, state) VALUES (1, 'STALE')")
        .execute(store.pool())
        .await
        .unwrap();

    let result = store.state_of(inode(1)).await;
    assert!(matches!(result, Err(StoreError::SerializationError(_))));

    let result = store.mark_dirty(inode(1)).await;
    assert!(matches!(result, Err(StoreError::SerializationError(_))));
}

// ============================================================================
// Sharing
// ============================================================================

#[tokio::test]
async fn test_two_stores_on_one_file_see_each_other() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.db");

    let fs_layer = StateStore::open(&path).await.unwrap();
    let upload_worker = StateStore::open(&path).await.unwrap();

    fs_layer.mark_dirty(inode(12)).await.unwrap();
    let dirty: Vec<_> = upload_worker.dirty_inodes().await.unwrap().collect();
    assert_eq!(dirty, vec![inode(12)]);

    upload_worker.mark_clean(inode(12)).await.unwrap();
    assert_eq!(
        fs_layer.state_of(inode(12)).await.unwrap(),
        Some(InodeState::Clean)
    );

    // The second clean attempt sees the first one's commit
    assert_illegal(
        fs_layer.mark_clean(inode(12)).await,
        Transition::MarkClean,
        Some(InodeState::Clean),
    );

    fs_layer.close().await;
    upload_worker.close().await;
}

#[tokio::test]
async fn test_concurrent_same_inode_transitions_serialize() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.db");

    let a = Arc::new(StateStore::open(&path).await.unwrap());
    let b = Arc::new(StateStore::open(&path).await.unwrap());
    a.mark_dirty(inode(20)).await.unwrap();

    // Both try DIRTY -> CLEAN; exactly one can see DIRTY
    let (ra, rb) = tokio::join!(a.mark_clean(inode(20)), b.mark_clean(inode(20)));
    let successes = [ra.is_ok(), rb.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(successes, 1);
    assert_eq!(
        a.state_of(inode(20)).await.unwrap(),
        Some(InodeState::Clean)
    );
}

#[tokio::test]
async fn test_timed_out_transition_does_not_wedge_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.db");
    let store = StateStore::open(&path).await.unwrap();
    let other = StateStore::open(&path).await.unwrap();

    // Another process holds the database write lock
    let mut writer = other.pool().acquire().await.unwrap();
    sqlx::query("BEGIN IMMEDIATE")
        .execute(&mut *writer)
        .await
        .unwrap();

    let waited =
        tokio::time::timeout(Duration::from_millis(200), store.mark_dirty(inode(30))).await;
    assert!(waited.is_err());

    sqlx::query("ROLLBACK").execute(&mut *writer).await.unwrap();
    drop(writer);

    store.mark_dirty(inode(31)).await.unwrap();
    other.mark_dirty(inode(32)).await.unwrap();
    store.lock(inode(31), 0).await.unwrap().release().await.unwrap();

    let dirty: HashSet<_> = other.dirty_inodes().await.unwrap().collect();
    assert_eq!(dirty, HashSet::from([inode(31), inode(32)]));
}

#[tokio::test]
async fn test_shared_store_across_tasks() {
    let store = Arc::new(setup().await);

    let mut handles = Vec::new();
    for n in 0..16 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store.mark_dirty(inode(n)).await.unwrap();
            store.mark_clean(inode(n)).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let counts = store.count_by_state().await.unwrap();
    assert_eq!(counts[&InodeState::Clean], 16);
}

#[tokio::test]
async fn test_from_config_uses_configured_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cfg").join("state.db");
    let config = ConfigBuilder::new()
        .store_path(path.clone())
        .store_busy_timeout_secs(1)
        .locking_max_retries(2)
        .build();

    let store = StateStore::from_config(&config).await.unwrap();
    store.mark_dirty(inode(1)).await.unwrap();
    assert_eq!(store.lock_policy().max_retries, 2);
    store.close().await;

    let reopened = StateStore::open(&path).await.unwrap();
    assert_eq!(
        reopened.state_of(inode(1)).await.unwrap(),
        Some(InodeState::Dirty)
    );
}

// ============================================================================
// Port
// ============================================================================

#[tokio::test]
async fn test_port_reports_illegal_transition() {
    let store = setup().await;
    let port: &dyn IInodeStateStore = &store;

    port.apply_transition(inode(1), Transition::MarkDirty)
        .await
        .unwrap();
    assert_eq!(
        port.list_inodes(InodeState::Dirty).await.unwrap(),
        vec![inode(1)]
    );

    let err = port
        .apply_transition(inode(1), Transition::MarkDownloaded)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::IllegalTransition(_))
    ));
    assert_eq!(
        port.get_state(inode(1)).await.unwrap(),
        Some(InodeState::Dirty)
    );
    assert_eq!(
        port.count_inodes_by_state().await.unwrap()[&InodeState::Dirty],
        1
    );
}
