//! Integration tests for SqliteStateStore
//!
//! Each test creates a fresh in-memory database for isolation.

use chrono::{TimeZone, Utc};

use gdsync_core::domain::{Change, FileInfo, SyncState};
use gdsync_core::ports::IStateStore;
use gdsync_store::{DatabasePool, SqliteStateStore};

// ============================================================================
// Test helpers
// ============================================================================

/// Create a fresh in-memory store for each test
async fn setup() -> SqliteStateStore {
    let pool = DatabasePool::in_memory()
        .await
        .expect("Failed to create in-memory database");
    SqliteStateStore::new(pool.pool().clone())
}

fn sample_state(account_id: &str) -> SyncState {
    let mut state = SyncState::new(
        account_id,
        "root-id".parse().unwrap(),
        "100".parse().unwrap(),
    );
    let info = FileInfo {
        id: "f1".parse().unwrap(),
        name: "x.txt".to_string(),
        mime_type: "text/plain".to_string(),
        md5_checksum: Some("aaa".to_string()),
        size: Some(3),
        modified_time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        parents: vec!["root-id".parse().unwrap()],
        trashed: false,
    };
    state.file_info.insert(info.id.clone(), info);
    state
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_load_missing_returns_none() {
    let store = setup().await;
    let result = store.load("nobody").await.unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_save_and_load_roundtrip() {
    let store = setup().await;
    let state = sample_state("alice");

    store.save("alice", &state).await.unwrap();
    let loaded = store.load("alice").await.unwrap().unwrap();

    assert_eq!(loaded, state);
}

#[tokio::test]
async fn test_save_replaces_whole_document() {
    let store = setup().await;
    let mut state = sample_state("alice");
    store.save("alice", &state).await.unwrap();

    // Mutate and save again; the load must reflect only the latest save.
    state.synced = true;
    state.change_token = "200".parse().unwrap();
    state.file_info.clear();
    store.save("alice", &state).await.unwrap();

    let loaded = store.load("alice").await.unwrap().unwrap();
    assert!(loaded.synced);
    assert_eq!(loaded.change_token.as_str(), "200");
    assert!(loaded.file_info.is_empty());
}

#[tokio::test]
async fn test_accounts_are_isolated() {
    let store = setup().await;
    store.save("alice", &sample_state("alice")).await.unwrap();
    store.save("bob", &sample_state("bob")).await.unwrap();

    let alice = store.load("alice").await.unwrap().unwrap();
    let bob = store.load("bob").await.unwrap().unwrap();
    assert_eq!(alice.account_id, "alice");
    assert_eq!(bob.account_id, "bob");
}

#[tokio::test]
async fn test_pending_changes_survive_reload() {
    let store = setup().await;
    let mut state = sample_state("alice");

    let pending = Change {
        file_id: "f2".parse().unwrap(),
        removed: true,
        file: None,
    };
    state.changes_to_execute = Some(vec![pending.clone()]);
    store.save("alice", &state).await.unwrap();

    let loaded = store.load("alice").await.unwrap().unwrap();
    assert_eq!(loaded.changes_to_execute, Some(vec![pending]));
}

#[tokio::test]
async fn test_file_backed_store_persists() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("state").join("gdsync.db");

    {
        let pool = DatabasePool::new(&db_path).await.unwrap();
        let store = SqliteStateStore::new(pool.pool().clone());
        store.save("alice", &sample_state("alice")).await.unwrap();
    }

    // Re-open the same file and read the document back.
    let pool = DatabasePool::new(&db_path).await.unwrap();
    let store = SqliteStateStore::new(pool.pool().clone());
    let loaded = store.load("alice").await.unwrap().unwrap();
    assert_eq!(loaded.account_id, "alice");
}
