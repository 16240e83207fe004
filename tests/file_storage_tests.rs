mod common;

use common::{KEY, Recorder, TodoState, added, dummy_event, ids, recv_until, todo_reducer};
use eventstash::action::{LOAD_EVENTS_DONE, load_events};
use eventstash::storage::key_file_name;
use eventstash::{
    EventSourcingMiddleware, EventStore, FileStorage, LockMode, Pipeline, Storage, StoreError,
    create_event_action,
};
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;

#[tokio::test]
async fn test_missing_key_reads_none() {
    let dir = tempdir().unwrap();
    let storage = FileStorage::open(dir.path()).unwrap();
    assert_eq!(storage.get_item("nothing").await.unwrap(), None);
}

#[tokio::test]
async fn test_set_get_remove() {
    let dir = tempdir().unwrap();
    let storage = FileStorage::open(dir.path()).unwrap();

    storage.set_item("k", "v1").await.unwrap();
    assert_eq!(storage.get_item("k").await.unwrap().as_deref(), Some("v1"));

    storage.set_item("k", "v2").await.unwrap();
    assert_eq!(storage.get_item("k").await.unwrap().as_deref(), Some("v2"));

    storage.remove_item("k").await.unwrap();
    assert_eq!(storage.get_item("k").await.unwrap(), None);
}

#[tokio::test]
async fn test_remove_missing_key_is_ok() {
    let dir = tempdir().unwrap();
    let storage = FileStorage::open(dir.path()).unwrap();
    storage.remove_item("never-written").await.unwrap();
}

#[tokio::test]
async fn test_keys_map_to_hashed_file_names() {
    let dir = tempdir().unwrap();
    let storage = FileStorage::open(dir.path()).unwrap();

    storage.set_item("EVENT-SOURCING/../weird key", "x").await.unwrap();

    let name = key_file_name("EVENT-SOURCING/../weird key");
    assert!(name.ends_with(".json"));
    assert_eq!(name.len(), 16 + ".json".len());
    assert_eq!(fs::read_to_string(dir.path().join(&name)).unwrap(), "x");
    assert_ne!(key_file_name("a"), key_file_name("b"));
}

#[tokio::test]
async fn test_no_tmp_file_left_after_write() {
    let dir = tempdir().unwrap();
    let storage = FileStorage::open(dir.path()).unwrap();
    storage.set_item(KEY, "[]").await.unwrap();

    let tmp = storage.path_for(KEY).with_extension("json.tmp");
    assert!(!tmp.exists());
}

#[tokio::test]
async fn test_leftover_tmp_file_is_ignored() {
    let dir = tempdir().unwrap();
    let storage = FileStorage::open(dir.path()).unwrap();
    storage.set_item(KEY, "old").await.unwrap();

    // Simulate a crash between writing the .tmp and renaming it.
    let tmp = storage.path_for(KEY).with_extension("json.tmp");
    fs::write(&tmp, "half-writ").unwrap();

    assert_eq!(storage.get_item(KEY).await.unwrap().as_deref(), Some("old"));

    storage.set_item(KEY, "new").await.unwrap();
    assert_eq!(storage.get_item(KEY).await.unwrap().as_deref(), Some("new"));
}

#[test]
fn test_second_open_fails_while_locked() {
    let dir = tempdir().unwrap();
    let _first = FileStorage::open(dir.path()).unwrap();

    let err = FileStorage::open(dir.path()).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);
    assert!(
        err.to_string().contains("another process holds the lock"),
        "{err}"
    );
}

#[test]
fn test_lock_released_on_drop() {
    let dir = tempdir().unwrap();
    {
        let _storage = FileStorage::open(dir.path()).unwrap();
    }
    let _again = FileStorage::open(dir.path()).unwrap();
}

#[test]
fn test_lock_mode_none_allows_multiple() {
    let dir = tempdir().unwrap();
    let _a = FileStorage::open_with_lock(dir.path(), LockMode::None).unwrap();
    let _b = FileStorage::open_with_lock(dir.path(), LockMode::None).unwrap();
}

#[test]
fn test_open_creates_directory() {
    let dir = tempdir().unwrap();
    let nested = dir.path().join("a").join("b");
    let storage = FileStorage::open(&nested).unwrap();
    assert!(nested.is_dir());
    assert_eq!(storage.dir(), nested.as_path());
}

#[tokio::test]
async fn test_store_holds_lock_until_closed() {
    let dir = tempdir().unwrap();
    let storage: Arc<dyn Storage> = Arc::new(FileStorage::open(dir.path()).unwrap());
    let store = EventStore::open(KEY, storage).unwrap();
    store.append(dummy_event("a1", "X")).await.unwrap();
    store.flush().await.unwrap();

    let err = FileStorage::open(dir.path()).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);

    store.close().await;
    let _again = FileStorage::open(dir.path()).unwrap();
}

#[tokio::test]
async fn test_close_finishes_queued_appends() {
    let dir = tempdir().unwrap();
    let storage: Arc<dyn Storage> = Arc::new(FileStorage::open(dir.path()).unwrap());
    let store = EventStore::open(KEY, storage).unwrap();
    let other = store.clone();

    // Not awaited: the appends are already queued ahead of the close.
    let _ = store.append(dummy_event("a1", "X"));
    let _ = store.append(dummy_event("b2", "Y"));
    store.close().await;

    assert!(matches!(other.load_all().await, Err(StoreError::Closed)));

    let storage = FileStorage::open(dir.path()).unwrap();
    let raw = storage.get_item(KEY).await.unwrap().unwrap();
    assert!(raw.contains("a1") && raw.contains("b2"), "{raw}");
}

#[tokio::test]
async fn test_event_log_survives_restart() {
    let dir = tempdir().unwrap();

    {
        let storage: Arc<dyn Storage> = Arc::new(FileStorage::open(dir.path()).unwrap());
        let store = EventStore::open(KEY, storage).unwrap();
        store.append(dummy_event("a1", "X")).await.unwrap();
        store.append(dummy_event("b2", "Y")).await.unwrap();
        store.close().await;
    }

    let storage: Arc<dyn Storage> = Arc::new(FileStorage::open(dir.path()).unwrap());
    let store = EventStore::open(KEY, storage).unwrap();
    assert_eq!(ids(&store.load_all().await.unwrap()), vec!["a1", "b2"]);
}

#[tokio::test]
async fn test_replay_from_disk_rebuilds_state() {
    let dir = tempdir().unwrap();

    {
        let middleware = EventSourcingMiddleware::builder(KEY)
            .storage(FileStorage::open(dir.path()).unwrap())
            .build()
            .unwrap();
        let store = middleware.store().clone();
        let pipeline = Pipeline::builder(TodoState::default(), todo_reducer)
            .middleware(middleware)
            .build();
        pipeline.dispatch(create_event_action(&added("t1", "buy milk"), None).into_action());
        pipeline.dispatch(create_event_action(&added("t2", "write docs"), None).into_action());
        store.close().await;
    }

    let middleware = EventSourcingMiddleware::builder(KEY)
        .storage(FileStorage::open(dir.path()).unwrap())
        .build()
        .unwrap();
    let (recorder, mut rx) = Recorder::new();
    let pipeline = Pipeline::builder(TodoState::default(), todo_reducer)
        .middleware(middleware)
        .middleware(recorder)
        .build();

    pipeline.dispatch(load_events());
    recv_until(&mut rx, LOAD_EVENTS_DONE).await;

    let titles: Vec<_> = pipeline
        .get_state()
        .items
        .into_iter()
        .map(|i| i.title)
        .collect();
    assert_eq!(titles, vec!["buy milk", "write docs"]);
}
