use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use serde_json::json;
use tempfile::tempdir;

use crate::models::{AbandonedEntry, CacheEntry};

use super::*;

async fn assert_fifo_contract(store: &dyn DurableStore) {
    let base = Utc::now();
    for (offset, name) in ["orders.create", "orders.create", "chat.sendMessage"]
        .into_iter()
        .enumerate()
    {
        store
            .append_to_queue(
                name,
                &json!({"seq": offset}),
                base + Duration::milliseconds(offset as i64),
            )
            .await
            .expect("append");
    }

    let queue = store.read_queue().await.expect("read");
    let seqs = queue
        .iter()
        .map(|entry| entry.payload["seq"].as_u64().expect("seq"))
        .collect::<Vec<_>>();
    assert_eq!(seqs, vec![0, 1, 2]);
    assert!(queue.windows(2).all(|pair| pair[0].id < pair[1].id));
    assert!(queue.iter().all(|entry| entry.attempts == 0));
}

async fn assert_cache_overwrite_contract(store: &dyn DurableStore) {
    store
        .set(CacheEntry::new("orders_setAll", json!([{"id": "A"}])))
        .await
        .expect("first set");
    store
        .set(CacheEntry::new("orders_setAll", json!([{"id": "B"}])))
        .await
        .expect("second set");

    let keys = store.list_cache_keys().await.expect("keys");
    assert_eq!(keys, vec!["orders_setAll".to_string()]);
    let entry = store
        .get("orders_setAll")
        .await
        .expect("get")
        .expect("present");
    assert_eq!(entry.value, json!([{"id": "B"}]));
    assert!(store.get("products_setAll").await.expect("get").is_none());
}

async fn assert_attempt_and_remove_contract(store: &dyn DurableStore) {
    let entry = store
        .append_to_queue("orders.create", &json!({"id": "A"}), Utc::now())
        .await
        .expect("append");

    assert_eq!(store.record_attempt(entry.id, "503").await.expect("attempt"), 1);
    assert_eq!(
        store.record_attempt(entry.id, "timeout").await.expect("attempt"),
        2
    );
    let queue = store.read_queue().await.expect("read");
    assert_eq!(queue[0].attempts, 2);
    assert_eq!(queue[0].last_error.as_deref(), Some("timeout"));

    assert!(store.remove_from_queue(entry.id).await.expect("remove"));
    assert!(!store.remove_from_queue(entry.id).await.expect("remove again"));
    let err = store
        .record_attempt(entry.id, "gone")
        .await
        .expect_err("missing entry");
    assert_eq!(err.code(), "NOT_FOUND");
}

async fn assert_abandoned_contract(store: &dyn DurableStore) {
    let base = Utc::now();
    for (id, name) in [(7, "orders.create"), (9, "chat.sendMessage")] {
        let entry = QueueEntry {
            id,
            name: name.to_string(),
            payload: json!({"id": id}),
            queued_at: base,
            attempts: 4,
            last_error: Some("500".to_string()),
        };
        store
            .record_abandoned(&AbandonedEntry {
                entry,
                last_error: "500".to_string(),
                abandoned_at: base + Duration::seconds(id),
            })
            .await
            .expect("record abandoned");
    }

    let listed = store.list_abandoned(10).await.expect("list");
    assert_eq!(
        listed.iter().map(|item| item.entry.id).collect::<Vec<_>>(),
        vec![9, 7]
    );
    assert_eq!(store.list_abandoned(1).await.expect("list").len(), 1);
    assert!(store.list_abandoned(0).await.expect("list").is_empty());

    assert_eq!(store.counts().await.expect("counts").abandoned, 2);
    assert_eq!(store.purge_abandoned().await.expect("purge"), 2);
    assert!(store.list_abandoned(10).await.expect("list").is_empty());
}

async fn assert_counts_contract(store: &dyn DurableStore) {
    let empty = store.counts().await.expect("counts");
    assert_eq!(empty.pending, 0);
    assert!(empty.oldest_queued_at.is_none());

    let oldest = Utc::now() - Duration::minutes(5);
    store
        .append_to_queue("orders.create", &json!({}), oldest)
        .await
        .expect("append");
    store
        .append_to_queue("orders.create", &json!({}), Utc::now())
        .await
        .expect("append");
    store
        .set(CacheEntry::new("profile_set", json!({"name": "Ada"})))
        .await
        .expect("set");

    let counts = store.counts().await.expect("counts");
    assert_eq!(counts.pending, 2);
    assert_eq!(counts.cached_keys, 1);
    let reported = counts.oldest_queued_at.expect("oldest");
    assert_eq!(reported.timestamp_micros(), oldest.timestamp_micros());
}

fn open_sqlite(dir: &std::path::Path) -> SqliteDurableStore {
    SqliteDurableStore::open(dir.join("state.sqlite3")).expect("open")
}

#[tokio::test]
async fn memory_store_preserves_fifo_order() {
    assert_fifo_contract(&MemoryDurableStore::new()).await;
}

#[tokio::test]
async fn sqlite_store_preserves_fifo_order() {
    let temp = tempdir().expect("tempdir");
    assert_fifo_contract(&open_sqlite(temp.path())).await;
}

#[tokio::test]
async fn memory_store_cache_is_last_write_wins() {
    assert_cache_overwrite_contract(&MemoryDurableStore::new()).await;
}

#[tokio::test]
async fn sqlite_store_cache_is_last_write_wins() {
    let temp = tempdir().expect("tempdir");
    assert_cache_overwrite_contract(&open_sqlite(temp.path())).await;
}

#[tokio::test]
async fn memory_store_tracks_attempts_and_removal() {
    assert_attempt_and_remove_contract(&MemoryDurableStore::new()).await;
}

#[tokio::test]
async fn sqlite_store_tracks_attempts_and_removal() {
    let temp = tempdir().expect("tempdir");
    assert_attempt_and_remove_contract(&open_sqlite(temp.path())).await;
}

#[tokio::test]
async fn memory_store_keeps_dead_letters() {
    assert_abandoned_contract(&MemoryDurableStore::new()).await;
}

#[tokio::test]
async fn sqlite_store_keeps_dead_letters() {
    let temp = tempdir().expect("tempdir");
    assert_abandoned_contract(&open_sqlite(temp.path())).await;
}

#[tokio::test]
async fn memory_store_counts() {
    assert_counts_contract(&MemoryDurableStore::new()).await;
}

#[tokio::test]
async fn sqlite_store_counts() {
    let temp = tempdir().expect("tempdir");
    assert_counts_contract(&open_sqlite(temp.path())).await;
}

#[tokio::test]
async fn sqlite_queue_survives_reopen_and_never_reuses_ids() {
    let temp = tempdir().expect("tempdir");
    let first_id = {
        let store = open_sqlite(temp.path());
        let a = store
            .append_to_queue("orders.create", &json!({"id": "A"}), Utc::now())
            .await
            .expect("append a");
        let b = store
            .append_to_queue("orders.create", &json!({"id": "B"}), Utc::now())
            .await
            .expect("append b");
        store.record_attempt(a.id, "offline").await.expect("attempt");
        assert!(store.remove_from_queue(b.id).await.expect("remove b"));
        store
            .set(CacheEntry::new("orders_setAll", json!(["A"])))
            .await
            .expect("set");
        b.id
    };

    let reopened = open_sqlite(temp.path());
    let queue = reopened.read_queue().await.expect("read");
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].payload, json!({"id": "A"}));
    assert_eq!(queue[0].attempts, 1);
    assert_eq!(queue[0].last_error.as_deref(), Some("offline"));

    let c = reopened
        .append_to_queue("orders.create", &json!({"id": "C"}), Utc::now())
        .await
        .expect("append c");
    assert!(c.id > first_id, "ids must keep increasing after deletes");

    let cached = reopened
        .get("orders_setAll")
        .await
        .expect("get")
        .expect("cached");
    assert_eq!(cached.value, json!(["A"]));
    assert_eq!(
        reopened.schema_version().expect("version"),
        Some(migration::SCHEMA_VERSION)
    );
}

#[test]
fn sqlite_fresh_schema_is_version_one_with_full_queue_columns() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("state.sqlite3");
    let store = SqliteDurableStore::open(&path).expect("open");
    assert_eq!(store.schema_version().expect("version"), Some(1));
    drop(store);

    let conn = rusqlite::Connection::open(&path).expect("raw open");
    let mut stmt = conn
        .prepare("PRAGMA table_info(offline_queue)")
        .expect("table info");
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .expect("columns")
        .collect::<std::result::Result<Vec<_>, _>>()
        .expect("column names");
    assert_eq!(
        columns,
        vec!["id", "name", "payload_json", "queued_at", "attempts", "last_error"]
    );
}

#[tokio::test]
async fn sqlite_open_rejects_newer_schema() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("state.sqlite3");
    drop(SqliteDurableStore::open(&path).expect("open"));

    let conn = rusqlite::Connection::open(&path).expect("raw open");
    conn.execute(
        "UPDATE system_kv SET value = '99' WHERE key = 'schema_version'",
        [],
    )
    .expect("bump version");
    drop(conn);

    let err = SqliteDurableStore::open(&path).expect_err("newer schema");
    assert_eq!(err.code(), "VALIDATION_FAILED");
}

async fn assert_bounded_writes_commit_in_time(store: &dyn DurableStore) {
    let entry = store
        .append_to_queue_within(
            "orders.create",
            &json!({"id": "A"}),
            Utc::now(),
            StdDuration::from_secs(5),
        )
        .await
        .expect("append");
    let queue = store.read_queue().await.expect("read");
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].id, entry.id);

    store
        .set_within(
            CacheEntry::new("orders_setAll", json!(["A"])),
            StdDuration::from_secs(5),
        )
        .await
        .expect("set");
    let cached = store.get("orders_setAll").await.expect("get").expect("cached");
    assert_eq!(cached.value, json!(["A"]));
}

#[tokio::test]
async fn memory_store_bounded_writes_commit_in_time() {
    assert_bounded_writes_commit_in_time(&MemoryDurableStore::new()).await;
}

#[tokio::test]
async fn sqlite_store_bounded_writes_commit_in_time() {
    let temp = tempdir().expect("tempdir");
    assert_bounded_writes_commit_in_time(&open_sqlite(temp.path())).await;
}

#[tokio::test]
async fn sqlite_append_that_times_out_is_rolled_back() {
    let temp = tempdir().expect("tempdir");
    let store = open_sqlite(temp.path());

    let holder = store.hold_lock(StdDuration::from_millis(200));
    let err = store
        .append_to_queue_within(
            "orders.create",
            &json!({"id": "A"}),
            Utc::now(),
            StdDuration::from_millis(20),
        )
        .await
        .expect_err("lock is held past the deadline");
    assert_eq!(err.code(), "TIMEOUT");

    holder.join().expect("lock holder");
    tokio::time::sleep(StdDuration::from_millis(100)).await;
    assert!(store.read_queue().await.expect("read").is_empty());
    assert_eq!(store.counts().await.expect("counts").pending, 0);
}

#[tokio::test]
async fn sqlite_cache_write_that_times_out_never_overwrites_a_later_one() {
    let temp = tempdir().expect("tempdir");
    let store = open_sqlite(temp.path());

    let holder = store.hold_lock(StdDuration::from_millis(150));
    let err = store
        .set_within(
            CacheEntry::new("orders_setAll", json!([{"id": "A"}])),
            StdDuration::from_millis(20),
        )
        .await
        .expect_err("lock is held past the deadline");
    assert_eq!(err.code(), "TIMEOUT");
    holder.join().expect("lock holder");

    store
        .set_within(
            CacheEntry::new("orders_setAll", json!([{"id": "B"}])),
            StdDuration::from_secs(5),
        )
        .await
        .expect("later write");
    tokio::time::sleep(StdDuration::from_millis(100)).await;

    let cached = store.get("orders_setAll").await.expect("get").expect("cached");
    assert_eq!(cached.value, json!([{"id": "B"}]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_appends_are_serialized() {
    let temp = tempdir().expect("tempdir");
    let store = Arc::new(open_sqlite(temp.path()));

    let mut handles = Vec::new();
    for task in 0..8 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            for seq in 0..10 {
                store
                    .append_to_queue(
                        "chat.sendMessage",
                        &json!({"task": task, "seq": seq}),
                        Utc::now(),
                    )
                    .await
                    .expect("append");
            }
        }));
    }
    for handle in handles {
        handle.await.expect("join");
    }

    let queue = store.read_queue().await.expect("read");
    assert_eq!(queue.len(), 80);
    let mut ids = queue.iter().map(|entry| entry.id).collect::<Vec<_>>();
    ids.dedup();
    assert_eq!(ids.len(), 80);

    for task in 0..8 {
        let seqs = queue
            .iter()
            .filter(|entry| entry.payload["task"] == task)
            .map(|entry| entry.payload["seq"].as_i64().expect("seq"))
            .collect::<Vec<_>>();
        assert_eq!(seqs, (0..10).collect::<Vec<_>>(), "per-task order kept");
    }
}

#[cfg(unix)]
#[tokio::test]
async fn open_hardens_state_db_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let temp = tempdir().expect("tempdir");
    let db_path = temp.path().join("state.sqlite3");
    let store = SqliteDurableStore::open(&db_path).expect("open");
    store
        .append_to_queue("orders.create", &json!({}), Utc::now())
        .await
        .expect("append");

    let mode = std::fs::metadata(&db_path)
        .expect("metadata")
        .permissions()
        .mode()
        & 0o777;
    assert_eq!(mode, 0o600);
}
