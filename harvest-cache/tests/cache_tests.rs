use harvest_cache::{CacheError, DurableCache};
use harvest_types::{
    CacheRecord, Entity, EntityKey, OperationKind, PendingOperation, Patch, WriteSource,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;

const TTL: Duration = Duration::from_secs(3600);

fn cache() -> DurableCache {
    DurableCache::open_in_memory(TTL).unwrap()
}

fn record(key: &str, coins: i64, version: u64) -> CacheRecord {
    CacheRecord::new(
        EntityKey::new(key),
        Entity::from_value(json!({"coins": coins})),
        version,
        WriteSource::Local,
    )
}

// ── Records ──────────────────────────────────────────────────────

#[test]
fn get_missing_key_is_none() {
    let cache = cache();
    assert!(cache.get(&EntityKey::new("user:1")).unwrap().is_none());
}

#[test]
fn put_then_get_round_trips() {
    let cache = cache();
    let rec = record("user:1", 100, 1);
    assert!(cache.put(&rec).unwrap());

    let loaded = cache.get(&EntityKey::new("user:1")).unwrap().unwrap();
    assert_eq!(loaded.data, rec.data);
    assert_eq!(loaded.version, 1);
    assert_eq!(loaded.source, WriteSource::Local);
}

#[test]
fn put_rejects_stale_version() {
    let cache = cache();
    assert!(cache.put(&record("user:1", 100, 5)).unwrap());

    // Same version: rejected.
    assert!(!cache.put(&record("user:1", 200, 5)).unwrap());
    // Lower version: rejected.
    assert!(!cache.put(&record("user:1", 200, 4)).unwrap());
    // The stored value is untouched.
    let loaded = cache.get(&EntityKey::new("user:1")).unwrap().unwrap();
    assert_eq!(loaded.data.counter("coins"), Some(100));

    // Higher version: accepted.
    assert!(cache.put(&record("user:1", 200, 6)).unwrap());
    let loaded = cache.get(&EntityKey::new("user:1")).unwrap().unwrap();
    assert_eq!(loaded.data.counter("coins"), Some(200));
}

#[test]
fn delete_removes_record() {
    let cache = cache();
    cache.put(&record("user:1", 1, 1)).unwrap();
    cache.delete(&EntityKey::new("user:1")).unwrap();
    assert!(cache.get(&EntityKey::new("user:1")).unwrap().is_none());
}

#[test]
fn list_filters_by_prefix() {
    let cache = cache();
    cache.put(&record("user:1", 1, 1)).unwrap();
    cache.put(&record("user:2", 2, 1)).unwrap();
    cache.put(&record("tasks", 0, 1)).unwrap();

    let users = cache.list("user:").unwrap();
    assert_eq!(users.len(), 2);
    assert_eq!(users[0].key.as_str(), "user:1");
    assert_eq!(users[1].key.as_str(), "user:2");

    assert_eq!(cache.list("").unwrap().len(), 3);
}

#[test]
fn expired_record_is_absent_and_lazily_deleted() {
    let cache = DurableCache::open_in_memory(Duration::from_millis(50)).unwrap();
    let mut rec = record("user:1", 1, 1);
    rec.cached_at -= 1_000; // written in the past
    cache.put(&rec).unwrap();

    assert!(cache.get(&EntityKey::new("user:1")).unwrap().is_none());
    // Deleted, so a version-1 write is accepted again.
    assert!(cache.put(&record("user:1", 2, 1)).unwrap());
}

#[test]
fn expired_records_are_excluded_from_list() {
    let cache = DurableCache::open_in_memory(Duration::from_millis(50)).unwrap();
    let mut old = record("user:1", 1, 1);
    old.cached_at -= 1_000;
    cache.put(&old).unwrap();
    cache.put(&record("user:2", 2, 1)).unwrap();

    let listed = cache.list("user:").unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].key.as_str(), "user:2");
}

#[test]
fn touch_keeps_record_alive() {
    let cache = DurableCache::open_in_memory(Duration::from_millis(200)).unwrap();
    let mut rec = record("user:1", 1, 1);
    rec.cached_at -= 150;
    cache.put(&rec).unwrap();

    cache.touch(&EntityKey::new("user:1")).unwrap();
    assert!(cache.get(&EntityKey::new("user:1")).unwrap().is_some());
}

#[test]
fn confirmed_baseline_round_trips() {
    let cache = cache();
    let confirmed = Entity::from_value(json!({"coins": 0}));
    let rec = record("user:1", 100, 1)
        .with_remote_revision(7)
        .with_confirmed(Some(confirmed.clone()));
    cache.put(&rec).unwrap();

    let loaded = cache.get(&EntityKey::new("user:1")).unwrap().unwrap();
    assert_eq!(loaded.remote_revision, 7);
    assert_eq!(loaded.confirmed, Some(confirmed));
}

#[test]
fn corrupt_record_reports_and_clears() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let cache = DurableCache::open(&path, TTL).unwrap();
    cache.put(&record("user:1", 1, 1)).unwrap();

    // Sabotage the stored JSON out-of-band.
    let raw = rusqlite::Connection::open(&path).unwrap();
    raw.execute("UPDATE records SET data = 'not json' WHERE key = 'user:1'", [])
        .unwrap();
    drop(raw);

    let err = cache.get(&EntityKey::new("user:1")).unwrap_err();
    assert!(matches!(err, CacheError::Corrupt { .. }));
    // Second read: row is gone, key is simply absent.
    assert!(cache.get(&EntityKey::new("user:1")).unwrap().is_none());
}

#[test]
fn corrupt_queued_op_is_dropped_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let cache = DurableCache::open(&path, TTL).unwrap();
    cache
        .enqueue_op(&PendingOperation::new(
            EntityKey::new("user:1"),
            OperationKind::Patch,
            Patch::new().add("coins", 1),
        ))
        .unwrap();
    cache
        .enqueue_op(&PendingOperation::new(
            EntityKey::new("user:2"),
            OperationKind::Patch,
            Patch::new().add("coins", 2),
        ))
        .unwrap();

    let raw = rusqlite::Connection::open(&path).unwrap();
    raw.execute("UPDATE ops SET patch = '{{' WHERE key = 'user:1'", [])
        .unwrap();
    drop(raw);

    let ops = cache.load_ops().unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].key.as_str(), "user:2");
    // The corrupt row was deleted, not just skipped.
    assert_eq!(cache.pending_op_count().unwrap(), 1);
}

#[test]
fn restart_rehydrates_records_and_queue() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");

    {
        let cache = DurableCache::open(&path, TTL).unwrap();
        cache.put(&record("user:1", 100, 3)).unwrap();
        cache
            .enqueue_op(&PendingOperation::new(
                EntityKey::new("user:1"),
                OperationKind::Patch,
                Patch::new().add("coins", 100),
            ))
            .unwrap();
    }

    let cache = DurableCache::open(&path, TTL).unwrap();
    let rec = cache.get(&EntityKey::new("user:1")).unwrap().unwrap();
    assert_eq!(rec.version, 3);
    assert_eq!(cache.pending_op_count().unwrap(), 1);
    let ops = cache.load_ops().unwrap();
    assert_eq!(ops[0].key.as_str(), "user:1");
    assert_eq!(ops[0].patch.deltas.get("coins"), Some(&100));
}

// ── Queue persistence ────────────────────────────────────────────

#[test]
fn ops_load_in_enqueue_order() {
    let cache = cache();
    for i in 0..5 {
        cache
            .enqueue_op(&PendingOperation::new(
                EntityKey::new("user:1"),
                OperationKind::Patch,
                Patch::new().add("coins", i),
            ))
            .unwrap();
    }

    let ops = cache.load_ops().unwrap();
    let deltas: Vec<i64> = ops
        .iter()
        .map(|op| *op.patch.deltas.get("coins").unwrap())
        .collect();
    assert_eq!(deltas, vec![0, 1, 2, 3, 4]);
}

#[test]
fn update_and_remove_op() {
    let cache = cache();
    let op = PendingOperation::new(
        EntityKey::new("user:1"),
        OperationKind::Patch,
        Patch::new().add("coins", 10),
    );
    cache.enqueue_op(&op).unwrap();

    cache
        .update_op_attempts(op.id, 3, Some("connection reset"))
        .unwrap();
    let loaded = &cache.load_ops().unwrap()[0];
    assert_eq!(loaded.attempts, 3);
    assert_eq!(loaded.last_error.as_deref(), Some("connection reset"));

    cache.remove_op(op.id).unwrap();
    assert_eq!(cache.pending_op_count().unwrap(), 0);
}

#[test]
fn clear_wipes_records_and_ops() {
    let cache = cache();
    cache.put(&record("user:1", 1, 1)).unwrap();
    cache
        .enqueue_op(&PendingOperation::new(
            EntityKey::new("user:1"),
            OperationKind::Delete,
            Patch::new(),
        ))
        .unwrap();

    cache.clear().unwrap();
    assert!(cache.get(&EntityKey::new("user:1")).unwrap().is_none());
    assert_eq!(cache.pending_op_count().unwrap(), 0);
}
