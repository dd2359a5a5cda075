use harvest_types::{
    CacheRecord, Entity, EntityKey, OperationKind, PendingOperation, Patch, WriteSource,
};
use serde_json::json;

#[test]
fn entity_key_namespace() {
    assert_eq!(EntityKey::new("user:42").namespace(), "user");
    assert_eq!(EntityKey::new("tasks").namespace(), "tasks");
    assert_eq!(EntityKey::new("withdrawals:7:note").namespace(), "withdrawals");
}

#[test]
fn write_source_round_trips_as_string() {
    for source in [WriteSource::Remote, WriteSource::Local, WriteSource::Seed] {
        let s = source.to_string();
        assert_eq!(s.parse::<WriteSource>().unwrap(), source);
    }
    assert!("elsewhere".parse::<WriteSource>().is_err());
}

#[test]
fn operation_kind_round_trips_as_string() {
    for kind in [OperationKind::Create, OperationKind::Patch, OperationKind::Delete] {
        let s = kind.to_string();
        assert_eq!(s.parse::<OperationKind>().unwrap(), kind);
    }
}

#[test]
fn record_expiry_uses_cached_at() {
    let record = CacheRecord::new(
        EntityKey::new("user:1"),
        Entity::from_value(json!({"coins": 1})),
        1,
        WriteSource::Local,
    );
    assert!(!record.is_expired(record.cached_at + 500, 1_000));
    assert!(record.is_expired(record.cached_at + 1_001, 1_000));
}

#[test]
fn record_builders_set_watermarks() {
    let confirmed = Entity::from_value(json!({"coins": 0}));
    let record = CacheRecord::new(
        EntityKey::new("user:1"),
        Entity::from_value(json!({"coins": 100})),
        3,
        WriteSource::Local,
    )
    .with_remote_revision(7)
    .with_confirmed(Some(confirmed.clone()));

    assert_eq!(record.remote_revision, 7);
    assert_eq!(record.confirmed, Some(confirmed));
}

#[test]
fn new_operation_starts_unattempted() {
    let op = PendingOperation::new(
        EntityKey::new("user:1"),
        OperationKind::Patch,
        Patch::new().add("coins", 10),
    );
    assert_eq!(op.attempts, 0);
    assert!(op.last_error.is_none());
    assert!(op.enqueued_at > 0);
}

#[test]
fn operation_ids_are_unique_and_ordered() {
    let a = PendingOperation::new(EntityKey::new("k"), OperationKind::Patch, Patch::new());
    let b = PendingOperation::new(EntityKey::new("k"), OperationKind::Patch, Patch::new());
    assert_ne!(a.id, b.id);
    // UUIDv7 ids sort by creation time.
    assert!(a.id.as_uuid() < b.id.as_uuid());
}

#[test]
fn pending_operation_round_trips_through_json() {
    let op = PendingOperation::new(
        EntityKey::new("user:42"),
        OperationKind::Create,
        Patch::new().set("name", "Ada").add("coins", 100),
    );
    let json = serde_json::to_string(&op).unwrap();
    let back: PendingOperation = serde_json::from_str(&json).unwrap();
    assert_eq!(back, op);
}
