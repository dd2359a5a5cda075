use harvest_remote::RemoteSnapshot;
use harvest_sync::resolver::{resolve, Resolution};
use harvest_types::{
    CacheRecord, Entity, EntityKey, OperationKind, Patch, PendingOperation, WriteSource,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn key() -> EntityKey {
    EntityKey::from("user:42")
}

fn entity(value: serde_json::Value) -> Entity {
    Entity::from_value(value)
}

fn snapshot(revision: u64, value: serde_json::Value) -> RemoteSnapshot {
    RemoteSnapshot {
        key: key(),
        revision,
        entity: entity(value),
    }
}

fn record(data: Entity, version: u64, revision: u64) -> CacheRecord {
    CacheRecord::new(key(), data, version, WriteSource::Remote).with_remote_revision(revision)
}

fn patch_op(patch: Patch) -> PendingOperation {
    PendingOperation::new(key(), OperationKind::Patch, patch)
}

#[test]
fn first_snapshot_stored_as_remote() {
    let resolution = resolve(None, &snapshot(1, json!({"coins": 5})), &[]);

    let Resolution::Store(stored) = resolution else {
        panic!("expected store, got {resolution:?}");
    };
    assert_eq!(stored.version, 1);
    assert_eq!(stored.remote_revision, 1);
    assert_eq!(stored.source, WriteSource::Remote);
    assert_eq!(stored.data.counter("coins"), Some(5));
    assert_eq!(stored.confirmed, Some(entity(json!({"coins": 5}))));
}

#[test]
fn snapshot_at_or_below_watermark_is_stale() {
    let current = record(entity(json!({"coins": 5})), 3, 5);

    let same = resolve(Some(&current), &snapshot(5, json!({"coins": 9})), &[]);
    let older = resolve(Some(&current), &snapshot(4, json!({"coins": 9})), &[]);

    assert_eq!(same, Resolution::StaleEcho);
    assert_eq!(older, Resolution::StaleEcho);
}

#[test]
fn pending_patches_reapplied_over_snapshot() {
    let current = record(entity(json!({"coins": 100})), 2, 1);
    let pending = vec![patch_op(Patch::new().add("coins", 100))];

    let resolution = resolve(Some(&current), &snapshot(2, json!({"coins": 0})), &pending);

    let Resolution::Store(stored) = resolution else {
        panic!("expected store, got {resolution:?}");
    };
    // The snapshot has not seen the queued +100, so it is re-applied.
    assert_eq!(stored.data.counter("coins"), Some(100));
    assert_eq!(stored.source, WriteSource::Local);
    // The baseline is the raw remote value, not the merged one.
    assert_eq!(stored.confirmed, Some(entity(json!({"coins": 0}))));
    assert_eq!(stored.remote_revision, 2);
}

#[test]
fn queued_delete_suppresses_resurrection() {
    let current = record(entity(json!({"coins": 5})), 2, 1);
    let pending = vec![PendingOperation::new(
        key(),
        OperationKind::Delete,
        Patch::new(),
    )];

    let resolution = resolve(Some(&current), &snapshot(2, json!({"coins": 5})), &pending);

    assert_eq!(resolution, Resolution::SuppressedByDelete);
}

#[test]
fn updated_at_never_rewinds() {
    let current = record(entity(json!({"coins": 5, "updatedAt": 2000})), 2, 1);

    let resolution = resolve(
        Some(&current),
        &snapshot(2, json!({"coins": 9, "updatedAt": 1000})),
        &[],
    );

    let Resolution::Store(stored) = resolution else {
        panic!("expected store, got {resolution:?}");
    };
    assert_eq!(stored.data.counter("coins"), Some(9));
    assert_eq!(stored.data.updated_at(), Some(2000));
}

#[test]
fn version_advances_past_current() {
    let current = record(entity(json!({"coins": 5})), 7, 1);

    let resolution = resolve(Some(&current), &snapshot(2, json!({"coins": 6})), &[]);

    let Resolution::Store(stored) = resolution else {
        panic!("expected store, got {resolution:?}");
    };
    assert_eq!(stored.version, 8);
}
