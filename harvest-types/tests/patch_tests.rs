use harvest_types::{Entity, Patch};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn entity(value: Value) -> Entity {
    Entity::from_value(value)
}

#[test]
fn empty_patch_is_identity() {
    let base = entity(json!({"name": "Ada", "coins": 10}));
    let patched = Patch::new().apply(&base);
    assert_eq!(patched, base);
}

#[test]
fn set_overwrites_field() {
    let base = entity(json!({"name": "Ada"}));
    let patched = Patch::new().set("name", "Grace").apply(&base);
    assert_eq!(patched.get("name"), Some(&json!("Grace")));
}

#[test]
fn set_adds_missing_field() {
    let base = entity(json!({}));
    let patched = Patch::new().set("tier", "gold").apply(&base);
    assert_eq!(patched.get("tier"), Some(&json!("gold")));
}

#[test]
fn unset_removes_field() {
    let base = entity(json!({"name": "Ada", "tier": "gold"}));
    let patched = Patch::new().unset("tier").apply(&base);
    assert!(patched.get("tier").is_none());
    assert_eq!(patched.get("name"), Some(&json!("Ada")));
}

#[test]
fn delta_adjusts_counter() {
    let base = entity(json!({"coins": 100}));
    let patched = Patch::new().add("coins", 25).apply(&base);
    assert_eq!(patched.counter("coins"), Some(125));
}

#[test]
fn delta_on_missing_counter_starts_at_zero() {
    let base = entity(json!({}));
    let patched = Patch::new().add("coins", 100).apply(&base);
    assert_eq!(patched.counter("coins"), Some(100));
}

#[test]
fn negative_delta_subtracts() {
    let base = entity(json!({"coins": 100}));
    let patched = Patch::new().add("coins", -40).apply(&base);
    assert_eq!(patched.counter("coins"), Some(60));
}

#[test]
fn repeated_add_accumulates_net_delta() {
    let patch = Patch::new().add("coins", 50).add("coins", -20);
    assert_eq!(patch.deltas.get("coins"), Some(&30));

    let base = entity(json!({"coins": 10}));
    assert_eq!(patch.apply(&base).counter("coins"), Some(40));
}

#[test]
fn delta_applies_after_absolute_write() {
    // A patch that both sets and adjusts a counter: the delta adjusts
    // the freshly written value.
    let base = entity(json!({"coins": 999}));
    let patched = Patch::new().set("coins", 0).add("coins", 5).apply(&base);
    assert_eq!(patched.counter("coins"), Some(5));
}

#[test]
fn accumulated_delta_saturates_at_i64_bounds() {
    let patch = Patch::new().add("coins", i64::MAX).add("coins", 1);
    assert_eq!(patch.deltas.get("coins"), Some(&i64::MAX));

    let patch = Patch::new().add("coins", i64::MIN).add("coins", -1);
    assert_eq!(patch.deltas.get("coins"), Some(&i64::MIN));
}

#[test]
fn patch_is_empty() {
    assert!(Patch::new().is_empty());
    assert!(!Patch::new().set("a", 1).is_empty());
    assert!(!Patch::new().add("a", 1).is_empty());
}

#[test]
fn patch_round_trips_through_json() {
    let patch = Patch::new().set("name", "Ada").add("coins", -5);
    let json = serde_json::to_string(&patch).unwrap();
    let back: Patch = serde_json::from_str(&json).unwrap();
    assert_eq!(back, patch);
}
