use harvest_types::{Entity, Patch};
use proptest::prelude::*;
use serde_json::json;

proptest! {
    /// Repeated `add` calls on one field collapse to a single net
    /// delta, and applying the patch moves the counter by exactly that
    /// amount.
    #[test]
    fn adds_accumulate_into_one_net_delta(
        start in -10_000i64..10_000,
        deltas in proptest::collection::vec(-100i64..100, 1..8),
    ) {
        let mut patch = Patch::new();
        for delta in &deltas {
            patch = patch.add("coins", *delta);
        }
        let net: i64 = deltas.iter().sum();
        prop_assert_eq!(patch.deltas.get("coins").copied(), Some(net));

        let base = Entity::from_value(json!({"coins": start}));
        prop_assert_eq!(patch.apply(&base).counter("coins"), Some(start + net));
    }

    /// A delta on a field also written absolutely adjusts the written
    /// value, never the stale base.
    #[test]
    fn delta_applies_on_top_of_absolute_write(
        base_value in -10_000i64..10_000,
        written in -10_000i64..10_000,
        delta in -100i64..100,
    ) {
        let patch = Patch::new().set("coins", written).add("coins", delta);
        let base = Entity::from_value(json!({"coins": base_value}));
        prop_assert_eq!(patch.apply(&base).counter("coins"), Some(written + delta));
    }
}
