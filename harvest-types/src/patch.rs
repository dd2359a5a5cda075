//! Field-level patches.
//!
//! A patch records *what changed*, not the whole document: absolute field
//! writes plus numeric counter deltas. Deltas are captured once, when the
//! mutation is enqueued, so a queued patch can later be re-applied on top
//! of a remote snapshot without ever double-counting an already-observed
//! delta.

use crate::entity::Entity;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// An explicit field-level change to an entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    /// Absolute field writes. `Value::Null` removes the field.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,

    /// Net adjustments to numeric counter fields.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub deltas: BTreeMap<String, i64>,
}

impl Patch {
    /// Creates an empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field to an absolute value.
    #[must_use]
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Removes a field.
    #[must_use]
    pub fn unset(mut self, field: impl Into<String>) -> Self {
        self.fields.insert(field.into(), Value::Null);
        self
    }

    /// Adjusts a numeric counter by `delta`. Repeated calls for the same
    /// field accumulate into one net delta, saturating at the i64 bounds
    /// like counter application itself.
    #[must_use]
    pub fn add(mut self, field: impl Into<String>, delta: i64) -> Self {
        let field = field.into();
        let net = self
            .deltas
            .get(&field)
            .copied()
            .unwrap_or(0)
            .saturating_add(delta);
        self.deltas.insert(field, net);
        self
    }

    /// True if the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.deltas.is_empty()
    }

    /// Applies the patch to an entity, producing the new entity.
    ///
    /// Absolute writes land first, then counter deltas; a delta on a
    /// field also written absolutely adjusts the written value.
    #[must_use]
    pub fn apply(&self, base: &Entity) -> Entity {
        let mut next = base.clone();
        for (field, value) in &self.fields {
            next.set(field.clone(), value.clone());
        }
        for (field, delta) in &self.deltas {
            next.add_counter(field, *delta);
        }
        next
    }
}
