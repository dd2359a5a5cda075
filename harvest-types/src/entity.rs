//! Opaque JSON entities.
//!
//! The sync layer does not know entity schemas. It treats every record as
//! a field→value map and only recognizes two cross-cutting conventions:
//! a monotonically increasing `updatedAt` millisecond timestamp, and
//! numeric counters (e.g. `coins`) that domain rules may forbid from
//! going negative.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field name of the cross-cutting update timestamp.
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// A schemaless, versioned record synchronized by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entity(Map<String, Value>);

impl Entity {
    /// Creates an empty entity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing JSON object map.
    #[must_use]
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Builds an entity from any JSON value; non-object values produce
    /// an empty entity.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }

    /// Returns the underlying field map.
    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Returns a field value, if present.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Sets a field value. `Value::Null` removes the field.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        let field = field.into();
        if value.is_null() {
            self.0.remove(&field);
        } else {
            self.0.insert(field, value);
        }
    }

    /// Returns a numeric counter field as `i64`, if present and integral.
    #[must_use]
    pub fn counter(&self, field: &str) -> Option<i64> {
        self.0.get(field).and_then(Value::as_i64)
    }

    /// Adds `delta` to a counter field, treating a missing field as 0.
    pub fn add_counter(&mut self, field: &str, delta: i64) {
        let next = self.counter(field).unwrap_or(0).saturating_add(delta);
        self.0.insert(field.to_string(), Value::from(next));
    }

    /// Returns the `updatedAt` timestamp in milliseconds, if present.
    #[must_use]
    pub fn updated_at(&self) -> Option<u64> {
        self.0.get(UPDATED_AT_FIELD).and_then(Value::as_u64)
    }

    /// Sets the `updatedAt` timestamp.
    pub fn set_updated_at(&mut self, millis: u64) {
        self.0.insert(UPDATED_AT_FIELD.to_string(), Value::from(millis));
    }

    /// True if the entity has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Entity> for Value {
    fn from(entity: Entity) -> Self {
        Value::Object(entity.0)
    }
}
