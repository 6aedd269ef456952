//! Per-participant auxiliary information attached to each delivery.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Key set on deliveries produced by an interrupted episode.
pub const INTERRUPTED_KEY: &str = "interrupted";

/// Free-form, string-keyed auxiliary data returned by the simulation.
///
/// The coordinator only ever writes one key itself: [`INTERRUPTED_KEY`],
/// on the synthetic terminal deliveries sent when another participant ends
/// the episode early.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Info(BTreeMap<String, Value>);

impl Info {
    /// Create an empty info map.
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Look up a value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Insert a value, returning the previous one if any.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Copy of this map with the interruption flag set.
    #[must_use]
    pub fn with_interrupted(self) -> Self {
        self.with(INTERRUPTED_KEY, true)
    }

    /// Whether this delivery reports an interrupted episode.
    pub fn interrupted(&self) -> bool {
        self.get(INTERRUPTED_KEY).and_then(Value::as_bool).unwrap_or(false)
    }

    /// True if no keys are set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl FromIterator<(String, Value)> for Info {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
