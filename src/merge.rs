//! Precedence merge of all configuration sources.
//!
//! For each key, sources are visited from lowest to highest priority. A source
//! assigns the key when its value is non-null (the defaults source always
//! assigns). The last assignment wins. Every assignment is checked against the
//! [`ChangeTracker`] so telemetry only hears about values it has not seen.

use crate::sources::{Origin, SourceSet};
use crate::telemetry::ChangeRecord;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Deep merge two JSON values, with `overlay` taking precedence over `base`.
///
/// - Objects are merged recursively: keys in overlay override keys in base
/// - Arrays, strings, numbers, booleans are replaced entirely
/// - A null overlay preserves an existing base value
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged_value = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged_value);
            }
            Value::Object(base_map)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

/// Expand a dotted key into nested objects: `a.b` = 1 becomes `{"a": {"b": 1}}`.
fn nest(key: &str, value: Value) -> Value {
    key.rsplit('.').fold(value, |inner, segment| {
        let mut map = Map::new();
        map.insert(segment.to_string(), inner);
        Value::Object(map)
    })
}

/// The effective configuration: one value and one origin per key.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EffectiveConfig {
    values: BTreeMap<String, Value>,
    origins: BTreeMap<String, Origin>,
}

impl EffectiveConfig {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|v| !v.is_null())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    /// Origin of the value in effect for `key`.
    pub fn origin(&self, key: &str) -> Option<Origin> {
        self.origins.get(key).copied()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Every key with its value (possibly null) and origin.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value, Origin)> {
        self.values.iter().map(|(key, value)| {
            let origin = self.origins.get(key).copied().unwrap_or(Origin::Default);
            (key.as_str(), value, origin)
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Nested JSON view, with dotted keys expanded into objects.
    pub fn to_nested(&self) -> Value {
        self.values
            .iter()
            .map(|(key, value)| nest(key, value.clone()))
            .fold(Value::Object(Map::new()), deep_merge)
    }
}

/// Remembers the last value reported for each `(key, origin)` pair, and the
/// origin that last won each key.
#[derive(Debug, Clone, Default)]
pub struct ChangeTracker {
    seen: HashMap<(String, Origin), Value>,
    winners: HashMap<String, Origin>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything, so the next merge reports every value again.
    pub fn reset(&mut self) {
        self.seen.clear();
        self.winners.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Record an assignment. Returns true when it is new or different.
    fn track(&mut self, name: &str, origin: Origin, value: &Value) -> bool {
        let slot = (name.to_string(), origin);
        if self.seen.get(&slot) == Some(value) {
            return false;
        }
        self.seen.insert(slot, value.clone());
        true
    }

    /// Record the winning origin. Returns true when it differs from last time.
    fn switch_winner(&mut self, name: &str, origin: Origin) -> bool {
        match self.winners.insert(name.to_string(), origin) {
            Some(previous) => previous != origin,
            None => false,
        }
    }
}

/// Merge every source into the effective configuration.
///
/// The key universe is the keys of the defaults source. Returns the new
/// configuration and the ordered change list for telemetry.
pub fn merge(sources: &SourceSet, tracker: &mut ChangeTracker) -> (EffectiveConfig, Vec<ChangeRecord>) {
    let mut effective = EffectiveConfig::default();
    let mut changes = Vec::new();

    for key in sources.defaults.values.keys() {
        let mut winner: Option<(Origin, &Value, bool)> = None;

        for source in sources.lowest_first() {
            let value = match source.values.get(key) {
                Some(value) if !value.is_null() => value,
                _ if source.origin == Origin::Default => {
                    source.values.get(key).unwrap_or(&Value::Null)
                }
                _ => continue,
            };

            let reported = tracker.track(key, source.origin, value);
            if reported {
                changes.push(ChangeRecord {
                    name: key.clone(),
                    value: source.unprocessed(key).unwrap_or(value).clone(),
                    origin: source.origin,
                });
            }
            winner = Some((source.origin, value, reported));
        }

        let Some((origin, value, reported)) = winner else {
            continue;
        };

        // A key falling back to an origin it already reported (for example
        // after a remote value is cleared) is reported again.
        if tracker.switch_winner(key, origin) && !reported {
            let source = sources.lowest_first()[origin as usize];
            changes.push(ChangeRecord {
                name: key.clone(),
                value: source.unprocessed(key).unwrap_or(value).clone(),
                origin,
            });
        }

        effective.values.insert(key.clone(), value.clone());
        effective.origins.insert(key.clone(), origin);
    }

    (effective, changes)
}
