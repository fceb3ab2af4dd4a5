//! Configuration sources.
//!
//! Each origin produces a flat map from dotted key to JSON value. `Null`
//! means "not set by this source". Sources are rebuilt wholesale, never
//! patched in place across recomputes.

pub mod calculated;
pub mod defaults;
pub mod env;
pub mod options;
pub mod remote;
pub mod stable;

use crate::normalize;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Flat map from dotted key to value.
pub type ValueMap = BTreeMap<String, Value>;

/// Where a value came from, lowest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Default = 0,
    Calculated = 1,
    LocalStableConfig = 2,
    EnvVar = 3,
    FleetStableConfig = 4,
    Code = 5,
    RemoteConfig = 6,
}

impl Origin {
    /// All origins, lowest priority first.
    pub const ALL: [Origin; 7] = [
        Origin::Default,
        Origin::Calculated,
        Origin::LocalStableConfig,
        Origin::EnvVar,
        Origin::FleetStableConfig,
        Origin::Code,
        Origin::RemoteConfig,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Default => "default",
            Origin::Calculated => "calculated",
            Origin::LocalStableConfig => "local_stable_config",
            Origin::EnvVar => "env_var",
            Origin::FleetStableConfig => "fleet_stable_config",
            Origin::Code => "code",
            Origin::RemoteConfig => "remote_config",
        }
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Values contributed by one origin.
///
/// `unprocessed` keeps the raw input for keys whose stored value was
/// transformed, so change reports can show what the user actually wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSource {
    pub origin: Origin,
    pub values: ValueMap,
    pub unprocessed: ValueMap,
}

impl ConfigSource {
    pub fn new(origin: Origin) -> Self {
        Self {
            origin,
            values: ValueMap::new(),
            unprocessed: ValueMap::new(),
        }
    }

    /// Value set by this source, treating `Null` as unset.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|v| !v.is_null())
    }

    pub fn is_set(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Raw value recorded for a key, if any.
    pub fn unprocessed(&self, key: &str) -> Option<&Value> {
        self.unprocessed.get(key).filter(|v| !v.is_null())
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    pub fn set_unprocessed(&mut self, key: &str, raw: impl Into<Value>) {
        self.unprocessed.insert(key.to_string(), raw.into());
    }

    pub fn unset(&mut self, key: &str) {
        self.values.insert(key.to_string(), Value::Null);
    }

    /// Boolean setter: absent input unsets, unparsable input leaves the key alone.
    pub fn set_bool(&mut self, key: &str, raw: Option<&str>) {
        match raw {
            None => self.unset(key),
            Some(raw) => {
                if let Some(b) = normalize::parse_bool(raw) {
                    self.set(key, Value::Bool(b));
                }
            }
        }
    }

    pub fn set_bool_value(&mut self, key: &str, value: Option<bool>) {
        self.set(key, value.map(Value::Bool).unwrap_or(Value::Null));
    }

    /// String setter: empty strings are unset.
    pub fn set_string(&mut self, key: &str, raw: Option<&str>) {
        match raw {
            Some(s) if !s.is_empty() => self.set(key, Value::String(s.to_string())),
            _ => self.unset(key),
        }
    }

    /// Unit float setter: absent input unsets, non-numeric input is ignored.
    pub fn set_unit(&mut self, key: &str, raw: Option<&str>) {
        match raw {
            None => self.unset(key),
            Some(raw) => {
                if let Some(f) = normalize::parse_unit(raw) {
                    self.set(key, Value::from(f));
                }
            }
        }
    }

    pub fn set_array(&mut self, key: &str, raw: Option<&str>) {
        match raw {
            None => self.unset(key),
            Some(raw) => self.set(key, Value::from(normalize::parse_array(raw))),
        }
    }

    pub fn set_list(&mut self, key: &str, items: Option<Vec<String>>) {
        self.set(key, items.map(Value::from).unwrap_or(Value::Null));
    }

    pub fn set_int_range_set(&mut self, key: &str, raw: Option<&str>) {
        match raw {
            None => self.unset(key),
            Some(raw) => self.set(key, Value::from(normalize::parse_int_range_set(raw))),
        }
    }

    pub fn set_int(&mut self, key: &str, value: Option<i64>) {
        self.set(key, value.map(Value::from).unwrap_or(Value::Null));
    }

    pub fn set_float(&mut self, key: &str, value: Option<f64>) {
        self.set(key, value.map(Value::from).unwrap_or(Value::Null));
    }

    /// Tag setter: an empty tag set is unset.
    pub fn set_tags(&mut self, key: &str, tags: BTreeMap<String, String>) {
        if tags.is_empty() {
            self.unset(key);
        } else {
            self.set(key, normalize::map_value(tags));
        }
    }
}

/// Add `key:value` tags from a comma separated string, later entries winning.
pub fn add_tags(tags: &mut BTreeMap<String, String>, raw: Option<&str>) {
    if let Some(raw) = raw {
        tags.extend(normalize::parse_map(raw));
    }
}

/// One source per origin, rebuilt independently.
#[derive(Debug, Clone)]
pub struct SourceSet {
    pub defaults: ConfigSource,
    pub calculated: ConfigSource,
    pub local_stable: ConfigSource,
    pub env: ConfigSource,
    pub fleet_stable: ConfigSource,
    pub code: ConfigSource,
    pub remote: ConfigSource,
}

impl SourceSet {
    pub fn new(defaults: ConfigSource) -> Self {
        Self {
            defaults,
            calculated: ConfigSource::new(Origin::Calculated),
            local_stable: ConfigSource::new(Origin::LocalStableConfig),
            env: ConfigSource::new(Origin::EnvVar),
            fleet_stable: ConfigSource::new(Origin::FleetStableConfig),
            code: ConfigSource::new(Origin::Code),
            remote: ConfigSource::new(Origin::RemoteConfig),
        }
    }

    /// Sources ordered from lowest to highest priority.
    pub fn lowest_first(&self) -> [&ConfigSource; 7] {
        [
            &self.defaults,
            &self.calculated,
            &self.local_stable,
            &self.env,
            &self.fleet_stable,
            &self.code,
            &self.remote,
        ]
    }

    /// Origin of the value currently in effect for `key`.
    pub fn origin_of(&self, key: &str) -> Origin {
        self.lowest_first()
            .into_iter()
            .rev()
            .find(|source| source.origin == Origin::Default || source.is_set(key))
            .map(|source| source.origin)
            .unwrap_or(Origin::Default)
    }

    /// Highest-priority non-null value for `key`.
    pub fn value_of(&self, key: &str) -> Option<&Value> {
        self.lowest_first()
            .into_iter()
            .rev()
            .find_map(|source| source.get(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_origin_order_and_names() {
        assert!(Origin::RemoteConfig > Origin::Code);
        assert!(Origin::Code > Origin::FleetStableConfig);
        assert!(Origin::FleetStableConfig > Origin::EnvVar);
        assert!(Origin::EnvVar > Origin::LocalStableConfig);
        assert!(Origin::LocalStableConfig > Origin::Calculated);
        assert!(Origin::Calculated > Origin::Default);
        assert_eq!(
            serde_json::to_value(Origin::FleetStableConfig).unwrap(),
            json!("fleet_stable_config")
        );
        assert_eq!(Origin::EnvVar.to_string(), "env_var");
    }

    #[test]
    fn test_setters_follow_unset_rules() {
        let mut source = ConfigSource::new(Origin::EnvVar);

        source.set_bool("a", Some("true"));
        source.set_bool("a", Some("garbage"));
        assert_eq!(source.get("a"), Some(&json!(true)));

        source.set_bool("a", None);
        assert_eq!(source.get("a"), None);

        source.set_string("s", Some(""));
        assert!(!source.is_set("s"));

        source.set_unit("rate", Some("7"));
        assert_eq!(source.get("rate"), Some(&json!(1.0)));

        source.set_tags("tags", BTreeMap::new());
        assert!(!source.is_set("tags"));
    }

    #[test]
    fn test_origin_of_scans_high_to_low() {
        let mut defaults = ConfigSource::new(Origin::Default);
        defaults.set("k", json!(1));
        let mut set = SourceSet::new(defaults);
        assert_eq!(set.origin_of("k"), Origin::Default);

        set.env.set("k", json!(2));
        set.code.set("k", Value::Null);
        assert_eq!(set.origin_of("k"), Origin::EnvVar);
        assert_eq!(set.value_of("k"), Some(&json!(2)));

        set.remote.set("k", json!(3));
        assert_eq!(set.origin_of("k"), Origin::RemoteConfig);
    }
}
