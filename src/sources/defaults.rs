//! Defaults source: manifest defaults plus environment-dependent baselines.

use super::env::ProcessEnv;
use super::{ConfigSource, Origin};
use crate::normalize::coerce_default;
use crate::schema::{DERIVED_KEYS, SchemaRegistry};
use serde_json::Value;

/// Build the defaults source. Every key of the registry is assigned.
pub fn build(registry: &SchemaRegistry, env: &ProcessEnv) -> ConfigSource {
    let mut defaults = ConfigSource::new(Origin::Default);

    for entry in registry.entries() {
        if let Some(key) = entry.key() {
            defaults.set(key, coerce_default(entry.value_type, &entry.default_raw));
        }
    }
    for (key, value_type, raw) in DERIVED_KEYS {
        defaults.set(key, coerce_default(*value_type, &Value::from(*raw)));
    }

    if env.is_serverless() {
        defaults.set_bool_value("crashtracking.enabled", Some(false));
        defaults.set_string("profiling.enabled", Some("false"));
        defaults.set_bool_value("telemetry.enabled", Some(false));
        defaults.set_bool_value("remoteConfig.enabled", Some(false));
    } else {
        defaults.set_bool_value("crashtracking.enabled", Some(true));
    }

    if env.get_raw("JEST_WORKER_ID").is_some() {
        defaults.set_bool_value("telemetry.enabled", Some(false));
    }

    defaults
}
