//! Report rows produced by the CLI subcommands.

use crate::engine::Engine;
use crate::merge::EffectiveConfig;
use crate::otel;
use crate::schema::{SchemaRegistry, ValueType};
use crate::sources::Origin;
use crate::telemetry::CounterEvent;
use serde::Serialize;
use serde_json::Value;

/// One effective setting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingRow {
    pub key: String,
    pub value: Value,
    pub origin: Origin,
}

/// Effective settings in key order. With `set_only`, unset keys are skipped.
pub fn setting_rows(effective: &EffectiveConfig, set_only: bool) -> Vec<SettingRow> {
    effective
        .iter()
        .filter(|(_, value, _)| !set_only || !value.is_null())
        .map(|(key, value, origin)| SettingRow {
            key: key.to_string(),
            value: value.clone(),
            origin,
        })
        .collect()
}

/// One registry entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyRow {
    pub name: String,
    pub key: Option<String>,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    pub default: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deprecated: bool,
}

pub fn key_rows(registry: &SchemaRegistry) -> Vec<KeyRow> {
    registry
        .entries()
        .map(|entry| KeyRow {
            name: entry.name.clone(),
            key: entry.key().map(str::to_string),
            value_type: entry.value_type,
            default: entry.default_raw.clone(),
            aliases: entry.aliases.clone(),
            deprecated: entry.deprecated,
        })
        .collect()
}

/// Environment diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CheckReport {
    pub otel: Vec<CounterEvent>,
    pub deprecated: Vec<String>,
    pub unsupported: Vec<String>,
    pub stable_warnings: Vec<String>,
    pub local_config_id: Option<String>,
    pub fleet_config_id: Option<String>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.otel.is_empty()
            && self.deprecated.is_empty()
            && self.unsupported.is_empty()
            && self.stable_warnings.is_empty()
    }
}

/// Diagnose the engine's environment. Stable config must already be loaded
/// (by `configure`) for its warnings to show up.
pub fn check_report(engine: &Engine) -> CheckReport {
    let registry = engine.registry();
    let mut report = CheckReport {
        otel: otel::check(registry, engine.env()),
        stable_warnings: engine.stable_warnings(),
        ..Default::default()
    };
    (report.local_config_id, report.fleet_config_id) = engine.stable_config_ids();

    for name in engine.env().vars().keys() {
        if !registry.is_config_like(name) {
            continue;
        }
        if let Some(message) = registry.deprecations().message(name) {
            report.deprecated.push(message);
        } else if !registry.is_supported(name) && !registry.aliases().is_alias(name) {
            report.unsupported.push(name.clone());
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::env::ProcessEnv;
    use crate::sources::options::TracerOptions;
    use crate::sources::stable::NoStableConfig;
    use serde_json::json;

    fn engine(pairs: &[(&str, &str)]) -> Engine {
        Engine::builder()
            .env(ProcessEnv::from_pairs(pairs.iter().copied()))
            .stable_reader(NoStableConfig)
            .build()
            .unwrap()
    }

    #[test]
    fn test_setting_rows_skip_unset() {
        let engine = engine(&[("DD_SERVICE", "api")]);
        let effective = engine.configure(TracerOptions::default()).unwrap();

        let all = setting_rows(&effective, false);
        let set = setting_rows(&effective, true);
        assert_eq!(all.len(), effective.len());
        assert!(set.len() < all.len());
        let service = set.iter().find(|row| row.key == "service").unwrap();
        assert_eq!(service.value, json!("api"));
        assert_eq!(service.origin, Origin::EnvVar);
    }

    #[test]
    fn test_key_rows_cover_registry() {
        let registry = SchemaRegistry::builtin().unwrap();
        let rows = key_rows(&registry);
        assert_eq!(rows.len(), registry.entries().count());
        let host = rows.iter().find(|row| row.name == "DD_AGENT_HOST").unwrap();
        assert_eq!(host.key.as_deref(), Some("hostname"));
        assert!(host.aliases.iter().any(|a| a == "DD_TRACE_AGENT_HOSTNAME"));
    }

    #[test]
    fn test_check_report_flags_problems() {
        let engine = engine(&[
            ("DD_NOT_A_REAL_SETTING", "1"),
            ("OTEL_SERVICE_NAME", "otel"),
            ("DD_SERVICE", "dd"),
            ("PATH", "/usr/bin"),
        ]);
        let report = check_report(&engine);

        assert_eq!(report.unsupported, vec!["DD_NOT_A_REAL_SETTING"]);
        assert_eq!(report.otel.len(), 1);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_check_report_clean_env() {
        let report = check_report(&engine(&[("DD_ENV", "prod")]));
        assert!(report.is_clean());
    }
}
