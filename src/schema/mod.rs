//! Schema registry for supported configurations.
//!
//! The registry is built once from the declarative manifest embedded in the
//! crate. It knows every supported environment-style name, its value type and
//! default, the dotted internal key it feeds, and the alias and deprecation
//! metadata attached to it. It is immutable after load and shared via `Arc`.

pub mod aliases;
pub mod deprecations;

pub use aliases::AliasTable;
pub use deprecations::Deprecations;

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

/// Manifest embedded at build time.
pub const BUILTIN_MANIFEST: &str = include_str!("../../manifest/supported-configurations.json");

/// Value type of a configuration entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueType {
    Boolean,
    Int,
    Decimal,
    Array,
    Map,
    String,
    SamplingRules,
    IntRangeSet,
}

/// Keys computed by the engine that have no environment variable of their own.
pub const DERIVED_KEYS: &[(&str, ValueType, &str)] = &[
    ("instrumentationSource", ValueType::String, "manual"),
    ("tracePropagationStyle.otelPropagators", ValueType::Boolean, "false"),
];

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(rename = "supportedConfigurations")]
    supported_configurations: BTreeMap<String, Vec<ManifestImplementation>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestImplementation {
    #[allow(dead_code)]
    implementation: String,
    #[serde(rename = "type")]
    value_type: ValueType,
    #[serde(default)]
    default: Value,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    configuration_names: Vec<String>,
    #[serde(default)]
    deprecated: Option<Deprecated>,
}

/// `deprecated` is either a flag or a hint pointing at the replacement.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Deprecated {
    Flag(bool),
    Note(String),
}

/// A supported configuration, as declared in the manifest.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaEntry {
    /// Canonical environment-style name (`DD_SERVICE`).
    pub name: String,
    pub value_type: ValueType,
    /// Default exactly as written in the manifest.
    pub default_raw: Value,
    pub aliases: Vec<String>,
    /// Internal dotted keys; the first one is the key this entry feeds.
    pub configuration_names: Vec<String>,
    pub deprecated: bool,
}

impl SchemaEntry {
    /// The dotted internal key, if the entry feeds one directly.
    pub fn key(&self) -> Option<&str> {
        self.configuration_names.first().map(String::as_str)
    }
}

/// Immutable registry of supported configurations.
#[derive(Debug)]
pub struct SchemaRegistry {
    entries: BTreeMap<String, SchemaEntry>,
    by_key: BTreeMap<String, String>,
    aliases: AliasTable,
    deprecations: Deprecations,
}

static BUILTIN: OnceLock<ConfigResult<Arc<SchemaRegistry>>> = OnceLock::new();

impl SchemaRegistry {
    /// The registry built from the embedded manifest, loaded once per process.
    pub fn builtin() -> ConfigResult<Arc<SchemaRegistry>> {
        BUILTIN
            .get_or_init(|| Self::load(BUILTIN_MANIFEST).map(Arc::new))
            .clone()
    }

    /// Parse a manifest document and build the registry.
    pub fn load(manifest_json: &str) -> ConfigResult<Self> {
        let manifest: Manifest =
            serde_json::from_str(manifest_json).map_err(ConfigError::invalid_manifest)?;

        let mut entries = BTreeMap::new();
        let mut by_key: BTreeMap<String, String> = BTreeMap::new();
        let mut aliases = AliasTable::new();
        let mut deprecations = Deprecations::new();

        for (name, implementations) in manifest.supported_configurations {
            let Some(implementation) = implementations.into_iter().next() else {
                return Err(ConfigError::invalid_manifest(format!(
                    "{} has no implementation",
                    name
                ))
                .with_key(&name));
            };

            let deprecated = match implementation.deprecated {
                None | Some(Deprecated::Flag(false)) => false,
                Some(Deprecated::Flag(true)) => {
                    deprecations.insert(&name, None);
                    true
                }
                Some(Deprecated::Note(note)) => {
                    deprecations.insert(&name, Some(note));
                    true
                }
            };

            // A deprecated name that lists aliases is itself the legacy
            // spelling of another entry; it is not supported on its own.
            if deprecated && !implementation.aliases.is_empty() {
                continue;
            }

            for alias in &implementation.aliases {
                aliases.register(&name, alias)?;
            }

            if let Some(key) = implementation.configuration_names.first() {
                if let Some(existing) = by_key.insert(key.clone(), name.clone()) {
                    return Err(ConfigError::invalid_manifest(format!(
                        "configuration name {} is declared by both {} and {}",
                        key, existing, name
                    ))
                    .with_key(key));
                }
            }

            entries.insert(
                name.clone(),
                SchemaEntry {
                    name,
                    value_type: implementation.value_type,
                    default_raw: implementation.default,
                    aliases: implementation.aliases,
                    configuration_names: implementation.configuration_names,
                    deprecated,
                },
            );
        }

        aliases.register_legacy()?;

        // Deprecated names that are aliases get pointed at their canonical.
        let redirected: Vec<(String, String)> = deprecations
            .names()
            .filter_map(|name| {
                aliases
                    .canonical_of(name)
                    .map(|canonical| (name.to_string(), canonical.to_string()))
            })
            .collect();
        for (name, canonical) in redirected {
            deprecations.insert(&name, Some(format!("Please use {} instead.", canonical)));
        }

        for (key, _, _) in DERIVED_KEYS {
            if by_key.contains_key(*key) {
                return Err(ConfigError::invalid_manifest(format!(
                    "configuration name {} is reserved for a derived value",
                    key
                ))
                .with_key(*key));
            }
        }

        Ok(Self {
            entries,
            by_key,
            aliases,
            deprecations,
        })
    }

    /// Supported entry for an environment-style name.
    pub fn entry(&self, name: &str) -> Option<&SchemaEntry> {
        self.entries.get(name)
    }

    /// Supported entry feeding a dotted internal key.
    pub fn entry_for_key(&self, key: &str) -> Option<&SchemaEntry> {
        self.by_key.get(key).and_then(|name| self.entries.get(name))
    }

    pub fn is_supported(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Names that look like tracer configuration: `DD_*`, `OTEL_*`, or an alias.
    pub fn is_config_like(&self, name: &str) -> bool {
        name.starts_with("DD_") || name.starts_with("OTEL_") || self.aliases.is_alias(name)
    }

    /// Fail when a configuration-like name has no supported entry.
    pub fn validate_access(&self, name: &str) -> ConfigResult<()> {
        if self.is_config_like(name) && !self.is_supported(name) {
            return Err(ConfigError::unsupported(name));
        }
        Ok(())
    }

    /// Validate a dotted internal key.
    pub fn validate_key(&self, key: &str) -> ConfigResult<()> {
        if self.by_key.contains_key(key) || DERIVED_KEYS.iter().any(|(k, _, _)| *k == key) {
            Ok(())
        } else {
            Err(ConfigError::unknown_key(key))
        }
    }

    /// Every supported entry, ordered by name.
    pub fn entries(&self) -> impl Iterator<Item = &SchemaEntry> {
        self.entries.values()
    }

    /// The full key universe: manifest keys followed by derived keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.by_key
            .keys()
            .map(String::as_str)
            .chain(DERIVED_KEYS.iter().map(|(key, _, _)| *key))
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    pub fn deprecations(&self) -> &Deprecations {
        &self.deprecations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn manifest(body: &str) -> String {
        format!(r#"{{"supportedConfigurations": {{ {} }}}}"#, body)
    }

    #[test]
    fn test_builtin_loads() {
        let registry = SchemaRegistry::builtin().unwrap();
        let service = registry.entry("DD_SERVICE").unwrap();
        assert_eq!(service.key(), Some("service"));
        assert_eq!(registry.aliases().canonical_of("DD_SERVICE_NAME"), Some("DD_SERVICE"));
        assert_eq!(
            registry.aliases().canonical_of("DD_TRACE_AGENT_HOSTNAME"),
            Some("DD_AGENT_HOST")
        );
        assert!(registry.keys().any(|k| k == "instrumentationSource"));
    }

    #[test]
    fn test_deprecated_alias_entry_is_not_supported() {
        let registry = SchemaRegistry::builtin().unwrap();
        assert!(!registry.is_supported("DD_EXPERIMENTAL_PROFILING_ENABLED"));
        assert_eq!(
            registry
                .deprecations()
                .message("DD_EXPERIMENTAL_PROFILING_ENABLED")
                .as_deref(),
            Some(
                "The environment variable DD_EXPERIMENTAL_PROFILING_ENABLED is deprecated. \
                 Please use DD_PROFILING_ENABLED instead."
            )
        );
        // Deprecated entries without aliases stay readable.
        assert!(registry.is_supported("DD_TRACE_GLOBAL_TAGS"));
    }

    #[test]
    fn test_validate_access() {
        let registry = SchemaRegistry::builtin().unwrap();
        assert!(registry.validate_access("DD_SERVICE").is_ok());
        assert!(registry.validate_access("HOME").is_ok());

        let err = registry.validate_access("DD_NOT_A_REAL_SETTING").unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedConfiguration);

        // Aliases are resolved through their canonical, never read directly.
        let err = registry.validate_access("DD_SERVICE_NAME").unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedConfiguration);
    }

    #[test]
    fn test_validate_key() {
        let registry = SchemaRegistry::builtin().unwrap();
        assert!(registry.validate_key("appsec.enabled").is_ok());
        assert!(registry.validate_key("tracePropagationStyle.otelPropagators").is_ok());
        assert_eq!(
            registry.validate_key("nope").unwrap_err().code,
            ErrorCode::UnknownKey
        );
    }

    #[test]
    fn test_duplicate_alias_fails_load() {
        let json = manifest(
            r#"
            "DD_A": [{"implementation": "A", "type": "string", "default": null, "aliases": ["DD_X"]}],
            "DD_B": [{"implementation": "A", "type": "string", "default": null, "aliases": ["DD_X"]}]
            "#,
        );
        let err = SchemaRegistry::load(&json).unwrap_err();
        assert_eq!(err.code, ErrorCode::DuplicateAlias);
        assert_eq!(err.key.as_deref(), Some("DD_X"));
    }

    #[test]
    fn test_invalid_manifest() {
        let err = SchemaRegistry::load("{").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidManifest);

        let err = SchemaRegistry::load(&manifest(r#""DD_A": []"#)).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidManifest);

        let json = manifest(
            r#"
            "DD_A": [{"implementation": "A", "type": "string", "default": null, "configurationNames": ["a"]}],
            "DD_B": [{"implementation": "A", "type": "string", "default": null, "configurationNames": ["a"]}]
            "#,
        );
        let err = SchemaRegistry::load(&json).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidManifest);
    }
}
