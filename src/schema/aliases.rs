//! Alias table: legacy names mapped onto canonical configuration names.

use crate::error::{ConfigError, ConfigResult};
use std::collections::{BTreeMap, HashMap};

/// Aliases that predate the manifest and are still honored at runtime.
pub const LEGACY_ALIASES: &[(&str, &[&str])] = &[
    ("DD_AGENT_HOST", &["DD_TRACE_AGENT_HOSTNAME"]),
    ("DD_TRACE_AGENT_URL", &["DD_TRACE_URL"]),
];

/// Bidirectional alias lookup.
///
/// Each alias belongs to exactly one canonical name. The per-canonical alias
/// list keeps registration order, which decides which alias wins when several
/// are present at once.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    by_canonical: BTreeMap<String, Vec<String>>,
    to_canonical: HashMap<String, String>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `alias` for `canonical`.
    ///
    /// Registering the same pair twice is a no-op; registering an alias under
    /// a second canonical name fails.
    pub fn register(&mut self, canonical: &str, alias: &str) -> ConfigResult<()> {
        if let Some(existing) = self.to_canonical.get(alias) {
            if existing == canonical {
                return Ok(());
            }
            return Err(ConfigError::duplicate_alias(alias, existing, canonical));
        }

        self.to_canonical
            .insert(alias.to_string(), canonical.to_string());
        self.by_canonical
            .entry(canonical.to_string())
            .or_default()
            .push(alias.to_string());
        Ok(())
    }

    /// Register the grandfathered aliases.
    pub fn register_legacy(&mut self) -> ConfigResult<()> {
        for (canonical, aliases) in LEGACY_ALIASES {
            for alias in *aliases {
                self.register(canonical, alias)?;
            }
        }
        Ok(())
    }

    /// Aliases of a canonical name, in registration order.
    pub fn aliases_of(&self, canonical: &str) -> &[String] {
        self.by_canonical
            .get(canonical)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn canonical_of(&self, alias: &str) -> Option<&str> {
        self.to_canonical.get(alias).map(String::as_str)
    }

    pub fn is_alias(&self, name: &str) -> bool {
        self.to_canonical.contains_key(name)
    }

    /// Iterate over canonical names that have at least one alias.
    pub fn canonicals(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.by_canonical
            .iter()
            .map(|(canonical, aliases)| (canonical.as_str(), aliases.as_slice()))
    }

    /// Look `name` up in `source`, falling back to its aliases in order.
    pub fn lookup<'a, V>(&self, name: &str, source: &'a BTreeMap<String, V>) -> Option<&'a V> {
        source.get(name).or_else(|| {
            self.aliases_of(name)
                .iter()
                .find_map(|alias| source.get(alias))
        })
    }
}
