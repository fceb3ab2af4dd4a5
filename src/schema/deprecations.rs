//! Deprecated configuration names and their one-shot warnings.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, OnceLock};
use tracing::warn;

static WARNED: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();

/// Deprecated names mapped to the hint appended to their warning.
#[derive(Debug, Clone, Default)]
pub struct Deprecations {
    notes: BTreeMap<String, Option<String>>,
}

impl Deprecations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, note: Option<String>) {
        self.notes.insert(name.to_string(), note);
    }

    pub fn is_deprecated(&self, name: &str) -> bool {
        self.notes.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.notes.keys().map(String::as_str)
    }

    /// Full warning text for a deprecated name.
    pub fn message(&self, name: &str) -> Option<String> {
        let note = self.notes.get(name)?;
        Some(match note {
            Some(note) => format!("The environment variable {} is deprecated. {}", name, note),
            None => format!("The environment variable {} is deprecated.", name),
        })
    }

    /// Log the deprecation warning for `name`, at most once per process.
    ///
    /// Returns true when a warning was emitted by this call.
    pub fn warn_once(&self, name: &str) -> bool {
        let Some(message) = self.message(name) else {
            return false;
        };

        let warned = WARNED.get_or_init(|| Mutex::new(HashSet::new()));
        let first = match warned.lock() {
            Ok(mut set) => set.insert(name.to_string()),
            Err(poisoned) => poisoned.into_inner().insert(name.to_string()),
        };
        if first {
            warn!("{}", message);
        }
        first
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_includes_note() {
        let mut deprecations = Deprecations::new();
        deprecations.insert("DD_OLD", Some("Please use DD_NEW instead.".to_string()));
        deprecations.insert("DD_BARE", None);

        assert_eq!(
            deprecations.message("DD_OLD").as_deref(),
            Some("The environment variable DD_OLD is deprecated. Please use DD_NEW instead.")
        );
        assert_eq!(
            deprecations.message("DD_BARE").as_deref(),
            Some("The environment variable DD_BARE is deprecated.")
        );
        assert!(deprecations.message("DD_FINE").is_none());
    }

    #[test]
    fn test_warn_once_is_memoized() {
        let mut deprecations = Deprecations::new();
        deprecations.insert("DD_WARN_ONCE_TEST_ONLY", None);

        assert!(deprecations.warn_once("DD_WARN_ONCE_TEST_ONLY"));
        assert!(!deprecations.warn_once("DD_WARN_ONCE_TEST_ONLY"));
        assert!(!deprecations.warn_once("DD_NOT_DEPRECATED"));
    }
}
