//! Structured error types for configuration resolution.

use serde::Serialize;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Integrity errors raised while loading the manifest
    InvalidManifest,
    DuplicateAlias,

    // Access errors
    UnsupportedConfiguration,
    UnknownKey,

    // Engine state
    Busy,

    InternalError,
}

/// Error returned by the configuration engine.
///
/// Only integrity violations (manifest, aliases, undeclared keys) and
/// re-entrant recomputes surface as errors. User misconfiguration is logged
/// and degrades to "unset".
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[error("{message}")]
pub struct ConfigError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl ConfigError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            key: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    // Convenience constructors

    pub fn invalid_manifest(reason: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorCode::InvalidManifest,
            format!("Invalid supported configurations manifest: {}", reason),
        )
    }

    pub fn duplicate_alias(alias: &str, existing: &str, requested: &str) -> Self {
        Self::new(
            ErrorCode::DuplicateAlias,
            format!(
                "The alias {} is already used for {} and cannot be registered for {}.",
                alias, existing, requested
            ),
        )
        .with_key(alias)
    }

    pub fn unsupported(name: &str) -> Self {
        Self::new(
            ErrorCode::UnsupportedConfiguration,
            format!(
                "Missing {} env/configuration in the supported configurations manifest.",
                name
            ),
        )
        .with_key(name)
    }

    pub fn unknown_key(key: &str) -> Self {
        Self::new(
            ErrorCode::UnknownKey,
            format!("Unknown configuration key: {}", key),
        )
        .with_key(key)
    }

    pub fn busy() -> Self {
        Self::new(
            ErrorCode::Busy,
            "A configuration recompute is already in progress on this thread",
        )
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::new(ErrorCode::InternalError, err.to_string())
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_carries_key() {
        let err = ConfigError::unsupported("DD_NOT_A_THING");
        assert_eq!(err.code, ErrorCode::UnsupportedConfiguration);
        assert_eq!(err.key.as_deref(), Some("DD_NOT_A_THING"));
        assert!(err.to_string().contains("DD_NOT_A_THING"));
    }

    #[test]
    fn test_serializes_code_in_screaming_case() {
        let err = ConfigError::duplicate_alias("DD_X", "DD_A", "DD_B");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "DUPLICATE_ALIAS");
        assert_eq!(json["key"], "DD_X");
    }
}
