//! Host-managed ("stable") configuration files.
//!
//! Two tiers exist: a local file written by the host operator and a fleet
//! file written by fleet automation. Both are YAML documents whose
//! `apm_configuration_default` map holds environment-style names:
//!
//! ```yaml
//! config_id: abc-123
//! apm_configuration_default:
//!   DD_SERVICE: billing
//!   DD_APPSEC_ENABLED: true
//! ```
//!
//! Selector rules (`apm_configuration_rules`) are parsed but not evaluated.

use super::env::{EnvMap, ProcessEnv};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Stable-config tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StableTier {
    Local,
    Fleet,
}

impl std::fmt::Display for StableTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StableTier::Local => write!(f, "local"),
            StableTier::Fleet => write!(f, "fleet"),
        }
    }
}

/// Locations of both stable-config files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StablePaths {
    pub local: PathBuf,
    pub fleet: PathBuf,
}

impl StablePaths {
    /// Platform default locations, overridable through the test variables.
    pub fn discover(env: &ProcessEnv) -> Self {
        let defaults = Self::platform_defaults();
        Self {
            local: env
                .get_raw("DD_TEST_LOCAL_CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.local),
            fleet: env
                .get_raw("DD_TEST_FLEET_CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.fleet),
        }
    }

    pub fn with_paths(local: impl Into<PathBuf>, fleet: impl Into<PathBuf>) -> Self {
        Self {
            local: local.into(),
            fleet: fleet.into(),
        }
    }

    #[cfg(target_os = "windows")]
    fn platform_defaults() -> Self {
        Self::with_paths(
            r"C:\ProgramData\Datadog\application_monitoring.yaml",
            r"C:\ProgramData\Datadog\managed\datadog-agent\stable\application_monitoring.yaml",
        )
    }

    #[cfg(target_os = "macos")]
    fn platform_defaults() -> Self {
        Self::with_paths(
            "/opt/datadog-agent/etc/application_monitoring.yaml",
            "/opt/datadog-agent/etc/managed/datadog-agent/stable/application_monitoring.yaml",
        )
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    fn platform_defaults() -> Self {
        Self::with_paths(
            "/etc/datadog-agent/application_monitoring.yaml",
            "/etc/datadog-agent/managed/datadog-agent/stable/application_monitoring.yaml",
        )
    }
}

/// Result of reading both tiers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StableConfigRead {
    pub local_entries: EnvMap,
    pub fleet_entries: EnvMap,
    pub local_config_id: Option<String>,
    pub fleet_config_id: Option<String>,
    pub warnings: Vec<String>,
}

/// Reads stable configuration. Implementations never fail: problems become
/// warnings and an empty contribution.
pub trait StableConfigReader: Send + Sync {
    fn read(&self, paths: &StablePaths) -> StableConfigRead;
}

/// Reader used when stable config is unavailable (serverless, disabled).
#[derive(Debug, Default)]
pub struct NoStableConfig;

impl StableConfigReader for NoStableConfig {
    fn read(&self, _paths: &StablePaths) -> StableConfigRead {
        StableConfigRead::default()
    }
}

/// Reads the YAML files from disk.
#[derive(Debug, Default)]
pub struct FileStableConfigReader;

#[derive(Debug, Deserialize)]
struct StableConfigFile {
    #[serde(default)]
    config_id: Option<String>,
    #[serde(default)]
    apm_configuration_default: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    #[allow(dead_code)]
    apm_configuration_rules: Vec<serde_yaml::Value>,
}

/// Parsed content of one stable-config file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StableFile {
    pub config_id: Option<String>,
    pub entries: EnvMap,
}

/// Parse one stable-config document.
///
/// Scalars are converted to their textual form. Non-scalar values are skipped.
pub fn parse_stable_file(content: &str) -> Result<StableFile, serde_yaml::Error> {
    if content.trim().is_empty() {
        return Ok(StableFile::default());
    }
    let file: StableConfigFile = serde_yaml::from_str(content)?;

    let entries = file
        .apm_configuration_default
        .into_iter()
        .filter_map(|(name, value)| {
            let text = match value {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Bool(b) => b.to_string(),
                serde_yaml::Value::Number(n) => n.to_string(),
                other => {
                    debug!("Ignoring non-scalar stable config value for {}: {:?}", name, other);
                    return None;
                }
            };
            Some((name, text))
        })
        .collect();

    Ok(StableFile {
        config_id: file.config_id,
        entries,
    })
}

impl FileStableConfigReader {
    fn read_tier(&self, tier: StableTier, path: &Path, warnings: &mut Vec<String>) -> StableFile {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return StableFile::default(),
            Err(e) => {
                warnings.push(format!(
                    "Error reading {} stable config file {}: {}",
                    tier,
                    path.display(),
                    e
                ));
                return StableFile::default();
            }
        };

        match parse_stable_file(&content) {
            Ok(file) => file,
            Err(e) => {
                warnings.push(format!(
                    "Error parsing {} stable config file {}: {}",
                    tier,
                    path.display(),
                    e
                ));
                StableFile::default()
            }
        }
    }
}

impl StableConfigReader for FileStableConfigReader {
    fn read(&self, paths: &StablePaths) -> StableConfigRead {
        let mut warnings = Vec::new();
        let local = self.read_tier(StableTier::Local, &paths.local, &mut warnings);
        let fleet = self.read_tier(StableTier::Fleet, &paths.fleet, &mut warnings);

        StableConfigRead {
            local_entries: local.entries,
            fleet_entries: fleet.entries,
            local_config_id: local.config_id,
            fleet_config_id: fleet.config_id,
            warnings,
        }
    }
}
