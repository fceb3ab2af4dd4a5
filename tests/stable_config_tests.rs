//! Tests for stable configuration files and their place in the precedence order.

use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;
use tracer_config::sources::calculated::Platform;
use tracer_config::sources::env::ProcessEnv;
use tracer_config::sources::stable::{FileStableConfigReader, StablePaths};
use tracer_config::{Engine, Origin, TracerOptions};

/// Temp directory holding the local and fleet files.
struct StableFiles {
    _dir: TempDir,
    local: PathBuf,
    fleet: PathBuf,
}

impl StableFiles {
    fn new(local: Option<&str>, fleet: Option<&str>) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let local_path = dir.path().join("application_monitoring.yaml");
        let fleet_path = dir.path().join("fleet.yaml");
        if let Some(content) = local {
            fs::write(&local_path, content).unwrap();
        }
        if let Some(content) = fleet {
            fs::write(&fleet_path, content).unwrap();
        }
        Self {
            _dir: dir,
            local: local_path,
            fleet: fleet_path,
        }
    }

    fn engine(&self, pairs: &[(&str, &str)]) -> Engine {
        Engine::builder()
            .env(ProcessEnv::from_pairs(pairs.iter().copied()))
            .stable_reader(FileStableConfigReader)
            .stable_paths(StablePaths::with_paths(self.local.clone(), self.fleet.clone()))
            .platform(Platform::with_socket("/nonexistent/apm.socket"))
            .build()
            .expect("Failed to build engine")
    }
}

#[test]
fn fleet_beats_env_which_beats_local() {
    let files = StableFiles::new(
        Some(
            "config_id: local-1\napm_configuration_default:\n  DD_SERVICE: local-svc\n  DD_ENV: local-env\n  DD_VERSION: local-version\n",
        ),
        Some("config_id: fleet-7\napm_configuration_default:\n  DD_ENV: fleet-env\n"),
    );
    let engine = files.engine(&[("DD_ENV", "env-env"), ("DD_VERSION", "env-version")]);
    let effective = engine.configure(TracerOptions::default()).unwrap();

    assert_eq!(effective.get_str("service"), Some("local-svc"));
    assert_eq!(effective.origin("service"), Some(Origin::LocalStableConfig));
    assert_eq!(effective.get_str("version"), Some("env-version"));
    assert_eq!(effective.origin("version"), Some(Origin::EnvVar));
    assert_eq!(effective.get_str("env"), Some("fleet-env"));
    assert_eq!(effective.origin("env"), Some(Origin::FleetStableConfig));

    assert_eq!(
        engine.stable_config_ids(),
        (Some("local-1".to_string()), Some("fleet-7".to_string()))
    );
    assert!(engine.stable_warnings().is_empty());
}

#[test]
fn code_beats_fleet() {
    let files = StableFiles::new(
        None,
        Some("apm_configuration_default:\n  DD_APPSEC_ENABLED: true\n"),
    );
    let engine = files.engine(&[]);

    let effective = engine.configure(TracerOptions::default()).unwrap();
    assert_eq!(effective.get_bool("appsec.enabled"), Some(true));
    assert_eq!(effective.origin("appsec.enabled"), Some(Origin::FleetStableConfig));

    let options: TracerOptions = serde_yaml::from_str("appsec: false").unwrap();
    let effective = engine.configure(options).unwrap();
    assert_eq!(effective.get_bool("appsec.enabled"), Some(false));
    assert_eq!(effective.origin("appsec.enabled"), Some(Origin::Code));
}

#[test]
fn malformed_file_warns_and_contributes_nothing() {
    let files = StableFiles::new(
        Some("apm_configuration_default:\n  DD_SERVICE: ok-svc\n"),
        Some("apm_configuration_default: [unclosed"),
    );
    let engine = files.engine(&[]);
    let effective = engine.configure(TracerOptions::default()).unwrap();

    assert_eq!(effective.get_str("service"), Some("ok-svc"));
    let warnings = engine.stable_warnings();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("fleet"), "unexpected warning: {}", warnings[0]);
}

#[test]
fn missing_files_are_silent() {
    let files = StableFiles::new(None, None);
    let engine = files.engine(&[]);
    let effective = engine.configure(TracerOptions::default()).unwrap();

    assert!(engine.stable_warnings().is_empty());
    assert_eq!(effective.get("service"), None);
}

#[test]
fn stable_files_read_once_per_engine() {
    let files = StableFiles::new(Some("apm_configuration_default:\n  DD_SERVICE: first\n"), None);
    let engine = files.engine(&[]);
    engine.configure(TracerOptions::default()).unwrap();

    fs::write(&files.local, "apm_configuration_default:\n  DD_SERVICE: second\n").unwrap();
    let effective = engine.configure(TracerOptions::default()).unwrap();
    assert_eq!(effective.get_str("service"), Some("first"));
}

#[test]
fn test_path_overrides_are_discovered() {
    let files = StableFiles::new(Some("apm_configuration_default:\n  DD_ENV: discovered\n"), None);
    let local = files.local.display().to_string();
    let fleet = files.fleet.display().to_string();

    let engine = Engine::builder()
        .env(ProcessEnv::from_pairs([
            ("DD_TEST_LOCAL_CONFIG_PATH", local.as_str()),
            ("DD_TEST_FLEET_CONFIG_PATH", fleet.as_str()),
        ]))
        .platform(Platform::with_socket("/nonexistent/apm.socket"))
        .build()
        .unwrap();
    let effective = engine.configure(TracerOptions::default()).unwrap();
    assert_eq!(effective.get_str("env"), Some("discovered"));
    assert_eq!(effective.origin("env"), Some(Origin::LocalStableConfig));
}

#[test]
fn serverless_skips_stable_config() {
    let files = StableFiles::new(Some("apm_configuration_default:\n  DD_ENV: discovered\n"), None);
    let local = files.local.display().to_string();

    let engine = Engine::builder()
        .env(ProcessEnv::from_pairs([
            ("DD_TEST_LOCAL_CONFIG_PATH", local.as_str()),
            ("AWS_LAMBDA_FUNCTION_NAME", "handler"),
        ]))
        .platform(Platform::with_socket("/nonexistent/apm.socket"))
        .build()
        .unwrap();
    let effective = engine.configure(TracerOptions::default()).unwrap();

    assert_eq!(effective.get("env"), None);
    assert_eq!(effective.get_i64("flushInterval"), Some(0));
    assert_eq!(effective.get_bool("crashtracking.enabled"), Some(false));
}
