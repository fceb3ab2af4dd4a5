//! Calculated source: values derived from several other sources.
//!
//! Recomputed after any other source changes. Calculated values sit just above
//! the defaults, so anything a user sets explicitly still wins.

use super::env::ProcessEnv;
use super::options::TracerOptions;
use super::{ConfigSource, Origin, SourceSet};
use crate::error::ConfigResult;
use crate::normalize::{parse_bool, validate_naming_version};
use crate::schema::SchemaRegistry;
use serde_json::Value;
use std::path::PathBuf;

/// Port of the agent's OTLP HTTP receiver.
pub const DEFAULT_OTLP_PORT: u16 = 4318;

/// Well-known agent socket.
pub const DEFAULT_APM_SOCKET: &str = "/var/run/datadog/apm.socket";

const DEFAULT_PROPAGATION_STYLES: &[&str] = &["datadog", "tracecontext"];
const B3_PROPAGATION_STYLES: &[&str] = &["b3", "b3 single header"];

/// Facts about the host that influence derived values.
#[derive(Debug, Clone)]
pub struct Platform {
    pub is_windows: bool,
    pub apm_socket: PathBuf,
}

impl Default for Platform {
    fn default() -> Self {
        Self {
            is_windows: cfg!(windows),
            apm_socket: PathBuf::from(DEFAULT_APM_SOCKET),
        }
    }
}

impl Platform {
    /// Check a custom socket path instead of the well-known one.
    pub fn with_socket(apm_socket: impl Into<PathBuf>) -> Self {
        Self {
            apm_socket: apm_socket.into(),
            ..Self::default()
        }
    }
}

/// Everything the calculated source reads.
pub struct CalculatedInputs<'a> {
    pub registry: &'a SchemaRegistry,
    pub env: &'a ProcessEnv,
    pub options: &'a TracerOptions,
    pub sources: &'a SourceSet,
    pub platform: &'a Platform,
}

impl CalculatedInputs<'_> {
    /// Highest-priority value among every source except the calculated one.
    fn merged(&self, key: &str) -> Option<&Value> {
        self.sources
            .lowest_first()
            .into_iter()
            .rev()
            .filter(|source| source.origin != Origin::Calculated)
            .find_map(|source| source.get(key))
    }

    /// Whether any user-facing source (not defaults) sets `key`.
    fn explicitly_set(&self, key: &str) -> bool {
        self.sources
            .lowest_first()
            .into_iter()
            .filter(|source| !matches!(source.origin, Origin::Default | Origin::Calculated))
            .any(|source| source.is_set(key))
    }

    fn merged_text(&self, key: &str) -> Option<String> {
        match self.merged(key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn env_var(&self, name: &str) -> ConfigResult<Option<&str>> {
        self.env.get(self.registry, name)
    }
}

/// Compute the calculated source.
pub fn compute(inputs: &CalculatedInputs<'_>) -> ConfigResult<ConfigSource> {
    let mut calc = ConfigSource::new(Origin::Calculated);

    let url = agent_url(inputs)?;
    calc.set_string("url", url.as_deref());

    // OTEL logs and DD log injection are mutually exclusive
    if inputs.sources.env.get("otelLogsEnabled") == Some(&Value::Bool(true)) {
        calc.set_bool_value("logInjection", Some(false));
    }

    let hostname = agent_hostname(inputs, url.as_deref());
    if let Some(host) = &hostname {
        calc.set_string("dogstatsd.hostname", Some(host));
        calc.set_string(
            "otelLogsUrl",
            Some(&format!("http://{}:{}", host, DEFAULT_OTLP_PORT)),
        );
        calc.set_string(
            "otelMetricsUrl",
            Some(&format!("http://{}:{}/v1/metrics", host, DEFAULT_OTLP_PORT)),
        );
        calc.set_string(
            "otelUrl",
            Some(&format!("http://{}:{}", host, DEFAULT_OTLP_PORT)),
        );
    }

    if !inputs.sources.env.values.contains_key("resourceRenamingEnabled") {
        let appsec_enabled = inputs
            .sources
            .code
            .get("appsec.enabled")
            .or_else(|| inputs.sources.env.get("appsec.enabled"));
        if appsec_enabled == Some(&Value::Bool(true)) {
            calc.set_bool_value("resourceRenamingEnabled", Some(true));
        }
    }

    calc.set_bool_value(
        "spanComputePeerService",
        Some(span_compute_peer_service(inputs)?),
    );
    calc.set_bool_value("stats.enabled", Some(stats_enabled(inputs)?));

    let b3 = match inputs.options.experimental_b3() {
        Some(b3) => b3,
        None => inputs
            .env_var("DD_TRACE_EXPERIMENTAL_B3_ENABLED")?
            .and_then(parse_bool)
            .unwrap_or(false),
    };
    if b3 {
        let styles: Vec<String> = DEFAULT_PROPAGATION_STYLES
            .iter()
            .chain(B3_PROPAGATION_STYLES)
            .map(|s| s.to_string())
            .collect();
        calc.set_list("tracePropagationStyle.inject", Some(styles.clone()));
        calc.set_list("tracePropagationStyle.extract", Some(styles));
    }

    Ok(calc)
}

/// Resolve the agent URL.
///
/// An explicit URL wins. Otherwise an explicitly configured host or port
/// builds an HTTP URL. Otherwise the well-known socket is used when it exists
/// (never on Windows). Otherwise the default host and port apply.
fn agent_url(inputs: &CalculatedInputs<'_>) -> ConfigResult<Option<String>> {
    let explicit = match inputs.options.url.as_deref().filter(|u| !u.is_empty()) {
        Some(url) => Some(url),
        None => inputs
            .env_var("DD_TRACE_AGENT_URL")?
            .filter(|u| !u.is_empty()),
    };
    if let Some(url) = explicit {
        return Ok(Some(url.trim().to_string()));
    }

    let host = inputs.merged_text("hostname");
    let port = inputs.merged_text("port");

    let host_or_port_set =
        inputs.explicitly_set("hostname") || inputs.explicitly_set("port");
    if !host_or_port_set && !inputs.platform.is_windows && inputs.platform.apm_socket.exists() {
        return Ok(Some(format!(
            "unix://{}",
            inputs.platform.apm_socket.display()
        )));
    }

    Ok(match (host, port) {
        (Some(host), Some(port)) => Some(format!("http://{}:{}", format_host(&host), port)),
        _ => None,
    })
}

/// IPv6 literals need brackets inside a URL.
fn format_host(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]", host)
    } else {
        host.to_string()
    }
}

/// Host part of an `http(s)://host[:port]/...` URL.
fn url_host(url: &str) -> Option<String> {
    let (scheme, rest) = url.split_once("://")?;
    if scheme == "unix" {
        return None;
    }
    let authority = rest.split('/').next()?;
    let host = match authority.strip_prefix('[') {
        Some(bracketed) => bracketed.split(']').next()?,
        None => authority.split(':').next()?,
    };
    (!host.is_empty()).then(|| host.to_string())
}

fn agent_hostname(inputs: &CalculatedInputs<'_>, url: Option<&str>) -> Option<String> {
    inputs
        .merged_text("hostname")
        .or_else(|| url.and_then(url_host))
}

/// Peer service computation: opt-in under schema `v0`, opt-out afterwards.
fn span_compute_peer_service(inputs: &CalculatedInputs<'_>) -> ConfigResult<bool> {
    let schema_raw = match inputs.options.span_attribute_schema.as_deref() {
        Some(schema) => Some(schema),
        None => inputs.env_var("DD_TRACE_SPAN_ATTRIBUTE_SCHEMA")?,
    };
    let schema = validate_naming_version(schema_raw);

    let explicit = match inputs.options.span_compute_peer_service {
        Some(value) => Some(Some(value)),
        None => inputs
            .env_var("DD_TRACE_PEER_SERVICE_DEFAULTS_ENABLED")?
            .map(parse_bool),
    };

    Ok(match (schema, explicit) {
        ("v0", Some(value)) => value == Some(true),
        ("v0", None) => false,
        (_, Some(value)) => value != Some(false),
        (_, None) => true,
    })
}

/// Stats computation requires APM tracing, then follows the explicit setting
/// or serverless function detection.
fn stats_enabled(inputs: &CalculatedInputs<'_>) -> ConfigResult<bool> {
    let disabled = Value::Bool(false);
    let apm_tracing = inputs.sources.code.get("apmTracingEnabled") != Some(&disabled)
        && inputs.sources.env.get("apmTracingEnabled") != Some(&disabled);
    if !apm_tracing {
        return Ok(false);
    }

    let explicit = match inputs.options.stats {
        Some(stats) => Some(stats),
        None => inputs
            .env_var("DD_TRACE_STATS_COMPUTATION_ENABLED")?
            .and_then(parse_bool),
    };
    Ok(explicit.unwrap_or_else(|| inputs.env.is_gcp_function() || inputs.env.is_azure_function()))
}
