//! Programmatic tracer options (origin `code`).
//!
//! Options arrive as a typed nested struct. Every leaf is optional; absence
//! at any level means "not set". [`TracerOptions::flatten`] turns the struct
//! into the flat dotted-key source used by the merge.

use super::{ConfigSource, Origin, add_tags};
use crate::normalize::{self, maybe_int, normalize_propagation_style, validate_naming_version};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A scalar as a user may write it: `8126`, `"8126"`, `true`, `0.5`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn to_text(&self) -> String {
        match self {
            Scalar::Bool(b) => b.to_string(),
            Scalar::Int(n) => n.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Text(s) => s.clone(),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Scalar::Int(n) => Some(*n),
            Scalar::Float(f) if f.is_finite() => Some(f.trunc() as i64),
            Scalar::Text(s) => maybe_int(s),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Scalar::Int(n) => Some(*n as f64),
            Scalar::Float(f) => Some(*f),
            Scalar::Text(s) => normalize::maybe_float(s),
            Scalar::Bool(_) => None,
        }
    }

    fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A section that also accepts a bare boolean as `{ enabled: <bool> }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Toggle<T> {
    Flag(bool),
    Section(T),
}

/// Tags given either as a map or as a `key:value,...` string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagsOption {
    Map(BTreeMap<String, Scalar>),
    Text(String),
}

/// Propagation styles given as one list for both directions, or split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropagationOption {
    List(Vec<String>),
    Text(String),
    Split {
        #[serde(default)]
        inject: Option<StylesOption>,
        #[serde(default)]
        extract: Option<StylesOption>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StylesOption {
    List(Vec<String>),
    Text(String),
}

impl StylesOption {
    fn normalized(&self) -> Vec<String> {
        match self {
            StylesOption::List(styles) => styles.iter().map(|s| s.to_lowercase()).collect(),
            StylesOption::Text(text) => normalize_propagation_style(text),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppsecOptions {
    pub enabled: Option<bool>,
    pub rules: Option<String>,
    pub rate_limit: Option<Scalar>,
    pub waf_timeout: Option<Scalar>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IastOptions {
    pub enabled: Option<bool>,
    pub request_sampling: Option<Scalar>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnabledOption {
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DogstatsdOptions {
    pub hostname: Option<String>,
    pub port: Option<Scalar>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicInstrumentationOptions {
    pub enabled: Option<bool>,
    pub redacted_identifiers: Option<Vec<String>>,
    pub upload_interval_seconds: Option<Scalar>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmObsOptions {
    pub ml_app: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfigOptions {
    pub poll_interval: Option<Scalar>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionOptions {
    pub sample_rate: Option<Scalar>,
    pub rate_limit: Option<Scalar>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentalOptions {
    pub appsec: Option<Toggle<AppsecOptions>>,
    pub iast: Option<Toggle<IastOptions>>,
    pub b3: Option<bool>,
}

/// Options passed to `configure()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracerOptions {
    pub service: Option<String>,
    pub env: Option<String>,
    pub version: Option<String>,
    pub tags: Option<TagsOption>,

    pub url: Option<String>,
    pub hostname: Option<String>,
    pub port: Option<Scalar>,
    pub protocol_version: Option<String>,
    pub site: Option<String>,

    pub apm_tracing_enabled: Option<bool>,
    pub appsec: Option<Toggle<AppsecOptions>>,
    pub iast: Option<Toggle<IastOptions>>,
    pub experimental: Option<ExperimentalOptions>,
    pub client_ip_enabled: Option<bool>,
    pub client_ip_header: Option<String>,
    pub code_origin_for_spans: Option<EnabledOption>,
    pub dbm_propagation_mode: Option<String>,
    pub dogstatsd: Option<DogstatsdOptions>,
    pub dynamic_instrumentation: Option<DynamicInstrumentationOptions>,
    pub flush_interval: Option<Scalar>,
    pub flush_min_spans: Option<Scalar>,
    pub header_tags: Option<Vec<String>>,
    pub llmobs: Option<LlmObsOptions>,
    pub log_injection: Option<bool>,
    pub peer_service_mapping: Option<BTreeMap<String, String>>,
    pub profiling: Option<Scalar>,
    pub remote_config: Option<RemoteConfigOptions>,
    pub report_hostname: Option<bool>,
    pub runtime_metrics: Option<Toggle<EnabledOption>>,
    pub sample_rate: Option<Scalar>,
    pub rate_limit: Option<Scalar>,
    pub ingestion: Option<IngestionOptions>,
    pub sampling_rules: Option<Vec<Value>>,
    pub span_sampling_rules: Option<Vec<Value>>,
    pub service_mapping: Option<BTreeMap<String, String>>,
    pub span_attribute_schema: Option<String>,
    pub span_compute_peer_service: Option<bool>,
    pub stats: Option<bool>,
    pub startup_logs: Option<bool>,
    pub trace_id128_bit_generation_enabled: Option<bool>,
    pub trace_propagation_style: Option<PropagationOption>,
}

impl TracerOptions {
    /// AppSec section, falling back to the experimental one.
    pub fn appsec(&self) -> Option<AppsecOptions> {
        let toggle = self
            .appsec
            .as_ref()
            .or_else(|| self.experimental.as_ref()?.appsec.as_ref())?;
        Some(match toggle {
            Toggle::Flag(enabled) => AppsecOptions {
                enabled: Some(*enabled),
                ..Default::default()
            },
            Toggle::Section(section) => section.clone(),
        })
    }

    /// IAST section, falling back to the experimental one.
    pub fn iast(&self) -> Option<IastOptions> {
        let toggle = self
            .iast
            .as_ref()
            .or_else(|| self.experimental.as_ref()?.iast.as_ref())?;
        Some(match toggle {
            Toggle::Flag(enabled) => IastOptions {
                enabled: Some(*enabled),
                ..Default::default()
            },
            Toggle::Section(section) => section.clone(),
        })
    }

    pub fn experimental_b3(&self) -> Option<bool> {
        self.experimental.as_ref()?.b3
    }

    /// Flatten into the `code` source.
    ///
    /// `env_source` is consulted only for `llmobs.enabled`, which an options
    /// block implies only when the environment does not decide it.
    pub fn flatten(&self, env_source: &ConfigSource) -> ConfigSource {
        let mut opts = ConfigSource::new(Origin::Code);

        let mut tags = BTreeMap::new();
        match &self.tags {
            Some(TagsOption::Map(map)) => {
                tags.extend(map.iter().map(|(k, v)| (k.clone(), v.to_text())));
            }
            Some(TagsOption::Text(text)) => add_tags(&mut tags, Some(text)),
            None => {}
        }

        opts.set_bool_value("apmTracingEnabled", self.apm_tracing_enabled);

        let appsec = self.appsec().unwrap_or_default();
        opts.set_bool_value("appsec.enabled", appsec.enabled);
        set_scalar_int(&mut opts, "appsec.rateLimit", appsec.rate_limit.as_ref());
        opts.set_string("appsec.rules", appsec.rules.as_deref());
        set_scalar_int(&mut opts, "appsec.wafTimeout", appsec.waf_timeout.as_ref());

        opts.set_bool_value("clientIpEnabled", self.client_ip_enabled);
        opts.set_string(
            "clientIpHeader",
            self.client_ip_header
                .as_deref()
                .map(str::to_lowercase)
                .as_deref(),
        );
        opts.set_bool_value(
            "codeOriginForSpans.enabled",
            self.code_origin_for_spans.as_ref().and_then(|c| c.enabled),
        );
        opts.set_string("dbmPropagationMode", self.dbm_propagation_mode.as_deref());
        if let Some(dogstatsd) = &self.dogstatsd {
            opts.set_string("dogstatsd.hostname", dogstatsd.hostname.as_deref());
            opts.set_string(
                "dogstatsd.port",
                dogstatsd.port.as_ref().map(Scalar::to_text).as_deref(),
            );
        }

        let di = self.dynamic_instrumentation.clone().unwrap_or_default();
        opts.set_bool_value("dynamicInstrumentation.enabled", di.enabled);
        opts.set_list(
            "dynamicInstrumentation.redactedIdentifiers",
            di.redacted_identifiers,
        );
        opts.set_float(
            "dynamicInstrumentation.uploadIntervalSeconds",
            di.upload_interval_seconds.as_ref().and_then(Scalar::as_float),
        );
        if let Some(raw) = &di.upload_interval_seconds {
            opts.set_unprocessed("dynamicInstrumentation.uploadIntervalSeconds", raw.to_value());
        }

        opts.set_string(
            "env",
            non_empty(self.env.as_deref()).or(tags.get("env").map(String::as_str)),
        );
        set_scalar_int(&mut opts, "flushInterval", self.flush_interval.as_ref());
        set_scalar_int(&mut opts, "flushMinSpans", self.flush_min_spans.as_ref());
        opts.set_list("headerTags", self.header_tags.clone());
        opts.set_string("hostname", self.hostname.as_deref());

        let iast = self.iast().unwrap_or_default();
        opts.set_bool_value("iast.enabled", iast.enabled);
        if let Some(raw) = &iast.request_sampling
            && let Some(sampling) = raw.as_int().filter(|n| (0..=100).contains(n))
        {
            opts.set_int("iast.requestSampling", Some(sampling));
            opts.set_unprocessed("iast.requestSampling", raw.to_value());
        }

        opts.set_string(
            "llmobs.mlApp",
            self.llmobs.as_ref().and_then(|l| l.ml_app.as_deref()),
        );
        opts.set_bool_value("logInjection", self.log_injection);
        if let Some(mapping) = &self.peer_service_mapping {
            opts.set("peerServiceMapping", normalize::map_value(mapping.clone()));
        }
        opts.set_string("port", self.port.as_ref().map(Scalar::to_text).as_deref());

        if let Some(profiling) = &self.profiling {
            let text = profiling.to_text();
            if matches!(text.as_str(), "true" | "false" | "auto") {
                opts.set_string("profiling.enabled", Some(&text));
            }
        }
        opts.set_string("protocolVersion", self.protocol_version.as_deref());
        if let Some(remote) = &self.remote_config {
            opts.set_float(
                "remoteConfig.pollInterval",
                remote.poll_interval.as_ref().and_then(Scalar::as_float),
            );
            if let Some(raw) = &remote.poll_interval {
                opts.set_unprocessed("remoteConfig.pollInterval", raw.to_value());
            }
        }
        opts.set_bool_value("reportHostname", self.report_hostname);
        let runtime_metrics = self.runtime_metrics.as_ref().and_then(|toggle| match toggle {
            Toggle::Flag(enabled) => Some(*enabled),
            Toggle::Section(section) => section.enabled,
        });
        opts.set_bool_value("runtimeMetrics.enabled", runtime_metrics);

        opts.set(
            "sampler.spanSamplingRules",
            self.span_sampling_rules
                .clone()
                .map(|rules| Value::Array(normalize::rename_rule_fields(rules)))
                .unwrap_or(Value::Null),
        );
        let ingestion = self.ingestion.clone().unwrap_or_default();
        opts.set_unit(
            "sampleRate",
            self.sample_rate
                .as_ref()
                .or(ingestion.sample_rate.as_ref())
                .map(Scalar::to_text)
                .as_deref(),
        );
        opts.set_int(
            "sampler.rateLimit",
            self.rate_limit
                .as_ref()
                .or(ingestion.rate_limit.as_ref())
                .and_then(Scalar::as_int),
        );
        opts.set(
            "sampler.rules",
            self.sampling_rules
                .clone()
                .map(|rules| Value::Array(normalize::rename_rule_fields(rules)))
                .unwrap_or(Value::Null),
        );

        opts.set_string(
            "service",
            non_empty(self.service.as_deref()).or(tags.get("service").map(String::as_str)),
        );
        if let Some(mapping) = &self.service_mapping {
            opts.set("serviceMapping", normalize::map_value(mapping.clone()));
        }
        opts.set_string("site", self.site.as_deref());
        if let Some(schema) = non_empty(self.span_attribute_schema.as_deref()) {
            opts.set_string("spanAttributeSchema", Some(validate_naming_version(Some(schema))));
            opts.set_unprocessed("spanAttributeSchema", schema);
        }
        opts.set_bool_value("startupLogs", self.startup_logs);
        opts.set_tags("tags", tags.clone());
        opts.set_bool_value(
            "traceId128BitGenerationEnabled",
            self.trace_id128_bit_generation_enabled,
        );
        opts.set_string(
            "version",
            non_empty(self.version.as_deref()).or(tags.get("version").map(String::as_str)),
        );

        if let Some(style) = &self.trace_propagation_style {
            let (inject, extract) = match style {
                PropagationOption::List(list) => {
                    let styles = StylesOption::List(list.clone()).normalized();
                    (Some(styles.clone()), Some(styles))
                }
                PropagationOption::Text(text) => {
                    let styles = normalize_propagation_style(text);
                    (Some(styles.clone()), Some(styles))
                }
                PropagationOption::Split { inject, extract } => (
                    inject.as_ref().map(StylesOption::normalized),
                    extract.as_ref().map(StylesOption::normalized),
                ),
            };
            opts.set_list("tracePropagationStyle.inject", inject);
            opts.set_list("tracePropagationStyle.extract", extract);
        }

        if self.llmobs.is_some() && !env_source.is_set("llmobs.enabled") {
            opts.set_bool_value("llmobs.enabled", Some(true));
        }

        opts
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn set_scalar_int(opts: &mut ConfigSource, key: &str, raw: Option<&Scalar>) {
    opts.set_int(key, raw.and_then(Scalar::as_int));
    if let Some(raw) = raw {
        opts.set_unprocessed(key, raw.to_value());
    }
}
