//! Environment-style sources.
//!
//! The process environment and both stable-config tiers are maps of
//! environment-style names (`DD_SERVICE=api`). They all go through [`apply`],
//! which turns such a map into dotted keys.

use super::{ConfigSource, add_tags};
use crate::error::ConfigResult;
use crate::normalize::{
    self, maybe_float, maybe_int, non_negative_int, normalize_profiling_enabled,
    normalize_propagation_style, parse_space_separated_tags, translate_otel_resource_attributes,
    validate_naming_version,
};
use crate::schema::SchemaRegistry;
use crate::telemetry::{CounterEvent, OTEL_ENV_INVALID};
use serde_json::Value;
use std::collections::BTreeMap;
use std::ffi::OsString;
use tracing::{debug, error, warn};

/// Environment-style name to raw value.
pub type EnvMap = BTreeMap<String, String>;

const VALID_PROPAGATION_STYLES: &[&str] =
    &["datadog", "tracecontext", "b3", "b3 single header", "none"];

const VALID_PROPAGATION_BEHAVIOR_EXTRACT: &[&str] = &["continue", "restart", "ignore"];

/// Snapshot of the process environment.
#[derive(Debug, Clone, Default)]
pub struct ProcessEnv {
    vars: EnvMap,
}

impl ProcessEnv {
    /// Capture the current process environment.
    ///
    /// Variables whose name or value is not valid UTF-8 are skipped.
    pub fn capture() -> Self {
        Self::from_os_pairs(std::env::vars_os())
    }

    fn from_os_pairs(pairs: impl IntoIterator<Item = (OsString, OsString)>) -> Self {
        let vars = pairs
            .into_iter()
            .filter_map(|(name, value)| match (name.into_string(), value.into_string()) {
                (Ok(name), Ok(value)) => Some((name, value)),
                (name, _) => {
                    debug!(
                        "Skipping environment variable {} with a non UTF-8 name or value",
                        name.unwrap_or_else(|n| n.to_string_lossy().into_owned())
                    );
                    None
                }
            })
            .collect();
        Self { vars }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Raw variable, without access validation.
    pub fn get_raw(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Read a supported variable, falling back to its aliases.
    ///
    /// Fails for configuration-like names missing from the registry.
    pub fn get(&self, registry: &SchemaRegistry, name: &str) -> ConfigResult<Option<&str>> {
        registry.validate_access(name)?;
        Ok(registry
            .aliases()
            .lookup(name, &self.vars)
            .map(String::as_str))
    }

    pub fn vars(&self) -> &EnvMap {
        &self.vars
    }

    pub fn is_aws_lambda(&self) -> bool {
        self.get_raw("AWS_LAMBDA_FUNCTION_NAME").is_some()
    }

    pub fn is_gcp_function(&self) -> bool {
        let deprecated_runtime =
            self.get_raw("FUNCTION_NAME").is_some() && self.get_raw("GCP_PROJECT").is_some();
        let newer_runtime =
            self.get_raw("K_SERVICE").is_some() && self.get_raw("FUNCTION_TARGET").is_some();
        deprecated_runtime || newer_runtime
    }

    pub fn is_azure_function(&self) -> bool {
        self.get_raw("FUNCTIONS_EXTENSION_VERSION").is_some()
            && self.get_raw("FUNCTIONS_WORKER_RUNTIME").is_some()
    }

    pub fn is_serverless(&self) -> bool {
        self.is_aws_lambda() || self.is_gcp_function() || self.is_azure_function()
    }
}

/// Filter the process environment down to what the tracer reads.
///
/// Supported `DD_*`/`OTEL_*` names are kept as-is. Aliases are folded into
/// their canonical name, the first present alias in registration order
/// winning, and never override a set canonical. Unsupported configuration-like
/// names are dropped. Everything else passes through for derived logic.
pub fn collect(registry: &SchemaRegistry, env: &ProcessEnv) -> EnvMap {
    let mut configs = EnvMap::new();

    for (name, value) in env.vars() {
        if registry.is_config_like(name) {
            if registry.is_supported(name) {
                configs.insert(name.clone(), value.clone());
            } else if !registry.aliases().is_alias(name) {
                debug!(
                    "Missing configuration {} in supported configurations, ignoring it",
                    name
                );
            }
            registry.deprecations().warn_once(name);
        } else {
            configs.insert(name.clone(), value.clone());
        }
    }

    for (canonical, aliases) in registry.aliases().canonicals() {
        if configs.contains_key(canonical) {
            continue;
        }
        if let Some(value) = aliases.iter().find_map(|alias| env.get_raw(alias)) {
            configs.insert(canonical.to_string(), value.to_string());
        }
    }

    configs
}

/// Side results of applying an environment-style map.
#[derive(Debug, Clone, Default)]
pub struct Applied {
    /// Tags parsed from `DD_TAGS` alone.
    pub parsed_dd_tags: BTreeMap<String, String>,
    pub counters: Vec<CounterEvent>,
}

/// Map an OTEL sampler name onto a sample rate.
pub fn otel_sampler_rate<'a>(sampler: &str, arg: Option<&'a str>) -> Option<&'a str> {
    match sampler {
        "always_on" | "parentbased_always_on" => Some("1.0"),
        "always_off" | "parentbased_always_off" => Some("0.0"),
        "traceidratio" | "parentbased_traceidratio" => arg,
        _ => None,
    }
}

/// Whether `sampler` is a known OTEL sampler name.
pub fn is_known_otel_sampler(sampler: &str) -> bool {
    matches!(
        sampler,
        "always_on"
            | "always_off"
            | "traceidratio"
            | "parentbased_always_on"
            | "parentbased_always_off"
            | "parentbased_traceidratio"
    )
}

fn read_file(path: &str) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) => {
            error!("Error reading file {}: {}", path, e);
            None
        }
    }
}

fn read_rules_file(path: &str) -> Option<Value> {
    let content = read_file(path)?;
    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            error!("Error parsing JSON file {}: {}", path, e);
            None
        }
    }
}

/// Translate an environment-style map into dotted keys on `target`.
pub fn apply(entries: &EnvMap, target: &mut ConfigSource) -> Applied {
    let var = |name: &str| entries.get(name).map(String::as_str);
    let present = |name: &str| var(name).filter(|v| !v.is_empty());
    let mut applied = Applied::default();

    // Tags
    let dd_tags = var("DD_TAGS").map(parse_space_separated_tags);
    add_tags(&mut applied.parsed_dd_tags, dd_tags.as_deref());
    let otel_resource = var("OTEL_RESOURCE_ATTRIBUTES").map(translate_otel_resource_attributes);
    let mut tags = BTreeMap::new();
    add_tags(
        &mut tags,
        otel_resource.as_deref().map(parse_space_separated_tags).as_deref(),
    );
    add_tags(&mut tags, dd_tags.as_deref());
    add_tags(&mut tags, var("DD_TRACE_TAGS"));
    add_tags(&mut tags, var("DD_TRACE_GLOBAL_TAGS"));

    target.set_string("apiKey", var("DD_API_KEY"));

    // OTLP exporters: signal-specific values win over the generic ones
    target.set_bool("otelLogsEnabled", var("DD_LOGS_OTEL_ENABLED"));
    let otlp_endpoint = present("OTEL_EXPORTER_OTLP_ENDPOINT");
    if otlp_endpoint.is_some() {
        target.set_string("otelUrl", otlp_endpoint);
    }
    let logs_endpoint = present("OTEL_EXPORTER_OTLP_LOGS_ENDPOINT");
    if otlp_endpoint.is_some() || logs_endpoint.is_some() {
        target.set_string("otelLogsUrl", logs_endpoint.or(otlp_endpoint));
    }
    let headers = present("OTEL_EXPORTER_OTLP_HEADERS");
    target.set_string("otelHeaders", headers);
    target.set_string(
        "otelLogsHeaders",
        present("OTEL_EXPORTER_OTLP_LOGS_HEADERS").or(headers),
    );
    let protocol = present("OTEL_EXPORTER_OTLP_PROTOCOL");
    target.set_string("otelProtocol", protocol);
    target.set_string(
        "otelLogsProtocol",
        present("OTEL_EXPORTER_OTLP_LOGS_PROTOCOL").or(protocol),
    );
    let timeout = non_negative_int(
        var("OTEL_EXPORTER_OTLP_TIMEOUT"),
        "OTEL_EXPORTER_OTLP_TIMEOUT",
        true,
    );
    if timeout.is_some() {
        target.set_int("otelTimeout", timeout);
    }
    target.set_int(
        "otelLogsTimeout",
        non_negative_int(
            var("OTEL_EXPORTER_OTLP_LOGS_TIMEOUT"),
            "OTEL_EXPORTER_OTLP_LOGS_TIMEOUT",
            true,
        )
        .or(timeout),
    );
    let batch_timeout = non_negative_int(
        var("OTEL_BSP_SCHEDULE_DELAY"),
        "OTEL_BSP_SCHEDULE_DELAY",
        false,
    );
    if batch_timeout.is_some() {
        target.set_int("otelBatchTimeout", batch_timeout);
    }
    target.set_int(
        "otelMaxExportBatchSize",
        non_negative_int(
            var("OTEL_BSP_MAX_EXPORT_BATCH_SIZE"),
            "OTEL_BSP_MAX_EXPORT_BATCH_SIZE",
            false,
        ),
    );
    target.set_int(
        "otelMaxQueueSize",
        non_negative_int(var("OTEL_BSP_MAX_QUEUE_SIZE"), "OTEL_BSP_MAX_QUEUE_SIZE", false),
    );
    let metrics_exporter_enabled = var("OTEL_METRICS_EXPORTER")
        .map(|v| !v.eq_ignore_ascii_case("none"))
        .unwrap_or(true);
    target.set_bool_value(
        "otelMetricsEnabled",
        present("DD_METRICS_OTEL_ENABLED")
            .map(|raw| normalize::parse_bool(raw) == Some(true) && metrics_exporter_enabled),
    );
    let metrics_endpoint = present("OTEL_EXPORTER_OTLP_METRICS_ENDPOINT");
    if otlp_endpoint.is_some() || metrics_endpoint.is_some() {
        target.set_string("otelMetricsUrl", metrics_endpoint.or(otlp_endpoint));
    }
    target.set_string(
        "otelMetricsHeaders",
        present("OTEL_EXPORTER_OTLP_METRICS_HEADERS").or(headers),
    );
    target.set_string(
        "otelMetricsProtocol",
        present("OTEL_EXPORTER_OTLP_METRICS_PROTOCOL").or(protocol),
    );
    target.set_int(
        "otelMetricsTimeout",
        non_negative_int(
            var("OTEL_EXPORTER_OTLP_METRICS_TIMEOUT"),
            "OTEL_EXPORTER_OTLP_METRICS_TIMEOUT",
            true,
        )
        .or(timeout),
    );
    target.set_int(
        "otelMetricsExportTimeout",
        non_negative_int(var("OTEL_METRIC_EXPORT_TIMEOUT"), "OTEL_METRIC_EXPORT_TIMEOUT", true),
    );
    target.set_int(
        "otelMetricsExportInterval",
        non_negative_int(
            var("OTEL_METRIC_EXPORT_INTERVAL"),
            "OTEL_METRIC_EXPORT_INTERVAL",
            false,
        ),
    );

    // The deprecated standalone flag is the inverse of APM tracing
    let apm_tracing = match var("DD_APM_TRACING_ENABLED") {
        Some(raw) => normalize::parse_bool(raw),
        None => var("DD_EXPERIMENTAL_APPSEC_STANDALONE_ENABLED")
            .and_then(normalize::parse_bool)
            .map(|standalone| !standalone),
    };
    target.set_bool_value("apmTracingEnabled", apm_tracing);

    apply_appsec(&var, target);

    set_int_raw(target, "baggageMaxBytes", var("DD_TRACE_BAGGAGE_MAX_BYTES"));
    set_int_raw(target, "baggageMaxItems", var("DD_TRACE_BAGGAGE_MAX_ITEMS"));
    target.set_string("baggageTagKeys", var("DD_TRACE_BAGGAGE_TAG_KEYS"));

    target.set_bool("clientIpEnabled", var("DD_TRACE_CLIENT_IP_ENABLED"));
    target.set_string(
        "clientIpHeader",
        var("DD_TRACE_CLIENT_IP_HEADER")
            .map(str::to_lowercase)
            .as_deref(),
    );
    target.set_bool("crashtracking.enabled", var("DD_CRASHTRACKING_ENABLED"));
    target.set_bool(
        "codeOriginForSpans.enabled",
        var("DD_CODE_ORIGIN_FOR_SPANS_ENABLED"),
    );
    target.set_string("dbmPropagationMode", var("DD_DBM_PROPAGATION_MODE"));
    target.set_bool("debug", var("DD_TRACE_DEBUG"));
    target.set_string("dogstatsd.hostname", var("DD_DOGSTATSD_HOST"));
    target.set_string("dogstatsd.port", var("DD_DOGSTATSD_PORT"));
    target.set_bool(
        "dynamicInstrumentation.enabled",
        var("DD_DYNAMIC_INSTRUMENTATION_ENABLED"),
    );
    target.set_array(
        "dynamicInstrumentation.redactedIdentifiers",
        var("DD_DYNAMIC_INSTRUMENTATION_REDACTED_IDENTIFIERS"),
    );
    let upload_interval = var("DD_DYNAMIC_INSTRUMENTATION_UPLOAD_INTERVAL_SECONDS");
    target.set_float(
        "dynamicInstrumentation.uploadIntervalSeconds",
        upload_interval.and_then(maybe_float),
    );
    if let Some(raw) = upload_interval {
        target.set_unprocessed("dynamicInstrumentation.uploadIntervalSeconds", raw);
    }

    target.set_string(
        "env",
        present("DD_ENV").or(tags.get("env").map(String::as_str)),
    );
    target.set_bool("traceEnabled", var("DD_TRACE_ENABLED"));

    if present("AWS_LAMBDA_FUNCTION_NAME").is_some() {
        target.set_int("flushInterval", Some(0));
    } else if let Some(raw) = present("DD_TRACE_FLUSH_INTERVAL") {
        target.set_int("flushInterval", maybe_int(raw));
    }
    set_int_raw(
        target,
        "flushMinSpans",
        var("DD_TRACE_PARTIAL_FLUSH_MIN_SPANS"),
    );

    target.set_int_range_set(
        "grpc.client.error.statuses",
        var("DD_GRPC_CLIENT_ERROR_STATUSES"),
    );
    target.set_int_range_set(
        "grpc.server.error.statuses",
        var("DD_GRPC_SERVER_ERROR_STATUSES"),
    );
    target.set_array("headerTags", var("DD_TRACE_HEADER_TAGS"));
    set_int_raw(target, "heapSnapshot.count", var("DD_HEAP_SNAPSHOT_COUNT"));
    target.set_string("heapSnapshot.destination", var("DD_HEAP_SNAPSHOT_DESTINATION"));
    set_int_raw(target, "heapSnapshot.interval", var("DD_HEAP_SNAPSHOT_INTERVAL"));
    target.set_string("hostname", var("DD_AGENT_HOST"));

    set_int_raw(target, "iast.dbRowsToTaint", var("DD_IAST_DB_ROWS_TO_TAINT"));
    target.set_bool(
        "iast.deduplicationEnabled",
        var("DD_IAST_DEDUPLICATION_ENABLED"),
    );
    target.set_bool("iast.enabled", var("DD_IAST_ENABLED"));
    set_int_raw(
        target,
        "iast.maxConcurrentRequests",
        var("DD_IAST_MAX_CONCURRENT_REQUESTS"),
    );
    set_int_raw(
        target,
        "iast.maxContextOperations",
        var("DD_IAST_MAX_CONTEXT_OPERATIONS"),
    );
    target.set_bool("iast.redactionEnabled", present("DD_IAST_REDACTION_ENABLED"));
    target.set_string(
        "iast.redactionNamePattern",
        var("DD_IAST_REDACTION_NAME_PATTERN"),
    );
    target.set_string(
        "iast.redactionValuePattern",
        var("DD_IAST_REDACTION_VALUE_PATTERN"),
    );
    target.set_string(
        "iast.securityControlsConfiguration",
        var("DD_IAST_SECURITY_CONTROLS_CONFIGURATION"),
    );
    target.set_bool("iast.stackTrace.enabled", var("DD_IAST_STACK_TRACE_ENABLED"));
    target.set_string(
        "iast.telemetryVerbosity",
        var("DD_IAST_TELEMETRY_VERBOSITY"),
    );
    let iast_sampling = var("DD_IAST_REQUEST_SAMPLING");
    if let Some(sampling) = iast_sampling
        .and_then(maybe_int)
        .filter(|n| (0..=100).contains(n))
    {
        target.set_int("iast.requestSampling", Some(sampling));
    }
    if let Some(raw) = iast_sampling {
        target.set_unprocessed("iast.requestSampling", raw);
    }

    let injection = var("DD_INJECTION_ENABLED");
    target.set_array("injectionEnabled", injection);
    if let Some(raw) = injection {
        let source = if raw.is_empty() { "manual" } else { "ssi" };
        target.set_string("instrumentationSource", Some(source));
    }

    target.set_bool("llmobs.enabled", var("DD_LLMOBS_ENABLED"));
    target.set_string("llmobs.mlApp", var("DD_LLMOBS_ML_APP"));
    target.set_bool("logInjection", var("DD_LOGS_INJECTION"));

    if let Some(raw) = present("DD_TRACE_PEER_SERVICE_MAPPING") {
        target.set("peerServiceMapping", normalize::map_value(normalize::parse_map(raw)));
        target.set_unprocessed("peerServiceMapping", raw);
    }
    target.set_string("port", var("DD_TRACE_AGENT_PORT"));
    target.set_string(
        "profiling.enabled",
        var("DD_PROFILING_ENABLED").and_then(normalize_profiling_enabled),
    );
    target.set_string("profiling.exporters", var("DD_PROFILING_EXPORTERS"));
    target.set_string(
        "protocolVersion",
        var("DD_TRACE_AGENT_PROTOCOL_VERSION"),
    );
    target.set_bool(
        "remoteConfig.enabled",
        var("DD_REMOTE_CONFIGURATION_ENABLED"),
    );
    let poll_interval = var("DD_REMOTE_CONFIG_POLL_INTERVAL_SECONDS");
    target.set_float("remoteConfig.pollInterval", poll_interval.and_then(maybe_float));
    if let Some(raw) = poll_interval {
        target.set_unprocessed("remoteConfig.pollInterval", raw);
    }
    target.set_bool("reportHostname", var("DD_TRACE_REPORT_HOSTNAME"));
    if let Some(raw) = var("DD_TRACE_RESOURCE_RENAMING_ENABLED") {
        target.set_bool("resourceRenamingEnabled", Some(raw));
    }

    // OTEL_METRICS_EXPORTER=none can only turn runtime metrics off
    let runtime_metrics = present("DD_RUNTIME_METRICS_ENABLED")
        .or((!metrics_exporter_enabled).then_some("false"));
    target.set_bool("runtimeMetrics.enabled", runtime_metrics);
    target.set_bool(
        "runtimeMetrics.eventLoop",
        var("DD_RUNTIME_METRICS_EVENT_LOOP_ENABLED"),
    );
    target.set_bool("runtimeMetrics.gc", var("DD_RUNTIME_METRICS_GC_ENABLED"));

    let span_rules = present("DD_SPAN_SAMPLING_RULES_FILE")
        .and_then(read_rules_file)
        .or_else(|| present("DD_SPAN_SAMPLING_RULES").and_then(|raw| serde_json::from_str(raw).ok()));
    match span_rules {
        Some(Value::Array(rules)) => target.set(
            "sampler.spanSamplingRules",
            Value::Array(normalize::rename_rule_fields(rules)),
        ),
        Some(_) => warn!("Span sampling rules must be a JSON array, ignoring them"),
        None => target.unset("sampler.spanSamplingRules"),
    }

    let sample_rate = present("DD_TRACE_SAMPLE_RATE").or_else(|| {
        var("OTEL_TRACES_SAMPLER")
            .and_then(|sampler| otel_sampler_rate(sampler, var("OTEL_TRACES_SAMPLER_ARG")))
    });
    target.set_unit("sampleRate", sample_rate);
    set_int_raw(target, "sampler.rateLimit", var("DD_TRACE_RATE_LIMIT"));
    let sampling_rules = var("DD_TRACE_SAMPLING_RULES");
    target.set(
        "sampler.rules",
        sampling_rules
            .and_then(normalize::parse_sampling_rules)
            .map(Value::Array)
            .unwrap_or(Value::Null),
    );
    if let Some(raw) = sampling_rules {
        target.set_unprocessed("sampler.rules", raw);
    }

    let service = resolve_service(
        present("DD_SERVICE"),
        tags.get("service").map(String::as_str),
        present("OTEL_SERVICE_NAME"),
        present("NX_TASK_TARGET_PROJECT"),
        var("DD_ENABLE_NX_SERVICE_NAME"),
    );
    target.set_string("service", service);
    if let Some(raw) = present("DD_SERVICE_MAPPING") {
        target.set("serviceMapping", normalize::map_value(normalize::parse_map(raw)));
    }
    target.set_string("site", var("DD_SITE"));
    if let Some(raw) = present("DD_TRACE_SPAN_ATTRIBUTE_SCHEMA") {
        target.set_string("spanAttributeSchema", Some(validate_naming_version(Some(raw))));
        target.set_unprocessed("spanAttributeSchema", raw);
    }
    target.set_bool("startupLogs", var("DD_TRACE_STARTUP_LOGS"));
    target.set_tags("tags", tags.clone());
    target.set_bool("telemetry.debug", var("DD_TELEMETRY_DEBUG"));
    target.set_bool(
        "telemetry.dependencyCollection",
        var("DD_TELEMETRY_DEPENDENCY_COLLECTION_ENABLED"),
    );
    target.set_bool(
        "telemetry.enabled",
        var("DD_INSTRUMENTATION_TELEMETRY_ENABLED"),
    );
    target.set_bool(
        "telemetry.logCollection",
        var("DD_TELEMETRY_LOG_COLLECTION_ENABLED"),
    );
    target.set_bool("telemetry.metrics", var("DD_TELEMETRY_METRICS_ENABLED"));

    // Heartbeat is configured in seconds and stored in milliseconds
    let heartbeat_ms = var("DD_TELEMETRY_HEARTBEAT_INTERVAL")
        .and_then(maybe_float)
        .map(|seconds| seconds * 1000.0);
    target.set_int(
        "telemetry.heartbeatInterval",
        heartbeat_ms.map(|ms| ms.floor() as i64),
    );
    if let Some(ms) = heartbeat_ms {
        target.set_unprocessed("telemetry.heartbeatInterval", ms);
    }
    target.set_bool(
        "traceId128BitGenerationEnabled",
        var("DD_TRACE_128_BIT_TRACEID_GENERATION_ENABLED"),
    );

    apply_propagation(&var, target, &mut applied);

    target.set_bool("tracing", var("DD_TRACING_ENABLED"));
    target.set_string(
        "version",
        present("DD_VERSION").or(tags.get("version").map(String::as_str)),
    );

    applied
}

fn apply_appsec<'a>(var: &impl Fn(&str) -> Option<&'a str>, target: &mut ConfigSource) {
    // API security only turns on for an explicit true
    target.set_bool_value(
        "appsec.apiSecurity.enabled",
        var("DD_API_SECURITY_ENABLED")
            .filter(|raw| !raw.is_empty())
            .map(|raw| normalize::parse_bool(raw) == Some(true)),
    );
    target.set_float(
        "appsec.apiSecurity.sampleDelay",
        var("DD_API_SECURITY_SAMPLE_DELAY").and_then(maybe_float),
    );
    target.set_bool(
        "appsec.apiSecurity.endpointCollectionEnabled",
        var("DD_API_SECURITY_ENDPOINT_COLLECTION_ENABLED"),
    );
    target.set_int(
        "appsec.apiSecurity.endpointCollectionMessageLimit",
        var("DD_API_SECURITY_ENDPOINT_COLLECTION_MESSAGE_LIMIT").and_then(maybe_int),
    );

    // Blocked templates hold the file contents; the raw value is the path
    let templates = [
        ("appsec.blockedTemplateGraphql", "DD_APPSEC_GRAPHQL_BLOCKED_TEMPLATE_JSON", false),
        ("appsec.blockedTemplateHtml", "DD_APPSEC_HTTP_BLOCKED_TEMPLATE_HTML", true),
        ("appsec.blockedTemplateJson", "DD_APPSEC_HTTP_BLOCKED_TEMPLATE_JSON", true),
    ];
    for (key, name, keep_path) in templates {
        let path = var(name).filter(|p| !p.is_empty());
        target.set_string(key, path.and_then(read_file).as_deref());
        if keep_path && let Some(path) = path {
            target.set_unprocessed(key, path);
        }
    }

    target.set_bool("appsec.enabled", var("DD_APPSEC_ENABLED"));
    target.set_string(
        "appsec.eventTracking.mode",
        var("DD_APPSEC_AUTO_USER_INSTRUMENTATION_MODE"),
    );
    target.set_bool(
        "appsec.extendedHeadersCollection.enabled",
        var("DD_APPSEC_COLLECT_ALL_HEADERS"),
    );
    target.set_bool(
        "appsec.extendedHeadersCollection.redaction",
        var("DD_APPSEC_HEADER_COLLECTION_REDACTION_ENABLED"),
    );
    set_int_raw(
        target,
        "appsec.extendedHeadersCollection.maxHeaders",
        var("DD_APPSEC_MAX_COLLECTED_HEADERS"),
    );
    target.set_string(
        "appsec.obfuscatorKeyRegex",
        var("DD_APPSEC_OBFUSCATION_PARAMETER_KEY_REGEXP"),
    );
    target.set_string(
        "appsec.obfuscatorValueRegex",
        var("DD_APPSEC_OBFUSCATION_PARAMETER_VALUE_REGEXP"),
    );
    target.set_bool("appsec.rasp.enabled", var("DD_APPSEC_RASP_ENABLED"));
    target.set_bool(
        "appsec.rasp.bodyCollection",
        var("DD_APPSEC_RASP_COLLECT_REQUEST_BODY"),
    );
    set_int_raw(target, "appsec.rateLimit", var("DD_APPSEC_TRACE_RATE_LIMIT"));
    target.set_string("appsec.rules", var("DD_APPSEC_RULES"));
    target.set_bool("appsec.sca.enabled", var("DD_APPSEC_SCA_ENABLED"));
    target.set_bool(
        "appsec.stackTrace.enabled",
        var("DD_APPSEC_STACK_TRACE_ENABLED"),
    );
    set_int_raw(
        target,
        "appsec.stackTrace.maxDepth",
        var("DD_APPSEC_MAX_STACK_TRACE_DEPTH"),
    );
    set_int_raw(
        target,
        "appsec.stackTrace.maxStackTraces",
        var("DD_APPSEC_MAX_STACK_TRACES"),
    );
    set_int_raw(target, "appsec.wafTimeout", var("DD_APPSEC_WAF_TIMEOUT"));
}

fn set_int_raw(target: &mut ConfigSource, key: &str, raw: Option<&str>) {
    target.set_int(key, raw.and_then(maybe_int));
    if let Some(raw) = raw {
        target.set_unprocessed(key, raw);
    }
}

/// `DD_SERVICE` > `tags.service` > `OTEL_SERVICE_NAME` > Nx project (opt-in).
fn resolve_service<'a>(
    dd_service: Option<&'a str>,
    tag_service: Option<&'a str>,
    otel_service: Option<&'a str>,
    nx_project: Option<&'a str>,
    nx_opt_in: Option<&str>,
) -> Option<&'a str> {
    let service = dd_service
        .or(tag_service.filter(|s| !s.is_empty()))
        .or(otel_service);
    if service.is_some() {
        return service;
    }

    let nx_project = nx_project?;
    if nx_opt_in.and_then(normalize::parse_bool) == Some(true) {
        Some(nx_project)
    } else {
        warn!(
            "NX_TASK_TARGET_PROJECT is set but no service name was configured. \
             Set DD_ENABLE_NX_SERVICE_NAME=true to use it as the service name, or set a service name explicitly."
        );
        None
    }
}

fn apply_propagation<'a>(
    var: &impl Fn(&str) -> Option<&'a str>,
    target: &mut ConfigSource,
    applied: &mut Applied,
) {
    let general = var("DD_TRACE_PROPAGATION_STYLE");
    let inject = var("DD_TRACE_PROPAGATION_STYLE_INJECT");
    let extract = var("DD_TRACE_PROPAGATION_STYLE_EXTRACT");
    let otel_propagators = var("OTEL_PROPAGATORS");

    if general.is_some_and(|g| !g.is_empty())
        && (inject.is_some_and(|i| !i.is_empty()) || extract.is_some_and(|e| !e.is_empty()))
    {
        warn!(
            "Use either the DD_TRACE_PROPAGATION_STYLE environment variable or separate \
             DD_TRACE_PROPAGATION_STYLE_INJECT and DD_TRACE_PROPAGATION_STYLE_EXTRACT environment variables"
        );
    }

    if let Some(general) = general {
        let styles = normalize_propagation_style(general);
        target.set_list("tracePropagationStyle.inject", Some(styles.clone()));
        target.set_list("tracePropagationStyle.extract", Some(styles));
    }
    if let Some(inject) = inject {
        target.set_list(
            "tracePropagationStyle.inject",
            Some(normalize_propagation_style(inject)),
        );
    }
    if let Some(extract) = extract {
        target.set_list(
            "tracePropagationStyle.extract",
            Some(normalize_propagation_style(extract)),
        );
    }

    target.set_bool(
        "tracePropagationExtractFirst",
        var("DD_TRACE_PROPAGATION_EXTRACT_FIRST"),
    );
    if let Some(behavior) = var("DD_TRACE_PROPAGATION_BEHAVIOR_EXTRACT") {
        let behavior = if VALID_PROPAGATION_BEHAVIOR_EXTRACT.contains(&behavior) {
            behavior
        } else {
            "continue"
        };
        target.set_string("tracePropagationBehaviorExtract", Some(behavior));
    }

    if general.is_none() && inject.is_none() && extract.is_none() && otel_propagators.is_none() {
        return;
    }

    let use_dd_style = [general, inject, extract]
        .iter()
        .any(|style| style.is_some_and(|s| !s.is_empty()));
    let use_otel = !use_dd_style && otel_propagators.is_some_and(|p| !p.is_empty());
    target.set_bool_value("tracePropagationStyle.otelPropagators", Some(use_otel));

    if let Some(propagators) = otel_propagators.filter(|_| use_otel) {
        let styles = normalize_propagation_style(propagators);
        for style in &styles {
            if !VALID_PROPAGATION_STYLES.contains(&style.as_str()) {
                warn!(
                    "unexpected value {} for OTEL_PROPAGATORS environment variable",
                    style
                );
                applied.counters.push(CounterEvent::otel(
                    OTEL_ENV_INVALID,
                    Some("DD_TRACE_PROPAGATION_STYLE"),
                    "OTEL_PROPAGATORS",
                ));
            }
        }
        target.set_list("tracePropagationStyle.inject", Some(styles.clone()));
        target.set_list("tracePropagationStyle.extract", Some(styles));
    }
}
