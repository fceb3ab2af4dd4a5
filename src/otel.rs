//! OpenTelemetry environment compatibility checks.
//!
//! OTEL variables are honored as fallbacks for their Datadog counterparts.
//! This pass only reports: a pair set on both sides, or an OTEL value that
//! cannot be interpreted. It never fails.

use crate::normalize::parse_float_prefix;
use crate::schema::SchemaRegistry;
use crate::sources::env::{ProcessEnv, otel_sampler_rate};
use crate::telemetry::{CounterEvent, OTEL_ENV_HIDING, OTEL_ENV_INVALID};
use tracing::{debug, warn};

/// OTEL variable and the Datadog variable it stands in for.
pub const OTEL_DD_MAPPING: &[(&str, Option<&str>)] = &[
    ("OTEL_LOG_LEVEL", Some("DD_TRACE_LOG_LEVEL")),
    ("OTEL_PROPAGATORS", Some("DD_TRACE_PROPAGATION_STYLE")),
    ("OTEL_SERVICE_NAME", Some("DD_SERVICE")),
    ("OTEL_TRACES_SAMPLER", Some("DD_TRACE_SAMPLE_RATE")),
    ("OTEL_TRACES_SAMPLER_ARG", Some("DD_TRACE_SAMPLE_RATE")),
    ("OTEL_TRACES_EXPORTER", Some("DD_TRACE_ENABLED")),
    ("OTEL_METRICS_EXPORTER", Some("DD_RUNTIME_METRICS_ENABLED")),
    ("OTEL_RESOURCE_ATTRIBUTES", Some("DD_TAGS")),
    ("OTEL_SDK_DISABLED", Some("DD_TRACE_OTEL_ENABLED")),
    ("OTEL_LOGS_EXPORTER", None),
];

const VALID_LOG_LEVELS: &[&str] = &["debug", "info", "warn", "error"];

/// Whether `value` is acceptable for `otel_var`.
pub fn is_valid_otel_value(otel_var: &str, value: &str, sampler_arg: Option<&str>) -> bool {
    match otel_var {
        "OTEL_LOG_LEVEL" => VALID_LOG_LEVELS.contains(&value),
        "OTEL_PROPAGATORS" | "OTEL_RESOURCE_ATTRIBUTES" | "OTEL_SERVICE_NAME" => true,
        "OTEL_TRACES_SAMPLER" => otel_sampler_rate(value, sampler_arg).is_some(),
        "OTEL_TRACES_SAMPLER_ARG" => parse_float_prefix(value).is_some(),
        "OTEL_SDK_DISABLED" => {
            value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false")
        }
        "OTEL_TRACES_EXPORTER" | "OTEL_METRICS_EXPORTER" | "OTEL_LOGS_EXPORTER" => {
            value.eq_ignore_ascii_case("none")
        }
        _ => false,
    }
}

/// Raw value of `name`, empty values included.
fn read<'a>(registry: &SchemaRegistry, env: &'a ProcessEnv, name: &str) -> Option<&'a str> {
    match env.get(registry, name) {
        Ok(value) => value,
        Err(e) => {
            debug!("Skipping OTEL compatibility check for {}: {}", name, e);
            None
        }
    }
}

/// Run the compatibility checks and return the counter increments to record.
pub fn check(registry: &SchemaRegistry, env: &ProcessEnv) -> Vec<CounterEvent> {
    let mut events = Vec::new();
    let sampler_arg = read(registry, env, "OTEL_TRACES_SAMPLER_ARG");

    for (otel_var, dd_var) in OTEL_DD_MAPPING {
        let Some(otel_value) = read(registry, env, otel_var) else {
            continue;
        };

        // Hiding needs both sides non-empty; validity checks any set value
        if let Some(dd_var) = *dd_var
            && !otel_value.is_empty()
            && read(registry, env, dd_var).is_some_and(|v| !v.is_empty())
        {
            warn!("both {} and {} environment variables are set", dd_var, otel_var);
            events.push(CounterEvent::otel(OTEL_ENV_HIDING, Some(dd_var), otel_var));
        }

        if !is_valid_otel_value(otel_var, otel_value, sampler_arg) {
            warn!(
                "unexpected value {} for {} environment variable",
                otel_value, otel_var
            );
            events.push(CounterEvent::otel(OTEL_ENV_INVALID, *dd_var, otel_var));
        }
    }

    events
}
