//! Telemetry change publishing.
//!
//! After every merge the engine hands the ordered list of changes to a
//! [`TelemetrySink`]. Diagnostic counters (OTEL conflicts and invalid values)
//! go through the same sink.

use crate::sources::Origin;
use serde::Serialize;
use serde_json::Value;
use std::sync::Mutex;
use tracing::debug;

pub const OTEL_ENV_HIDING: &str = "otel.env.hiding";
pub const OTEL_ENV_INVALID: &str = "otel.env.invalid";

/// One configuration change reported to telemetry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeRecord {
    pub name: String,
    pub value: Value,
    pub origin: Origin,
}

/// A diagnostic counter increment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterEvent {
    pub name: String,
    pub tags: Vec<String>,
}

impl CounterEvent {
    /// Counter for an OTEL compatibility event, tagged with both variable names.
    pub fn otel(event: &str, dd_var: Option<&str>, otel_var: &str) -> Self {
        let mut tags = Vec::with_capacity(2);
        if let Some(dd_var) = dd_var {
            tags.push(format!("config_datadog:{}", dd_var.to_lowercase()));
        }
        tags.push(format!("config_opentelemetry:{}", otel_var.to_lowercase()));
        Self {
            name: event.to_string(),
            tags,
        }
    }
}

/// Receiver of configuration telemetry.
pub trait TelemetrySink: Send + Sync {
    /// Called exactly once per merge, possibly with an empty list.
    fn publish_changes(&self, changes: &[ChangeRecord]);

    fn increment_counter(&self, event: &CounterEvent);
}

/// Sink that drops everything.
#[derive(Debug, Default)]
pub struct NoopSink;

impl TelemetrySink for NoopSink {
    fn publish_changes(&self, _changes: &[ChangeRecord]) {}

    fn increment_counter(&self, _event: &CounterEvent) {}
}

/// Sink that writes changes and counters to the log at debug level.
#[derive(Debug, Default)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn publish_changes(&self, changes: &[ChangeRecord]) {
        debug!(count = changes.len(), "Publishing configuration changes");
        for change in changes {
            debug!(name = %change.name, origin = %change.origin, value = %change.value, "config change");
        }
    }

    fn increment_counter(&self, event: &CounterEvent) {
        debug!(name = %event.name, tags = ?event.tags, "counter increment");
    }
}

/// Sink that records everything it receives. Used by tests and the CLI.
#[derive(Debug, Default)]
pub struct RecordingSink {
    batches: Mutex<Vec<Vec<ChangeRecord>>>,
    counters: Mutex<Vec<CounterEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every published batch, oldest first.
    pub fn batches(&self) -> Vec<Vec<ChangeRecord>> {
        match self.batches.lock() {
            Ok(batches) => batches.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn last_batch(&self) -> Option<Vec<ChangeRecord>> {
        self.batches().pop()
    }

    pub fn counters(&self) -> Vec<CounterEvent> {
        match self.counters.lock() {
            Ok(counters) => counters.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Number of increments of a counter carrying all of `tags`.
    pub fn counter_total(&self, name: &str, tags: &[&str]) -> usize {
        self.counters()
            .iter()
            .filter(|event| event.name == name)
            .filter(|event| tags.iter().all(|tag| event.tags.iter().any(|t| t == tag)))
            .count()
    }
}

impl TelemetrySink for RecordingSink {
    fn publish_changes(&self, changes: &[ChangeRecord]) {
        match self.batches.lock() {
            Ok(mut batches) => batches.push(changes.to_vec()),
            Err(poisoned) => poisoned.into_inner().push(changes.to_vec()),
        }
    }

    fn increment_counter(&self, event: &CounterEvent) {
        match self.counters.lock() {
            Ok(mut counters) => counters.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_otel_counter_tags() {
        let event = CounterEvent::otel(OTEL_ENV_HIDING, Some("DD_SERVICE"), "OTEL_SERVICE_NAME");
        assert_eq!(event.name, "otel.env.hiding");
        assert_eq!(
            event.tags,
            vec![
                "config_datadog:dd_service".to_string(),
                "config_opentelemetry:otel_service_name".to_string()
            ]
        );

        let event = CounterEvent::otel(OTEL_ENV_INVALID, None, "OTEL_LOGS_EXPORTER");
        assert_eq!(event.tags, vec!["config_opentelemetry:otel_logs_exporter".to_string()]);
    }

    #[test]
    fn test_recording_sink_keeps_batches() {
        let sink = RecordingSink::new();
        sink.publish_changes(&[]);
        sink.publish_changes(&[ChangeRecord {
            name: "service".into(),
            value: json!("api"),
            origin: Origin::EnvVar,
        }]);

        let batches = sink.batches();
        assert_eq!(batches.len(), 2);
        assert!(batches[0].is_empty());
        assert_eq!(sink.last_batch().unwrap()[0].name, "service");

        let record = serde_json::to_value(&batches[1][0]).unwrap();
        assert_eq!(record["origin"], "env_var");
    }

    #[test]
    fn test_counter_total_matches_tags() {
        let sink = RecordingSink::new();
        sink.increment_counter(&CounterEvent::otel(OTEL_ENV_INVALID, Some("DD_A"), "OTEL_A"));
        sink.increment_counter(&CounterEvent::otel(OTEL_ENV_INVALID, Some("DD_B"), "OTEL_B"));
        assert_eq!(sink.counter_total(OTEL_ENV_INVALID, &[]), 2);
        assert_eq!(
            sink.counter_total(OTEL_ENV_INVALID, &["config_opentelemetry:otel_a"]),
            1
        );
        assert_eq!(sink.counter_total(OTEL_ENV_HIDING, &[]), 0);
    }
}
