//! Tests for change publishing, diagnostic counters and recompute serialization.

use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread;
use std::time::Duration;
use tracer_config::sources::calculated::Platform;
use tracer_config::sources::env::ProcessEnv;
use tracer_config::sources::stable::NoStableConfig;
use tracer_config::telemetry::{OTEL_ENV_HIDING, OTEL_ENV_INVALID, RecordingSink};
use tracer_config::{
    ChangeRecord, CounterEvent, Engine, ErrorCode, Origin, RemotePayload, TelemetrySink,
    TracerOptions,
};

fn setup_engine(pairs: &[(&str, &str)], sink: Arc<dyn TelemetrySink>) -> Engine {
    Engine::builder()
        .env(ProcessEnv::from_pairs(pairs.iter().copied()))
        .stable_reader(NoStableConfig)
        .platform(Platform::with_socket("/nonexistent/apm.socket"))
        .sink(sink)
        .build()
        .expect("Failed to build engine")
}

#[test]
fn first_merge_reports_raw_values() {
    let sink = Arc::new(RecordingSink::new());
    let engine = setup_engine(
        &[("DD_TRACE_RATE_LIMIT", "50abc"), ("DD_SERVICE", "api")],
        sink.clone(),
    );
    engine.configure(TracerOptions::default()).unwrap();

    let batch = sink.last_batch().unwrap();
    let rate_limit = batch
        .iter()
        .find(|c| c.name == "sampler.rateLimit" && c.origin == Origin::EnvVar)
        .expect("rate limit change should be reported");
    assert_eq!(rate_limit.value, serde_json::json!("50abc"));
    assert_eq!(engine.snapshot().get_i64("sampler.rateLimit"), Some(50));

    assert!(batch.contains(&ChangeRecord {
        name: "service".into(),
        value: serde_json::json!("api"),
        origin: Origin::EnvVar,
    }));
}

#[test]
fn every_merge_publishes_even_without_changes() {
    let sink = Arc::new(RecordingSink::new());
    let engine = setup_engine(&[], sink.clone());

    engine.configure(TracerOptions::default()).unwrap();
    engine.set_remote_config(None).unwrap();
    engine.set_remote_config(None).unwrap();

    let batches = sink.batches();
    assert_eq!(batches.len(), 3);
    assert!(batches[1].is_empty());
    assert!(batches[2].is_empty());
}

#[test]
fn remote_changes_reported_once() {
    let sink = Arc::new(RecordingSink::new());
    let engine = setup_engine(&[], sink.clone());
    engine.configure(TracerOptions::default()).unwrap();

    let payload = RemotePayload {
        log_injection_enabled: Some(true),
        ..Default::default()
    };
    engine.set_remote_config(Some(&payload)).unwrap();
    assert_eq!(
        sink.last_batch().unwrap(),
        vec![ChangeRecord {
            name: "logInjection".into(),
            value: serde_json::json!(true),
            origin: Origin::RemoteConfig,
        }]
    );

    engine.set_remote_config(Some(&payload)).unwrap();
    assert!(sink.last_batch().unwrap().is_empty());
}

#[test]
fn otel_conflicts_and_invalid_values_counted() {
    let sink = Arc::new(RecordingSink::new());
    let engine = setup_engine(
        &[
            ("OTEL_SERVICE_NAME", "otel-svc"),
            ("DD_SERVICE", "dd-svc"),
            ("OTEL_TRACES_EXPORTER", "zipkin"),
            ("OTEL_PROPAGATORS", "tracecontext,jaeger"),
        ],
        sink.clone(),
    );
    let effective = engine.configure(TracerOptions::default()).unwrap();

    assert_eq!(effective.get_str("service"), Some("dd-svc"));
    assert_eq!(
        sink.counter_total(
            OTEL_ENV_HIDING,
            &["config_datadog:dd_service", "config_opentelemetry:otel_service_name"]
        ),
        1
    );
    assert_eq!(
        sink.counter_total(OTEL_ENV_INVALID, &["config_opentelemetry:otel_traces_exporter"]),
        1
    );
    assert_eq!(
        sink.counter_total(OTEL_ENV_INVALID, &["config_opentelemetry:otel_propagators"]),
        1
    );
    assert_eq!(
        effective.get("tracePropagationStyle.inject"),
        Some(&serde_json::json!(["tracecontext", "jaeger"]))
    );
    assert_eq!(effective.get_bool("tracePropagationStyle.otelPropagators"), Some(true));
}

#[test]
fn otel_fallbacks_apply_without_dd_values() {
    let sink = Arc::new(RecordingSink::new());
    let engine = setup_engine(
        &[
            ("OTEL_SERVICE_NAME", "otel-svc"),
            ("OTEL_TRACES_SAMPLER", "parentbased_traceidratio"),
            ("OTEL_TRACES_SAMPLER_ARG", "0.25"),
            ("OTEL_METRICS_EXPORTER", "none"),
        ],
        sink.clone(),
    );
    let effective = engine.configure(TracerOptions::default()).unwrap();

    assert_eq!(effective.get_str("service"), Some("otel-svc"));
    assert_eq!(effective.get_f64("sampleRate"), Some(0.25));
    assert_eq!(effective.get_bool("runtimeMetrics.enabled"), Some(false));
    assert!(sink.counters().is_empty());
}

/// Sink that calls back into the engine while a merge is being published.
#[derive(Default)]
struct ReentrantSink {
    engine: OnceLock<Weak<Engine>>,
    outcomes: Mutex<Vec<ErrorCode>>,
    origins: Mutex<Vec<Origin>>,
}

impl TelemetrySink for ReentrantSink {
    fn publish_changes(&self, _changes: &[ChangeRecord]) {
        let Some(engine) = self.engine.get().and_then(Weak::upgrade) else {
            return;
        };
        if let Ok(origin) = engine.get_origin("service") {
            self.origins.lock().unwrap().push(origin);
        }
        if let Err(e) = engine.set_remote_config(None) {
            self.outcomes.lock().unwrap().push(e.code);
        }
    }

    fn increment_counter(&self, _event: &CounterEvent) {}
}

#[test]
fn reentrant_recompute_is_rejected_as_busy() {
    let sink = Arc::new(ReentrantSink::default());
    let engine = Arc::new(setup_engine(&[("DD_SERVICE", "api")], sink.clone()));
    sink.engine.set(Arc::downgrade(&engine)).unwrap();

    let effective = engine.configure(TracerOptions::default()).unwrap();
    assert_eq!(effective.get_str("service"), Some("api"));

    assert_eq!(*sink.outcomes.lock().unwrap(), vec![ErrorCode::Busy]);
    // Reads stay available from inside the callback
    assert_eq!(*sink.origins.lock().unwrap(), vec![Origin::EnvVar]);

    // The guard is released once the outer call returns
    let sink_calls_before = sink.outcomes.lock().unwrap().len();
    engine.set_remote_config(None).unwrap();
    assert_eq!(sink.outcomes.lock().unwrap().len(), sink_calls_before + 1);
}

#[test]
fn concurrent_callers_are_serialized() {
    let sink = Arc::new(RecordingSink::new());
    let engine = Arc::new(setup_engine(&[("DD_ENV", "prod")], sink.clone()));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                if i % 2 == 0 {
                    engine.configure(TracerOptions::default()).map(|_| ())
                } else {
                    let payload = RemotePayload {
                        tracing_sampling_rate: Some(0.5),
                        ..Default::default()
                    };
                    engine.set_remote_config(Some(&payload)).map(|_| ())
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    assert_eq!(sink.batches().len(), 8);
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.get_str("env"), Some("prod"));
    assert_eq!(snapshot.get_f64("sampleRate"), Some(0.5));
}

/// Sink that stalls inside its first publish and records each batch's sample rate.
struct SlowFirstSink {
    entered: Mutex<Option<Sender<()>>>,
    rates: Mutex<Vec<serde_json::Value>>,
}

impl TelemetrySink for SlowFirstSink {
    fn publish_changes(&self, changes: &[ChangeRecord]) {
        if let Some(entered) = self.entered.lock().unwrap().take() {
            entered.send(()).unwrap();
            thread::sleep(Duration::from_millis(200));
        }
        if let Some(change) = changes
            .iter()
            .find(|c| c.name == "sampleRate" && c.origin == Origin::RemoteConfig)
        {
            self.rates.lock().unwrap().push(change.value.clone());
        }
    }

    fn increment_counter(&self, _event: &CounterEvent) {}
}

#[test]
fn batches_reach_the_sink_in_merge_order() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let sink = Arc::new(SlowFirstSink {
        entered: Mutex::new(Some(entered_tx)),
        rates: Mutex::new(Vec::new()),
    });
    let engine = Arc::new(setup_engine(&[], sink.clone()));

    let set_rate = |rate: f64| {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            let payload = RemotePayload {
                tracing_sampling_rate: Some(rate),
                ..Default::default()
            };
            engine.set_remote_config(Some(&payload)).map(|_| ())
        })
    };

    let first = set_rate(0.1);
    entered_rx.recv().unwrap();
    let second = set_rate(0.2);

    first.join().unwrap().unwrap();
    second.join().unwrap().unwrap();

    assert_eq!(
        *sink.rates.lock().unwrap(),
        vec![serde_json::json!(0.1), serde_json::json!(0.2)]
    );
    assert_eq!(engine.snapshot().get_f64("sampleRate"), Some(0.2));
}

#[test]
fn environment_diagnostics_sent_once() {
    let sink = Arc::new(RecordingSink::new());
    let engine = setup_engine(
        &[("OTEL_SERVICE_NAME", "otel-svc"), ("DD_SERVICE", "dd-svc")],
        sink.clone(),
    );
    engine.configure(TracerOptions::default()).unwrap();
    engine.configure(TracerOptions::default()).unwrap();
    engine.set_remote_config(None).unwrap();

    assert_eq!(
        sink.counter_total(
            OTEL_ENV_HIDING,
            &["config_datadog:dd_service", "config_opentelemetry:otel_service_name"]
        ),
        1
    );
}
