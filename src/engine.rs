//! The configuration engine.
//!
//! Owns every source, the change tracker and the published snapshot. All
//! recomputes go through one mutex; readers only ever see complete snapshots.

use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ChangeTracker, EffectiveConfig, merge};
use crate::otel;
use crate::schema::SchemaRegistry;
use crate::sources::calculated::{self, CalculatedInputs, Platform};
use crate::sources::env::{self, EnvMap, ProcessEnv};
use crate::sources::options::TracerOptions;
use crate::sources::remote::{self, RemotePayload};
use crate::sources::stable::{
    FileStableConfigReader, NoStableConfig, StableConfigRead, StableConfigReader, StablePaths,
};
use crate::sources::{ConfigSource, Origin, SourceSet, defaults};
use crate::telemetry::{CounterEvent, NoopSink, TelemetrySink};
use arc_swap::ArcSwap;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tracing::{debug, info, warn};

/// Identifier of this process, attached to remote tags.
pub fn runtime_id() -> &'static str {
    static RUNTIME_ID: OnceLock<String> = OnceLock::new();
    RUNTIME_ID.get_or_init(|| uuid::Uuid::new_v4().to_string())
}

/// Whether a recompute is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Merged,
    Merging,
}

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Engines currently recomputing on this thread.
    static RECOMPUTING: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// Marks an engine as recomputing on the current thread.
struct ReentryGuard(u64);

impl ReentryGuard {
    fn enter(engine_id: u64) -> ConfigResult<Self> {
        RECOMPUTING.with(|active| {
            let mut active = active.borrow_mut();
            if active.contains(&engine_id) {
                return Err(ConfigError::busy());
            }
            active.push(engine_id);
            Ok(ReentryGuard(engine_id))
        })
    }
}

impl Drop for ReentryGuard {
    fn drop(&mut self) {
        RECOMPUTING.with(|active| active.borrow_mut().retain(|id| *id != self.0));
    }
}

/// What a merge is computed from. Updates work on a copy that replaces the
/// current one only when its merge succeeds.
#[derive(Clone)]
struct Layers {
    options: TracerOptions,
    sources: SourceSet,
    /// Environment diagnostics were already sent to the sink.
    env_reported: bool,
}

/// Mutable state, guarded by the engine mutex.
struct Inner {
    layers: Layers,
    tracker: ChangeTracker,
}

/// Effects of an update that are released after its merge.
#[derive(Default)]
struct Pending {
    parsed_dd_tags: Option<BTreeMap<String, String>>,
    counters: Vec<CounterEvent>,
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    registry: Option<Arc<SchemaRegistry>>,
    env: Option<ProcessEnv>,
    stable_reader: Option<Box<dyn StableConfigReader>>,
    stable_paths: Option<StablePaths>,
    platform: Platform,
    sink: Arc<dyn TelemetrySink>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            registry: None,
            env: None,
            stable_reader: None,
            stable_paths: None,
            platform: Platform::default(),
            sink: Arc::new(NoopSink),
        }
    }
}

impl EngineBuilder {
    pub fn registry(mut self, registry: Arc<SchemaRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Environment snapshot to read. Defaults to the current process.
    pub fn env(mut self, env: ProcessEnv) -> Self {
        self.env = Some(env);
        self
    }

    pub fn stable_reader(mut self, reader: impl StableConfigReader + 'static) -> Self {
        self.stable_reader = Some(Box::new(reader));
        self
    }

    pub fn stable_paths(mut self, paths: StablePaths) -> Self {
        self.stable_paths = Some(paths);
        self
    }

    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = sink;
        self
    }

    /// Build the engine. Nothing is merged until the first `configure`.
    pub fn build(self) -> ConfigResult<Engine> {
        let registry = match self.registry {
            Some(registry) => registry,
            None => SchemaRegistry::builtin()?,
        };
        let env = self.env.unwrap_or_else(ProcessEnv::capture);

        // Serverless runtimes have no agent-managed files to read
        let stable_reader = match self.stable_reader {
            Some(reader) => reader,
            None if env.is_serverless() => Box::new(NoStableConfig) as Box<dyn StableConfigReader>,
            None => Box::new(FileStableConfigReader),
        };
        let stable_paths = self
            .stable_paths
            .unwrap_or_else(|| StablePaths::discover(&env));

        let sources = SourceSet::new(defaults::build(&registry, &env));

        Ok(Engine {
            id: NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed),
            registry,
            env,
            stable_reader,
            stable_paths,
            stable: OnceLock::new(),
            platform: self.platform,
            sink: self.sink,
            inner: Mutex::new(Inner {
                layers: Layers {
                    options: TracerOptions::default(),
                    sources,
                    env_reported: false,
                },
                tracker: ChangeTracker::new(),
            }),
            snapshot: ArcSwap::from_pointee(EffectiveConfig::default()),
            parsed_dd_tags: ArcSwap::from_pointee(BTreeMap::new()),
            merging: AtomicBool::new(false),
        })
    }
}

/// Resolves the effective tracer configuration.
pub struct Engine {
    id: u64,
    registry: Arc<SchemaRegistry>,
    env: ProcessEnv,
    stable_reader: Box<dyn StableConfigReader>,
    stable_paths: StablePaths,
    stable: OnceLock<StableConfigRead>,
    platform: Platform,
    sink: Arc<dyn TelemetrySink>,
    inner: Mutex<Inner>,
    snapshot: ArcSwap<EffectiveConfig>,
    parsed_dd_tags: ArcSwap<BTreeMap<String, String>>,
    merging: AtomicBool,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Engine over the current process environment with default collaborators.
    pub fn new() -> ConfigResult<Self> {
        Self::builder().build()
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn env(&self) -> &ProcessEnv {
        &self.env
    }

    pub fn state(&self) -> EngineState {
        if self.merging.load(Ordering::SeqCst) {
            EngineState::Merging
        } else {
            EngineState::Merged
        }
    }

    /// The latest complete configuration.
    pub fn snapshot(&self) -> Arc<EffectiveConfig> {
        self.snapshot.load_full()
    }

    /// Tags parsed from `DD_TAGS` alone, as of the last `configure`.
    pub fn parsed_dd_tags(&self) -> Arc<BTreeMap<String, String>> {
        self.parsed_dd_tags.load_full()
    }

    /// Warnings produced while reading stable config, if it was read.
    pub fn stable_warnings(&self) -> Vec<String> {
        self.stable
            .get()
            .map(|read| read.warnings.clone())
            .unwrap_or_default()
    }

    /// `config_id` values of the local and fleet stable-config files.
    pub fn stable_config_ids(&self) -> (Option<String>, Option<String>) {
        match self.stable.get() {
            Some(read) => (read.local_config_id.clone(), read.fleet_config_id.clone()),
            None => (None, None),
        }
    }

    /// Origin of the value in effect for `key`.
    pub fn get_origin(&self, key: &str) -> ConfigResult<Origin> {
        self.registry.validate_key(key)?;
        Ok(self.snapshot().origin(key).unwrap_or(Origin::Default))
    }

    /// Rebuild the environment, stable-config and code sources from `options`,
    /// recompute derived values and merge.
    ///
    /// On error nothing changes: sources, snapshot and parsed tags stay as
    /// they were after the last successful call.
    pub fn configure(&self, options: TracerOptions) -> ConfigResult<Arc<EffectiveConfig>> {
        self.recompute(|engine, layers| {
            let entries = env::collect(&engine.registry, &engine.env);
            let mut env_source = ConfigSource::new(Origin::EnvVar);
            let applied = env::apply(&entries, &mut env_source);
            layers.sources.env = env_source;

            let stable = engine.stable_config();
            layers.sources.local_stable =
                engine.stable_source(Origin::LocalStableConfig, &stable.local_entries);
            layers.sources.fleet_stable =
                engine.stable_source(Origin::FleetStableConfig, &stable.fleet_entries);

            layers.sources.code = options.flatten(&layers.sources.env);
            layers.options = options;

            engine.recompute_calculated(layers)?;

            // The environment is fixed for the engine's lifetime
            let mut counters = Vec::new();
            if !layers.env_reported {
                counters = applied.counters;
                counters.extend(otel::check(&engine.registry, &engine.env));
                layers.env_reported = true;
            }
            Ok(Pending {
                parsed_dd_tags: Some(applied.parsed_dd_tags),
                counters,
            })
        })
    }

    /// Replace the remote source. `None` clears it.
    pub fn set_remote_config(
        &self,
        payload: Option<&RemotePayload>,
    ) -> ConfigResult<Arc<EffectiveConfig>> {
        self.recompute(|engine, layers| {
            layers.sources.remote = match payload {
                Some(payload) => remote::build(payload, runtime_id()),
                None => ConfigSource::new(Origin::RemoteConfig),
            };
            engine.recompute_calculated(layers)?;
            Ok(Pending::default())
        })
    }

    /// Forget reported values, so the next merge reports everything again.
    pub fn reset_change_tracking(&self) -> ConfigResult<()> {
        let _reentry = ReentryGuard::enter(self.id)?;
        self.lock_inner().tracker.reset();
        Ok(())
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => {
                warn!("Configuration state lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Run `update` on a copy of the layers, merge, commit and publish, one
    /// recompute at a time.
    ///
    /// The sink is called before the lock is released, so batches reach it in
    /// merge order. A sink calling back into the engine gets `Busy`.
    fn recompute<F>(&self, update: F) -> ConfigResult<Arc<EffectiveConfig>>
    where
        F: FnOnce(&Self, &mut Layers) -> ConfigResult<Pending>,
    {
        let _reentry = ReentryGuard::enter(self.id)?;
        let mut guard = self.lock_inner();
        let inner = &mut *guard;
        self.merging.store(true, Ordering::SeqCst);

        let mut layers = inner.layers.clone();
        let pending = match update(self, &mut layers) {
            Ok(pending) => pending,
            Err(e) => {
                self.merging.store(false, Ordering::SeqCst);
                debug!("Configuration update rejected: {}", e);
                return Err(e);
            }
        };

        let (effective, changes) = merge(&layers.sources, &mut inner.tracker);
        inner.layers = layers;
        let effective = Arc::new(effective);
        self.snapshot.store(Arc::clone(&effective));
        if let Some(tags) = pending.parsed_dd_tags {
            self.parsed_dd_tags.store(Arc::new(tags));
        }
        self.merging.store(false, Ordering::SeqCst);
        debug!(changes = changes.len(), "Configuration merged");

        for event in &pending.counters {
            self.sink.increment_counter(event);
        }
        self.sink.publish_changes(&changes);
        drop(guard);
        Ok(effective)
    }

    fn recompute_calculated(&self, layers: &mut Layers) -> ConfigResult<()> {
        let calculated = calculated::compute(&CalculatedInputs {
            registry: &self.registry,
            env: &self.env,
            options: &layers.options,
            sources: &layers.sources,
            platform: &self.platform,
        })?;
        layers.sources.calculated = calculated;
        Ok(())
    }

    /// Stable config, read on first use.
    fn stable_config(&self) -> &StableConfigRead {
        self.stable.get_or_init(|| {
            let read = self.stable_reader.read(&self.stable_paths);
            for warning in &read.warnings {
                warn!("{}", warning);
            }
            if !read.local_entries.is_empty() || !read.fleet_entries.is_empty() {
                info!(
                    local = read.local_entries.len(),
                    fleet = read.fleet_entries.len(),
                    "Loaded stable configuration"
                );
            }
            read
        })
    }

    /// Translate stable-config entries the same way as the environment.
    fn stable_source(&self, origin: Origin, entries: &EnvMap) -> ConfigSource {
        let mut source = ConfigSource::new(origin);
        if entries.is_empty() {
            return source;
        }
        let entries = env::collect(
            &self.registry,
            &ProcessEnv::from_pairs(entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))),
        );
        env::apply(&entries, &mut source);
        source.unprocessed.clear();
        source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::telemetry::RecordingSink;
    use serde_json::json;

    fn engine(pairs: &[(&str, &str)], sink: Arc<RecordingSink>) -> Engine {
        Engine::builder()
            .env(ProcessEnv::from_pairs(pairs.iter().copied()))
            .stable_reader(NoStableConfig)
            .platform(Platform::with_socket("/nonexistent/apm.socket"))
            .sink(sink)
            .build()
            .unwrap()
    }

    #[test]
    fn test_snapshot_empty_until_configured() {
        let engine = engine(&[], Arc::new(RecordingSink::new()));
        assert!(engine.snapshot().is_empty());
        assert_eq!(engine.state(), EngineState::Merged);

        let effective = engine.configure(TracerOptions::default()).unwrap();
        assert!(!effective.is_empty());
        assert_eq!(engine.snapshot(), effective);
    }

    #[test]
    fn test_configure_publishes_once_per_merge() {
        let sink = Arc::new(RecordingSink::new());
        let engine = engine(&[("DD_SERVICE", "api")], sink.clone());

        engine.configure(TracerOptions::default()).unwrap();
        engine.configure(TracerOptions::default()).unwrap();

        let batches = sink.batches();
        assert_eq!(batches.len(), 2);
        assert!(!batches[0].is_empty());
        assert!(batches[1].is_empty());
    }

    #[test]
    fn test_reset_change_tracking_reports_again() {
        let sink = Arc::new(RecordingSink::new());
        let engine = engine(&[], sink.clone());

        engine.configure(TracerOptions::default()).unwrap();
        let first = sink.last_batch().unwrap().len();
        engine.reset_change_tracking().unwrap();
        engine.configure(TracerOptions::default()).unwrap();
        assert_eq!(sink.last_batch().unwrap().len(), first);
    }

    #[test]
    fn test_get_origin_validates_key() {
        let engine = engine(&[("DD_ENV", "prod")], Arc::new(RecordingSink::new()));
        engine.configure(TracerOptions::default()).unwrap();

        assert_eq!(engine.get_origin("env").unwrap(), Origin::EnvVar);
        assert_eq!(engine.get_origin("version").unwrap(), Origin::Default);
        let err = engine.get_origin("no.such.key").unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownKey);
    }

    #[test]
    fn test_remote_config_round_trip() {
        let engine = engine(&[("DD_TRACE_SAMPLE_RATE", "0.5")], Arc::new(RecordingSink::new()));
        engine.configure(TracerOptions::default()).unwrap();

        let payload = RemotePayload {
            tracing_sampling_rate: Some(0.1),
            tracing_tags: Some(remote::RemoteTags::List(vec!["team:core".into()])),
            ..Default::default()
        };
        let effective = engine.set_remote_config(Some(&payload)).unwrap();
        assert_eq!(effective.get("sampleRate"), Some(&json!(0.1)));
        assert_eq!(effective.origin("sampleRate"), Some(Origin::RemoteConfig));
        assert_eq!(effective.get("tags").unwrap()["runtime-id"], json!(runtime_id()));

        let effective = engine.set_remote_config(None).unwrap();
        assert_eq!(effective.get("sampleRate"), Some(&json!(0.5)));
        assert_eq!(effective.origin("sampleRate"), Some(Origin::EnvVar));
    }

    #[test]
    fn test_parsed_dd_tags_exposed() {
        let engine = engine(
            &[("DD_TAGS", "team:core,tier:1"), ("DD_TRACE_TAGS", "extra:x")],
            Arc::new(RecordingSink::new()),
        );
        engine.configure(TracerOptions::default()).unwrap();

        let tags = engine.parsed_dd_tags();
        assert_eq!(tags.get("team").map(String::as_str), Some("core"));
        assert!(!tags.contains_key("extra"));
    }

    #[test]
    fn test_runtime_id_is_stable() {
        assert_eq!(runtime_id(), runtime_id());
        assert_eq!(runtime_id().len(), 36);
    }
}
