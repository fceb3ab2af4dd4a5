//! Tracer configuration resolution library
//!
//! Resolves the effective tracer configuration from layered sources
//! (defaults, stable config files, environment, code options, remote config),
//! tracks the origin of every value and reports changes to telemetry.

pub mod cli;
pub mod engine;
pub mod error;
pub mod format;
pub mod logging;
pub mod merge;
pub mod normalize;
pub mod otel;
pub mod schema;
pub mod sources;
pub mod telemetry;

pub use engine::{Engine, EngineBuilder, EngineState, runtime_id};
pub use error::{ConfigError, ConfigResult, ErrorCode};
pub use merge::{ChangeTracker, EffectiveConfig};
pub use schema::SchemaRegistry;
pub use sources::Origin;
pub use sources::options::TracerOptions;
pub use sources::remote::RemotePayload;
pub use telemetry::{ChangeRecord, CounterEvent, TelemetrySink};
