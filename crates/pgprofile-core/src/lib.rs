//! pgprofile-core: workload profiling library for PostgreSQL.
//!
//! Provides:
//! - `source`: raw counter source trait and its PostgreSQL implementation
//! - `calculator`: snapshot delta calculator (rates + DB time apportionment)
//! - `classifier`: rule-based workload classifier
//! - `presets`: immutable tuning presets and `TuningConfig`
//! - `configurator`: allow-listed application of settings (`ALTER SYSTEM`)
//! - `published`: single-writer / multi-reader published diagnosis state
//! - `model`: shared data model (counter snapshots, workload metrics)
//!
//! With `api` feature:
//! - OpenAPI schema derives (`utoipa::ToSchema`) on serializable types

pub mod calculator;
pub mod classifier;
pub mod configurator;
pub mod error;
pub mod model;
pub mod presets;
pub mod published;
pub mod source;

pub use calculator::Calculator;
pub use classifier::{Confidence, Diagnosis, Profile, classify_workload};
pub use error::{CalcError, ConfigError, SourceError};
pub use model::{RawCounterSnapshot, SessionSampleCounts, WorkloadMetrics};
pub use presets::{Preset, TuningConfig};
pub use published::{PublishedState, ScenarioInfo, StatusView};

/// Crate version with the short git SHA embedded at build time.
pub const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_SHA"), ")");
