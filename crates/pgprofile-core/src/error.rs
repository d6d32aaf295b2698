//! Error types shared across the profiling pipeline.

use thiserror::Error;

/// Error type for reads and writes against the monitored database.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    /// Environment variable not set.
    #[error("PostgreSQL: {0} not set")]
    EnvNotSet(String),
    /// Connection failed.
    #[error("PostgreSQL: {0}")]
    Connection(String),
    /// Query execution failed.
    #[error("PostgreSQL query error: {0}")]
    Query(String),
}

/// Error returned by [`crate::Calculator::calculate_metrics`].
#[derive(Debug, Error)]
pub enum CalcError {
    /// The shared shutdown signal fired while the window was being measured.
    #[error("metrics calculation cancelled")]
    Cancelled,
    /// Stored counter snapshots could not be read for the window.
    #[error("failed to get snapshot delta: {0}")]
    ActiveTime(#[source] SourceError),
    /// Session samples could not be read although active time is positive.
    #[error("failed to get session sample breakdown: {0}")]
    SessionSamples(#[source] SourceError),
    /// A blocking read panicked or was aborted.
    #[error("blocking read failed: {0}")]
    Join(String),
}

impl CalcError {
    /// Returns true for the shutdown case, which callers suppress.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CalcError::Cancelled)
    }
}

/// Error returned by the configuration applier.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown preset: {0}")]
    UnknownPreset(String),
    #[error("invalid or forbidden parameter: {0}")]
    InvalidKey(String),
    /// One setting of a batch failed. Settings issued before it stay applied.
    #[error("failed to set {key}: {source}")]
    Apply {
        key: String,
        #[source]
        source: SourceError,
    },
    #[error("failed to reload conf: {0}")]
    Reload(#[source] SourceError),
}

impl ConfigError {
    /// Validation failures happen before any statement is issued.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ConfigError::UnknownPreset(_) | ConfigError::InvalidKey(_)
        )
    }
}
