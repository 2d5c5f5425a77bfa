//! Error types for the engine binary.

/// Top-level error for the engine binary.
///
/// Each variant wraps one subsystem error so `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading or validation failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: traceflow_core::config::ConfigError,
    },

    /// Connecting to or migrating the database failed.
    #[error("database error: {source}")]
    Db {
        /// The underlying database error.
        #[from]
        source: traceflow_db::DbError,
    },

    /// The batch finished with failed countries.
    #[error("{failed} of {total} countries failed")]
    CountriesFailed {
        /// Failed countries.
        failed: usize,
        /// Countries in the batch.
        total: usize,
    },
}
