//! Error types for the `PostgreSQL` backend.
//!
//! Everything is raised as [`DbError`] and converted to the engine's
//! [`StoreError`] at the [`SupplyChainStore`](traceflow_core::store::SupplyChainStore)
//! boundary.

use traceflow_core::error::StoreError;

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A stored row does not decode into a domain value.
    #[error("Invalid row: {0}")]
    InvalidRow(String),
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::InvalidRow(detail) => Self::InvalidRow(detail),
            other => Self::Backend(other.to_string()),
        }
    }
}
