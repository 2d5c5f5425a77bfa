//! Error types for the simulation engine.
//!
//! [`CoreError`] covers every way a country-year can fail. Storage backends
//! report through [`StoreError`] so the engine does not depend on any
//! particular database crate.

use traceflow_types::CountryId;

use crate::config::ConfigError;

/// Errors raised by the engine while simulating a country.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Configuration was rejected before any sampling happened.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// A distribution could not be constructed from its parameters.
    #[error("invalid {what} distribution: {reason}")]
    Distribution {
        /// Which attribute was being sampled.
        what: &'static str,
        /// Why the parameters were rejected.
        reason: String,
    },

    /// Sources need targets but every target weight is zero.
    #[error("no positive target weights for {what}")]
    EmptyTargetWeights {
        /// Which tier assignment failed.
        what: &'static str,
    },

    /// A conservation or structural invariant was violated.
    #[error("consistency violation for {country} in year {year}: {detail}")]
    Consistency {
        /// Affected country.
        country: CountryId,
        /// Affected year.
        year: u32,
        /// What was violated.
        detail: String,
    },

    /// A year after year 0 was requested but the prior year has no edges.
    #[error("no relationships stored for {country} in year {year}")]
    MissingPriorState {
        /// Affected country.
        country: CountryId,
        /// The prior year that was expected to exist.
        year: u32,
    },

    /// A blocking computation task panicked or was cancelled.
    #[error("worker task failed: {reason}")]
    Worker {
        /// The join error, rendered.
        reason: String,
    },

    /// The run was aborted or timed out.
    #[error("simulation cancelled")]
    Cancelled,

    /// A storage operation failed.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: StoreError,
    },
}

/// Errors reported by a [`SupplyChainStore`](crate::store::SupplyChainStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend failed (connection, query, transaction).
    #[error("backend error: {0}")]
    Backend(String),

    /// A write would create a second active edge for the same pair.
    #[error("duplicate active relationship {kind} {source_id} -> {target_id}")]
    DuplicateEdge {
        /// Relationship kind.
        kind: String,
        /// Source endpoint.
        source_id: String,
        /// Target endpoint.
        target_id: String,
    },

    /// Input did not match what the operation accepts.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A stored row could not be decoded.
    #[error("invalid stored row: {0}")]
    InvalidRow(String),
}
