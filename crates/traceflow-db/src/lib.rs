//! `PostgreSQL` storage backend for the Traceflow simulator.
//!
//! [`PgStore`] implements the engine's
//! [`SupplyChainStore`](traceflow_core::store::SupplyChainStore) on a
//! [`sqlx::PgPool`]. Batches go through `UNNEST` inserts and each
//! country-year is committed in one transaction.
//!
//! # Modules
//!
//! - [`postgres`] -- `PostgreSQL` connection pool and configuration
//! - [`pg_store`] -- The store implementation and its row types
//! - [`error`] -- Shared error types

pub mod error;
pub mod pg_store;
pub mod postgres;

// Re-export primary types for convenience.
pub use error::DbError;
pub use pg_store::PgStore;
pub use postgres::{PostgresConfig, PostgresPool};
