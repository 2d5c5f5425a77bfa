//! Shared type definitions for the Traceflow supply-chain simulator.
//!
//! This crate is the single source of truth for the data model used across
//! the workspace: the engine in `traceflow-core`, the `PostgreSQL` store in
//! `traceflow-db` and the `traceflow-engine` binary.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe identifier wrappers for countries, regions and actors
//! - [`enums`] -- Tiers, relationship kinds and crop classification
//! - [`structs`] -- Countries, geographies, actors, edges and trade flows

pub mod enums;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{PrimaryCrop, RelationKind, Tier};
pub use ids::{CountryId, ExporterId, FarmerId, GeographyId, MiddlemanId, RunId};
pub use structs::{
    Actor, Country, Exporter, Farmer, Geography, Middleman, PrivilegedExport, RelationshipEdge,
    TradeFlow,
};
