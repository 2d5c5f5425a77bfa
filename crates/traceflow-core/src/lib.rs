//! Network generation, privileged channel allocation and yearly evolution
//! for the Traceflow supply-chain simulator.
//!
//! A country's farmers, middlemen and exporters are sampled once. Year 0
//! wires them into a degree-bounded trade network; every later year evolves
//! the previous year's relationships through loyalty-gated switching. Each
//! year's network is materialized into volume-conserving trade flows with a
//! target volume flagged for the privileged export channel.
//!
//! # Modules
//!
//! - [`analytics`] -- Per-year trade metrics and multi-year trends.
//! - [`allocator`] -- Shipment-unit allocation of the privileged channel
//!   target and traceable farmer sets.
//! - [`assignment`] -- Weighted, degree-bounded tier assignment and the
//!   year-0 network.
//! - [`batch`] -- Bounded-parallel multi-country runs.
//! - [`config`] -- YAML configuration into typed structs, with validation.
//! - [`conservation`] -- Post-hoc volume and degree checks.
//! - [`coverage`] -- Middleman coverage of geographies and its backfill.
//! - [`distributions`] -- Heavy-tailed attribute sampling and actor
//!   generation.
//! - [`error`] -- [`CoreError`] and [`StoreError`].
//! - [`evolution`] -- Yearly relationship switching.
//! - [`interrupt`] -- Abort flag and deadline checks.
//! - [`materializer`] -- Trade flows and channel flagging for one year.
//! - [`network`] -- Typed view of active relationships.
//! - [`numeric`] -- Apportioning, Dirichlet, multinomial and weighted
//!   sampling.
//! - [`rng`] -- Seeded per-country, per-year random streams.
//! - [`simulation`] -- The per-country year loop.
//! - [`store`] -- [`SupplyChainStore`] and the in-memory [`MemoryStore`].
//!
//! [`CoreError`]: error::CoreError
//! [`StoreError`]: error::StoreError
//! [`SupplyChainStore`]: store::SupplyChainStore
//! [`MemoryStore`]: store::MemoryStore

pub mod allocator;
pub mod analytics;
pub mod assignment;
pub mod batch;
pub mod config;
pub mod conservation;
pub mod coverage;
pub mod distributions;
pub mod error;
pub mod evolution;
pub mod interrupt;
pub mod materializer;
pub mod network;
pub mod numeric;
pub mod rng;
pub mod simulation;
pub mod store;
