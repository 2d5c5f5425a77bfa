//! Per-country simulation pipeline.
//!
//! A [`CountrySimulation`] generates a country's actors once, then runs its
//! years in order. Year 0 builds the network from scratch. Every later
//! year loads the previous year's active relationships from the store and
//! evolves them. Each year is written with a single
//! [`commit_year`](SupplyChainStore::commit_year), so any year can be
//! re-run and will overwrite rather than duplicate its rows.
//!
//! Sampling, evolution and materialization are synchronous and run on
//! tokio's blocking pool; only store calls run on the async workers.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rand::Rng;
use serde::Serialize;
use tracing::info;
use traceflow_types::{Actor, Country, CountryId, Geography, RelationKind, Tier};

use crate::allocator::AllocationReport;
use crate::analytics::{TradeMetrics, trade_metrics};
use crate::assignment::build_initial_network;
use crate::config::AssignmentConfig;
use crate::distributions::{generate_exporters, generate_farmers, generate_middlemen};
use crate::error::CoreError;
use crate::evolution::evolve;
use crate::interrupt::Interrupt;
use crate::materializer::{MaterializedYear, PresetSplits, YearInputs, materialize};
use crate::network::{CountryActors, Network};
use crate::rng::{Stream, derive_rng};
use crate::store::{SupplyChainStore, YearCommit};

/// What happened in one country-year.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct YearSummary {
    /// Simulation year.
    pub year: u32,
    /// Active farmer → middleman edges.
    pub farmer_edges: usize,
    /// Active middleman → exporter edges.
    pub exporter_edges: usize,
    /// Active middleman → geography edges.
    pub geography_edges: usize,
    /// Edges ended this year.
    pub edges_ended: usize,
    /// Edges created this year.
    pub edges_created: usize,
    /// Farmer → middleman switches.
    pub farmer_switches: usize,
    /// Middleman → exporter switches.
    pub middleman_switches: usize,
    /// Middleman → geography switches.
    pub geography_switches: usize,
    /// Geography edges added to restore coverage.
    pub backfilled: usize,
    /// Farmers with no route to an exporter.
    pub unplaced_farmers: usize,
    /// Trade flow rows written.
    pub flows: usize,
    /// Privileged channel allocation.
    pub allocation: AllocationReport,
    /// Volume, degree, traceability and concentration metrics.
    pub metrics: TradeMetrics,
}

impl YearSummary {
    /// Active edges of every kind.
    pub const fn active_edges(&self) -> usize {
        self.farmer_edges + self.exporter_edges + self.geography_edges
    }
}

/// Runs one country against a store.
#[derive(Debug, Clone)]
pub struct CountrySimulation<S> {
    store: S,
    country: Country,
    geographies: Vec<Geography>,
    params: AssignmentConfig,
    seed: u64,
    interrupt: Interrupt,
}

impl<S: SupplyChainStore> CountrySimulation<S> {
    /// A simulation for `country` with its geographies.
    pub fn new(
        store: S,
        country: Country,
        geographies: Vec<Geography>,
        params: AssignmentConfig,
        seed: u64,
    ) -> Self {
        Self {
            store,
            country,
            geographies,
            params,
            seed,
            interrupt: Interrupt::new(),
        }
    }

    /// Use a shared cancellation handle.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// The simulated country.
    pub const fn country(&self) -> &Country {
        &self.country
    }

    fn id(&self) -> &CountryId {
        &self.country.id
    }

    /// Wipe any previous run of this country, then generate and store its
    /// geographies and actors.
    pub async fn initialize(&self) -> Result<Arc<CountryActors>, CoreError> {
        self.store.delete_country(self.id()).await?;
        self.store.create_country(&self.country).await?;
        self.store.create_geographies(&self.geographies).await?;

        let country = self.country.clone();
        let geographies = self.geographies.clone();
        let params = self.params.clone();
        let interrupt = self.interrupt.clone();
        let seed = self.seed;
        let actors = offload(move || {
            generate_actors(&country, geographies, &params, seed, &interrupt)
        })
        .await?;

        let farmer_rows: Vec<Actor> = actors.farmers.iter().cloned().map(Actor::Farmer).collect();
        let middleman_rows: Vec<Actor> =
            actors.middlemen.iter().cloned().map(Actor::Middleman).collect();
        let exporter_rows: Vec<Actor> =
            actors.exporters.iter().cloned().map(Actor::Exporter).collect();
        self.store.create_actors(Tier::Farmer, &farmer_rows).await?;
        self.store.create_actors(Tier::Middleman, &middleman_rows).await?;
        self.store.create_actors(Tier::Exporter, &exporter_rows).await?;

        info!(
            country = %self.id(),
            geographies = actors.geographies.len(),
            farmers = actors.farmers.len(),
            middlemen = actors.middlemen.len(),
            exporters = actors.exporters.len(),
            "Generated actors"
        );
        Ok(Arc::new(actors))
    }

    /// Read the country's geographies and actors back from the store.
    pub async fn load_actors(&self) -> Result<Arc<CountryActors>, CoreError> {
        let geographies = self.store.get_geographies(self.id()).await?;
        let farmers = self
            .store
            .get_actors_by_country(Tier::Farmer, self.id())
            .await?
            .into_iter()
            .filter_map(Actor::into_farmer)
            .collect();
        let middlemen = self
            .store
            .get_actors_by_country(Tier::Middleman, self.id())
            .await?
            .into_iter()
            .filter_map(Actor::into_middleman)
            .collect();
        let exporters = self
            .store
            .get_actors_by_country(Tier::Exporter, self.id())
            .await?
            .into_iter()
            .filter_map(Actor::into_exporter)
            .collect();
        Ok(Arc::new(
            CountryActors {
                geographies,
                farmers,
                middlemen,
                exporters,
            }
            .sorted(),
        ))
    }

    /// Active relationships of every kind in `year`.
    pub async fn load_network(&self, year: u32) -> Result<Network, CoreError> {
        let mut edges = Vec::new();
        for kind in RelationKind::ALL {
            edges.extend(
                self.store
                    .get_active_relationships(year, self.id(), kind)
                    .await?,
            );
        }
        Ok(Network::from_edges(&edges))
    }

    /// Simulate and commit one year.
    pub async fn simulate_year(
        &self,
        year: u32,
        actors: &Arc<CountryActors>,
    ) -> Result<YearSummary, CoreError> {
        let prior = if year == 0 {
            None
        } else {
            let prior = self.load_network(year - 1).await?;
            if prior.is_empty() {
                return Err(CoreError::MissingPriorState {
                    country: self.id().clone(),
                    year: year - 1,
                });
            }
            Some(prior)
        };

        let plan = YearPlan {
            country: self.country.clone(),
            actors: Arc::clone(actors),
            params: self.params.clone(),
            seed: self.seed,
            interrupt: self.interrupt.clone(),
            year,
        };
        let (summary, commit) = offload(move || plan.compute(prior)).await?;

        self.interrupt.check()?;
        self.store.commit_year(&commit).await?;

        info!(
            country = %self.id(),
            year,
            flows = summary.flows,
            traded_kg = summary.metrics.traded_kg,
            eu_kg = summary.allocation.achieved_kg,
            shortfall_kg = summary.allocation.shortfall_kg,
            traceable_farmers = summary.metrics.traceable_farmers,
            switches = summary.farmer_switches + summary.middleman_switches,
            unplaced = summary.unplaced_farmers,
            "Year committed"
        );
        Ok(summary)
    }

    /// Initialize the country and simulate years `0..num_years`.
    pub async fn run(&self, num_years: u32) -> Result<Vec<YearSummary>, CoreError> {
        let actors = self.initialize().await?;
        let mut summaries = Vec::with_capacity(num_years as usize);
        for year in 0..num_years {
            self.interrupt.check()?;
            summaries.push(self.simulate_year(year, &actors).await?);
        }
        Ok(summaries)
    }
}

/// Run CPU-bound work on the blocking pool, inside the caller's span.
async fn offload<T, F>(work: F) -> Result<T, CoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, CoreError> + Send + 'static,
{
    let span = tracing::Span::current();
    tokio::task::spawn_blocking(move || span.in_scope(work))
        .await
        .map_err(|e| CoreError::Worker {
            reason: e.to_string(),
        })?
}

/// Sample every actor of a country from its generation stream.
fn generate_actors(
    country: &Country,
    geographies: Vec<Geography>,
    params: &AssignmentConfig,
    seed: u64,
    interrupt: &Interrupt,
) -> Result<CountryActors, CoreError> {
    let mut rng = derive_rng(seed, &country.id, Stream::Generation);
    let mut farmers = Vec::new();
    for geography in &geographies {
        interrupt.check()?;
        farmers.extend(generate_farmers(country, geography, params, &mut rng)?);
    }
    let middlemen = generate_middlemen(country, params, &mut rng)?;
    let exporters = generate_exporters(country, &mut rng)?;
    Ok(CountryActors {
        geographies,
        farmers,
        middlemen,
        exporters,
    }
    .sorted())
}

/// Everything one year's synchronous computation owns.
struct YearPlan {
    country: Country,
    actors: Arc<CountryActors>,
    params: AssignmentConfig,
    seed: u64,
    interrupt: Interrupt,
    year: u32,
}

impl YearPlan {
    /// Build or evolve the network, materialize it and assemble the commit.
    fn compute(self, prior: Option<Network>) -> Result<(YearSummary, YearCommit), CoreError> {
        let year = self.year;
        let id = &self.country.id;
        let mut rng = derive_rng(self.seed, id, Stream::Year(year));
        let mut summary = YearSummary {
            year,
            ..YearSummary::default()
        };

        let (network, commit, materialized) = match prior {
            None => {
                let initial = build_initial_network(
                    &self.country,
                    &self.actors,
                    &self.params,
                    &self.interrupt,
                    &mut rng,
                )?;
                let materialized =
                    self.materialize(&initial.network, Some(&initial.splits), &mut rng)?;
                let commit = YearCommit {
                    country_id: id.clone(),
                    year,
                    created: initial.network.to_edges(id, year),
                    ..YearCommit::default()
                };
                summary.edges_created = commit.created.len();
                (initial.network, commit, materialized)
            }
            Some(prior) => {
                let evolved = evolve(
                    &self.country,
                    &self.actors,
                    &prior,
                    self.params.min_middlemen_per_geography,
                    &self.interrupt,
                    &mut rng,
                )?;
                let materialized = self.materialize(&evolved.network, None, &mut rng)?;
                summary.farmer_switches = evolved.farmer_switches;
                summary.middleman_switches = evolved.middleman_switches;
                summary.geography_switches = evolved.geography_switches;
                summary.backfilled = evolved.backfilled;
                summary.edges_ended = evolved.delta.ended.len();
                summary.edges_created = evolved.delta.created.len();
                let commit = YearCommit {
                    country_id: id.clone(),
                    year,
                    ended: evolved.delta.ended,
                    created: evolved
                        .delta
                        .created
                        .into_iter()
                        .map(|key| key.into_edge(id, year))
                        .collect(),
                    ..YearCommit::default()
                };
                (evolved.network, commit, materialized)
            }
        };

        summary.farmer_edges = count(&network.farmer_middlemen);
        summary.exporter_edges = count(&network.middleman_exporters);
        summary.geography_edges = count(&network.middleman_geographies);
        summary.unplaced_farmers = materialized.unplaced.len();
        summary.flows = materialized.flows.len();
        summary.allocation = materialized.allocation;
        summary.metrics = trade_metrics(&materialized.flows, &materialized.exports, &network);

        let commit = YearCommit {
            flows: materialized.flows,
            exports: materialized.exports,
            ..commit
        };
        Ok((summary, commit))
    }

    fn materialize(
        &self,
        network: &Network,
        preset: Option<&PresetSplits>,
        rng: &mut impl Rng,
    ) -> Result<MaterializedYear, CoreError> {
        let inputs = YearInputs {
            country: &self.country,
            actors: &self.actors,
            network,
            preset,
            year: self.year,
        };
        materialize(&inputs, &self.params, &self.interrupt, rng)
    }
}

fn count<K, V>(map: &BTreeMap<K, BTreeSet<V>>) -> usize {
    map.values().map(BTreeSet::len).sum()
}
