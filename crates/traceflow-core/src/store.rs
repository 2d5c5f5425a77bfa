//! Storage contract for simulation state plus an in-memory backend.
//!
//! [`SupplyChainStore`] is everything the engine reads and writes. The
//! `PostgreSQL` backend lives in `traceflow-db`; [`MemoryStore`] backs the
//! tests and the binary's `memory` backend.
//!
//! Relationships are active in year `y` when `start_year <= y` and
//! `end_year` is unset or greater than `y`.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use traceflow_types::{
    Actor, Country, CountryId, Geography, PrivilegedExport, RelationKind, RelationshipEdge, Tier,
    TradeFlow,
};

use crate::error::StoreError;
use crate::network::EdgeKey;

/// Everything written for one country-year, applied atomically.
///
/// Applying a commit first rewinds the country to the start of `year`:
/// edges created in or after `year` are removed, edges ended in or after
/// `year` are reopened, and flows and exports of `year` and later are
/// dropped. Re-committing a year therefore never duplicates rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct YearCommit {
    /// Country.
    pub country_id: CountryId,
    /// Year being written.
    pub year: u32,
    /// Active edges to end at `year`.
    pub ended: Vec<EdgeKey>,
    /// Edges starting at `year`.
    pub created: Vec<RelationshipEdge>,
    /// The year's flows.
    pub flows: Vec<TradeFlow>,
    /// The year's privileged exports.
    pub exports: Vec<PrivilegedExport>,
}

/// Persistent simulation state.
pub trait SupplyChainStore: Clone + Send + Sync + 'static {
    /// Insert or replace a country.
    fn create_country(&self, country: &Country) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Fetch a country.
    fn get_country(
        &self,
        id: &CountryId,
    ) -> impl Future<Output = Result<Option<Country>, StoreError>> + Send;

    /// Insert geographies.
    fn create_geographies(
        &self,
        geographies: &[Geography],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Geographies of a country, sorted by id.
    fn get_geographies(
        &self,
        country: &CountryId,
    ) -> impl Future<Output = Result<Vec<Geography>, StoreError>> + Send;

    /// Insert actors of one tier. Every actor must be of `tier`.
    fn create_actors(
        &self,
        tier: Tier,
        actors: &[Actor],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Actors of one tier in a country, sorted by id.
    fn get_actors_by_country(
        &self,
        tier: Tier,
        country: &CountryId,
    ) -> impl Future<Output = Result<Vec<Actor>, StoreError>> + Send;

    /// Edges of `kind` active in `year`.
    fn get_active_relationships(
        &self,
        year: u32,
        country: &CountryId,
        kind: RelationKind,
    ) -> impl Future<Output = Result<Vec<RelationshipEdge>, StoreError>> + Send;

    /// End the given active edges at `year`. Returns how many were ended.
    fn end_relationships(
        &self,
        country: &CountryId,
        edges: &[EdgeKey],
        year: u32,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Insert edges. Fails if any would duplicate an active edge.
    fn create_relationships(
        &self,
        edges: &[RelationshipEdge],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Replace the flows of one country-year.
    fn create_trade_flows(
        &self,
        country: &CountryId,
        year: u32,
        flows: &[TradeFlow],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Flows of one country-year, in key order.
    fn get_trade_flows(
        &self,
        year: u32,
        country: &CountryId,
    ) -> impl Future<Output = Result<Vec<TradeFlow>, StoreError>> + Send;

    /// Replace the privileged exports of one country-year.
    fn create_privileged_exports(
        &self,
        country: &CountryId,
        year: u32,
        exports: &[PrivilegedExport],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Privileged exports of one country-year, by exporter.
    fn get_privileged_exports(
        &self,
        year: u32,
        country: &CountryId,
    ) -> impl Future<Output = Result<Vec<PrivilegedExport>, StoreError>> + Send;

    /// Apply one country-year atomically.
    fn commit_year(&self, commit: &YearCommit) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Remove a country and everything under it.
    fn delete_country(&self, country: &CountryId) -> impl Future<Output = Result<(), StoreError>> + Send;
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryState {
    countries: BTreeMap<CountryId, Country>,
    geographies: BTreeMap<CountryId, BTreeMap<String, Geography>>,
    actors: BTreeMap<(CountryId, Tier), BTreeMap<String, Actor>>,
    edges: BTreeMap<CountryId, EdgeLog>,
    flows: BTreeMap<(CountryId, u32), Vec<TradeFlow>>,
    exports: BTreeMap<(CountryId, u32), Vec<PrivilegedExport>>,
}

/// Every edge of one country, with an index of the open ones.
///
/// `active` maps each open edge's key to its position in `edges`, so
/// ending and duplicate checks are logarithmic instead of a scan.
#[derive(Debug, Clone, Default)]
struct EdgeLog {
    edges: Vec<RelationshipEdge>,
    active: BTreeMap<EdgeKey, usize>,
}

impl EdgeLog {
    fn from_edges(edges: Vec<RelationshipEdge>) -> Self {
        let active = edges
            .iter()
            .enumerate()
            .filter(|(_, e)| e.end_year.is_none())
            .map(|(i, e)| (EdgeKey::of(e), i))
            .collect();
        Self { edges, active }
    }

    fn insert(&mut self, edges: &[RelationshipEdge]) -> Result<(), StoreError> {
        for edge in edges {
            let key = EdgeKey::of(edge);
            if edge.end_year.is_none() {
                if self.active.contains_key(&key) {
                    return Err(StoreError::DuplicateEdge {
                        kind: edge.kind.to_string(),
                        source_id: edge.source_id.clone(),
                        target_id: edge.target_id.clone(),
                    });
                }
                self.active.insert(key, self.edges.len());
            }
            self.edges.push(edge.clone());
        }
        Ok(())
    }

    fn end(&mut self, keys: &[EdgeKey], year: u32) -> u64 {
        let mut ended = 0;
        for key in keys {
            let Some(at) = self.active.remove(key) else {
                continue;
            };
            if let Some(edge) = self.edges.get_mut(at) {
                edge.end_year = Some(year);
                ended += 1;
            }
        }
        ended
    }

    /// Drop everything from `year` on: later edges go, later ends reopen.
    fn rewind(&mut self, year: u32) {
        let mut edges = std::mem::take(&mut self.edges);
        edges.retain(|e| e.start_year < year);
        for edge in &mut edges {
            if edge.end_year.is_some_and(|end| end >= year) {
                edge.end_year = None;
            }
        }
        *self = Self::from_edges(edges);
    }
}

/// Store that keeps everything in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_scope<'a>(
    country: &CountryId,
    year: u32,
    rows: impl IntoIterator<Item = (&'a CountryId, u32)>,
) -> Result<(), StoreError> {
    for (c, y) in rows {
        if c != country || y != year {
            return Err(StoreError::InvalidInput(format!(
                "row for {c}/{y} in a write for {country}/{year}"
            )));
        }
    }
    Ok(())
}

impl SupplyChainStore for MemoryStore {
    async fn create_country(&self, country: &Country) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.countries.insert(country.id.clone(), country.clone());
        Ok(())
    }

    async fn get_country(&self, id: &CountryId) -> Result<Option<Country>, StoreError> {
        Ok(self.state.lock().await.countries.get(id).cloned())
    }

    async fn create_geographies(&self, geographies: &[Geography]) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        for geo in geographies {
            state
                .geographies
                .entry(geo.country_id.clone())
                .or_default()
                .insert(geo.id.as_str().to_owned(), geo.clone());
        }
        Ok(())
    }

    async fn get_geographies(&self, country: &CountryId) -> Result<Vec<Geography>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .geographies
            .get(country)
            .map(|g| g.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn create_actors(&self, tier: Tier, actors: &[Actor]) -> Result<(), StoreError> {
        if let Some(wrong) = actors.iter().find(|a| a.tier() != tier) {
            return Err(StoreError::InvalidInput(format!(
                "{} {} in a {tier} batch",
                wrong.tier(),
                wrong.id()
            )));
        }
        let mut state = self.state.lock().await;
        for actor in actors {
            state
                .actors
                .entry((actor.country_id().clone(), tier))
                .or_default()
                .insert(actor.id().to_owned(), actor.clone());
        }
        Ok(())
    }

    async fn get_actors_by_country(
        &self,
        tier: Tier,
        country: &CountryId,
    ) -> Result<Vec<Actor>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .actors
            .get(&(country.clone(), tier))
            .map(|a| a.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_active_relationships(
        &self,
        year: u32,
        country: &CountryId,
        kind: RelationKind,
    ) -> Result<Vec<RelationshipEdge>, StoreError> {
        let state = self.state.lock().await;
        let mut edges: Vec<RelationshipEdge> = state
            .edges
            .get(country)
            .into_iter()
            .flat_map(|log| &log.edges)
            .filter(|e| e.kind == kind && e.is_active_in(year))
            .cloned()
            .collect();
        edges.sort();
        Ok(edges)
    }

    async fn end_relationships(
        &self,
        country: &CountryId,
        edges: &[EdgeKey],
        year: u32,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        Ok(state.edges.entry(country.clone()).or_default().end(edges, year))
    }

    async fn create_relationships(&self, edges: &[RelationshipEdge]) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        // Stage per country so a duplicate leaves nothing behind.
        let mut staged: BTreeMap<CountryId, EdgeLog> = BTreeMap::new();
        for edge in edges {
            if !staged.contains_key(&edge.country_id) {
                let current = state.edges.get(&edge.country_id).cloned().unwrap_or_default();
                staged.insert(edge.country_id.clone(), current);
            }
            if let Some(log) = staged.get_mut(&edge.country_id) {
                log.insert(std::slice::from_ref(edge))?;
            }
        }
        state.edges.extend(staged);
        Ok(())
    }

    async fn create_trade_flows(
        &self,
        country: &CountryId,
        year: u32,
        flows: &[TradeFlow],
    ) -> Result<(), StoreError> {
        check_scope(country, year, flows.iter().map(|f| (&f.country_id, f.year)))?;
        let mut sorted = flows.to_vec();
        sorted.sort();
        self.state
            .lock()
            .await
            .flows
            .insert((country.clone(), year), sorted);
        Ok(())
    }

    async fn get_trade_flows(&self, year: u32, country: &CountryId) -> Result<Vec<TradeFlow>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .flows
            .get(&(country.clone(), year))
            .cloned()
            .unwrap_or_default())
    }

    async fn create_privileged_exports(
        &self,
        country: &CountryId,
        year: u32,
        exports: &[PrivilegedExport],
    ) -> Result<(), StoreError> {
        check_scope(country, year, exports.iter().map(|e| (&e.country_id, e.year)))?;
        let mut sorted = exports.to_vec();
        sorted.sort_by(|a, b| a.exporter_id.cmp(&b.exporter_id));
        self.state
            .lock()
            .await
            .exports
            .insert((country.clone(), year), sorted);
        Ok(())
    }

    async fn get_privileged_exports(
        &self,
        year: u32,
        country: &CountryId,
    ) -> Result<Vec<PrivilegedExport>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .exports
            .get(&(country.clone(), year))
            .cloned()
            .unwrap_or_default())
    }

    async fn commit_year(&self, commit: &YearCommit) -> Result<(), StoreError> {
        let country = &commit.country_id;
        let year = commit.year;
        check_scope(country, year, commit.flows.iter().map(|f| (&f.country_id, f.year)))?;
        check_scope(country, year, commit.exports.iter().map(|e| (&e.country_id, e.year)))?;
        check_scope(
            country,
            year,
            commit.created.iter().map(|e| (&e.country_id, e.start_year)),
        )?;

        let mut state = self.state.lock().await;
        let mut log = state.edges.get(country).cloned().unwrap_or_default();
        log.rewind(year);
        log.end(&commit.ended, year);
        log.insert(&commit.created)?;

        state.edges.insert(country.clone(), log);
        state.flows.retain(|(c, y), _| c != country || *y < year);
        state.exports.retain(|(c, y), _| c != country || *y < year);
        let mut flows = commit.flows.clone();
        flows.sort();
        state.flows.insert((country.clone(), year), flows);
        let mut exports = commit.exports.clone();
        exports.sort_by(|a, b| a.exporter_id.cmp(&b.exporter_id));
        state.exports.insert((country.clone(), year), exports);
        Ok(())
    }

    async fn delete_country(&self, country: &CountryId) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.countries.remove(country);
        state.geographies.remove(country);
        state.actors.retain(|(c, _), _| c != country);
        state.edges.remove(country);
        state.flows.retain(|(c, _), _| c != country);
        state.exports.retain(|(c, _), _| c != country);
        Ok(())
    }
}
