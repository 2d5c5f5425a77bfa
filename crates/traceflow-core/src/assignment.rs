//! Tier assignment: weighted, degree-bounded bipartite edges between
//! adjacent tiers, with each source's volume split over its targets.
//!
//! # Connection count
//!
//! A source's number of partners is drawn from the configured discrete
//! distribution, clipped to `[1, max_connections]`, then capped by loyalty:
//!
//! ```text
//! cap = max(1, round(max_connections * (1 - loyalty^2)))
//! ```
//!
//! Finally it is capped by the number of eligible targets.
//!
//! # Target choice
//!
//! Targets are drawn with replacement proportionally to weight and
//! de-duplicated. One resampling pass tops up a short set; whatever results
//! after that pass is accepted.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use traceflow_types::{Country, ExporterId, FarmerId, GeographyId, MiddlemanId};

use crate::config::{AssignmentConfig, ConnectionProbability};
use crate::coverage::{CoverageParams, assign_geographies};
use crate::error::CoreError;
use crate::interrupt::Interrupt;
use crate::materializer::PresetSplits;
use crate::network::{CountryActors, Network};
use crate::numeric::{split_with_floor, weighted_pick};

/// How many partners a source may have and the per-edge volume floor.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionPolicy {
    distribution: Vec<ConnectionProbability>,
    max_connections: usize,
    min_quantity_kg: u64,
}

impl ConnectionPolicy {
    /// Build a policy from the configured distribution.
    pub fn new(
        distribution: &[ConnectionProbability],
        max_connections: u32,
        min_quantity_kg: u64,
    ) -> Self {
        Self {
            distribution: distribution.to_vec(),
            max_connections: (max_connections as usize).max(1),
            min_quantity_kg,
        }
    }

    /// Upper bound on partners.
    pub const fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Per-edge volume floor.
    pub const fn min_quantity_kg(&self) -> u64 {
        self.min_quantity_kg
    }

    /// Loyalty-derived cap on the connection count.
    pub fn loyalty_cap(&self, loyalty: f64) -> usize {
        let l = loyalty.clamp(0.0, 1.0);
        let cap = (self.max_connections as f64 * l.mul_add(-l, 1.0)).round() as usize;
        cap.max(1)
    }

    /// Draw a connection count for a source with `eligible` candidates.
    pub fn connection_count(&self, loyalty: f64, eligible: usize, rng: &mut impl Rng) -> usize {
        if eligible == 0 {
            return 0;
        }
        let weights: Vec<f64> = self.distribution.iter().map(|c| c.probability).collect();
        let drawn = weighted_pick(&weights, rng)
            .and_then(|i| self.distribution.get(i))
            .map_or(self.max_connections, |c| c.connections as usize);
        drawn
            .clamp(1, self.max_connections)
            .min(self.loyalty_cap(loyalty))
            .min(eligible)
    }
}

/// Pick up to `k` distinct indices proportionally to `weights`.
pub fn choose_targets(weights: &[f64], k: usize, rng: &mut impl Rng) -> Vec<usize> {
    let positive: Vec<usize> = weights
        .iter()
        .enumerate()
        .filter(|(_, w)| **w > 0.0)
        .map(|(i, _)| i)
        .collect();
    if k == 0 {
        return Vec::new();
    }
    if k >= positive.len() {
        return positive;
    }
    let Ok(dist) = WeightedIndex::new(weights.iter().copied()) else {
        return positive.into_iter().take(k).collect();
    };
    let mut chosen: BTreeSet<usize> = (0..k).map(|_| dist.sample(rng)).collect();
    if chosen.len() < k {
        let missing = k - chosen.len();
        for _ in 0..missing {
            chosen.insert(dist.sample(rng));
        }
    }
    chosen.into_iter().take(k).collect()
}

/// A source node offering volume to the next tier.
#[derive(Debug, Clone)]
pub struct TierSource<'a, S> {
    /// Source id.
    pub id: S,
    /// Volume to split over the chosen targets.
    pub amount_kg: u64,
    /// Source loyalty.
    pub loyalty: f64,
    /// Indices of eligible targets; `None` means all of them.
    pub eligible: Option<&'a [usize]>,
}

/// A target node with its draw weight.
#[derive(Debug, Clone)]
pub struct TierTarget<T> {
    /// Target id.
    pub id: T,
    /// Draw weight.
    pub weight: f64,
}

/// One assigned edge with its share of the source's volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedEdge<S, T> {
    /// Source id.
    pub source: S,
    /// Target id.
    pub target: T,
    /// Volume on this edge.
    pub amount_kg: u64,
}

/// Result of assigning one tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment<S, T> {
    /// Edges, grouped by source in input order.
    pub edges: Vec<AssignedEdge<S, T>>,
    /// Sources with no eligible target.
    pub skipped: Vec<S>,
}

/// Assign every source to targets of the next tier.
///
/// Each source's edge amounts sum exactly to its `amount_kg`. A source with
/// no positively weighted eligible target is skipped and reported.
pub fn assign_tier<S, T>(
    what: &'static str,
    sources: &[TierSource<'_, S>],
    targets: &[TierTarget<T>],
    policy: &ConnectionPolicy,
    interrupt: &Interrupt,
    rng: &mut impl Rng,
) -> Result<Assignment<S, T>, CoreError>
where
    S: Clone + Display,
    T: Clone,
{
    if !sources.is_empty() && !targets.iter().any(|t| t.weight > 0.0) {
        return Err(CoreError::EmptyTargetWeights { what });
    }

    let all: Vec<usize> = (0..targets.len()).collect();
    let mut edges = Vec::with_capacity(sources.len() * policy.max_connections());
    let mut skipped = Vec::new();

    for source in sources {
        interrupt.check()?;
        let candidates: Vec<usize> = source
            .eligible
            .unwrap_or(&all)
            .iter()
            .copied()
            .filter(|i| targets.get(*i).is_some_and(|t| t.weight > 0.0))
            .collect();
        if candidates.is_empty() {
            tracing::warn!(what, source = %source.id, "No eligible targets, skipping source");
            skipped.push(source.id.clone());
            continue;
        }

        let weights: Vec<f64> = candidates
            .iter()
            .filter_map(|i| targets.get(*i).map(|t| t.weight))
            .collect();
        let k = policy.connection_count(source.loyalty, candidates.len(), rng);
        let chosen = choose_targets(&weights, k, rng);
        let amounts = split_with_floor(source.amount_kg, chosen.len(), policy.min_quantity_kg(), rng);

        for (local, amount_kg) in chosen.into_iter().zip(amounts) {
            if let Some(target) = candidates.get(local).and_then(|i| targets.get(*i)) {
                edges.push(AssignedEdge {
                    source: source.id.clone(),
                    target: target.id.clone(),
                    amount_kg,
                });
            }
        }
    }

    Ok(Assignment { edges, skipped })
}

// ---------------------------------------------------------------------------
// Year-0 network
// ---------------------------------------------------------------------------

/// The year-0 network plus the volume splits drawn while building it.
#[derive(Debug, Clone, Default)]
pub struct InitialNetwork {
    /// All active edges for year 0.
    pub network: Network,
    /// Farmer and middleman splits chosen during assignment.
    pub splits: PresetSplits,
    /// Farmers without any eligible middleman.
    pub unplaced: Vec<FarmerId>,
}

/// Build year 0: coverage, then farmer → middleman, then middleman →
/// exporter, each middleman offering the volume it just received.
pub fn build_initial_network(
    country: &Country,
    actors: &CountryActors,
    params: &AssignmentConfig,
    interrupt: &Interrupt,
    rng: &mut impl Rng,
) -> Result<InitialNetwork, CoreError> {
    let CountryActors {
        geographies,
        farmers,
        middlemen,
        exporters,
    } = actors;
    let coverage = assign_geographies(
        &country.id,
        geographies,
        middlemen,
        CoverageParams {
            min_per_geography: params.min_middlemen_per_geography,
            min_per_area: params.min_middlemen_per_producing_area,
        },
        rng,
    )?;
    let mut network = Network {
        middleman_geographies: coverage,
        ..Network::default()
    };

    // Farmer → middleman, restricted to middlemen active in the farmer's
    // geography.
    let position: BTreeMap<&MiddlemanId, usize> =
        middlemen.iter().enumerate().map(|(i, m)| (&m.id, i)).collect();
    let eligible_by_geo: BTreeMap<GeographyId, Vec<usize>> = network
        .geography_middlemen()
        .into_iter()
        .map(|(geo, ms)| {
            let idx = ms.iter().filter_map(|m| position.get(m).copied()).collect();
            (geo, idx)
        })
        .collect();
    let no_middlemen: Vec<usize> = Vec::new();
    let farmer_sources: Vec<TierSource<'_, FarmerId>> = farmers
        .iter()
        .map(|f| TierSource {
            id: f.id.clone(),
            amount_kg: f.production_kg,
            loyalty: f.loyalty,
            eligible: Some(
                eligible_by_geo
                    .get(&f.geography_id)
                    .unwrap_or(&no_middlemen)
                    .as_slice(),
            ),
        })
        .collect();
    let middleman_targets: Vec<TierTarget<MiddlemanId>> = middlemen
        .iter()
        .map(|m| TierTarget {
            id: m.id.clone(),
            weight: m.competitiveness,
        })
        .collect();
    let farmer_policy = ConnectionPolicy::new(
        &params.connection_probabilities,
        country.max_buyers_per_farmer,
        params.min_quantity_to_middleman_kg,
    );
    let farmer_assignment = assign_tier(
        "farmer->middleman",
        &farmer_sources,
        &middleman_targets,
        &farmer_policy,
        interrupt,
        rng,
    )?;

    let mut splits = PresetSplits::default();
    let mut received: BTreeMap<MiddlemanId, u64> = BTreeMap::new();
    for edge in farmer_assignment.edges {
        network
            .farmer_middlemen
            .entry(edge.source.clone())
            .or_default()
            .insert(edge.target.clone());
        *received.entry(edge.target.clone()).or_insert(0) += edge.amount_kg;
        splits
            .farmer
            .entry(edge.source)
            .or_default()
            .push((edge.target, edge.amount_kg));
    }

    // Middleman → exporter. Every middleman gets exporters, including those
    // with no volume this year, so later years can route through them.
    let middleman_sources: Vec<TierSource<'_, MiddlemanId>> = middlemen
        .iter()
        .map(|m| TierSource {
            id: m.id.clone(),
            amount_kg: received.get(&m.id).copied().unwrap_or(0),
            loyalty: m.loyalty,
            eligible: None,
        })
        .collect();
    let exporter_targets: Vec<TierTarget<ExporterId>> = exporters
        .iter()
        .map(|e| TierTarget {
            id: e.id.clone(),
            weight: e.competitiveness,
        })
        .collect();
    let middleman_policy = ConnectionPolicy::new(
        &params.connection_probabilities,
        country.max_exporters_per_middleman,
        params.min_quantity_to_exporter_kg,
    );
    let middleman_assignment = assign_tier(
        "middleman->exporter",
        &middleman_sources,
        &exporter_targets,
        &middleman_policy,
        interrupt,
        rng,
    )?;
    for edge in middleman_assignment.edges {
        network
            .middleman_exporters
            .entry(edge.source.clone())
            .or_default()
            .insert(edge.target.clone());
        splits
            .middleman
            .entry(edge.source)
            .or_default()
            .push((edge.target, edge.amount_kg));
    }

    tracing::debug!(
        country = %country.id,
        farmer_edges = network.farmer_middlemen.values().map(BTreeSet::len).sum::<usize>(),
        exporter_edges = network.middleman_exporters.values().map(BTreeSet::len).sum::<usize>(),
        unplaced = farmer_assignment.skipped.len(),
        "Built year-0 network"
    );

    Ok(InitialNetwork {
        network,
        splits,
        unplaced: farmer_assignment.skipped,
    })
}
