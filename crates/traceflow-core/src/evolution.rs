//! Yearly relationship evolution.
//!
//! Each lower-tier actor switches one partner with probability
//! `(1 - loyalty) * switch_rate`. A switch ends one random active edge and
//! creates one edge to a candidate outside the current set, drawn by
//! competitiveness (or farmer count for geographies). When no candidate
//! exists nothing changes, so degrees never move.
//!
//! Order within a year:
//!
//! 1. middleman → geography churn, then coverage backfill
//! 2. farmer → middleman switches, eligible by the churned coverage
//! 3. middleman → exporter switches

use std::collections::{BTreeMap, BTreeSet};

use rand::Rng;
use traceflow_types::{Country, ExporterId, GeographyId, MiddlemanId};

use crate::coverage::backfill_coverage;
use crate::error::CoreError;
use crate::interrupt::Interrupt;
use crate::network::{CountryActors, Network, NetworkDelta};
use crate::numeric::weighted_pick;

/// Result of evolving one year.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvolutionOutcome {
    /// The network for the new year.
    pub network: Network,
    /// Edges ended and created relative to the prior year.
    pub delta: NetworkDelta,
    /// Farmer → middleman switches.
    pub farmer_switches: usize,
    /// Middleman → exporter switches.
    pub middleman_switches: usize,
    /// Middleman → geography switches.
    pub geography_switches: usize,
    /// Geography edges added by the coverage backfill.
    pub backfilled: usize,
    /// Switches drawn but without any candidate.
    pub stalled: usize,
}

/// Advance `prior` by one year.
pub fn evolve(
    country: &Country,
    actors: &CountryActors,
    prior: &Network,
    min_per_geography: usize,
    interrupt: &Interrupt,
    rng: &mut impl Rng,
) -> Result<EvolutionOutcome, CoreError> {
    let mut next = prior.clone();
    let mut outcome = EvolutionOutcome::default();

    // Geography churn.
    let farmers_in: Vec<(GeographyId, f64)> = actors
        .geographies
        .iter()
        .map(|g| (g.id.clone(), f64::from(g.num_farmers)))
        .collect();
    for m in &actors.middlemen {
        interrupt.check()?;
        let p = (1.0 - m.loyalty) * country.geography_switch_rate;
        let Some(current) = next.middleman_geographies.get_mut(&m.id) else {
            continue;
        };
        match switch_one(current, &farmers_in, p, rng) {
            Switch::Done => outcome.geography_switches += 1,
            Switch::NoCandidate => outcome.stalled += 1,
            Switch::Kept => {}
        }
    }
    outcome.backfilled = backfill_coverage(
        &mut next.middleman_geographies,
        &actors.geographies,
        &actors.middlemen,
        &prior.geography_middlemen(),
        min_per_geography,
    );

    // Farmer → middleman.
    let competitiveness: BTreeMap<&MiddlemanId, f64> = actors
        .middlemen
        .iter()
        .map(|m| (&m.id, m.competitiveness))
        .collect();
    let eligible: BTreeMap<GeographyId, Vec<(MiddlemanId, f64)>> = next
        .geography_middlemen()
        .into_iter()
        .map(|(geo, ms)| {
            let weighted = ms
                .into_iter()
                .map(|m| {
                    let w = competitiveness.get(&m).copied().unwrap_or(0.0);
                    (m, w)
                })
                .collect();
            (geo, weighted)
        })
        .collect();
    let none: Vec<(MiddlemanId, f64)> = Vec::new();
    for farmer in &actors.farmers {
        interrupt.check()?;
        let p = (1.0 - farmer.loyalty) * country.farmer_switch_rate;
        let Some(current) = next.farmer_middlemen.get_mut(&farmer.id) else {
            continue;
        };
        let candidates = eligible.get(&farmer.geography_id).unwrap_or(&none);
        match switch_one(current, candidates, p, rng) {
            Switch::Done => outcome.farmer_switches += 1,
            Switch::NoCandidate => {
                tracing::debug!(farmer = %farmer.id, "No alternative middleman to switch to");
                outcome.stalled += 1;
            }
            Switch::Kept => {}
        }
    }

    // Middleman → exporter.
    let exporters: Vec<(ExporterId, f64)> = actors
        .exporters
        .iter()
        .map(|e| (e.id.clone(), e.competitiveness))
        .collect();
    for m in &actors.middlemen {
        interrupt.check()?;
        let p = (1.0 - m.loyalty) * country.middleman_switch_rate;
        let Some(current) = next.middleman_exporters.get_mut(&m.id) else {
            continue;
        };
        match switch_one(current, &exporters, p, rng) {
            Switch::Done => outcome.middleman_switches += 1,
            Switch::NoCandidate => outcome.stalled += 1,
            Switch::Kept => {}
        }
    }

    outcome.delta = prior.diff(&next);
    outcome.network = next;
    tracing::debug!(
        country = %country.id,
        farmer_switches = outcome.farmer_switches,
        middleman_switches = outcome.middleman_switches,
        geography_switches = outcome.geography_switches,
        backfilled = outcome.backfilled,
        "Evolved relationships"
    );
    Ok(outcome)
}

enum Switch {
    Kept,
    Done,
    NoCandidate,
}

/// Draw whether to switch, then replace one member of `current` with a
/// weighted candidate not already in it.
fn switch_one<T: Ord + Clone>(
    current: &mut BTreeSet<T>,
    pool: &[(T, f64)],
    probability: f64,
    rng: &mut impl Rng,
) -> Switch {
    let roll: f64 = rng.random();
    if current.is_empty() || roll >= probability {
        return Switch::Kept;
    }
    let candidates: Vec<&(T, f64)> = pool.iter().filter(|(t, _)| !current.contains(t)).collect();
    let weights: Vec<f64> = candidates.iter().map(|(_, w)| *w).collect();
    let Some((added, _)) = weighted_pick(&weights, rng).and_then(|i| candidates.get(i)) else {
        return Switch::NoCandidate;
    };
    let drop_at = rng.random_range(0..current.len());
    if let Some(dropped) = current.iter().nth(drop_at).cloned() {
        current.remove(&dropped);
    }
    current.insert(added.clone());
    Switch::Done
}
