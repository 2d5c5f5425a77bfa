//! Trade analytics for one country-year and across a country's years.
//!
//! A passive layer over what a year produced: it reads flows, privileged
//! exports and the active network, and never feeds back into the
//! simulation. Concentration is the Herfindahl-Hirschman index of volume
//! shares, from `1 / n` (even) to 1 (one actor carries everything).

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use traceflow_types::{ExporterId, FarmerId, MiddlemanId, PrivilegedExport, TradeFlow};

use crate::network::Network;

/// Metrics of one country-year.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TradeMetrics {
    /// Total traded volume.
    pub traded_kg: u64,
    /// Volume flagged for the privileged channel.
    pub privileged_kg: u64,
    /// `privileged_kg / traded_kg`.
    pub privileged_ratio: f64,
    /// Farmers with at least one flow.
    pub trading_farmers: usize,
    /// Middlemen with at least one flow.
    pub trading_middlemen: usize,
    /// Exporters with at least one flow.
    pub trading_exporters: usize,
    /// Mean distinct middlemen per trading farmer.
    pub avg_middlemen_per_farmer: f64,
    /// Mean distinct exporters per trading middleman.
    pub avg_exporters_per_middleman: f64,
    /// Mean active farmer suppliers per middleman with any.
    pub avg_farmers_per_middleman: f64,
    /// Mean traded volume per trading farmer.
    pub avg_volume_per_farmer: f64,
    /// Mean over farmers of the distinct exporters reached per middleman.
    pub avg_chain_length: f64,
    /// Flow rows over farmers × middlemen × exporters trading.
    pub relationship_density: f64,
    /// Distinct farmers traceable from any privileged export.
    pub traceable_farmers: usize,
    /// `traceable_farmers / trading_farmers`.
    pub traceable_share: f64,
    /// Concentration of volume over farmers.
    pub farmer_concentration: f64,
    /// Concentration of volume over middlemen.
    pub middleman_concentration: f64,
    /// Concentration of volume over exporters.
    pub exporter_concentration: f64,
}

/// Summarize one year's output.
pub fn trade_metrics(
    flows: &[TradeFlow],
    exports: &[PrivilegedExport],
    network: &Network,
) -> TradeMetrics {
    let mut by_farmer: BTreeMap<&FarmerId, u64> = BTreeMap::new();
    let mut by_middleman: BTreeMap<&MiddlemanId, u64> = BTreeMap::new();
    let mut by_exporter: BTreeMap<&ExporterId, u64> = BTreeMap::new();
    let mut farmer_middlemen: BTreeMap<&FarmerId, BTreeSet<&MiddlemanId>> = BTreeMap::new();
    let mut middleman_exporters: BTreeMap<&MiddlemanId, BTreeSet<&ExporterId>> = BTreeMap::new();
    let mut chains: BTreeMap<(&FarmerId, &MiddlemanId), BTreeSet<&ExporterId>> = BTreeMap::new();
    let mut pairs: BTreeSet<(&FarmerId, &MiddlemanId, &ExporterId)> = BTreeSet::new();
    let mut privileged_kg = 0;
    for flow in flows {
        *by_farmer.entry(&flow.farmer_id).or_insert(0) += flow.amount_kg;
        *by_middleman.entry(&flow.middleman_id).or_insert(0) += flow.amount_kg;
        *by_exporter.entry(&flow.exporter_id).or_insert(0) += flow.amount_kg;
        farmer_middlemen
            .entry(&flow.farmer_id)
            .or_default()
            .insert(&flow.middleman_id);
        middleman_exporters
            .entry(&flow.middleman_id)
            .or_default()
            .insert(&flow.exporter_id);
        chains
            .entry((&flow.farmer_id, &flow.middleman_id))
            .or_default()
            .insert(&flow.exporter_id);
        pairs.insert((&flow.farmer_id, &flow.middleman_id, &flow.exporter_id));
        if flow.sold_to_privileged_channel {
            privileged_kg += flow.amount_kg;
        }
    }
    let traded_kg: u64 = by_farmer.values().sum();

    // Chain length: per farmer, mean exporters over its middlemen.
    let mut per_farmer_chain: BTreeMap<&FarmerId, (usize, usize)> = BTreeMap::new();
    for ((farmer, _), exporters) in &chains {
        let entry = per_farmer_chain.entry(*farmer).or_insert((0, 0));
        entry.0 += exporters.len();
        entry.1 += 1;
    }
    let avg_chain_length = mean(
        per_farmer_chain
            .values()
            .map(|(links, middlemen)| ratio(*links as f64, *middlemen as f64)),
    );

    let traceable: BTreeSet<&FarmerId> = exports
        .iter()
        .flat_map(|e| &e.traceable_farmer_ids)
        .collect();

    let suppliers = network.middleman_farmers();
    let cells = by_farmer.len() * by_middleman.len() * by_exporter.len();

    TradeMetrics {
        traded_kg,
        privileged_kg,
        privileged_ratio: ratio(privileged_kg as f64, traded_kg as f64),
        trading_farmers: by_farmer.len(),
        trading_middlemen: by_middleman.len(),
        trading_exporters: by_exporter.len(),
        avg_middlemen_per_farmer: mean(farmer_middlemen.values().map(|s| s.len() as f64)),
        avg_exporters_per_middleman: mean(middleman_exporters.values().map(|s| s.len() as f64)),
        avg_farmers_per_middleman: mean(
            suppliers
                .values()
                .filter(|s| !s.is_empty())
                .map(|s| s.len() as f64),
        ),
        avg_volume_per_farmer: ratio(traded_kg as f64, by_farmer.len() as f64),
        avg_chain_length,
        relationship_density: ratio(pairs.len() as f64, cells as f64),
        traceable_farmers: traceable.len(),
        traceable_share: ratio(traceable.len() as f64, by_farmer.len() as f64),
        farmer_concentration: concentration(by_farmer.values().copied()),
        middleman_concentration: concentration(by_middleman.values().copied()),
        exporter_concentration: concentration(by_exporter.values().copied()),
    }
}

/// Herfindahl-Hirschman index of the volumes; zero when there is no volume.
pub fn concentration(volumes: impl IntoIterator<Item = u64> + Clone) -> f64 {
    let total: u64 = volumes.clone().into_iter().sum();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    volumes
        .into_iter()
        .map(|v| {
            let share = v as f64 / total;
            share * share
        })
        .sum()
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 { num / den } else { 0.0 }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0_usize), |(s, n), v| (s + v, n + 1));
    ratio(sum, n as f64)
}

// ---------------------------------------------------------------------------
// Multi-year trends
// ---------------------------------------------------------------------------

/// One year in a trend.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvolutionPoint {
    /// Simulation year.
    pub year: u32,
    /// Share of volume on the privileged channel.
    pub privileged_ratio: f64,
    /// Share of trading farmers traceable from privileged exports.
    pub traceable_share: f64,
    /// Mean middlemen per farmer.
    pub avg_middlemen_per_farmer: f64,
    /// Mean exporters per middleman.
    pub avg_exporters_per_middleman: f64,
    /// Edges ended this year over the prior year's active edges.
    pub churn: f64,
}

/// How a country's trade changed over its simulated years.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TradeEvolution {
    /// Per-year points in year order.
    pub points: Vec<EvolutionPoint>,
    /// Last minus first privileged ratio.
    pub privileged_ratio_change: f64,
    /// Last minus first traceable share.
    pub traceable_share_change: f64,
    /// Mean churn over the years after year 0.
    pub mean_churn: f64,
}

/// Build a trend from per-year metrics and edge counts, in year order.
///
/// Each entry is `(year, metrics, active_edges, edges_ended)`.
pub fn trade_evolution<'a>(
    years: impl IntoIterator<Item = (u32, &'a TradeMetrics, usize, usize)>,
) -> TradeEvolution {
    let mut points = Vec::new();
    let mut prior_edges: Option<usize> = None;
    for (year, metrics, active_edges, ended) in years {
        let churn = prior_edges.map_or(0.0, |prior| ratio(ended as f64, prior as f64));
        points.push(EvolutionPoint {
            year,
            privileged_ratio: metrics.privileged_ratio,
            traceable_share: metrics.traceable_share,
            avg_middlemen_per_farmer: metrics.avg_middlemen_per_farmer,
            avg_exporters_per_middleman: metrics.avg_exporters_per_middleman,
            churn,
        });
        prior_edges = Some(active_edges);
    }
    let change = |f: fn(&EvolutionPoint) -> f64| match (points.first(), points.last()) {
        (Some(first), Some(last)) => f(last) - f(first),
        _ => 0.0,
    };
    TradeEvolution {
        privileged_ratio_change: change(|p| p.privileged_ratio),
        traceable_share_change: change(|p| p.traceable_share),
        mean_churn: mean(points.iter().skip(1).map(|p| p.churn)),
        points,
    }
}
