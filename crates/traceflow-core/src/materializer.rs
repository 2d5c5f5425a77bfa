//! Flow materialization: turns a year's active relationships into
//! farmer → middleman → exporter trade flows and flags privileged volume.
//!
//! # Splitting
//!
//! Each farmer's production is split over its middlemen that have at least
//! one exporter, then each middleman's intake is split over its exporters.
//! A farmer's share at a middleman follows that middleman's exporter split,
//! so every farmer's flows sum exactly to its production. Year 0 reuses the
//! splits drawn during assignment ([`PresetSplits`]).
//!
//! # Flagging
//!
//! Per exporter, flows from its traceable suppliers are flagged first, then
//! the rest, largest first, until the allocated privileged volume is used
//! up. The boundary flow is split into a flagged and an unflagged row.

use std::collections::{BTreeMap, BTreeSet};

use rand::Rng;
use traceflow_types::{
    Country, ExporterId, FarmerId, MiddlemanId, PrivilegedExport, TradeFlow,
};

use crate::allocator::{
    AllocationReport, allocate, traceable_farmers, traceable_suppliers,
};
use crate::config::AssignmentConfig;
use crate::conservation::check_year;
use crate::error::CoreError;
use crate::interrupt::Interrupt;
use crate::network::{CountryActors, Network};
use crate::numeric::{apportion, split_with_floor};

/// Volume splits drawn while building the year-0 network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresetSplits {
    /// Farmer → (middleman, kg).
    pub farmer: BTreeMap<FarmerId, Vec<(MiddlemanId, u64)>>,
    /// Middleman → (exporter, kg).
    pub middleman: BTreeMap<MiddlemanId, Vec<(ExporterId, u64)>>,
}

/// What a materialization reads.
#[derive(Debug, Clone, Copy)]
pub struct YearInputs<'a> {
    /// Country parameters.
    pub country: &'a Country,
    /// Actors of the country, sorted by id.
    pub actors: &'a CountryActors,
    /// Active relationships for the year.
    pub network: &'a Network,
    /// Year-0 splits, if any.
    pub preset: Option<&'a PresetSplits>,
    /// Simulation year.
    pub year: u32,
}

/// Output of one country-year.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializedYear {
    /// Flows sorted by farmer, middleman, exporter and flag.
    pub flows: Vec<TradeFlow>,
    /// Privileged export per exporter with allocated volume.
    pub exports: Vec<PrivilegedExport>,
    /// Allocation against the country target.
    pub allocation: AllocationReport,
    /// Farmers with no route to an exporter.
    pub unplaced: Vec<FarmerId>,
    /// Production of placed farmers.
    pub placed_production_kg: u64,
}

type FlowKey = (FarmerId, MiddlemanId, ExporterId);

/// Materialize one year of flows and check conservation.
pub fn materialize(
    inputs: &YearInputs<'_>,
    params: &AssignmentConfig,
    interrupt: &Interrupt,
    rng: &mut impl Rng,
) -> Result<MaterializedYear, CoreError> {
    let YearInputs {
        country,
        actors,
        network,
        preset,
        year,
    } = *inputs;
    let no_exporters = BTreeSet::new();
    let exporters_of = |m: &MiddlemanId| network.middleman_exporters.get(m).unwrap_or(&no_exporters);

    // Farmer → middleman.
    let mut farmer_splits: Vec<(&FarmerId, Vec<(MiddlemanId, u64)>)> = Vec::new();
    let mut intake: BTreeMap<MiddlemanId, u64> = BTreeMap::new();
    let mut unplaced = Vec::new();
    let mut placed_production_kg = 0;
    for farmer in &actors.farmers {
        interrupt.check()?;
        let routes: Vec<&MiddlemanId> = network
            .farmer_middlemen
            .get(&farmer.id)
            .into_iter()
            .flatten()
            .filter(|m| !exporters_of(*m).is_empty())
            .collect();
        if routes.is_empty() {
            tracing::debug!(farmer = %farmer.id, year, "Farmer has no route to an exporter");
            unplaced.push(farmer.id.clone());
            continue;
        }
        let split = preset
            .and_then(|p| p.farmer.get(&farmer.id))
            .filter(|s| fits(s.as_slice(), routes.as_slice(), farmer.production_kg))
            .cloned()
            .unwrap_or_else(|| {
                let amounts = split_with_floor(
                    farmer.production_kg,
                    routes.len(),
                    params.min_quantity_to_middleman_kg,
                    rng,
                );
                routes.iter().map(|m| (*m).clone()).zip(amounts).collect()
            });
        for (m, kg) in &split {
            *intake.entry(m.clone()).or_insert(0) += kg;
        }
        placed_production_kg += farmer.production_kg;
        farmer_splits.push((&farmer.id, split));
    }

    // Middleman → exporter shares.
    let mut exporter_shares: BTreeMap<&MiddlemanId, Vec<(ExporterId, u64)>> = BTreeMap::new();
    for (m, received) in &intake {
        interrupt.check()?;
        let routes: Vec<&ExporterId> = exporters_of(m).iter().collect();
        let split = preset
            .and_then(|p| p.middleman.get(m))
            .filter(|s| fits(s.as_slice(), routes.as_slice(), *received))
            .cloned()
            .unwrap_or_else(|| {
                let amounts = split_with_floor(
                    *received,
                    routes.len(),
                    params.min_quantity_to_exporter_kg,
                    rng,
                );
                routes.iter().map(|e| (*e).clone()).zip(amounts).collect()
            });
        exporter_shares.insert(m, split);
    }

    // Farmer amounts follow their middleman's exporter split.
    let mut merged: BTreeMap<FlowKey, u64> = BTreeMap::new();
    for (farmer, split) in farmer_splits {
        for (m, kg) in split {
            let Some(shares) = exporter_shares.get(&m) else {
                continue;
            };
            let weights: Vec<f64> = shares.iter().map(|(_, v)| *v as f64).collect();
            for ((e, _), amount) in shares.iter().zip(apportion(kg, &weights)) {
                if amount == 0 {
                    continue;
                }
                *merged
                    .entry((farmer.clone(), m.clone(), e.clone()))
                    .or_insert(0) += amount;
            }
        }
    }

    // Allocation over exporter volumes.
    let mut volumes: BTreeMap<ExporterId, u64> = BTreeMap::new();
    let mut supply: BTreeMap<&ExporterId, BTreeMap<MiddlemanId, u64>> = BTreeMap::new();
    let mut feeding: BTreeMap<&ExporterId, BTreeMap<MiddlemanId, BTreeSet<FarmerId>>> =
        BTreeMap::new();
    for ((f, m, e), kg) in &merged {
        *volumes.entry(e.clone()).or_insert(0) += kg;
        *supply.entry(e).or_default().entry(m.clone()).or_insert(0) += kg;
        feeding
            .entry(e)
            .or_default()
            .entry(m.clone())
            .or_default()
            .insert(f.clone());
    }
    let preferences: BTreeMap<ExporterId, f64> = actors
        .exporters
        .iter()
        .map(|e| (e.id.clone(), e.eu_preference))
        .collect();
    let allocation = allocate(
        &volumes,
        &preferences,
        country.exports_to_eu_kg,
        params.shipment_unit_kg,
        rng,
    );

    // Flag per exporter.
    let mut rows: BTreeMap<(FlowKey, bool), u64> = BTreeMap::new();
    let mut exports = Vec::new();
    let mut by_exporter: BTreeMap<&ExporterId, Vec<(&FlowKey, u64)>> = BTreeMap::new();
    for (key, kg) in &merged {
        by_exporter.entry(&key.2).or_default().push((key, *kg));
    }
    for (exporter, mut flows) in by_exporter {
        let budget = allocation.per_exporter.get(exporter).copied().unwrap_or(0);
        let traceable = if budget > 0 {
            let empty = BTreeMap::new();
            let suppliers = traceable_suppliers(
                supply.get(exporter).unwrap_or(&empty),
                country.traceability_rate,
            );
            exports.push(PrivilegedExport {
                year,
                country_id: country.id.clone(),
                exporter_id: exporter.clone(),
                volume_kg: budget,
                traceable_farmer_ids: traceable_farmers(
                    &suppliers,
                    feeding.get(exporter).unwrap_or(&BTreeMap::new()),
                ),
            });
            suppliers
        } else {
            BTreeSet::new()
        };

        flows.sort_by(|(a, a_kg), (b, b_kg)| {
            traceable
                .contains(&b.1)
                .cmp(&traceable.contains(&a.1))
                .then(b_kg.cmp(a_kg))
                .then_with(|| a.cmp(b))
        });
        let mut left = budget;
        for (key, kg) in flows {
            let flagged = kg.min(left);
            left -= flagged;
            if flagged > 0 {
                rows.insert((key.clone(), true), flagged);
            }
            if kg > flagged {
                rows.insert((key.clone(), false), kg - flagged);
            }
        }
    }

    let flows: Vec<TradeFlow> = rows
        .into_iter()
        .map(|(((farmer_id, middleman_id, exporter_id), flag), amount_kg)| TradeFlow {
            year,
            country_id: country.id.clone(),
            farmer_id,
            middleman_id,
            exporter_id,
            amount_kg,
            sold_to_privileged_channel: flag,
        })
        .collect();

    let unplaced_set: BTreeSet<FarmerId> = unplaced.iter().cloned().collect();
    check_year(
        country,
        year,
        &actors.farmers,
        &unplaced_set,
        network,
        &flows,
        allocation.report.achieved_kg,
    )?;

    tracing::debug!(
        country = %country.id,
        year,
        flows = flows.len(),
        flagged_kg = allocation.report.achieved_kg,
        unplaced = unplaced.len(),
        "Materialized flows"
    );

    Ok(MaterializedYear {
        flows,
        exports,
        allocation: allocation.report,
        unplaced,
        placed_production_kg,
    })
}

/// Whether a preset split targets exactly `routes` and sums to `total`.
fn fits<T: Ord>(split: &[(T, u64)], routes: &[&T], total: u64) -> bool {
    let targets: BTreeSet<&T> = split.iter().map(|(t, _)| t).collect();
    let routes: BTreeSet<&T> = routes.iter().copied().collect();
    targets == routes && split.iter().map(|(_, kg)| kg).sum::<u64>() == total
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::SmallRng;
    use traceflow_types::{CountryId, Exporter, Farmer, GeographyId, Middleman, RelationKind};

    use super::*;
    use crate::config::CountryConfig;
    use crate::network::EdgeKey;

    fn setup() -> (Country, CountryActors, Network) {
        let mut config = CountryConfig::with_defaults("BR");
        config.exports_to_eu_kg = 250;
        config.traceability_rate = 0.5;
        let country = config.to_country();
        let cc = CountryId::new("BR");
        let geo = GeographyId::new("BR_G001");
        let farmers = [("F1", 100), ("F2", 200), ("F3", 300)]
            .into_iter()
            .map(|(id, kg)| Farmer {
                id: FarmerId::new(id),
                country_id: cc.clone(),
                geography_id: geo.clone(),
                num_plots: 1,
                production_kg: kg,
                loyalty: 0.5,
            })
            .collect();
        let middlemen = ["M1", "M2", "M3"]
            .into_iter()
            .map(|id| Middleman {
                id: MiddlemanId::new(id),
                country_id: cc.clone(),
                competitiveness: 1.0 / 3.0,
                loyalty: 0.5,
            })
            .collect();
        let exporters = ["E1", "E2"]
            .into_iter()
            .map(|id| Exporter {
                id: ExporterId::new(id),
                country_id: cc.clone(),
                competitiveness: 0.5,
                eu_preference: 0.5,
                loyalty: 0.5,
            })
            .collect();
        let actors = CountryActors {
            geographies: Vec::new(),
            farmers,
            middlemen,
            exporters,
        };

        let mut network = Network::default();
        for (kind, s, t) in [
            (RelationKind::FarmerMiddleman, "F1", "M1"),
            (RelationKind::FarmerMiddleman, "F2", "M1"),
            (RelationKind::FarmerMiddleman, "F2", "M2"),
            (RelationKind::FarmerMiddleman, "F3", "M3"),
            (RelationKind::MiddlemanExporter, "M1", "E1"),
            (RelationKind::MiddlemanExporter, "M2", "E1"),
            (RelationKind::MiddlemanExporter, "M2", "E2"),
        ] {
            network.insert(&EdgeKey {
                kind,
                source_id: s.to_owned(),
                target_id: t.to_owned(),
            });
        }
        (country, actors, network)
    }

    fn params() -> AssignmentConfig {
        AssignmentConfig {
            min_quantity_to_middleman_kg: 0,
            min_quantity_to_exporter_kg: 0,
            shipment_unit_kg: 100,
            ..AssignmentConfig::default()
        }
    }

    fn run(seed: u64) -> MaterializedYear {
        let (country, actors, network) = setup();
        let inputs = YearInputs {
            country: &country,
            actors: &actors,
            network: &network,
            preset: None,
            year: 1,
        };
        let mut rng = SmallRng::seed_from_u64(seed);
        materialize(&inputs, &params(), &Interrupt::new(), &mut rng).unwrap()
    }

    #[test]
    fn farmer_without_exporter_route_is_unplaced() {
        let out = run(42);
        // M3 has no exporter.
        assert_eq!(out.unplaced, vec![FarmerId::new("F3")]);
        assert_eq!(out.placed_production_kg, 300);
        assert!(out.flows.iter().all(|f| f.farmer_id.as_str() != "F3"));
    }

    #[test]
    fn flows_conserve_production_and_hit_target() {
        let out = run(42);
        let total: u64 = out.flows.iter().map(|f| f.amount_kg).sum();
        assert_eq!(total, 300);
        let flagged: u64 = out
            .flows
            .iter()
            .filter(|f| f.sold_to_privileged_channel)
            .map(|f| f.amount_kg)
            .sum();
        assert_eq!(flagged, 250);
        assert_eq!(out.allocation.achieved_kg, 250);
        assert_eq!(
            out.exports.iter().map(|e| e.volume_kg).sum::<u64>(),
            250
        );
    }

    #[test]
    fn keys_are_unique_per_channel() {
        let out = run(7);
        let keys: BTreeSet<_> = out
            .flows
            .iter()
            .map(|f| {
                (
                    f.farmer_id.clone(),
                    f.middleman_id.clone(),
                    f.exporter_id.clone(),
                    f.sold_to_privileged_channel,
                )
            })
            .collect();
        assert_eq!(keys.len(), out.flows.len());
        assert!(out.flows.iter().all(|f| f.amount_kg > 0));
    }

    #[test]
    fn traceable_farmers_are_reported_per_exporter() {
        let out = run(42);
        for export in &out.exports {
            assert!(!export.traceable_farmer_ids.is_empty());
            let mut sorted = export.traceable_farmer_ids.clone();
            sorted.sort();
            sorted.dedup();
            assert_eq!(sorted, export.traceable_farmer_ids);
        }
    }

    #[test]
    fn same_seed_gives_identical_rows() {
        assert_eq!(run(11), run(11));
    }

    #[test]
    fn preset_splits_are_reused_when_they_fit() {
        let (country, actors, network) = setup();
        let mut preset = PresetSplits::default();
        preset.farmer.insert(
            FarmerId::new("F2"),
            vec![(MiddlemanId::new("M1"), 150), (MiddlemanId::new("M2"), 50)],
        );
        preset.middleman.insert(
            MiddlemanId::new("M2"),
            vec![(ExporterId::new("E1"), 10), (ExporterId::new("E2"), 40)],
        );
        let inputs = YearInputs {
            country: &country,
            actors: &actors,
            network: &network,
            preset: Some(&preset),
            year: 0,
        };
        let mut rng = SmallRng::seed_from_u64(3);
        let out = materialize(&inputs, &params(), &Interrupt::new(), &mut rng).unwrap();
        let via = |m: &str, e: &str| -> u64 {
            out.flows
                .iter()
                .filter(|f| {
                    f.farmer_id.as_str() == "F2"
                        && f.middleman_id.as_str() == m
                        && f.exporter_id.as_str() == e
                })
                .map(|f| f.amount_kg)
                .sum()
        };
        assert_eq!(via("M1", "E1"), 150);
        assert_eq!(via("M2", "E1"), 10);
        assert_eq!(via("M2", "E2"), 40);
    }

    #[test]
    fn exporter_without_preference_ships_nothing_privileged() {
        let (mut country, mut actors, network) = setup();
        country.exports_to_eu_kg = 100;
        for exporter in &mut actors.exporters {
            if exporter.id.as_str() == "E2" {
                exporter.eu_preference = 0.0;
            }
        }
        let inputs = YearInputs {
            country: &country,
            actors: &actors,
            network: &network,
            preset: None,
            year: 1,
        };
        for seed in 0..10 {
            let mut rng = SmallRng::seed_from_u64(seed);
            let out = materialize(&inputs, &params(), &Interrupt::new(), &mut rng).unwrap();
            assert_eq!(out.allocation.achieved_kg, 100);
            assert!(
                out.flows
                    .iter()
                    .filter(|f| f.exporter_id.as_str() == "E2")
                    .all(|f| !f.sold_to_privileged_channel)
            );
        }
    }

    #[test]
    fn zero_target_flags_nothing() {
        let (mut country, actors, network) = setup();
        country.exports_to_eu_kg = 0;
        let inputs = YearInputs {
            country: &country,
            actors: &actors,
            network: &network,
            preset: None,
            year: 1,
        };
        let mut rng = SmallRng::seed_from_u64(1);
        let out = materialize(&inputs, &params(), &Interrupt::new(), &mut rng).unwrap();
        assert!(out.flows.iter().all(|f| !f.sold_to_privileged_channel));
        assert!(out.exports.is_empty());
    }
}
