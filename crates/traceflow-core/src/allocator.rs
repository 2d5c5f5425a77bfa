//! Privileged export channel allocation.
//!
//! A national target is split over exporters in whole shipment units by a
//! multinomial draw weighted by `volume * eu_preference`. No exporter is
//! asked for more units than its volume holds. Exporters with no preference
//! only take units once every preferring exporter is full, so the target is
//! still met when it can be. The part of the target that does not fill a
//! whole unit goes to one exporter with enough headroom, or is spread
//! greedily when no single exporter can take it.
//!
//! Traceability is reported per exporter as the farmers reachable through
//! its top suppliers. It never changes the volume allocation.

use std::collections::{BTreeMap, BTreeSet};

use rand::Rng;
use serde::Serialize;
use traceflow_types::{ExporterId, FarmerId, MiddlemanId};

use crate::numeric::{multinomial, weighted_pick};

/// Outcome of an allocation against its target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AllocationReport {
    /// Requested volume.
    pub target_kg: u64,
    /// Target clamped to the available volume.
    pub clamped_target_kg: u64,
    /// Volume actually allocated.
    pub achieved_kg: u64,
    /// Clamped target that could not be placed.
    pub shortfall_kg: u64,
    /// Whole shipment units placed by the multinomial draw.
    pub units: u64,
}

/// Per-exporter allocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allocation {
    /// Allocated volume per exporter; exporters with nothing are omitted.
    pub per_exporter: BTreeMap<ExporterId, u64>,
    /// Summary against the target.
    pub report: AllocationReport,
}

/// Allocate `target_kg` over exporters with the given aggregate volumes.
///
/// `preferences` holds each exporter's appetite for the privileged channel
/// in `[0, 1]`; a missing entry counts as zero.
pub fn allocate(
    volumes: &BTreeMap<ExporterId, u64>,
    preferences: &BTreeMap<ExporterId, f64>,
    target_kg: u64,
    unit_kg: u64,
    rng: &mut impl Rng,
) -> Allocation {
    let unit = unit_kg.max(1);
    let vols: Vec<u64> = volumes.values().copied().collect();
    let prefs: Vec<f64> = volumes
        .keys()
        .map(|id| {
            preferences
                .get(id)
                .copied()
                .filter(|p| p.is_finite())
                .unwrap_or(0.0)
                .max(0.0)
        })
        .collect();
    let total: u64 = vols.iter().sum();
    let clamped = target_kg.min(total);

    // Whole units, capped per exporter. Draws landing on a full exporter
    // are redrawn over those with room.
    let caps: Vec<u64> = vols.iter().map(|v| v / unit).collect();
    let needed = caps.iter().sum::<u64>().min(clamped / unit);
    let mut units = vec![0_u64; vols.len()];
    let mut remaining = needed;
    while remaining > 0 {
        let open: Vec<bool> = units.iter().zip(&caps).map(|(u, cap)| u < cap).collect();
        let weights = preferred_weights(&vols, &prefs, &open);
        if !weights.iter().any(|w| *w > 0.0) {
            break;
        }
        let draws = multinomial(remaining, &weights, rng);
        for ((u, cap), draw) in units.iter_mut().zip(&caps).zip(draws) {
            let take = draw.min(cap - *u);
            *u += take;
            remaining -= take;
        }
    }

    let mut alloc: Vec<u64> = units.iter().map(|u| u * unit).collect();
    let placed: u64 = alloc.iter().sum();
    let mut leftover = clamped - placed;

    if leftover > 0 {
        let headroom: Vec<u64> = vols.iter().zip(&alloc).map(|(v, a)| v - a).collect();
        let fits: Vec<bool> = headroom.iter().map(|h| *h >= leftover).collect();
        let weights = preferred_weights(&vols, &prefs, &fits);
        if let Some(slot) = weighted_pick(&weights, rng).and_then(|i| alloc.get_mut(i)) {
            *slot += leftover;
            leftover = 0;
        } else {
            tracing::debug!(leftover, "No single exporter can take the leftover, spreading it");
            let mut order: Vec<usize> = (0..vols.len()).collect();
            let prefers = |i: usize| prefs.get(i).is_some_and(|p| *p > 0.0);
            order.sort_by(|a, b| {
                prefers(*b)
                    .cmp(&prefers(*a))
                    .then(headroom.get(*b).cmp(&headroom.get(*a)))
                    .then(a.cmp(b))
            });
            for i in order {
                if leftover == 0 {
                    break;
                }
                if let (Some(slot), Some(room)) = (alloc.get_mut(i), headroom.get(i)) {
                    let take = leftover.min(*room);
                    *slot += take;
                    leftover -= take;
                }
            }
        }
    }
    if leftover > 0 {
        tracing::warn!(
            target_kg,
            shortfall_kg = leftover,
            "Privileged channel target could not be fully allocated"
        );
    }

    let per_exporter: BTreeMap<ExporterId, u64> = volumes
        .keys()
        .cloned()
        .zip(alloc)
        .filter(|(_, kg)| *kg > 0)
        .collect();
    let achieved_kg = per_exporter.values().sum();
    Allocation {
        per_exporter,
        report: AllocationReport {
            target_kg,
            clamped_target_kg: clamped,
            achieved_kg,
            shortfall_kg: clamped - achieved_kg,
            units: needed - remaining,
        },
    }
}

/// Draw weights over the `eligible` exporters: `volume * preference`, or
/// plain volume when no eligible exporter has any preference.
fn preferred_weights(vols: &[u64], prefs: &[f64], eligible: &[bool]) -> Vec<f64> {
    let weigh = |by_preference: bool| -> Vec<f64> {
        vols.iter()
            .zip(prefs)
            .zip(eligible)
            .map(|((v, p), ok)| match (*ok, by_preference) {
                (false, _) => 0.0,
                (true, true) => *v as f64 * p,
                (true, false) => *v as f64,
            })
            .collect()
    };
    let preferred = weigh(true);
    if preferred.iter().any(|w| *w > 0.0) {
        preferred
    } else {
        weigh(false)
    }
}

/// Number of traceable suppliers out of `n` at `rate`.
///
/// `ceil(n * rate)` clamped to `[1, n]`; a rate of zero means all of them.
pub fn traceable_count(n: usize, rate: f64) -> usize {
    if n == 0 {
        return 0;
    }
    if rate <= 0.0 {
        return n;
    }
    ((n as f64 * rate).ceil() as usize).clamp(1, n)
}

/// The traceable supplier subset of one exporter: its largest suppliers by
/// volume (ties by id).
pub fn traceable_suppliers(supply: &BTreeMap<MiddlemanId, u64>, rate: f64) -> BTreeSet<MiddlemanId> {
    let mut ranked: Vec<(&MiddlemanId, u64)> = supply.iter().map(|(m, kg)| (m, *kg)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    let k = traceable_count(ranked.len(), rate);
    ranked.into_iter().take(k).map(|(m, _)| m.clone()).collect()
}

/// Sorted, unique farmers feeding the given suppliers.
pub fn traceable_farmers(
    suppliers: &BTreeSet<MiddlemanId>,
    farmers_by_supplier: &BTreeMap<MiddlemanId, BTreeSet<FarmerId>>,
) -> Vec<FarmerId> {
    let farmers: BTreeSet<&FarmerId> = suppliers
        .iter()
        .filter_map(|m| farmers_by_supplier.get(m))
        .flatten()
        .collect();
    farmers.into_iter().cloned().collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;

    fn volumes(v: &[u64]) -> BTreeMap<ExporterId, u64> {
        v.iter()
            .enumerate()
            .map(|(i, kg)| (ExporterId::new(format!("E{i}")), *kg))
            .collect()
    }

    fn neutral(vols: &BTreeMap<ExporterId, u64>) -> BTreeMap<ExporterId, f64> {
        vols.keys().map(|id| (id.clone(), 1.0)).collect()
    }

    fn check_bounds(vols: &BTreeMap<ExporterId, u64>, allocation: &Allocation) {
        for (id, kg) in &allocation.per_exporter {
            assert!(*kg <= vols.get(id).copied().unwrap_or(0), "{id} over volume");
        }
    }

    #[test]
    fn allocation_hits_target_exactly() {
        let vols = volumes(&[900_000, 400_000, 250_000, 50_000]);
        for seed in 0..20 {
            let mut rng = SmallRng::seed_from_u64(seed);
            let allocation = allocate(&vols, &neutral(&vols), 1_234_567, 40_000, &mut rng);
            assert_eq!(allocation.report.achieved_kg, 1_234_567);
            assert_eq!(allocation.report.shortfall_kg, 0);
            check_bounds(&vols, &allocation);
        }
    }

    #[test]
    fn target_above_volume_is_clamped() {
        let vols = volumes(&[30_000, 20_000]);
        let mut rng = SmallRng::seed_from_u64(1);
        let allocation = allocate(&vols, &neutral(&vols), 1_000_000, 40_000, &mut rng);
        assert_eq!(allocation.report.clamped_target_kg, 50_000);
        assert_eq!(allocation.report.achieved_kg, 50_000);
        assert_eq!(allocation.per_exporter.values().sum::<u64>(), 50_000);
    }

    #[test]
    fn zero_target_allocates_nothing() {
        let vols = volumes(&[100_000, 100_000]);
        let mut rng = SmallRng::seed_from_u64(1);
        let allocation = allocate(&vols, &neutral(&vols), 0, 40_000, &mut rng);
        assert!(allocation.per_exporter.is_empty());
        assert_eq!(allocation.report, AllocationReport::default());
    }

    #[test]
    fn sub_unit_target_goes_to_one_exporter() {
        let vols = volumes(&[5_000, 5_000]);
        let mut rng = SmallRng::seed_from_u64(42);
        let allocation = allocate(&vols, &neutral(&vols), 4_000, 40_000, &mut rng);
        assert_eq!(allocation.per_exporter.len(), 1);
        assert_eq!(allocation.report.achieved_kg, 4_000);
        assert_eq!(allocation.report.units, 0);
    }

    #[test]
    fn leftover_is_spread_when_no_exporter_can_take_it() {
        // Units fill both exporters to 40 000; 30 000 is left but each has
        // only 20 000 of headroom.
        let vols = volumes(&[60_000, 60_000]);
        let mut rng = SmallRng::seed_from_u64(3);
        let allocation = allocate(&vols, &neutral(&vols), 110_000, 40_000, &mut rng);
        assert_eq!(allocation.report.units, 2);
        assert_eq!(allocation.report.achieved_kg, 110_000);
        check_bounds(&vols, &allocation);
    }

    #[test]
    fn exporter_without_preference_gets_nothing_while_others_have_room() {
        let vols = volumes(&[400_000, 400_000, 400_000]);
        let mut prefs = neutral(&vols);
        prefs.insert(ExporterId::new("E1"), 0.0);
        for seed in 0..20 {
            let mut rng = SmallRng::seed_from_u64(seed);
            let allocation = allocate(&vols, &prefs, 500_000, 40_000, &mut rng);
            assert_eq!(allocation.report.achieved_kg, 500_000);
            assert!(!allocation.per_exporter.contains_key(&ExporterId::new("E1")));
        }
    }

    #[test]
    fn preference_shifts_units_toward_keen_exporters() {
        let vols = volumes(&[1_000_000, 1_000_000]);
        let prefs: BTreeMap<ExporterId, f64> =
            [(ExporterId::new("E0"), 0.9), (ExporterId::new("E1"), 0.1)].into();
        let mut rng = SmallRng::seed_from_u64(11);
        let allocation = allocate(&vols, &prefs, 800_000, 10_000, &mut rng);
        let keen = allocation.per_exporter.get(&ExporterId::new("E0")).copied().unwrap_or(0);
        let reluctant = allocation.per_exporter.get(&ExporterId::new("E1")).copied().unwrap_or(0);
        assert_eq!(keen + reluctant, 800_000);
        assert!(keen > reluctant * 3, "keen {keen} reluctant {reluctant}");
    }

    #[test]
    fn target_spills_to_unwilling_exporters_once_others_are_full() {
        let vols = volumes(&[80_000, 200_000]);
        let prefs: BTreeMap<ExporterId, f64> =
            [(ExporterId::new("E0"), 1.0), (ExporterId::new("E1"), 0.0)].into();
        let mut rng = SmallRng::seed_from_u64(2);
        let allocation = allocate(&vols, &prefs, 150_000, 40_000, &mut rng);
        assert_eq!(allocation.report.achieved_kg, 150_000);
        assert_eq!(allocation.per_exporter.get(&ExporterId::new("E0")), Some(&80_000));
        check_bounds(&vols, &allocation);
    }

    #[test]
    fn all_zero_preferences_fall_back_to_volume() {
        let vols = volumes(&[100_000, 100_000]);
        let mut rng = SmallRng::seed_from_u64(4);
        let allocation = allocate(&vols, &BTreeMap::new(), 120_000, 40_000, &mut rng);
        assert_eq!(allocation.report.achieved_kg, 120_000);
    }

    #[test]
    fn traceable_count_rounds_up_and_clamps() {
        assert_eq!(traceable_count(10, 0.9), 9);
        assert_eq!(traceable_count(3, 0.5), 2);
        assert_eq!(traceable_count(3, 0.01), 1);
        assert_eq!(traceable_count(3, 0.0), 3);
        assert_eq!(traceable_count(0, 0.5), 0);
    }

    #[test]
    fn traceable_suppliers_are_the_largest() {
        let supply: BTreeMap<MiddlemanId, u64> = [("M1", 10), ("M2", 500), ("M3", 70), ("M4", 70)]
            .into_iter()
            .map(|(m, kg)| (MiddlemanId::new(m), kg))
            .collect();
        let top = traceable_suppliers(&supply, 0.5);
        assert_eq!(top, BTreeSet::from([MiddlemanId::new("M2"), MiddlemanId::new("M3")]));
    }

    #[test]
    fn traceable_farmers_are_sorted_and_unique() {
        let suppliers = BTreeSet::from([MiddlemanId::new("M1"), MiddlemanId::new("M2")]);
        let mut feeding = BTreeMap::new();
        feeding.insert(
            MiddlemanId::new("M1"),
            BTreeSet::from([FarmerId::new("F3"), FarmerId::new("F1")]),
        );
        feeding.insert(
            MiddlemanId::new("M2"),
            BTreeSet::from([FarmerId::new("F1"), FarmerId::new("F2")]),
        );
        feeding.insert(MiddlemanId::new("M9"), BTreeSet::from([FarmerId::new("F9")]));
        let farmers = traceable_farmers(&suppliers, &feeding);
        assert_eq!(
            farmers,
            vec![FarmerId::new("F1"), FarmerId::new("F2"), FarmerId::new("F3")]
        );
    }
}
