//! Middleman coverage of geographies.
//!
//! Middleman–geography edges decide which middlemen a farmer may sell to.
//! At generation every producing area is guaranteed a minimum number of
//! middlemen and the rest are spread by farmer count. Each middleman then
//! covers a share of its area's geographies that grows with its
//! competitiveness. [`backfill_coverage`] tops up any geography left with
//! too few middlemen, both at generation and after yearly churn.

use std::collections::{BTreeMap, BTreeSet};

use rand::Rng;
use rand::seq::SliceRandom;
use traceflow_types::{CountryId, Geography, GeographyId, Middleman, MiddlemanId};

use crate::config::ConfigError;
use crate::error::CoreError;
use crate::numeric::{weighted_pick, weighted_sample_without_replacement};

/// Coverage minimums.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverageParams {
    /// Minimum active middlemen per geography.
    pub min_per_geography: usize,
    /// Middlemen guaranteed to every producing area at generation, lowered
    /// to what the country's middlemen can share evenly.
    pub min_per_area: usize,
}

/// Middleman → covered geographies.
pub type GeographyAssignment = BTreeMap<MiddlemanId, BTreeSet<GeographyId>>;

/// Initial middleman–geography assignment for a country.
pub fn assign_geographies(
    country: &CountryId,
    geographies: &[Geography],
    middlemen: &[Middleman],
    params: CoverageParams,
    rng: &mut impl Rng,
) -> Result<GeographyAssignment, CoreError> {
    let mut areas: BTreeMap<&str, Vec<&Geography>> = BTreeMap::new();
    for geo in geographies {
        areas.entry(geo.producing_area.as_str()).or_default().push(geo);
    }
    if middlemen.len() < areas.len() {
        return Err(ConfigError::invalid(
            country.as_str(),
            "num_middlemen",
            format!(
                "{} middlemen cannot cover {} producing areas",
                middlemen.len(),
                areas.len()
            ),
        )
        .into());
    }
    let per_area = seats_per_area(params.min_per_area, middlemen.len(), areas.len());
    if per_area < params.min_per_area {
        tracing::debug!(
            country = %country,
            configured = params.min_per_area,
            per_area,
            "Too few middlemen for the configured per-area minimum, lowering it"
        );
    }
    let required = areas.len() * per_area;

    // Guaranteed seats first, then the rest by area farmer count.
    let area_weights: Vec<f64> = areas
        .values()
        .map(|geos| geos.iter().map(|g| f64::from(g.num_farmers)).sum())
        .collect();
    let mut order: Vec<usize> = (0..middlemen.len()).collect();
    order.shuffle(rng);
    let mut members: Vec<Vec<&Middleman>> = vec![Vec::new(); areas.len()];
    for (pos, idx) in order.into_iter().enumerate() {
        let area = if pos < required {
            pos / per_area
        } else {
            weighted_pick(&area_weights, rng).unwrap_or(0)
        };
        if let (Some(slot), Some(m)) = (members.get_mut(area), middlemen.get(idx)) {
            slot.push(m);
        }
    }

    let mut assignment = GeographyAssignment::new();
    for (geos, members) in areas.values().zip(members) {
        let geo_weights: Vec<f64> = geos.iter().map(|g| f64::from(g.num_farmers)).collect();
        let best = members
            .iter()
            .map(|m| m.competitiveness)
            .fold(0.0_f64, f64::max);
        for m in members {
            let coverage = if best > 0.0 { m.competitiveness / best } else { 1.0 };
            let count = ((geos.len() as f64 * coverage).floor() as usize).clamp(1, geos.len());
            let picks = weighted_sample_without_replacement(&geo_weights, count, rng);
            let covered = assignment.entry(m.id.clone()).or_default();
            for pick in picks {
                if let Some(geo) = geos.get(pick) {
                    covered.insert(geo.id.clone());
                }
            }
        }
    }

    let added = backfill_coverage(
        &mut assignment,
        geographies,
        middlemen,
        &BTreeMap::new(),
        params.min_per_geography,
    );
    tracing::debug!(
        country = %country,
        areas = areas.len(),
        backfilled = added,
        "Assigned middlemen to geographies"
    );
    Ok(assignment)
}

/// Guaranteed middlemen per producing area: the configured minimum, capped
/// by an even share of `middlemen`, and never below one.
pub fn seats_per_area(configured: usize, middlemen: usize, areas: usize) -> usize {
    configured.min(middlemen / areas.max(1)).max(1)
}

/// Top up geographies with fewer than `min_per_geography` middlemen.
///
/// Candidates are tried in order: middlemen active in the geography last
/// year, middlemen active anywhere in the same producing area, then any
/// middleman. Within each group the most competitive goes first. Returns
/// the number of edges added.
pub fn backfill_coverage(
    assignment: &mut GeographyAssignment,
    geographies: &[Geography],
    middlemen: &[Middleman],
    previous: &BTreeMap<GeographyId, BTreeSet<MiddlemanId>>,
    min_per_geography: usize,
) -> usize {
    let mut ranked: Vec<&Middleman> = middlemen.iter().collect();
    ranked.sort_by(|a, b| {
        b.competitiveness
            .total_cmp(&a.competitiveness)
            .then_with(|| a.id.cmp(&b.id))
    });
    let area_of: BTreeMap<&GeographyId, &str> = geographies
        .iter()
        .map(|g| (&g.id, g.producing_area.as_str()))
        .collect();

    let mut added = 0;
    for geo in geographies {
        let mut current: BTreeSet<MiddlemanId> = assignment
            .iter()
            .filter(|(_, geos)| geos.contains(&geo.id))
            .map(|(m, _)| m.clone())
            .collect();
        if current.len() >= min_per_geography {
            continue;
        }

        let empty = BTreeSet::new();
        let prior = previous.get(&geo.id).unwrap_or(&empty);
        let in_area: BTreeSet<MiddlemanId> = assignment
            .iter()
            .filter(|(_, geos)| {
                geos.iter()
                    .any(|g| area_of.get(g).copied() == Some(geo.producing_area.as_str()))
            })
            .map(|(m, _)| m.clone())
            .collect();

        let tiers: [&dyn Fn(&MiddlemanId) -> bool; 3] = [
            &|m: &MiddlemanId| prior.contains(m),
            &|m: &MiddlemanId| in_area.contains(m),
            &|_: &MiddlemanId| true,
        ];
        'tiers: for tier in tiers {
            for m in &ranked {
                if current.len() >= min_per_geography {
                    break 'tiers;
                }
                if current.contains(&m.id) || !tier(&m.id) {
                    continue;
                }
                assignment
                    .entry(m.id.clone())
                    .or_default()
                    .insert(geo.id.clone());
                current.insert(m.id.clone());
                added += 1;
            }
        }
    }
    added
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::SmallRng;
    use traceflow_types::PrimaryCrop;

    use super::*;

    fn geography(id: &str, area: &str, farmers: u32) -> Geography {
        Geography {
            id: GeographyId::new(id),
            name: id.to_owned(),
            country_id: CountryId::new("BR"),
            producing_area: area.to_owned(),
            num_farmers: farmers,
            total_production_kg: u64::from(farmers) * 100,
            primary_crop: PrimaryCrop::Arabica,
        }
    }

    fn middlemen(n: usize) -> Vec<Middleman> {
        let country = CountryId::new("BR");
        (1..=n)
            .map(|i| Middleman {
                id: MiddlemanId::sequential(&country, i),
                country_id: country.clone(),
                competitiveness: i as f64,
                loyalty: 0.5,
            })
            .collect()
    }

    fn coverage_counts(assignment: &GeographyAssignment) -> BTreeMap<GeographyId, usize> {
        let mut counts = BTreeMap::new();
        for geos in assignment.values() {
            for g in geos {
                *counts.entry(g.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    #[test]
    fn every_geography_reaches_minimum_coverage() {
        let geos = vec![
            geography("G1", "North", 500),
            geography("G2", "North", 10),
            geography("G3", "North", 10),
            geography("G4", "South", 300),
            geography("G5", "South", 1),
        ];
        let mut rng = SmallRng::seed_from_u64(42);
        let params = CoverageParams {
            min_per_geography: 2,
            min_per_area: 4,
        };
        let assignment =
            assign_geographies(&CountryId::new("BR"), &geos, &middlemen(12), params, &mut rng)
                .unwrap();
        let counts = coverage_counts(&assignment);
        for geo in &geos {
            assert!(counts.get(&geo.id).copied().unwrap_or(0) >= 2, "{}", geo.id);
        }
        // Every middleman covers at least one geography.
        assert_eq!(assignment.len(), 12);
        assert!(assignment.values().all(|g| !g.is_empty()));
    }

    #[test]
    fn too_few_middlemen_for_areas_is_a_config_error() {
        let geos = vec![geography("G1", "North", 10), geography("G2", "South", 10)];
        let mut rng = SmallRng::seed_from_u64(1);
        let params = CoverageParams {
            min_per_geography: 2,
            min_per_area: 4,
        };
        let result =
            assign_geographies(&CountryId::new("BR"), &geos, &middlemen(1), params, &mut rng);
        assert!(matches!(result, Err(CoreError::Config { .. })));
    }

    #[test]
    fn per_area_minimum_shrinks_to_the_middlemen_available() {
        assert_eq!(seats_per_area(4, 3, 1), 3);
        assert_eq!(seats_per_area(4, 7, 2), 3);
        assert_eq!(seats_per_area(4, 40, 2), 4);
        assert_eq!(seats_per_area(0, 5, 1), 1);

        // Three middlemen, one area, default minimum of four.
        let geos = vec![geography("G1", "North", 10), geography("G2", "North", 5)];
        let mut rng = SmallRng::seed_from_u64(3);
        let params = CoverageParams {
            min_per_geography: 2,
            min_per_area: 4,
        };
        let assignment =
            assign_geographies(&CountryId::new("BR"), &geos, &middlemen(3), params, &mut rng)
                .unwrap();
        assert_eq!(assignment.len(), 3);
        let counts = coverage_counts(&assignment);
        assert!(geos.iter().all(|g| counts.get(&g.id).copied().unwrap_or(0) >= 2));
    }

    #[test]
    fn backfill_prefers_previous_then_area_then_anyone() {
        let geos = vec![
            geography("G1", "North", 10),
            geography("G2", "North", 10),
            geography("G3", "South", 10),
        ];
        let ms = middlemen(4);
        let id = |i: usize| ms.get(i).map(|m| m.id.clone()).unwrap();

        let mut assignment = GeographyAssignment::new();
        // M1 in North (G2), M2 in South (G3). G1 is uncovered.
        assignment.entry(id(0)).or_default().insert(GeographyId::new("G2"));
        assignment.entry(id(1)).or_default().insert(GeographyId::new("G3"));
        // M3 served G1 last year.
        let mut previous = BTreeMap::new();
        previous.insert(GeographyId::new("G1"), BTreeSet::from([id(2)]));

        backfill_coverage(&mut assignment, &geos, &ms, &previous, 2);
        let g1: BTreeSet<MiddlemanId> = assignment
            .iter()
            .filter(|(_, g)| g.contains(&GeographyId::new("G1")))
            .map(|(m, _)| m.clone())
            .collect();
        // Previous operator M3 first, then the North middleman M1.
        assert_eq!(g1, BTreeSet::from([id(2), id(0)]));
    }

    #[test]
    fn backfill_falls_back_to_most_competitive_anywhere() {
        let geos = vec![geography("G1", "North", 10)];
        let ms = middlemen(3);
        let mut assignment = GeographyAssignment::new();
        let added = backfill_coverage(&mut assignment, &geos, &ms, &BTreeMap::new(), 2);
        assert_eq!(added, 2);
        // Competitiveness grows with index, so M3 and M2 are chosen.
        assert!(assignment.contains_key(&MiddlemanId::new("BR_M000003")));
        assert!(assignment.contains_key(&MiddlemanId::new("BR_M000002")));
    }
}
