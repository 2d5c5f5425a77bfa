//! Distribution generators for per-actor attributes.
//!
//! Farmer production is log-normal, middleman capacity is clipped
//! log-normal and exporter size is Pareto. All three are heavy-tailed so a
//! few large actors dominate volume, which is what makes traceability hard.
//!
//! The `generate_*` functions turn the sampled attributes into actor records
//! with sequential ids.

use rand::Rng;
use rand::distr::Distribution;
use rand_distr::{LogNormal, Normal, Pareto};
use traceflow_types::{Country, Exporter, ExporterId, Farmer, FarmerId, Geography, Middleman, MiddlemanId};

use crate::config::AssignmentConfig;
use crate::error::CoreError;
use crate::numeric::{apportion, normalize};

// ---------------------------------------------------------------------------
// Scalar generators
// ---------------------------------------------------------------------------

/// `rand_distr` accepts a negative log-normal sigma, so check it here.
fn lognormal(what: &'static str, mu: f64, sigma: f64) -> Result<LogNormal<f64>, CoreError> {
    if !(sigma.is_finite() && sigma > 0.0) {
        return Err(CoreError::Distribution {
            what,
            reason: format!("sigma must be positive and finite, got {sigma}"),
        });
    }
    LogNormal::new(mu, sigma).map_err(|e| CoreError::Distribution {
        what,
        reason: e.to_string(),
    })
}

/// Sample integer farmer production that sums exactly to `total_kg`.
///
/// Values are drawn from `LogNormal(ln(total / n) - adjustment, sigma)`,
/// clipped to `[min_farmer_production_kg, total * max_farmer_production_pct]`
/// and rescaled onto `total_kg`.
pub fn farmer_production(
    n: usize,
    total_kg: u64,
    sigma: f64,
    params: &AssignmentConfig,
    rng: &mut impl Rng,
) -> Result<Vec<u64>, CoreError> {
    if n == 0 {
        return Ok(Vec::new());
    }
    if total_kg == 0 {
        return Err(CoreError::Distribution {
            what: "farmer production",
            reason: format!("total production is zero for {n} farmers"),
        });
    }
    let total = total_kg as f64;
    let mu = (total / n as f64).ln() - params.lognormal_adjustment;
    let dist = lognormal("farmer production", mu, sigma)?;
    let lo = params.min_farmer_production_kg;
    let hi = (total * params.max_farmer_production_pct).max(lo);
    let raw: Vec<f64> = (0..n).map(|_| dist.sample(rng).clamp(lo, hi)).collect();
    Ok(apportion(total_kg, &raw))
}

/// Sample middleman capacity weights, normalized to sum to 1.
pub fn middleman_competitiveness(
    n: usize,
    total_kg: u64,
    sigma: f64,
    params: &AssignmentConfig,
    rng: &mut impl Rng,
) -> Result<Vec<f64>, CoreError> {
    if n == 0 {
        return Ok(Vec::new());
    }
    if total_kg == 0 {
        return Err(CoreError::Distribution {
            what: "middleman capacity",
            reason: "total production is zero".to_owned(),
        });
    }
    let total = total_kg as f64;
    let dist = lognormal("middleman capacity", (total / n as f64).ln(), sigma)?;
    let lo = params
        .min_middleman_capacity_floor_kg
        .max(total * params.min_middleman_capacity_pct);
    let stretch = rng.random_range(10.0..20.0);
    let hi = (total * params.max_middleman_capacity_pct * stretch).max(lo);
    let raw: Vec<f64> = (0..n).map(|_| dist.sample(rng).clamp(lo, hi)).collect();
    Ok(normalize(&raw))
}

/// Sample exporter size weights from `Pareto(scale = 1, alpha)`, normalized.
pub fn exporter_competitiveness(
    n: usize,
    alpha: f64,
    rng: &mut impl Rng,
) -> Result<Vec<f64>, CoreError> {
    if n == 0 {
        return Ok(Vec::new());
    }
    let dist = Pareto::new(1.0, alpha).map_err(|e| CoreError::Distribution {
        what: "exporter size",
        reason: e.to_string(),
    })?;
    let raw: Vec<f64> = (0..n).map(|_| dist.sample(rng)).collect();
    Ok(normalize(&raw))
}

/// Farmer loyalty: `Normal(0.5, 0.25)` clipped to `[0, 1]`.
pub fn farmer_loyalty(n: usize, rng: &mut impl Rng) -> Result<Vec<f64>, CoreError> {
    let dist = Normal::<f64>::new(0.5, 0.25).map_err(|e| CoreError::Distribution {
        what: "farmer loyalty",
        reason: e.to_string(),
    })?;
    Ok((0..n).map(|_| dist.sample(rng).clamp(0.0, 1.0)).collect())
}

/// `n` independent `U(0, 1)` draws.
pub fn unit_uniform(n: usize, rng: &mut impl Rng) -> Vec<f64> {
    (0..n).map(|_| rng.random::<f64>()).collect()
}

/// Plot counts from each farmer's production percentile.
///
/// The bottom fifth get one plot and the top fifth three. In between, each
/// of the two extra plots is a Bernoulli draw whose probability rises
/// linearly with the percentile.
pub fn plot_counts(production: &[u64], rng: &mut impl Rng) -> Vec<u8> {
    let n = production.len();
    let mut order: Vec<(u64, usize)> = production.iter().copied().zip(0..).collect();
    order.sort_unstable();
    let mut percentile = vec![0.0; n];
    for (rank, (_, i)) in order.into_iter().enumerate() {
        if let Some(p) = percentile.get_mut(i) {
            *p = (rank as f64 + 0.5) / n as f64;
        }
    }
    percentile
        .into_iter()
        .map(|p| {
            if p <= 0.2 {
                1
            } else if p >= 0.8 {
                3
            } else {
                let q = (p - 0.2) / 0.6;
                1 + u8::from(rng.random::<f64>() < q) + u8::from(rng.random::<f64>() < q)
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Actor generation
// ---------------------------------------------------------------------------

/// Generate the farmers of one geography.
pub fn generate_farmers(
    country: &Country,
    geography: &Geography,
    params: &AssignmentConfig,
    rng: &mut impl Rng,
) -> Result<Vec<Farmer>, CoreError> {
    let n = geography.num_farmers as usize;
    let production = farmer_production(
        n,
        geography.total_production_kg,
        country.farmer_production_sigma,
        params,
        rng,
    )?;
    let loyalty = farmer_loyalty(n, rng)?;
    let plots = plot_counts(&production, rng);

    Ok(production
        .into_iter()
        .zip(loyalty)
        .zip(plots)
        .enumerate()
        .map(|(i, ((production_kg, loyalty), num_plots))| Farmer {
            id: FarmerId::sequential(&geography.id, i + 1),
            country_id: country.id.clone(),
            geography_id: geography.id.clone(),
            num_plots,
            production_kg,
            loyalty,
        })
        .collect())
}

/// Generate the middlemen of a country.
pub fn generate_middlemen(
    country: &Country,
    params: &AssignmentConfig,
    rng: &mut impl Rng,
) -> Result<Vec<Middleman>, CoreError> {
    let n = country.num_middlemen as usize;
    let competitiveness = middleman_competitiveness(
        n,
        country.total_production_kg,
        country.middleman_capacity_sigma,
        params,
        rng,
    )?;
    let loyalty = unit_uniform(n, rng);
    Ok(competitiveness
        .into_iter()
        .zip(loyalty)
        .enumerate()
        .map(|(i, (competitiveness, loyalty))| Middleman {
            id: MiddlemanId::sequential(&country.id, i + 1),
            country_id: country.id.clone(),
            competitiveness,
            loyalty,
        })
        .collect())
}

/// Generate the exporters of a country.
pub fn generate_exporters(country: &Country, rng: &mut impl Rng) -> Result<Vec<Exporter>, CoreError> {
    let n = country.num_exporters as usize;
    let competitiveness = exporter_competitiveness(n, country.exporter_pareto_alpha, rng)?;
    let eu_preference = unit_uniform(n, rng);
    let loyalty = unit_uniform(n, rng);
    Ok(competitiveness
        .into_iter()
        .zip(eu_preference)
        .zip(loyalty)
        .enumerate()
        .map(|(i, ((competitiveness, eu_preference), loyalty))| Exporter {
            id: ExporterId::sequential(&country.id, i + 1),
            country_id: country.id.clone(),
            competitiveness,
            eu_preference,
            loyalty,
        })
        .collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;

    #[test]
    fn production_sums_exactly_and_respects_count() {
        let mut rng = SmallRng::seed_from_u64(42);
        let params = AssignmentConfig::default();
        let production = farmer_production(5000, 12_345_678, 0.8, &params, &mut rng).unwrap();
        assert_eq!(production.len(), 5000);
        assert_eq!(production.iter().sum::<u64>(), 12_345_678);
    }

    #[test]
    fn production_is_heavy_tailed() {
        let mut rng = SmallRng::seed_from_u64(42);
        let params = AssignmentConfig {
            max_farmer_production_pct: 1.0,
            ..AssignmentConfig::default()
        };
        let mut production = farmer_production(2000, 2_000_000, 1.2, &params, &mut rng).unwrap();
        production.sort_unstable();
        let median = production.get(1000).copied().unwrap();
        let max = production.last().copied().unwrap();
        assert!(max > median * 5, "max {max} median {median}");
    }

    #[test]
    fn empty_tier_yields_empty_vector() {
        let mut rng = SmallRng::seed_from_u64(1);
        let params = AssignmentConfig::default();
        assert!(farmer_production(0, 100, 0.8, &params, &mut rng).unwrap().is_empty());
        assert!(exporter_competitiveness(0, 1.16, &mut rng).unwrap().is_empty());
    }

    #[test]
    fn zero_total_is_rejected() {
        let mut rng = SmallRng::seed_from_u64(1);
        let params = AssignmentConfig::default();
        assert!(matches!(
            farmer_production(10, 0, 0.8, &params, &mut rng),
            Err(CoreError::Distribution { .. })
        ));
    }

    #[test]
    fn invalid_shape_is_rejected() {
        let mut rng = SmallRng::seed_from_u64(1);
        assert!(exporter_competitiveness(3, -1.0, &mut rng).is_err());
        let params = AssignmentConfig::default();
        assert!(farmer_production(3, 100, -0.5, &params, &mut rng).is_err());
        assert!(farmer_production(3, 100, 0.0, &params, &mut rng).is_err());
        assert!(farmer_production(3, 100, f64::NAN, &params, &mut rng).is_err());
        assert!(matches!(
            middleman_competitiveness(3, 100, -0.5, &params, &mut rng),
            Err(CoreError::Distribution { what: "middleman capacity", .. })
        ));
    }

    #[test]
    fn weights_are_normalized() {
        let mut rng = SmallRng::seed_from_u64(9);
        let params = AssignmentConfig::default();
        let m = middleman_competitiveness(100, 600_000_000, 0.5, &params, &mut rng).unwrap();
        let e = exporter_competitiveness(40, 1.16, &mut rng).unwrap();
        assert!((m.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!((e.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(m.iter().chain(e.iter()).all(|w| *w > 0.0));
    }

    #[test]
    fn loyalty_stays_in_unit_interval() {
        let mut rng = SmallRng::seed_from_u64(3);
        let loyalty = farmer_loyalty(10_000, &mut rng).unwrap();
        assert!(loyalty.iter().all(|l| (0.0..=1.0).contains(l)));
    }

    #[test]
    fn plots_follow_production_percentile() {
        let mut rng = SmallRng::seed_from_u64(3);
        let production: Vec<u64> = (1..=100).collect();
        let plots = plot_counts(&production, &mut rng);
        assert_eq!(plots.first().copied(), Some(1));
        assert_eq!(plots.last().copied(), Some(3));
        assert!(plots.iter().all(|p| (1..=3).contains(p)));
    }
}
