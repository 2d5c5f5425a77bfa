//! Shared numeric utilities: integer apportioning, symmetric Dirichlet
//! shares, multinomial draws and weighted sampling.
//!
//! Volumes are integer kilograms throughout the engine. Every split goes
//! through [`apportion`], which floors each share and hands the rounding
//! residual to the largest share, so split volumes always sum exactly to
//! their input.

use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand_distr::{Binomial, Exp1};

/// Scale non-negative values to sum to 1. All-zero input gives equal shares.
pub fn normalize(values: &[f64]) -> Vec<f64> {
    let total: f64 = values.iter().copied().filter(|v| usable(*v)).sum();
    if total <= 0.0 {
        if values.is_empty() {
            return Vec::new();
        }
        let even = 1.0 / values.len() as f64;
        return vec![even; values.len()];
    }
    values
        .iter()
        .map(|v| if usable(*v) { *v / total } else { 0.0 })
        .collect()
}

/// Index of the first maximum, ignoring NaN.
pub fn argmax(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, v) in values.iter().copied().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Split `total` into integer parts proportional to `shares`.
///
/// Parts sum to `total` exactly; the residual goes to the largest share.
pub fn apportion(total: u64, shares: &[f64]) -> Vec<u64> {
    if shares.is_empty() {
        return Vec::new();
    }
    let weights = normalize(shares);
    let total_f = total as f64;
    let mut parts: Vec<u64> = weights.iter().map(|w| (w * total_f).floor() as u64).collect();
    let assigned: u64 = parts.iter().sum();

    if assigned <= total {
        let largest = argmax(&weights).unwrap_or(0);
        if let Some(part) = parts.get_mut(largest) {
            *part += total - assigned;
        }
    } else {
        // Float error can overshoot by a few kg on very large totals.
        let mut excess = assigned - total;
        let mut order: Vec<usize> = (0..parts.len()).collect();
        order.sort_by(|a, b| parts.get(*b).cmp(&parts.get(*a)));
        for i in order {
            if excess == 0 {
                break;
            }
            if let Some(part) = parts.get_mut(i) {
                let take = excess.min(*part);
                *part -= take;
                excess -= take;
            }
        }
    }
    parts
}

/// Draw shares from a symmetric Dirichlet(1, ..., 1).
pub fn dirichlet(k: usize, rng: &mut impl Rng) -> Vec<f64> {
    let draws: Vec<f64> = (0..k).map(|_| Exp1.sample(rng)).collect();
    normalize(&draws)
}

/// Split `amount` over `k` edges with a per-edge floor.
///
/// When `amount >= k * floor` each edge gets the floor and the rest is
/// divided by Dirichlet shares. Otherwise the floor is dropped and the
/// amount is divided evenly.
pub fn split_with_floor(amount: u64, k: usize, floor: u64, rng: &mut impl Rng) -> Vec<u64> {
    match k {
        0 => Vec::new(),
        1 => vec![amount],
        _ => {
            let reserved = floor.saturating_mul(k as u64);
            if amount >= reserved {
                let shares = dirichlet(k, rng);
                apportion(amount - reserved, &shares)
                    .into_iter()
                    .map(|part| part + floor)
                    .collect()
            } else {
                apportion(amount, &vec![1.0; k])
            }
        }
    }
}

/// Multinomial draw of `n` trials over `weights` via sequential binomials.
///
/// Zero-weight categories receive nothing. The counts sum to `n` whenever
/// at least one weight is positive.
pub fn multinomial(n: u64, weights: &[f64], rng: &mut impl Rng) -> Vec<u64> {
    let mut counts = vec![0_u64; weights.len()];
    let last = weights.iter().rposition(|w| usable(*w) && *w > 0.0);
    let Some(last) = last else {
        return counts;
    };
    let mut remaining = n;
    let mut mass: f64 = weights.iter().copied().filter(|w| usable(*w)).sum();

    for (i, (count, w)) in counts.iter_mut().zip(weights.iter().copied()).enumerate() {
        if remaining == 0 {
            break;
        }
        if !usable(w) || w <= 0.0 {
            continue;
        }
        if i == last {
            *count = remaining;
            break;
        }
        let p = (w / mass).clamp(0.0, 1.0);
        let draw = Binomial::new(remaining, p).map_or(0, |b| b.sample(rng));
        *count = draw;
        remaining -= draw;
        mass -= w;
    }
    counts
}

/// Draw one index with probability proportional to `weights`.
pub fn weighted_pick(weights: &[f64], rng: &mut impl Rng) -> Option<usize> {
    WeightedIndex::new(weights.iter().copied())
        .ok()
        .map(|dist| dist.sample(rng))
}

/// Draw up to `count` distinct indices, each step proportional to the
/// remaining weights (Efraimidis-Spirakis keys).
pub fn weighted_sample_without_replacement(
    weights: &[f64],
    count: usize,
    rng: &mut impl Rng,
) -> Vec<usize> {
    let mut keyed: Vec<(f64, usize)> = weights
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, w)| usable(*w) && *w > 0.0)
        .map(|(i, w)| {
            let u: f64 = rng.random();
            (u.ln() / w, i)
        })
        .collect();
    keyed.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
    keyed.into_iter().take(count).map(|(_, i)| i).collect()
}

const fn usable(v: f64) -> bool {
    v.is_finite() && v >= 0.0
}
