//! Log-space sampling math: log-softmax, log-sum-exp, categorical draws and
//! resampling index schemes.
//!
//! Every routine takes the RNG explicitly so a seeded run is reproducible.

use rand::Rng;

/// Numerically stable log(sum(exp(x))). Returns -inf for an empty input or
/// when every term is -inf.
pub fn log_sum_exp(values: impl IntoIterator<Item = f64> + Clone) -> f64 {
    let max = values.clone().into_iter().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if max.is_nan() || max == f64::INFINITY {
        return max;
    }
    let sum: f64 = values.into_iter().map(|v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Log-softmax over logits (f32 in, f32 out).
pub fn log_softmax(logits: &[f32]) -> Vec<f32> {
    let lse = log_sum_exp(logits.iter().map(|&v| v as f64));
    logits.iter().map(|&v| (v as f64 - lse) as f32).collect()
}

/// Draw one entry of a normalised log-distribution given as (id, logprob) pairs.
/// Returns the id and its log-probability.
pub fn sample_from_logprobs<R: Rng + ?Sized>(dist: &[(usize, f32)], rng: &mut R) -> Option<(usize, f32)> {
    let r: f64 = rng.gen();
    let mut cum = 0.0f64;
    for &(id, lp) in dist {
        cum += (lp as f64).exp();
        if r < cum {
            return Some((id, lp));
        }
    }
    // Rounding left a sliver of mass uncovered: take the last supported entry.
    dist.iter().rev().find(|(_, lp)| lp.is_finite()).copied()
}

/// Multinomial resampling: n independent draws proportional to `weights`
/// (normalised probabilities).
pub fn multinomial_indices<R: Rng + ?Sized>(weights: &[f64], n: usize, rng: &mut R) -> Vec<usize> {
    let cdf = cumulative(weights);
    (0..n)
        .map(|_| {
            let r: f64 = rng.gen();
            search_cdf(&cdf, r)
        })
        .collect()
}

/// Systematic resampling: one uniform offset, n evenly spaced pointers.
pub fn systematic_indices<R: Rng + ?Sized>(weights: &[f64], n: usize, rng: &mut R) -> Vec<usize> {
    let cdf = cumulative(weights);
    let offset: f64 = rng.gen();
    (0..n)
        .map(|i| search_cdf(&cdf, (i as f64 + offset) / n as f64))
        .collect()
}

fn cumulative(weights: &[f64]) -> Vec<f64> {
    let mut acc = 0.0;
    weights
        .iter()
        .map(|w| {
            acc += w;
            acc
        })
        .collect()
}

/// First index whose cumulative weight exceeds `r`, skipping zero-weight entries.
fn search_cdf(cdf: &[f64], r: f64) -> usize {
    let total = cdf.last().copied().unwrap_or(0.0);
    let target = r * total;
    let idx = cdf.partition_point(|&c| c <= target);
    if idx < cdf.len() {
        return idx;
    }
    // r * total landed on the final edge; pick the last entry with mass.
    let mut prev = 0.0;
    let mut last = 0;
    for (i, &c) in cdf.iter().enumerate() {
        if c > prev {
            last = i;
        }
        prev = c;
    }
    last
}
