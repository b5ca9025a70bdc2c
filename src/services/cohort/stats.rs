//! Confidence statistics for cohort comparisons: Wald intervals, pooled-z
//! p-values, Cohen's h / d effect sizes, and a seeded parametric bootstrap.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Beta, Distribution, Normal};
use sha2::{Digest, Sha256};

use crate::models::cohort::CohortParams;

pub const Z_CRITICAL: f64 = 1.959_963_984_540_054;
pub const ALPHA: f64 = 0.05;
pub const BOOTSTRAP_ITERATIONS: u32 = 800;

/// Standard normal CDF via erf.
fn normal_cdf(value: f64) -> f64 {
    0.5 * (1.0 + erf(value / std::f64::consts::SQRT_2))
}

/// Abramowitz & Stegun 7.1.26 rational approximation; |error| < 1.5e-7,
/// plenty for two-sided p-values rounded to six decimals.
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let y = 1.0
        - (((((1.061_405_429 * t - 1.453_152_027) * t) + 1.421_413_741) * t - 0.284_496_736) * t
            + 0.254_829_592)
            * t
            * (-x * x).exp();
    sign * y
}

pub fn two_sided_p_from_z(value: f64) -> f64 {
    (2.0 * (1.0 - normal_cdf(value.abs()))).clamp(0.0, 1.0)
}

/// Linear-interpolated percentile over a sorted slice.
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if q <= 0.0 {
        return sorted[0];
    }
    if q >= 1.0 {
        return sorted[sorted.len() - 1];
    }
    let pos = (sorted.len() - 1) as f64 * q;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let weight = pos - lo as f64;
    sorted[lo] * (1.0 - weight) + sorted[hi] * weight
}

/// Cohen's h for two proportions.
pub fn cohen_h(p1: f64, p2: f64) -> f64 {
    let p1 = p1.clamp(0.0, 1.0);
    let p2 = p2.clamp(0.0, 1.0);
    2.0 * (p2.sqrt().asin() - p1.sqrt().asin())
}

/// Cohen's d for two means with pooled standard deviation.
pub fn cohen_d(mean1: f64, mean2: f64, sd1: f64, sd2: f64, n1: f64, n2: f64) -> f64 {
    if n1 <= 1.0 || n2 <= 1.0 {
        return 0.0;
    }
    let pooled_var =
        (((n1 - 1.0) * sd1.powi(2)) + ((n2 - 1.0) * sd2.powi(2))) / (n1 + n2 - 2.0);
    let pooled_sd = pooled_var.max(0.0).sqrt();
    if pooled_sd <= 0.0 {
        return 0.0;
    }
    (mean2 - mean1) / pooled_sd
}

/// Deterministic RNG seed: the first 16 hex chars of the SHA-256 over both
/// parameter JSON forms.
pub fn bootstrap_seed(baseline: &CohortParams, simulated: &CohortParams) -> u64 {
    let seed_input = format!(
        "{}::{}",
        serde_json::to_string(baseline).unwrap_or_default(),
        serde_json::to_string(simulated).unwrap_or_default()
    );
    let digest = Sha256::digest(seed_input.as_bytes());
    let hex = format!("{:x}", digest);
    u64::from_str_radix(&hex[..16], 16).unwrap_or(0)
}

pub fn seeded_rng(baseline: &CohortParams, simulated: &CohortParams) -> StdRng {
    StdRng::seed_from_u64(bootstrap_seed(baseline, simulated))
}

/// Parametric Beta bootstrap for a proportion difference. Returns the 2.5/97.5
/// percentile interval of (p2 - p1) in percent.
pub fn bootstrap_prop_diff(
    rng: &mut StdRng,
    success_1: f64,
    n_1: f64,
    success_2: f64,
    n_2: f64,
    iterations: u32,
) -> (f64, f64) {
    if n_1 <= 0.0 || n_2 <= 0.0 {
        return (0.0, 0.0);
    }
    let a1 = (success_1 + 1.0).max(1.0);
    let b1 = ((n_1 - success_1) + 1.0).max(1.0);
    let a2 = (success_2 + 1.0).max(1.0);
    let b2 = ((n_2 - success_2) + 1.0).max(1.0);
    let beta1 = Beta::new(a1, b1);
    let beta2 = Beta::new(a2, b2);
    let (Ok(beta1), Ok(beta2)) = (beta1, beta2) else {
        return (0.0, 0.0);
    };
    let mut diffs: Vec<f64> = (0..iterations)
        .map(|_| {
            let p1 = beta1.sample(rng);
            let p2 = beta2.sample(rng);
            (p2 - p1) * 100.0
        })
        .collect();
    diffs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    (percentile(&diffs, 0.025), percentile(&diffs, 0.975))
}

/// Gaussian-noise bootstrap for a mean difference over the standard errors.
pub fn bootstrap_mean_diff(
    rng: &mut StdRng,
    mean_1: f64,
    sd_1: f64,
    n_1: f64,
    mean_2: f64,
    sd_2: f64,
    n_2: f64,
    iterations: u32,
) -> (f64, f64) {
    if n_1 <= 0.0 || n_2 <= 0.0 {
        return (0.0, 0.0);
    }
    let se1 = sd_1 / n_1.max(1.0).sqrt();
    let se2 = sd_2 / n_2.max(1.0).sqrt();
    let mut diffs: Vec<f64> = (0..iterations)
        .map(|_| {
            let m1 = sample_gauss(rng, mean_1, se1);
            let m2 = sample_gauss(rng, mean_2, se2);
            m2 - m1
        })
        .collect();
    diffs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    (percentile(&diffs, 0.025), percentile(&diffs, 0.975))
}

fn sample_gauss(rng: &mut StdRng, mean: f64, sd: f64) -> f64 {
    if sd <= 0.0 {
        return mean;
    }
    match Normal::new(mean, sd) {
        Ok(normal) => normal.sample(rng),
        Err(_) => mean,
    }
}

/// Round half-away-from-zero to `digits` decimals, matching the payload
/// rounding used across the cohort engine.
pub fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p_value_for_zero_z_is_one() {
        assert!((two_sided_p_from_z(0.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn p_value_for_large_z_is_tiny() {
        assert!(two_sided_p_from_z(5.0) < 1e-5);
    }

    #[test]
    fn percentile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert!((percentile(&values, 0.5) - 2.5).abs() < 1e-9);
        assert!((percentile(&values, 0.0) - 1.0).abs() < 1e-9);
        assert!((percentile(&values, 1.0) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn cohen_h_is_zero_for_equal_proportions() {
        assert!(cohen_h(0.3, 0.3).abs() < 1e-12);
        assert!(cohen_h(0.1, 0.5) > 0.0);
    }

    #[test]
    fn cohen_d_uses_pooled_sd() {
        let d = cohen_d(5.0, 7.0, 2.0, 2.0, 100.0, 100.0);
        assert!((d - 1.0).abs() < 1e-9);
    }

    #[test]
    fn bootstrap_is_reproducible_for_same_params() {
        let baseline = CohortParams::default();
        let simulated = CohortParams { age_threshold: 70, ..Default::default() };

        let mut rng_a = seeded_rng(&baseline, &simulated);
        let mut rng_b = seeded_rng(&baseline, &simulated);
        let a = bootstrap_prop_diff(&mut rng_a, 50.0, 500.0, 70.0, 450.0, BOOTSTRAP_ITERATIONS);
        let b = bootstrap_prop_diff(&mut rng_b, 50.0, 500.0, 70.0, 450.0, BOOTSTRAP_ITERATIONS);
        assert_eq!(a, b);
    }

    #[test]
    fn different_params_change_the_seed() {
        let baseline = CohortParams::default();
        let other = CohortParams { readmit_days: 60, ..Default::default() };
        assert_ne!(bootstrap_seed(&baseline, &baseline), bootstrap_seed(&baseline, &other));
    }

    #[test]
    fn bootstrap_interval_brackets_the_true_difference() {
        let baseline = CohortParams::default();
        let mut rng = seeded_rng(&baseline, &baseline);
        // ~10% vs ~20%: the interval should straddle +10 points.
        let (lo, hi) =
            bootstrap_prop_diff(&mut rng, 100.0, 1000.0, 200.0, 1000.0, BOOTSTRAP_ITERATIONS);
        assert!(lo < 10.0 && 10.0 < hi, "interval [{}, {}] misses +10", lo, hi);
    }
}
