//! Sampling primitives and rolling summaries shared by the bandit engine and
//! the anomaly/drift observers.
//!
//! Samplers take the RNG by reference so callers decide between a seeded
//! `StdRng` (tests, replays) and `thread_rng()` (hot path).

use std::collections::VecDeque;
use std::f64::consts::PI;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Standard normal draw via Box–Muller, scaled to `mean`/`std_dev`.
pub fn sample_normal<R: Rng + ?Sized>(rng: &mut R, mean: f64, std_dev: f64) -> f64 {
    // 1 - U keeps u1 in (0, 1] so ln(u1) stays finite.
    let u1 = 1.0 - rng.gen::<f64>();
    let u2 = rng.gen::<f64>();
    let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
    z0 * std_dev + mean
}

/// Gamma(shape, scale) draw using Marsaglia–Tsang for `shape >= 1` and the
/// `Gamma(shape + 1) * U^(1/shape)` boost below one.
///
/// Non-positive or non-finite shapes yield `0.0`.
pub fn sample_gamma<R: Rng + ?Sized>(rng: &mut R, shape: f64, scale: f64) -> f64 {
    if !shape.is_finite() || shape <= 0.0 {
        return 0.0;
    }

    if shape < 1.0 {
        let u = 1.0 - rng.gen::<f64>();
        return sample_gamma(rng, shape + 1.0, scale) * u.powf(1.0 / shape);
    }

    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();

    loop {
        let (x, v) = loop {
            let x = sample_normal(rng, 0.0, 1.0);
            let v = 1.0 + c * x;
            if v > 0.0 {
                break (x, v);
            }
        };

        let v = v * v * v;
        let u = rng.gen::<f64>();

        if u < 1.0 - 0.0331 * x * x * x * x {
            return d * v * scale;
        }
        if u > 0.0 && u.ln() < 0.5 * x * x + d * (1.0 - v + v.ln()) {
            return d * v * scale;
        }
    }
}

/// Beta(alpha, beta) draw from two independent unit-scale Gamma draws.
pub fn sample_beta<R: Rng + ?Sized>(rng: &mut R, alpha: f64, beta: f64) -> f64 {
    let g1 = sample_gamma(rng, alpha, 1.0);
    let g2 = sample_gamma(rng, beta, 1.0);
    let total = g1 + g2;
    if total <= 0.0 || !total.is_finite() {
        return 0.5;
    }
    g1 / total
}

pub fn beta_mean(alpha: f64, beta: f64) -> f64 {
    alpha / (alpha + beta)
}

pub fn beta_variance(alpha: f64, beta: f64) -> f64 {
    let sum = alpha + beta;
    (alpha * beta) / (sum * sum * (sum + 1.0))
}

/// Online count/mean/M2 accumulator (Welford).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub count: usize,
    pub mean: f64,
    pub m2: f64,
}

impl Summary {
    pub fn from_values(values: &[f64]) -> Self {
        let mut summary = Self::default();
        for value in values {
            summary.push(*value);
        }
        summary
    }

    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    /// Sample variance, `n - 1` corrected. Zero below two observations.
    pub fn variance(&self) -> f64 {
        if self.count > 1 {
            self.m2 / (self.count - 1) as f64
        } else {
            0.0
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

/// Capped window of raw observations. Statistics are recomputed over the
/// whole window on each read, so they always reflect exactly what is held.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RollingWindow {
    values: VecDeque<f64>,
    capacity: usize,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        Self { values: VecDeque::with_capacity(capacity.min(1024)), capacity: capacity.max(1) }
    }

    pub fn push(&mut self, value: f64) {
        self.values.push_back(value);
        while self.values.len() > self.capacity {
            self.values.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    pub fn sample_variance(&self) -> f64 {
        let n = self.values.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.mean();
        self.values.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / (n - 1) as f64
    }

    pub fn std_dev(&self) -> f64 {
        self.sample_variance().sqrt()
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::{
        beta_mean, beta_variance, sample_beta, sample_gamma, sample_normal, RollingWindow, Summary,
    };

    const DRAWS: usize = 20_000;

    fn mean_of(mut draw: impl FnMut() -> f64) -> f64 {
        (0..DRAWS).map(|_| draw()).sum::<f64>() / DRAWS as f64
    }

    #[test]
    fn normal_draws_center_on_requested_mean() {
        let mut rng = StdRng::seed_from_u64(7);
        let mean = mean_of(|| sample_normal(&mut rng, 5.0, 2.0));
        assert!((mean - 5.0).abs() < 0.1, "normal mean drifted: {mean}");
    }

    #[test]
    fn gamma_mean_matches_shape_times_scale() {
        let mut rng = StdRng::seed_from_u64(11);
        let mean = mean_of(|| sample_gamma(&mut rng, 3.0, 2.0));
        assert!((mean - 6.0).abs() < 0.2, "gamma mean drifted: {mean}");
    }

    #[test]
    fn gamma_below_unit_shape_uses_boost() {
        let mut rng = StdRng::seed_from_u64(13);
        let mean = mean_of(|| sample_gamma(&mut rng, 0.5, 1.0));
        assert!((mean - 0.5).abs() < 0.05, "boosted gamma mean drifted: {mean}");
    }

    #[test]
    fn gamma_rejects_degenerate_shape() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(sample_gamma(&mut rng, 0.0, 1.0), 0.0);
        assert_eq!(sample_gamma(&mut rng, f64::NAN, 1.0), 0.0);
    }

    #[test]
    fn beta_draws_converge_to_posterior_mean() {
        let mut rng = StdRng::seed_from_u64(42);
        for (alpha, beta) in [(1.0, 1.0), (3.0, 1.0), (1.0, 3.0), (12.5, 4.0)] {
            let mean = mean_of(|| sample_beta(&mut rng, alpha, beta));
            let expected = beta_mean(alpha, beta);
            assert!(
                (mean - expected).abs() < 0.01,
                "Beta({alpha}, {beta}) mean {mean} vs {expected}"
            );
        }
    }

    #[test]
    fn beta_draws_stay_in_unit_interval() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..1_000 {
            let sample = sample_beta(&mut rng, 1.0, 1.0);
            assert!((0.0..=1.0).contains(&sample));
        }
    }

    #[test]
    fn beta_variance_of_uniform_prior() {
        assert!((beta_variance(1.0, 1.0) - 1.0 / 12.0).abs() < 1e-12);
    }

    #[test]
    fn summary_matches_two_pass_statistics() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let summary = Summary::from_values(&values);

        assert_eq!(summary.count, 8);
        assert!((summary.mean - 5.0).abs() < 1e-12);
        assert!((summary.variance() - 32.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn summary_variance_is_zero_below_two_samples() {
        assert_eq!(Summary::default().variance(), 0.0);
        assert_eq!(Summary::from_values(&[3.0]).variance(), 0.0);
    }

    #[test]
    fn rolling_window_evicts_oldest_values() {
        let mut window = RollingWindow::new(3);
        for value in [1.0, 2.0, 3.0, 4.0] {
            window.push(value);
        }

        assert_eq!(window.len(), 3);
        assert!((window.mean() - 3.0).abs() < 1e-12);
        assert!((window.sample_variance() - 1.0).abs() < 1e-12);
    }
}
