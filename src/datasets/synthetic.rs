use crate::error::{RcfError, Result};

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use std::f64::consts::PI;

/// Noisy sine wave with a spike every `spike_every` points.
///
/// Yields `(value, is_spike)` forever; use `take` to bound it. The same seed always
/// yields the same series.
///
/// # Example
///
/// ```
/// use light_rcf::datasets::synthetic::SyntheticSeries;
///
/// let series = SyntheticSeries::new(20, 0.1, 100, 8.0, 42).unwrap();
/// let spikes = series.take(1_000).filter(|(_, is_spike)| *is_spike).count();
/// assert_eq!(spikes, 10);
/// ```
pub struct SyntheticSeries {
    period: usize,
    spike_every: usize,
    spike_magnitude: f64,
    noise: Normal<f64>,
    rng: ChaCha8Rng,
    t: usize,
}

impl SyntheticSeries {
    /// `spike_every = 0` disables spikes.
    pub fn new(
        period: usize,
        noise_std: f64,
        spike_every: usize,
        spike_magnitude: f64,
        seed: u64,
    ) -> Result<Self> {
        if period == 0 {
            return Err(RcfError::InvalidConfiguration(
                "period must be positive".to_string(),
            ));
        }
        let noise = Normal::new(0.0, noise_std)
            .map_err(|e| RcfError::InvalidConfiguration(format!("noise: {e}")))?;
        Ok(SyntheticSeries {
            period,
            spike_every,
            spike_magnitude,
            noise,
            rng: ChaCha8Rng::seed_from_u64(seed),
            t: 0,
        })
    }
}

impl Iterator for SyntheticSeries {
    type Item = (f64, bool);

    fn next(&mut self) -> Option<Self::Item> {
        let phase = 2.0 * PI * (self.t % self.period) as f64 / self.period as f64;
        let mut value = phase.sin() + self.noise.sample(&mut self.rng);
        let is_spike = self.spike_every > 0 && self.t % self.spike_every == self.spike_every - 1;
        if is_spike {
            value += self.spike_magnitude;
        }
        self.t += 1;
        Some((value, is_spike))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_series() {
        let a: Vec<f64> = SyntheticSeries::new(10, 0.2, 0, 0.0, 3)
            .unwrap()
            .take(50)
            .map(|(v, _)| v)
            .collect();
        let b: Vec<f64> = SyntheticSeries::new(10, 0.2, 0, 0.0, 3)
            .unwrap()
            .take(50)
            .map(|(v, _)| v)
            .collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_spikes_are_labelled() {
        let series = SyntheticSeries::new(10, 0.0, 5, 100.0, 0).unwrap();
        for (t, (value, is_spike)) in series.take(20).enumerate() {
            assert_eq!(is_spike, t % 5 == 4);
            assert_eq!(is_spike, value > 50.0);
        }
    }

    #[test]
    fn test_rejects_bad_parameters() {
        assert!(SyntheticSeries::new(0, 0.1, 0, 0.0, 0).is_err());
        assert!(SyntheticSeries::new(10, -1.0, 0, 0.0, 0).is_err());
    }
}
