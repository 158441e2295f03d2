use crate::error::{RcfError, Result};
use crate::random_cut_forest::alias::{from_f64, from_usize, FType};

use std::cmp::Ordering;

pub const DEFAULT_NUMBER_OF_TREES: usize = 50;
pub const DEFAULT_SAMPLE_SIZE: usize = 256;
/// The default decay is `1 / (DEFAULT_SAMPLE_SIZE_COEFFICIENT * sample_size)`.
pub const DEFAULT_SAMPLE_SIZE_COEFFICIENT: f64 = 10.0;

/// How per-tree signals are combined into one forest score.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Aggregation {
    /// Equal weight per tree.
    #[default]
    Mean,
    Median,
    /// Drop `fraction` of the trees from each end before averaging. `fraction` in `[0, 0.5)`.
    TrimmedMean(f64),
    /// Loudest tree wins. The only policy letting one tree dominate the score.
    Max,
}

impl Aggregation {
    /// Combine tree signals. An empty slice aggregates to zero.
    pub fn aggregate<F: FType>(&self, signals: &[F]) -> F {
        if signals.is_empty() {
            return F::zero();
        }
        match *self {
            Aggregation::Mean => mean(signals),
            Aggregation::Max => signals.iter().fold(F::zero(), |acc, &s| acc.max(s)),
            Aggregation::Median => {
                let sorted = sorted(signals);
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / from_f64::<F>(2.0)
                } else {
                    sorted[mid]
                }
            }
            Aggregation::TrimmedMean(fraction) => {
                let sorted = sorted(signals);
                let cut = (fraction * sorted.len() as f64).floor() as usize;
                // Validation keeps `fraction < 0.5`, so at least one signal survives.
                mean(&sorted[cut..sorted.len() - cut])
            }
        }
    }
}

fn mean<F: FType>(signals: &[F]) -> F {
    let sum = signals.iter().fold(F::zero(), |acc, &s| acc + s);
    sum / from_usize(signals.len())
}

fn sorted<F: FType>(signals: &[F]) -> Vec<F> {
    let mut sorted = signals.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    sorted
}

/// Per-tree anomaly signal derived from a simulated insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoringPolicy {
    /// Expected fraction of the tree mass displaced by the point.
    #[default]
    Displacement,
    /// Isolation-forest style `2^(-depth / c(n))`. Points equal to a held one are never
    /// isolated and score zero.
    Depth,
}

/// Immutable forest configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ForestConfig {
    /// Dimensions of the points held by the trees, after shingling.
    pub dimensions: usize,
    pub number_of_trees: usize,
    /// Reservoir capacity per tree.
    pub sample_size: usize,
    /// Decay rate of sample weights over logical time. Zero means uniform sampling.
    pub time_decay: f64,
    pub shingle_size: usize,
    pub random_seed: Option<u64>,
    pub aggregation: Aggregation,
    pub scoring_policy: ScoringPolicy,
    pub parallel_execution_enabled: bool,
    /// Scores are zero until this many points were absorbed.
    pub output_after: usize,
}

impl Default for ForestConfig {
    fn default() -> Self {
        ForestConfig {
            dimensions: 1,
            number_of_trees: DEFAULT_NUMBER_OF_TREES,
            sample_size: DEFAULT_SAMPLE_SIZE,
            time_decay: 1.0 / (DEFAULT_SAMPLE_SIZE_COEFFICIENT * DEFAULT_SAMPLE_SIZE as f64),
            shingle_size: 1,
            random_seed: None,
            aggregation: Aggregation::default(),
            scoring_policy: ScoringPolicy::default(),
            parallel_execution_enabled: false,
            output_after: 0,
        }
    }
}

impl ForestConfig {
    pub fn validate(&self) -> Result<()> {
        if self.dimensions == 0 {
            return Err(invalid("dimensions must be positive"));
        }
        if self.number_of_trees == 0 {
            return Err(invalid("number_of_trees must be positive"));
        }
        if self.sample_size == 0 {
            return Err(invalid("sample_size must be positive"));
        }
        if self.shingle_size == 0 {
            return Err(invalid("shingle_size must be positive"));
        }
        if !self.time_decay.is_finite() || self.time_decay < 0.0 {
            return Err(invalid(&format!(
                "time_decay must be finite and non-negative, got {}",
                self.time_decay
            )));
        }
        if self.dimensions % self.shingle_size != 0 {
            return Err(invalid(&format!(
                "dimensions ({}) must be a multiple of shingle_size ({})",
                self.dimensions, self.shingle_size
            )));
        }
        if let Aggregation::TrimmedMean(fraction) = self.aggregation {
            if !(0.0..0.5).contains(&fraction) {
                return Err(invalid(&format!(
                    "trimmed mean fraction must be in [0, 0.5), got {fraction}"
                )));
            }
        }
        Ok(())
    }

    /// Length of one raw input before shingling.
    pub fn base_dimensions(&self) -> usize {
        self.dimensions / self.shingle_size
    }
}

fn invalid(message: &str) -> RcfError {
    RcfError::InvalidConfiguration(message.to_string())
}

/// Chained construction of a [`ForestConfig`].
///
/// # Example
///
/// ```
/// use light_rcf::random_cut_forest::config::{Aggregation, ForestBuilder};
///
/// let config = ForestBuilder::new()
///     .dimensions(4)
///     .shingle_size(4)
///     .number_of_trees(30)
///     .sample_size(64)
///     .aggregation(Aggregation::Median)
///     .random_seed(42)
///     .config()
///     .unwrap();
/// assert_eq!(config.base_dimensions(), 1);
/// assert_eq!(config.time_decay, 1.0 / 640.0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ForestBuilder {
    dimensions: Option<usize>,
    number_of_trees: Option<usize>,
    sample_size: Option<usize>,
    time_decay: Option<f64>,
    shingle_size: Option<usize>,
    random_seed: Option<u64>,
    aggregation: Option<Aggregation>,
    scoring_policy: Option<ScoringPolicy>,
    parallel_execution_enabled: Option<bool>,
    output_after: Option<usize>,
}

impl ForestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    pub fn number_of_trees(mut self, number_of_trees: usize) -> Self {
        self.number_of_trees = Some(number_of_trees);
        self
    }

    pub fn sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = Some(sample_size);
        self
    }

    pub fn time_decay(mut self, time_decay: f64) -> Self {
        self.time_decay = Some(time_decay);
        self
    }

    pub fn shingle_size(mut self, shingle_size: usize) -> Self {
        self.shingle_size = Some(shingle_size);
        self
    }

    pub fn random_seed(mut self, random_seed: u64) -> Self {
        self.random_seed = Some(random_seed);
        self
    }

    pub fn aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = Some(aggregation);
        self
    }

    pub fn scoring_policy(mut self, scoring_policy: ScoringPolicy) -> Self {
        self.scoring_policy = Some(scoring_policy);
        self
    }

    pub fn parallel_execution_enabled(mut self, enabled: bool) -> Self {
        self.parallel_execution_enabled = Some(enabled);
        self
    }

    pub fn output_after(mut self, output_after: usize) -> Self {
        self.output_after = Some(output_after);
        self
    }

    /// Resolve defaults and validate.
    pub fn config(self) -> Result<ForestConfig> {
        let defaults = ForestConfig::default();
        let dimensions = self
            .dimensions
            .ok_or_else(|| invalid("dimensions must be set"))?;
        let sample_size = self.sample_size.unwrap_or(defaults.sample_size);
        let time_decay = self
            .time_decay
            .unwrap_or(1.0 / (DEFAULT_SAMPLE_SIZE_COEFFICIENT * sample_size as f64));
        let config = ForestConfig {
            dimensions,
            number_of_trees: self.number_of_trees.unwrap_or(defaults.number_of_trees),
            sample_size,
            time_decay,
            shingle_size: self.shingle_size.unwrap_or(defaults.shingle_size),
            random_seed: self.random_seed,
            aggregation: self.aggregation.unwrap_or(defaults.aggregation),
            scoring_policy: self.scoring_policy.unwrap_or(defaults.scoring_policy),
            parallel_execution_enabled: self
                .parallel_execution_enabled
                .unwrap_or(defaults.parallel_execution_enabled),
            output_after: self.output_after.unwrap_or(defaults.output_after),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ForestConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_sizes_are_rejected() {
        for config in [
            ForestConfig {
                dimensions: 0,
                ..ForestConfig::default()
            },
            ForestConfig {
                number_of_trees: 0,
                ..ForestConfig::default()
            },
            ForestConfig {
                sample_size: 0,
                ..ForestConfig::default()
            },
            ForestConfig {
                shingle_size: 0,
                ..ForestConfig::default()
            },
        ] {
            assert!(matches!(
                config.validate(),
                Err(RcfError::InvalidConfiguration(_))
            ));
        }
    }

    #[test]
    fn test_bad_decay_is_rejected() {
        for time_decay in [-0.1, f64::NAN, f64::INFINITY] {
            let config = ForestConfig {
                time_decay,
                ..ForestConfig::default()
            };
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn test_shingle_must_divide_dimensions() {
        let result = ForestBuilder::new().dimensions(5).shingle_size(2).config();
        assert!(matches!(result, Err(RcfError::InvalidConfiguration(_))));

        let config = ForestBuilder::new()
            .dimensions(6)
            .shingle_size(2)
            .config()
            .unwrap();
        assert_eq!(config.base_dimensions(), 3);
    }

    #[test]
    fn test_builder_requires_dimensions() {
        assert!(ForestBuilder::new().config().is_err());
    }

    #[test]
    fn test_trimmed_fraction_bounds() {
        let result = ForestBuilder::new()
            .dimensions(1)
            .aggregation(Aggregation::TrimmedMean(0.5))
            .config();
        assert!(result.is_err());
    }

    #[test]
    fn test_aggregation() {
        let signals = [0.1f64, 0.2, 0.3, 10.0];
        assert!((Aggregation::Mean.aggregate(&signals) - 2.65).abs() < 1e-12);
        assert!((Aggregation::Median.aggregate(&signals) - 0.25).abs() < 1e-12);
        assert!((Aggregation::TrimmedMean(0.25).aggregate(&signals) - 0.25).abs() < 1e-12);
        assert_eq!(Aggregation::Max.aggregate(&signals), 10.0);
        assert_eq!(Aggregation::Mean.aggregate::<f64>(&[]), 0.0);
    }

    #[test]
    fn test_policy_defaults() {
        assert_eq!(Aggregation::default(), Aggregation::Mean);
        assert_eq!(ScoringPolicy::default(), ScoringPolicy::Displacement);
    }
}
