use crate::common::{AnomalyDetector, Point};
use crate::error::{RcfError, Result};
use crate::random_cut_forest::alias::FType;
use crate::random_cut_forest::config::{ForestBuilder, ForestConfig};
use crate::random_cut_forest::rcf_tree::RandomCutTree;
use crate::random_cut_forest::sampler::{AdmitOutcome, Reservoir};
use crate::random_cut_forest::shingle::ShingleBuffer;

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::debug;

/// One tree and the reservoir deciding which points it holds.
#[derive(Clone)]
struct ForestMember<F: FType> {
    tree: RandomCutTree<F>,
    sampler: Reservoir<F>,
}

impl<F: FType> ForestMember<F> {
    fn update(&mut self, point: &Point<F>, sequence_index: u64) -> Result<()> {
        match self.sampler.admit(point, sequence_index) {
            AdmitOutcome::Accepted => self.tree.insert(point),
            AdmitOutcome::Replaced(evicted) => {
                self.tree.delete(&evicted.point)?;
                self.tree.insert(point);
            }
            AdmitOutcome::Rejected => {}
        }
        Ok(())
    }
}

/// Random Cut Forest for streaming anomaly detection.
///
/// Every tree keeps a time-decayed sample of the stream. A point is scored against the
/// current trees first and only then offered to each tree's sample, so a score never
/// reflects the point itself.
///
/// # Example
///
/// ```
/// use light_rcf::random_cut_forest::RandomCutForest;
///
/// let mut forest = RandomCutForest::<f64>::builder()
///     .dimensions(1)
///     .number_of_trees(20)
///     .sample_size(32)
///     .random_seed(42)
///     .build()
///     .unwrap();
///
/// let mut last = 0.0;
/// for i in 0..200 {
///     last = forest.process_scalar((i % 10) as f64 * 0.1).unwrap();
/// }
/// let spike = forest.process_scalar(50.0).unwrap();
/// assert!(spike > last);
/// ```
#[derive(Clone)]
pub struct RandomCutForest<F: FType> {
    config: ForestConfig,
    members: Vec<ForestMember<F>>,
    shingle: ShingleBuffer<F>,
    total_updates: u64,
}

impl ForestBuilder {
    pub fn build<F: FType>(self) -> Result<RandomCutForest<F>> {
        RandomCutForest::new(self.config()?)
    }
}

impl<F: FType> RandomCutForest<F> {
    pub fn new(config: ForestConfig) -> Result<Self> {
        config.validate()?;

        let seed = config
            .random_seed
            .unwrap_or_else(|| rand::thread_rng().gen());
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let members = (0..config.number_of_trees)
            .map(|_| ForestMember {
                tree: RandomCutTree::new(rng.gen()),
                sampler: Reservoir::new(config.sample_size, config.time_decay, rng.gen()),
            })
            .collect();

        debug!(
            dimensions = config.dimensions,
            number_of_trees = config.number_of_trees,
            sample_size = config.sample_size,
            time_decay = config.time_decay,
            shingle_size = config.shingle_size,
            seed,
            "random cut forest created"
        );

        Ok(RandomCutForest {
            shingle: ShingleBuffer::new(config.base_dimensions(), config.shingle_size),
            config,
            members,
            total_updates: 0,
        })
    }

    /// Builder for a forest over `F`, named as `RandomCutForest::<f64>::builder()` since the
    /// builder itself does not fix the float type.
    pub fn builder() -> ForestBuilder {
        ForestBuilder::new()
    }

    /// Forest with the given sizes and defaults for everything else.
    pub fn configure(
        dimensions: usize,
        number_of_trees: usize,
        sample_size: usize,
        time_decay: f64,
        shingle_size: usize,
    ) -> Result<Self> {
        ForestBuilder::new()
            .dimensions(dimensions)
            .number_of_trees(number_of_trees)
            .sample_size(sample_size)
            .time_decay(time_decay)
            .shingle_size(shingle_size)
            .build()
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    /// Number of points absorbed by `update` so far.
    pub fn total_updates(&self) -> u64 {
        self.total_updates
    }

    pub fn is_output_ready(&self) -> bool {
        self.total_updates >= self.config.output_after as u64
    }

    pub fn shingle(&self) -> &ShingleBuffer<F> {
        &self.shingle
    }

    pub fn trees(&self) -> impl Iterator<Item = &RandomCutTree<F>> {
        self.members.iter().map(|m| &m.tree)
    }

    /// Number of points held by each tree.
    pub fn get_forest_size(&self) -> Vec<usize> {
        self.members.iter().map(|m| m.tree.mass()).collect()
    }

    fn check_input<'a>(values: impl ExactSizeIterator<Item = &'a F>, expected: usize) -> Result<()>
    where
        F: 'a,
    {
        if values.len() != expected {
            debug!(expected, got = values.len(), "input rejected");
            return Err(RcfError::DimensionMismatch {
                expected,
                got: values.len(),
            });
        }
        if let Some(index) = values.into_iter().position(|v| !v.is_finite()) {
            debug!(index, "input rejected");
            return Err(RcfError::NonFiniteValue { index });
        }
        Ok(())
    }

    /// Anomaly score of `point` against the current model.
    pub fn score(&self, point: &Point<F>) -> Result<F> {
        Self::check_input(point.iter(), self.config.dimensions)?;
        Ok(self.score_point(point))
    }

    fn score_point(&self, point: &Point<F>) -> F {
        if !self.is_output_ready() {
            return F::zero();
        }
        let policy = self.config.scoring_policy;
        let signals: Vec<F> = if self.config.parallel_execution_enabled {
            self.members
                .par_iter()
                .map(|m| m.tree.score(point, policy))
                .collect()
        } else {
            self.members
                .iter()
                .map(|m| m.tree.score(point, policy))
                .collect()
        };
        self.config.aggregation.aggregate(&signals)
    }

    /// Offer `point` to every tree.
    pub fn update(&mut self, point: &Point<F>) -> Result<()> {
        Self::check_input(point.iter(), self.config.dimensions)?;
        self.update_point(point)
    }

    fn update_point(&mut self, point: &Point<F>) -> Result<()> {
        let sequence_index = self.total_updates;
        if self.config.parallel_execution_enabled {
            self.members
                .par_iter_mut()
                .try_for_each(|m| m.update(point, sequence_index))?;
        } else {
            self.members
                .iter_mut()
                .try_for_each(|m| m.update(point, sequence_index))?;
        }
        self.total_updates += 1;
        Ok(())
    }

    /// Shingle `raw`, score the resulting point, then absorb it.
    ///
    /// `raw` holds `dimensions / shingle_size` values. Invalid input is rejected before
    /// anything changes, shingle included.
    pub fn process(&mut self, raw: &[F]) -> Result<F> {
        Self::check_input(raw.iter(), self.config.base_dimensions())?;
        let point = self.shingle.push(raw);
        let score = self.score_point(&point);
        self.update_point(&point)?;
        Ok(score)
    }

    pub fn process_scalar(&mut self, value: F) -> Result<F> {
        self.process(&[value])
    }
}

impl<F: FType> AnomalyDetector<F> for RandomCutForest<F> {
    fn learn_one(&mut self, x: &Point<F>) -> Result<()> {
        self.update(x)
    }

    fn score_one(&self, x: &Point<F>) -> Result<F> {
        self.score(x)
    }
}
