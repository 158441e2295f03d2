use ndarray::Array1;

use crate::error::Result;
use crate::random_cut_forest::alias::FType;

/// A point fed to a model, one value per dimension.
pub type Point<F> = Array1<F>;

/// Trait for implementing an anomaly detector model.
///
/// Implement this trait for your anomaly detector to use the `learn_one` and `score_one`
/// methods. Scores are non-negative and higher means more anomalous.
pub trait AnomalyDetector<F: FType> {
    fn learn_one(&mut self, x: &Point<F>) -> Result<()>;
    fn score_one(&self, x: &Point<F>) -> Result<F>;
}
