//! Error types for the forest.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RcfError {
    /// Rejected at construction; fix the parameters and build again.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Input length does not match the configured (or shingle base) dimensions
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// NaN or infinite coordinate
    #[error("Non-finite value at index {index}")]
    NonFiniteValue { index: usize },

    /// A tree or reservoir was found in an inconsistent state.
    #[error("Tree invariant violated: {0}")]
    TreeInvariant(String),
}

pub type Result<T> = std::result::Result<T, RcfError>;
