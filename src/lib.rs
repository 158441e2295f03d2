pub mod common;
pub mod datasets;
pub mod error;
pub mod random_cut_forest;

pub use error::{RcfError, Result};
