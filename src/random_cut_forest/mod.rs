pub mod alias;
pub mod config;
pub mod rcf_forest;
pub mod rcf_node;
pub mod rcf_tree;
pub mod sampler;
pub mod shingle;

pub use config::{Aggregation, ForestBuilder, ForestConfig, ScoringPolicy};
pub use rcf_forest::RandomCutForest;
