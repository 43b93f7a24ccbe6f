//! filteropt - an adaptive filter optimizer for spatial datasets
//!
//! Chooses a filtering strategy per dataset from sampled statistics,
//! rewrites and combines filter expressions into forms each backend
//! executes efficiently, and runs filters across many datasets.

pub mod backend;
pub mod cache;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod error;
pub mod execution;
pub mod expr;
pub mod observability;
pub mod optimizer;
pub mod planner;
pub mod rewrite;
pub mod stats;

pub use config::OptimizerConfig;
pub use dataset::{BBox, BackendKind, DatasetHandle};
pub use error::{OptimizerError, OptimizerResult};
pub use optimizer::FilterOptimizer;
