//! Dataset statistics and selectivity estimation
//!
//! Works without server-side statistics: counts and extents come from the
//! dataset handle, everything else from a bounded random sample.

mod sampler;
mod selectivity;

pub use sampler::{DatasetStats, StatsSampler};
pub use selectivity::{SelectivityEstimate, SelectivityEstimator};
