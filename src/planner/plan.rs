//! Plan structures

use std::fmt;

use serde::{Deserialize, Serialize};

/// Execution strategy, exactly one per plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterStrategy {
    /// Small dataset: apply the expression as-is
    Direct,
    /// Selective attribute filter first, spatial test on the survivors
    AttributeFirst,
    /// Broad-phase bbox check, then the exact predicate
    BboxThenExact,
    /// Bounded-size batches over a very large dataset
    ProgressiveChunks,
    /// Attribute filter if present, plus whatever native index exists
    Hybrid,
}

impl FilterStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterStrategy::Direct => "DIRECT",
            FilterStrategy::AttributeFirst => "ATTRIBUTE_FIRST",
            FilterStrategy::BboxThenExact => "BBOX_THEN_EXACT",
            FilterStrategy::ProgressiveChunks => "PROGRESSIVE_CHUNKS",
            FilterStrategy::Hybrid => "HYBRID",
        }
    }

    /// Base cost before the spatial surcharge
    pub fn base_cost(&self) -> f64 {
        match self {
            FilterStrategy::Direct => 1.0,
            FilterStrategy::AttributeFirst => 2.0,
            FilterStrategy::BboxThenExact => 3.0,
            FilterStrategy::Hybrid => 4.0,
            FilterStrategy::ProgressiveChunks => 5.0,
        }
    }
}

impl fmt::Display for FilterStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a plan, with its estimated output rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum PlanStep {
    AttributeFilter {
        expr: Option<String>,
        estimated_rows: u64,
    },
    BboxPrefilter {
        estimated_rows: u64,
    },
    ExactSpatial {
        estimated_rows: u64,
    },
    /// Batched iteration over the candidate rows
    Range {
        chunk_size: u32,
        chunk_count: u64,
        estimated_rows: u64,
    },
}

impl PlanStep {
    pub fn name(&self) -> &'static str {
        match self {
            PlanStep::AttributeFilter { .. } => "attribute_filter",
            PlanStep::BboxPrefilter { .. } => "bbox_prefilter",
            PlanStep::ExactSpatial { .. } => "exact_spatial",
            PlanStep::Range { .. } => "range",
        }
    }

    pub fn estimated_rows(&self) -> u64 {
        match self {
            PlanStep::AttributeFilter { estimated_rows, .. }
            | PlanStep::BboxPrefilter { estimated_rows }
            | PlanStep::ExactSpatial { estimated_rows }
            | PlanStep::Range { estimated_rows, .. } => *estimated_rows,
        }
    }
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanStep::AttributeFilter {
                expr: Some(expr),
                estimated_rows,
            } => write!(f, "attribute filter [{}] -> ~{} rows", expr, estimated_rows),
            PlanStep::AttributeFilter {
                expr: None,
                estimated_rows,
            } => write!(f, "attribute filter -> ~{} rows", estimated_rows),
            PlanStep::BboxPrefilter { estimated_rows } => {
                write!(f, "bbox prefilter -> ~{} rows", estimated_rows)
            }
            PlanStep::ExactSpatial { estimated_rows } => {
                write!(f, "exact spatial predicate -> ~{} rows", estimated_rows)
            }
            PlanStep::Range {
                chunk_size,
                chunk_count,
                estimated_rows,
            } => write!(
                f,
                "{} chunks of {} rows -> ~{} rows",
                chunk_count, chunk_size, estimated_rows
            ),
        }
    }
}

/// Immutable filter plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterPlan {
    pub strategy: FilterStrategy,
    /// Fraction of rows expected to pass all filters
    pub estimated_selectivity: f64,
    pub estimated_cost: f64,
    pub steps: Vec<PlanStep>,
    /// Batch size; 0 when the plan does not chunk
    pub chunk_size: u32,
    pub use_index: bool,
}

impl FilterPlan {
    pub fn is_chunked(&self) -> bool {
        self.chunk_size > 0
    }

    /// Estimated rows after the last step
    pub fn estimated_output_rows(&self) -> Option<u64> {
        self.steps.last().map(PlanStep::estimated_rows)
    }
}
