//! Explain output for filter plans
//!
//! Produces deterministic, human-readable explain output.

use std::fmt;

use serde::Serialize;

use super::plan::FilterPlan;

/// Explain plan output
#[derive(Debug, Clone, Serialize)]
pub struct ExplainPlan {
    /// Dataset the plan was built for, if known
    pub dataset_id: Option<String>,
    /// Selected strategy
    pub strategy: String,
    /// Expected fraction of matching rows
    pub estimated_selectivity: f64,
    /// Relative cost
    pub estimated_cost: f64,
    /// Batch size (0 = not chunked)
    pub chunk_size: u32,
    /// Whether the backend's spatial index is used
    pub use_index: bool,
    /// Step descriptions in execution order
    pub steps: Vec<String>,
}

impl ExplainPlan {
    /// Creates an explain plan from a filter plan
    pub fn from_plan(plan: &FilterPlan) -> Self {
        Self {
            dataset_id: None,
            strategy: plan.strategy.as_str().to_string(),
            estimated_selectivity: plan.estimated_selectivity,
            estimated_cost: plan.estimated_cost,
            chunk_size: plan.chunk_size,
            use_index: plan.use_index,
            steps: plan.steps.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_dataset(mut self, dataset_id: impl Into<String>) -> Self {
        self.dataset_id = Some(dataset_id.into());
        self
    }
}

impl fmt::Display for ExplainPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== FILTER PLAN ===")?;
        if let Some(dataset) = &self.dataset_id {
            writeln!(f, "Dataset: {}", dataset)?;
        }
        writeln!(f, "Strategy: {}", self.strategy)?;
        writeln!(f, "Selectivity: {:.4}", self.estimated_selectivity)?;
        writeln!(f, "Cost: {:.2}", self.estimated_cost)?;
        if self.chunk_size > 0 {
            writeln!(f, "Chunk Size: {}", self.chunk_size)?;
        }
        writeln!(f, "Index: {}", if self.use_index { "yes" } else { "no" })?;
        if !self.steps.is_empty() {
            writeln!(f, "Steps:")?;
            for (i, step) in self.steps.iter().enumerate() {
                writeln!(f, "  {}. {}", i + 1, step)?;
            }
        }
        Ok(())
    }
}
