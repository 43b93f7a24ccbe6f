//! Filter planning
//!
//! Chooses one [`FilterStrategy`] per request from dataset stats and
//! selectivity estimates, and lays out the ordered steps to run.
//!
//! # Design Principles
//!
//! - Deterministic: same inputs, same plan
//! - Pure: no I/O, no logging, no shared state
//! - Thresholds come from [`PlannerConfig`](crate::config::PlannerConfig)

mod builder;
mod explain;
mod plan;

pub use builder::PlanBuilder;
pub use explain::ExplainPlan;
pub use plan::{FilterPlan, FilterStrategy, PlanStep};
