//! Planner Strategy Tests
//!
//! Tests for plan selection:
//! - Each threshold selects the documented strategy
//! - Plans are deterministic for identical inputs
//! - Chunk sizes follow geometry complexity and stay within bounds

use filteropt::config::PlannerConfig;
use filteropt::execution::ChunkedExecutor;
use filteropt::observability::MetricsRegistry;
use filteropt::planner::{ExplainPlan, FilterStrategy, PlanBuilder, PlanStep};
use filteropt::stats::{DatasetStats, SelectivityEstimate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

// =============================================================================
// Helper Functions
// =============================================================================

fn planner() -> PlanBuilder {
    PlanBuilder::new(PlannerConfig::default())
}

fn strategy(rows: u64, selectivity: SelectivityEstimate) -> FilterStrategy {
    planner().build_plan(&DatasetStats::new(rows), &selectivity).strategy
}

// =============================================================================
// Strategy Selection Tests
// =============================================================================

/// Small datasets are filtered directly whatever the selectivity.
#[test]
fn test_small_dataset_is_direct() {
    assert_eq!(strategy(0, SelectivityEstimate::none()), FilterStrategy::Direct);
    assert_eq!(strategy(1_000, SelectivityEstimate::attribute_only(0.01)), FilterStrategy::Direct);
}

/// A selective attribute filter runs first.
#[test]
fn test_selective_attribute_first() {
    assert_eq!(
        strategy(10_000, SelectivityEstimate::new(0.1, 0.9)),
        FilterStrategy::AttributeFirst
    );
    assert_ne!(
        strategy(10_000, SelectivityEstimate::attribute_only(0.3)),
        FilterStrategy::AttributeFirst
    );
}

/// Selective spatial filters on large datasets prefilter by bbox.
#[test]
fn test_bbox_then_exact() {
    let plan = planner().build_plan(&DatasetStats::new(100_000), &SelectivityEstimate::spatial_only(0.2));
    assert_eq!(plan.strategy, FilterStrategy::BboxThenExact);
    let names: Vec<&str> = plan.steps.iter().map(PlanStep::name).collect();
    assert_eq!(names, vec!["bbox_prefilter", "exact_spatial"]);

    // Not enough rows for the prefilter to pay off
    assert_eq!(
        strategy(50_000, SelectivityEstimate::spatial_only(0.2)),
        FilterStrategy::Hybrid
    );
}

/// Very large datasets without a selective filter run in chunks.
#[test]
fn test_progressive_chunks() {
    let plan = planner().build_plan(&DatasetStats::new(1_000_000), &SelectivityEstimate::none());
    assert_eq!(plan.strategy, FilterStrategy::ProgressiveChunks);
    assert!(plan.is_chunked());
    assert_eq!(plan.chunk_size, 10_000);
    match &plan.steps[0] {
        PlanStep::Range { chunk_count, .. } => assert_eq!(*chunk_count, 100),
        other => panic!("expected range step, got {:?}", other),
    }
}

/// Medium datasets without selective filters use the hybrid plan.
#[test]
fn test_hybrid_default() {
    assert_eq!(strategy(150_000, SelectivityEstimate::new(0.8, 0.9)), FilterStrategy::Hybrid);
}

// =============================================================================
// Chunk Size Tests
// =============================================================================

/// Complex geometry shrinks batches, never below the minimum.
#[test]
fn test_chunk_size_shrinks_with_complexity() {
    let builder = planner();
    let simple = builder.chunk_size_for(&DatasetStats::new(1_000_000).with_avg_vertex_count(10.0));
    let complex = builder.chunk_size_for(&DatasetStats::new(1_000_000).with_avg_vertex_count(100.0));
    let extreme = builder.chunk_size_for(&DatasetStats::new(1_000_000).with_avg_vertex_count(1e6));

    assert_eq!(simple, 10_000);
    assert_eq!(complex, 2_000);
    assert_eq!(extreme, 1_000);
}

/// The chunked executor takes its batch size from the plan.
#[test]
fn test_executor_follows_plan_chunk_size() {
    let plan = planner().build_plan(
        &DatasetStats::new(1_000_000).with_avg_vertex_count(100.0),
        &SelectivityEstimate::none(),
    );
    let executor = ChunkedExecutor::for_plan(&plan, Arc::new(MetricsRegistry::new()));
    assert_eq!(executor.chunk_size(), 2_000);
}

// =============================================================================
// Determinism Tests
// =============================================================================

/// Identical inputs always produce identical plans and explain output.
#[test]
fn test_plans_are_deterministic() {
    let mut rng = StdRng::seed_from_u64(42);
    let builder = planner();

    for _ in 0..200 {
        let rows = rng.gen_range(0..2_000_000);
        let stats = DatasetStats::new(rows)
            .with_native_index(rng.gen_bool(0.5))
            .with_avg_vertex_count(rng.gen_range(0.0..500.0));
        let selectivity = SelectivityEstimate::new(rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0));

        let a = builder.build_plan(&stats, &selectivity);
        let b = builder.build_plan(&stats, &selectivity);
        assert_eq!(a, b);
        assert_eq!(
            ExplainPlan::from_plan(&a).to_string(),
            ExplainPlan::from_plan(&b).to_string()
        );
        assert!(a.estimated_cost >= 0.0);
        assert!(a.chunk_size == 0 || (1_000..=50_000).contains(&a.chunk_size));
    }
}

// =============================================================================
// Boundary Tests
// =============================================================================

/// Spatial selectivity exactly at the threshold does not prefilter.
#[test]
fn test_spatial_threshold_is_strict() {
    assert_ne!(
        strategy(100_000, SelectivityEstimate::spatial_only(0.5)),
        FilterStrategy::BboxThenExact
    );
    assert_eq!(
        strategy(100_000, SelectivityEstimate::spatial_only(0.4999)),
        FilterStrategy::BboxThenExact
    );
}

/// Rare attribute on a large dataset: attribute-first at base cost.
#[test]
fn test_attribute_first_cost_without_spatial_filter() {
    let plan = planner().build_plan(&DatasetStats::new(500_000), &SelectivityEstimate::attribute_only(0.05));
    assert_eq!(plan.strategy, FilterStrategy::AttributeFirst);
    assert_eq!(plan.estimated_cost, 2.0);
    assert_eq!(plan.estimated_output_rows(), Some(25_000));
}
