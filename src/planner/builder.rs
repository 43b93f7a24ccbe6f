//! Strategy selection
//!
//! A pure function of dataset stats, selectivity and thresholds. Checks run
//! in a fixed order so the more specific strategies win before falling
//! through to `Hybrid`:
//!
//! 1. row_count ≤ direct_max_rows → Direct
//! 2. attribute filter, selectivity < 0.3, row_count > 1000 → AttributeFirst
//! 3. spatial filter, selectivity < 0.5, row_count > 50 000 → BboxThenExact
//! 4. row_count > 200 000 → ProgressiveChunks
//! 5. otherwise → Hybrid

use crate::config::PlannerConfig;
use crate::stats::{DatasetStats, SelectivityEstimate};

use super::plan::{FilterPlan, FilterStrategy, PlanStep};

/// Builds filter plans
#[derive(Debug, Clone, Default)]
pub struct PlanBuilder {
    config: PlannerConfig,
}

impl PlanBuilder {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Build a plan; identical inputs always give an identical plan
    pub fn build_plan(&self, stats: &DatasetStats, selectivity: &SelectivityEstimate) -> FilterPlan {
        self.build_plan_with_expression(stats, selectivity, None)
    }

    /// Build a plan, recording the attribute expression on its filter step
    pub fn build_plan_with_expression(
        &self,
        stats: &DatasetStats,
        selectivity: &SelectivityEstimate,
        attribute_expr: Option<&str>,
    ) -> FilterPlan {
        let strategy = self.select_strategy(stats, selectivity);
        let rows = stats.row_count;
        let has_attr = selectivity.has_attribute_filter;
        let has_spatial = selectivity.has_spatial_filter;

        let after_attr = if has_attr {
            scale(rows, selectivity.attribute_selectivity)
        } else {
            rows
        };
        let after_spatial = if has_spatial {
            scale(after_attr, selectivity.spatial_selectivity)
        } else {
            after_attr
        };

        let attribute_step = || PlanStep::AttributeFilter {
            expr: attribute_expr.map(str::to_string),
            estimated_rows: after_attr,
        };

        let mut steps = Vec::new();
        let mut chunk_size = 0;
        let use_index = match strategy {
            FilterStrategy::Direct => false,
            _ => stats.has_native_spatial_index,
        };

        match strategy {
            FilterStrategy::Direct => {
                if has_attr {
                    steps.push(attribute_step());
                }
                if has_spatial {
                    steps.push(PlanStep::ExactSpatial {
                        estimated_rows: after_spatial,
                    });
                }
            }
            FilterStrategy::AttributeFirst => {
                steps.push(attribute_step());
                if has_spatial {
                    steps.push(PlanStep::ExactSpatial {
                        estimated_rows: after_spatial,
                    });
                }
            }
            FilterStrategy::BboxThenExact => {
                if has_attr {
                    steps.push(attribute_step());
                }
                steps.push(PlanStep::BboxPrefilter {
                    estimated_rows: after_spatial,
                });
                steps.push(PlanStep::ExactSpatial {
                    estimated_rows: after_spatial,
                });
            }
            FilterStrategy::ProgressiveChunks => {
                chunk_size = self.chunk_size_for(stats);
                if has_attr {
                    steps.push(attribute_step());
                }
                steps.push(PlanStep::Range {
                    chunk_size,
                    chunk_count: after_attr.div_ceil(chunk_size.max(1) as u64),
                    estimated_rows: after_attr,
                });
                if has_spatial {
                    if use_index {
                        steps.push(PlanStep::BboxPrefilter {
                            estimated_rows: after_spatial,
                        });
                    }
                    steps.push(PlanStep::ExactSpatial {
                        estimated_rows: after_spatial,
                    });
                }
            }
            FilterStrategy::Hybrid => {
                if has_attr {
                    steps.push(attribute_step());
                }
                if has_spatial {
                    if use_index {
                        steps.push(PlanStep::BboxPrefilter {
                            estimated_rows: after_spatial,
                        });
                    }
                    steps.push(PlanStep::ExactSpatial {
                        estimated_rows: after_spatial,
                    });
                }
            }
        }

        FilterPlan {
            strategy,
            estimated_selectivity: selectivity.combined(),
            estimated_cost: self.estimated_cost(strategy, stats, selectivity),
            steps,
            chunk_size,
            use_index,
        }
    }

    /// The strategy selection alone
    pub fn select_strategy(&self, stats: &DatasetStats, selectivity: &SelectivityEstimate) -> FilterStrategy {
        let c = &self.config;
        let rows = stats.row_count;

        if rows <= c.direct_max_rows {
            return FilterStrategy::Direct;
        }
        if selectivity.has_attribute_filter
            && selectivity.attribute_selectivity < c.attribute_first_max_selectivity
        {
            return FilterStrategy::AttributeFirst;
        }
        if selectivity.has_spatial_filter
            && selectivity.spatial_selectivity < c.bbox_max_spatial_selectivity
            && rows > c.bbox_min_rows
        {
            return FilterStrategy::BboxThenExact;
        }
        if rows > c.progressive_min_rows {
            return FilterStrategy::ProgressiveChunks;
        }
        FilterStrategy::Hybrid
    }

    /// `max(min, min(max, base / max(1, complexity / 2)))`
    pub fn chunk_size_for(&self, stats: &DatasetStats) -> u32 {
        let c = &self.config;
        let divisor = (stats.complexity() / 2.0).max(1.0);
        let raw = (c.chunk_base as f64 / divisor).floor() as u32;
        raw.min(c.max_chunk_size).max(c.min_chunk_size)
    }

    fn estimated_cost(
        &self,
        strategy: FilterStrategy,
        stats: &DatasetStats,
        selectivity: &SelectivityEstimate,
    ) -> f64 {
        let mut cost = strategy.base_cost();
        if selectivity.has_spatial_filter {
            cost += 1.0 + 0.1 * stats.complexity().min(10.0);
        }
        cost
    }
}

fn scale(rows: u64, fraction: f64) -> u64 {
    (rows as f64 * fraction).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> PlanBuilder {
        PlanBuilder::default()
    }

    #[test]
    fn test_direct_at_threshold() {
        let plan = builder().build_plan(&DatasetStats::new(1000), &SelectivityEstimate::none());
        assert_eq!(plan.strategy, FilterStrategy::Direct);
        assert!(!plan.use_index);
        assert!(!plan.is_chunked());
        assert_eq!(plan.estimated_cost, 1.0);
    }

    #[test]
    fn test_hybrid_just_above_direct() {
        let plan = builder().build_plan(&DatasetStats::new(1001), &SelectivityEstimate::none());
        assert_eq!(plan.strategy, FilterStrategy::Hybrid);
        assert!(plan.steps.is_empty());
    }

    #[test]
    fn test_attribute_first_needs_filter() {
        let stats = DatasetStats::new(5000);
        let plan = builder().build_plan(&stats, &SelectivityEstimate::attribute_only(0.25));
        assert_eq!(plan.strategy, FilterStrategy::AttributeFirst);
        assert_eq!(plan.steps[0].estimated_rows(), 1250);

        let plan = builder().build_plan(&stats, &SelectivityEstimate::attribute_only(0.3));
        assert_eq!(plan.strategy, FilterStrategy::Hybrid);
    }

    #[test]
    fn test_bbox_strict_threshold() {
        let stats = DatasetStats::new(60_000);
        let plan = builder().build_plan(&stats, &SelectivityEstimate::spatial_only(0.49));
        assert_eq!(plan.strategy, FilterStrategy::BboxThenExact);
        assert_eq!(plan.steps.len(), 2);

        let plan = builder().build_plan(&stats, &SelectivityEstimate::spatial_only(0.5));
        assert_eq!(plan.strategy, FilterStrategy::Hybrid);

        let plan = builder().build_plan(&DatasetStats::new(50_000), &SelectivityEstimate::spatial_only(0.1));
        assert_eq!(plan.strategy, FilterStrategy::Hybrid);
    }

    #[test]
    fn test_progressive_chunk_size() {
        let stats = DatasetStats::new(300_000).with_avg_vertex_count(100.0);
        let plan = builder().build_plan(&stats, &SelectivityEstimate::none());
        assert_eq!(plan.strategy, FilterStrategy::ProgressiveChunks);
        // complexity 10 → 10000 / 5
        assert_eq!(plan.chunk_size, 2000);
        match &plan.steps[0] {
            PlanStep::Range { chunk_count, .. } => assert_eq!(*chunk_count, 150),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_chunk_size_clamped() {
        let b = builder();
        assert_eq!(b.chunk_size_for(&DatasetStats::new(1)), 10_000);
        assert_eq!(
            b.chunk_size_for(&DatasetStats::new(1).with_avg_vertex_count(10_000.0)),
            1000
        );
    }

    #[test]
    fn test_spatial_surcharge() {
        let stats = DatasetStats::new(500).with_avg_vertex_count(50.0);
        let plan = builder().build_plan(&stats, &SelectivityEstimate::spatial_only(0.2));
        assert!((plan.estimated_cost - (1.0 + 1.0 + 0.5)).abs() < 1e-9);

        let complex = DatasetStats::new(500).with_avg_vertex_count(1000.0);
        let plan = builder().build_plan(&complex, &SelectivityEstimate::spatial_only(0.2));
        assert!((plan.estimated_cost - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_hybrid_uses_native_index() {
        let stats = DatasetStats::new(20_000).with_native_index(true);
        let plan = builder().build_plan(&stats, &SelectivityEstimate::new(0.8, 0.9));
        assert_eq!(plan.strategy, FilterStrategy::Hybrid);
        assert!(plan.use_index);
        let names: Vec<&str> = plan.steps.iter().map(PlanStep::name).collect();
        assert_eq!(names, vec!["attribute_filter", "bbox_prefilter", "exact_spatial"]);
    }

    #[test]
    fn test_build_plan_is_deterministic() {
        let stats = DatasetStats::new(750_000).with_avg_vertex_count(33.0);
        let sel = SelectivityEstimate::new(0.4, 0.6);
        let b = builder();
        assert_eq!(b.build_plan(&stats, &sel), b.build_plan(&stats, &sel));
    }
}
