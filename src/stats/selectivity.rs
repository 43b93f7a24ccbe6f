//! Selectivity estimation from samples and extent overlap
//!
//! Estimation never fails. Anything that prevents a real estimate (a parse
//! error, an unknown function, a failed sample, a missing extent) yields the
//! configured fallback, which defaults to 0.5.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::EstimatorConfig;
use crate::dataset::{BBox, DatasetHandle};
use crate::expr::{parse_expression, Evaluator, FunctionResolver, NoFunctions};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};

/// Smallest attribute selectivity reported for a non-empty sample
const MIN_SELECTIVITY: f64 = 0.001;

/// Estimated match fractions for one filter request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelectivityEstimate {
    pub attribute_selectivity: f64,
    pub spatial_selectivity: f64,
    pub has_attribute_filter: bool,
    pub has_spatial_filter: bool,
}

impl SelectivityEstimate {
    /// No filter of either kind
    pub fn none() -> Self {
        Self {
            attribute_selectivity: 1.0,
            spatial_selectivity: 1.0,
            has_attribute_filter: false,
            has_spatial_filter: false,
        }
    }

    /// Both an attribute and a spatial filter
    pub fn new(attribute: f64, spatial: f64) -> Self {
        Self {
            attribute_selectivity: clamp_unit(attribute),
            spatial_selectivity: clamp_unit(spatial),
            has_attribute_filter: true,
            has_spatial_filter: true,
        }
    }

    pub fn attribute_only(selectivity: f64) -> Self {
        Self {
            attribute_selectivity: clamp_unit(selectivity),
            has_attribute_filter: true,
            ..Self::none()
        }
    }

    pub fn spatial_only(selectivity: f64) -> Self {
        Self {
            spatial_selectivity: clamp_unit(selectivity),
            has_spatial_filter: true,
            ..Self::none()
        }
    }

    /// Fraction of rows expected to pass every present filter
    pub fn combined(&self) -> f64 {
        let mut s = 1.0;
        if self.has_attribute_filter {
            s *= self.attribute_selectivity;
        }
        if self.has_spatial_filter {
            s *= self.spatial_selectivity;
        }
        s
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        return 0.5;
    }
    v.clamp(0.0, 1.0)
}

/// Estimates attribute and spatial selectivity
pub struct SelectivityEstimator {
    sample_size: usize,
    dampening: f64,
    fallback: f64,
    resolver: Arc<dyn FunctionResolver>,
    metrics: Arc<MetricsRegistry>,
}

impl SelectivityEstimator {
    pub fn new(config: &EstimatorConfig, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            sample_size: config.attribute_sample_size,
            dampening: config.spatial_dampening,
            fallback: config.fallback_selectivity,
            resolver: Arc::new(NoFunctions),
            metrics,
        }
    }

    /// Resolve functions in attribute expressions through `resolver`
    pub fn with_resolver(mut self, resolver: Arc<dyn FunctionResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Fraction of sampled rows matching `expr`
    pub fn estimate_attribute_selectivity(&self, dataset: &dyn DatasetHandle, expr: &str) -> f64 {
        if expr.trim().is_empty() {
            return 1.0;
        }
        let parsed = match parse_expression(expr) {
            Ok(p) => p,
            Err(e) => return self.degrade(dataset, &e.to_string()),
        };
        let rows = match dataset.get_sample(self.sample_size) {
            Ok(rows) if !rows.is_empty() => rows,
            Ok(_) => return self.degrade(dataset, "empty sample"),
            Err(e) => return self.degrade(dataset, &e.to_string()),
        };

        let evaluator = Evaluator::new(self.resolver.as_ref()).with_id_column(dataset.id_column());
        let considered = rows.len().min(self.sample_size.max(1));
        let mut matched = 0usize;
        for row in rows.iter().take(considered) {
            match evaluator.matches(&parsed, row) {
                Ok(true) => matched += 1,
                Ok(false) => {}
                Err(e) => return self.degrade(dataset, &e.to_string()),
            }
        }

        (matched as f64 / considered as f64).clamp(MIN_SELECTIVITY, 1.0)
    }

    /// Extent overlap ratio of `source_extent` against the dataset, dampened
    pub fn estimate_spatial_selectivity(&self, dataset: &dyn DatasetHandle, source_extent: &BBox) -> f64 {
        match dataset.extent() {
            Some(extent) if extent.is_finite() && source_extent.is_finite() => {
                self.overlap_selectivity(&extent, source_extent)
            }
            _ => self.degrade(dataset, "extent unavailable"),
        }
    }

    /// Overlap estimate for known extents
    pub fn overlap_selectivity(&self, dataset_extent: &BBox, source_extent: &BBox) -> f64 {
        let area = dataset_extent.area();
        if area <= 0.0 {
            return if dataset_extent.intersects(source_extent) {
                self.dampening.clamp(0.0, 1.0)
            } else {
                0.0
            };
        }
        match dataset_extent.intersection(source_extent) {
            Some(overlap) => (overlap.area() / area * self.dampening).clamp(0.0, 1.0),
            None => 0.0,
        }
    }

    /// Both estimates for a request
    pub fn estimate(
        &self,
        dataset: &dyn DatasetHandle,
        attribute_expr: Option<&str>,
        source_extent: Option<&BBox>,
    ) -> SelectivityEstimate {
        let mut estimate = SelectivityEstimate::none();
        if let Some(expr) = attribute_expr.filter(|e| !e.trim().is_empty()) {
            estimate.attribute_selectivity = self.estimate_attribute_selectivity(dataset, expr);
            estimate.has_attribute_filter = true;
        }
        if let Some(extent) = source_extent {
            estimate.spatial_selectivity = self.estimate_spatial_selectivity(dataset, extent);
            estimate.has_spatial_filter = true;
        }
        estimate
    }

    fn degrade(&self, dataset: &dyn DatasetHandle, reason: &str) -> f64 {
        self.metrics.increment_estimations_degraded();
        log_event_with_fields(
            Event::EstimationDegraded,
            &[("dataset", dataset.dataset_id()), ("reason", reason)],
        );
        self.fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{BackendError, BackendKind, BackendResult, SampleRow};
    use serde_json::json;

    struct Parcels {
        extent: Option<BBox>,
        fail: bool,
    }

    impl DatasetHandle for Parcels {
        fn dataset_id(&self) -> &str {
            "parcels"
        }
        fn backend_kind(&self) -> BackendKind {
            BackendKind::Server
        }
        fn row_count(&self) -> Option<i64> {
            Some(200)
        }
        fn extent(&self) -> Option<BBox> {
            self.extent
        }
        fn get_sample(&self, n: usize) -> BackendResult<Vec<SampleRow>> {
            if self.fail {
                return Err(BackendError::Query("timeout".into()));
            }
            Ok((0..n.min(200) as i64)
                .map(|i| SampleRow::new(i, json!({"zone": if i % 4 == 0 { "A" } else { "B" }, "area": i})))
                .collect())
        }
        fn execute_filter(&self, _expression: &str) -> BackendResult<u64> {
            Ok(0)
        }
    }

    fn estimator() -> (SelectivityEstimator, Arc<MetricsRegistry>) {
        let metrics = Arc::new(MetricsRegistry::new());
        (
            SelectivityEstimator::new(&EstimatorConfig::default(), metrics.clone()),
            metrics,
        )
    }

    fn parcels() -> Parcels {
        Parcels {
            extent: Some(BBox::new(0.0, 0.0, 100.0, 100.0)),
            fail: false,
        }
    }

    #[test]
    fn test_attribute_selectivity_from_sample() {
        let (e, _) = estimator();
        let s = e.estimate_attribute_selectivity(&parcels(), "zone = 'A'");
        assert!((s - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_attribute_selectivity_floor() {
        let (e, _) = estimator();
        let s = e.estimate_attribute_selectivity(&parcels(), "area > 100000");
        assert_eq!(s, MIN_SELECTIVITY);
    }

    #[test]
    fn test_parse_error_returns_half() {
        let (e, metrics) = estimator();
        assert_eq!(e.estimate_attribute_selectivity(&parcels(), "zone = = 'A'"), 0.5);
        assert_eq!(e.estimate_attribute_selectivity(&parcels(), "ST_Area(geom) > 4"), 0.5);
        assert_eq!(metrics.snapshot().estimations_degraded, 2);
    }

    #[test]
    fn test_sample_failure_returns_half() {
        let (e, _) = estimator();
        let ds = Parcels {
            fail: true,
            ..parcels()
        };
        assert_eq!(e.estimate_attribute_selectivity(&ds, "zone = 'A'"), 0.5);
    }

    #[test]
    fn test_spatial_selectivity_dampened() {
        let (e, _) = estimator();
        let s = e.estimate_spatial_selectivity(&parcels(), &BBox::new(0.0, 0.0, 50.0, 50.0));
        assert!((s - 0.25 * 0.7).abs() < 1e-9);
        let s = e.estimate_spatial_selectivity(&parcels(), &BBox::new(200.0, 200.0, 300.0, 300.0));
        assert_eq!(s, 0.0);
    }

    #[test]
    fn test_spatial_selectivity_without_extent() {
        let (e, _) = estimator();
        let ds = Parcels {
            extent: None,
            fail: false,
        };
        assert_eq!(e.estimate_spatial_selectivity(&ds, &BBox::new(0.0, 0.0, 1.0, 1.0)), 0.5);
    }

    #[test]
    fn test_degenerate_dataset_extent() {
        let (e, _) = estimator();
        let point = BBox::from_point(5.0, 5.0);
        assert_eq!(e.overlap_selectivity(&point, &BBox::new(0.0, 0.0, 10.0, 10.0)), 0.7);
        assert_eq!(e.overlap_selectivity(&point, &BBox::new(6.0, 6.0, 10.0, 10.0)), 0.0);
    }

    #[test]
    fn test_estimate_sets_flags() {
        let (e, _) = estimator();
        let est = e.estimate(&parcels(), Some("zone = 'A'"), None);
        assert!(est.has_attribute_filter);
        assert!(!est.has_spatial_filter);
        assert!((est.combined() - 0.25).abs() < 1e-9);
        assert_eq!(SelectivityEstimate::none().combined(), 1.0);
    }
}
