//! Execution Path Tests
//!
//! Tests for running filters:
//! - In-memory selection agrees with an exhaustive scan
//! - Chunked runs return the same rows for any batch size
//! - Multi-dataset dispatch isolates failures and keeps input order

use filteropt::backend::{relates, FeatureSource, SpatialPredicate};
use filteropt::dataset::{BBox, BackendError, BackendKind, BackendResult, DatasetHandle, SampleRow};
use filteropt::execution::{CancellationToken, ChunkedExecutor, FilterStatus};
use filteropt::expr::IdSetRef;
use filteropt::observability::MetricsRegistry;
use filteropt::{FilterOptimizer, OptimizerConfig};
use geo::{Geometry, Rect};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::sync::Arc;

// =============================================================================
// Helper Functions
// =============================================================================

fn rect(x: f64, y: f64, w: f64, h: f64) -> Geometry<f64> {
    Geometry::Rect(Rect::new((x, y), (x + w, y + h)))
}

struct RandomLayer {
    id: String,
    features: Vec<(i64, Geometry<f64>)>,
}

impl RandomLayer {
    fn new(id: &str, seed: u64, count: i64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let features = (0..count)
            .map(|i| {
                let x = rng.gen_range(0.0..90.0);
                let y = rng.gen_range(0.0..90.0);
                (i, rect(x, y, rng.gen_range(0.5..10.0), rng.gen_range(0.5..10.0)))
            })
            .collect();
        Self {
            id: id.to_string(),
            features,
        }
    }

    fn brute_force(&self, filter: &Geometry<f64>, predicate: SpatialPredicate) -> Vec<i64> {
        self.features
            .iter()
            .filter(|(_, g)| relates(predicate, g, filter))
            .map(|(id, _)| *id)
            .collect()
    }
}

impl FeatureSource for RandomLayer {
    fn dataset_id(&self) -> &str {
        &self.id
    }

    fn features(&self) -> BackendResult<Vec<(i64, Geometry<f64>)>> {
        Ok(self.features.clone())
    }
}

struct Layer {
    id: &'static str,
    kind: BackendKind,
    fail: bool,
    applied: Mutex<Vec<String>>,
}

impl Layer {
    fn new(id: &'static str, kind: BackendKind) -> Self {
        Self {
            id,
            kind,
            fail: false,
            applied: Mutex::new(Vec::new()),
        }
    }
}

impl DatasetHandle for Layer {
    fn dataset_id(&self) -> &str {
        self.id
    }
    fn backend_kind(&self) -> BackendKind {
        self.kind
    }
    fn row_count(&self) -> Option<i64> {
        Some(100)
    }
    fn extent(&self) -> Option<BBox> {
        None
    }
    fn get_sample(&self, n: usize) -> BackendResult<Vec<SampleRow>> {
        Ok((0..n.min(10) as i64).map(|i| SampleRow::new(i, json!({}))).collect())
    }
    fn execute_filter(&self, expression: &str) -> BackendResult<u64> {
        if self.fail {
            return Err(BackendError::Unavailable("connection lost".into()));
        }
        self.applied.lock().push(expression.to_string());
        Ok(expression.len() as u64)
    }
}

// =============================================================================
// In-Memory Selection Tests
// =============================================================================

/// Index-assisted selection equals an exhaustive scan for every predicate.
#[test]
fn test_indexed_selection_matches_scan() {
    let opt = FilterOptimizer::new(OptimizerConfig::default()).unwrap();
    let layer = RandomLayer::new("buildings", 7, 300);
    let mut rng = StdRng::seed_from_u64(99);

    for _ in 0..40 {
        let filter = rect(
            rng.gen_range(0.0..80.0),
            rng.gen_range(0.0..80.0),
            rng.gen_range(1.0..30.0),
            rng.gen_range(1.0..30.0),
        );
        for predicate in SpatialPredicate::ALL {
            let selected = opt
                .indexer()
                .select(&layer, std::slice::from_ref(&filter), &[predicate])
                .unwrap();
            assert_eq!(selected, layer.brute_force(&filter, predicate), "{:?}", predicate);
        }
    }
    assert_eq!(opt.indexer().indexed_rows("buildings"), Some(300));
}

/// Invalidating a dataset drops its index.
#[test]
fn test_invalidate_drops_index() {
    let opt = FilterOptimizer::new(OptimizerConfig::default()).unwrap();
    let layer = RandomLayer::new("buildings", 1, 20);
    opt.indexer()
        .select(&layer, &[rect(0.0, 0.0, 100.0, 100.0)], &[SpatialPredicate::Intersects])
        .unwrap();
    assert!(opt.indexer().is_cached("buildings"));
    opt.invalidate_dataset("buildings");
    assert!(!opt.indexer().is_cached("buildings"));
}

// =============================================================================
// Chunked Execution Tests
// =============================================================================

/// Batch size never changes the selected rows.
#[test]
fn test_chunked_results_independent_of_batch_size() {
    let layer = RandomLayer::new("parcels", 3, 500);
    let filter = rect(20.0, 20.0, 40.0, 40.0);
    let expected = layer.brute_force(&filter, SpatialPredicate::Intersects);
    let ids: Vec<i64> = (0..500).collect();

    for chunk_size in [1, 7, 64, 500, 10_000] {
        let executor = ChunkedExecutor::new(chunk_size, Arc::new(MetricsRegistry::new()));
        let outcome = executor
            .run(
                "parcels",
                &ids,
                None,
                |batch| {
                    Ok(batch
                        .iter()
                        .copied()
                        .filter(|id| relates(SpatialPredicate::Intersects, &layer.features[*id as usize].1, &filter))
                        .collect())
                },
                |_| {},
            )
            .unwrap();
        assert_eq!(outcome.matched, expected, "chunk size {}", chunk_size);
        assert!(!outcome.cancelled);
    }
}

/// An id restriction limits the rows handed to the matcher.
#[test]
fn test_chunked_run_respects_id_restriction() {
    let executor = ChunkedExecutor::new(10, Arc::new(MetricsRegistry::new()));
    let ids: Vec<i64> = (0..100).collect();
    let restrict = IdSetRef::compress_or_list(&(20..40).collect::<Vec<_>>(), 20, 0.5);
    let mut seen = Vec::new();
    let outcome = executor
        .run(
            "parcels",
            &ids,
            Some(&restrict),
            |batch| {
                seen.extend_from_slice(batch);
                Ok(batch.to_vec())
            },
            |_| {},
        )
        .unwrap();
    assert_eq!(outcome.matched, (20..40).collect::<Vec<_>>());
    assert_eq!(seen, (20..40).collect::<Vec<_>>());
    assert_eq!(outcome.total_batches, 2);
}

// =============================================================================
// Dispatch Tests
// =============================================================================

/// One failing dataset does not affect the others.
#[test]
fn test_dispatch_isolates_failures() {
    let opt = FilterOptimizer::new(OptimizerConfig::default()).unwrap();
    let a = Layer::new("a", BackendKind::Server);
    let mut b = Layer::new("b", BackendKind::Server);
    b.fail = true;
    let c = Layer::new("c", BackendKind::EmbeddedSql);

    let outcomes = opt.apply_many(&[(&a, "x = 1"), (&b, "x = 2"), (&c, "x = 33")]);
    let ids: Vec<&str> = outcomes.iter().map(|o| o.dataset_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);

    assert_eq!(outcomes[0].rows(), Some(5));
    assert_eq!(outcomes[1].error().map(|e| e.code()), Some("FILTEROPT_EXECUTION_FAILED"));
    assert_eq!(outcomes[2].rows(), Some(6));
    assert_eq!(opt.metrics().snapshot().executions_failed, 1);
}

/// Mixed batches with unsafe backends still run every dataset.
#[test]
fn test_dispatch_with_flat_file_runs_all() {
    let opt = FilterOptimizer::new(OptimizerConfig::default()).unwrap();
    let a = Layer::new("a", BackendKind::Server);
    let b = Layer::new("b", BackendKind::FlatFile);

    let outcomes = opt.apply_many(&[(&a, "x = 1"), (&b, "\"fid\" = 2")]);
    assert!(outcomes.iter().all(|o| o.is_success()));
    assert_eq!(b.applied.lock().as_slice(), ["\"fid\" = 2".to_string()]);
}

/// Cancellation before dispatch skips every dataset.
#[test]
fn test_cancelled_dispatch_skips_work() {
    let token = CancellationToken::new();
    let opt = FilterOptimizer::new(OptimizerConfig::default())
        .unwrap()
        .with_cancellation(token.clone());
    let a = Layer::new("a", BackendKind::Server);
    token.cancel();

    let outcomes = opt.apply_many(&[(&a, "x = 1")]);
    assert!(matches!(outcomes[0].status, FilterStatus::Skipped));
    assert!(a.applied.lock().is_empty());
}
