//! Id Predicate Tests
//!
//! Tests for id sets and their rendered predicates:
//! - Range compression reduces back to the exact original set
//! - Rendered predicates select exactly the ids in the set, in every syntax
//! - Flat-file predicates never contain subqueries

use filteropt::backend::build_id_predicate;
use filteropt::config::IdSetConfig;
use filteropt::dataset::{BackendKind, SampleRow};
use filteropt::expr::{parse_expression, Evaluator, IdSetRef, NoFunctions, RangeSyntax};
use filteropt::{FilterOptimizer, OptimizerConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::collections::BTreeSet;

// =============================================================================
// Helper Functions
// =============================================================================

fn dense_ids(rng: &mut StdRng) -> Vec<i64> {
    let start = rng.gen_range(-500..500);
    let len = rng.gen_range(20..800);
    (start..start + len).filter(|_| rng.gen_bool(0.85)).collect()
}

fn sparse_ids(rng: &mut StdRng) -> Vec<i64> {
    let count = rng.gen_range(20..200);
    (0..count).map(|_| rng.gen_range(-100_000..100_000)).collect()
}

fn selected(predicate: &str, candidates: impl Iterator<Item = i64>) -> BTreeSet<i64> {
    let expr = parse_expression(predicate).unwrap();
    let resolver = NoFunctions;
    let evaluator = Evaluator::new(&resolver).with_id_column("fid");
    candidates
        .filter(|id| evaluator.matches(&expr, &SampleRow::new(*id, json!({}))).unwrap())
        .collect()
}

// =============================================================================
// Round-Trip Tests
// =============================================================================

/// Compressed and uncompressed forms both reduce to the original set.
#[test]
fn test_compression_round_trip_both_branches() {
    let mut rng = StdRng::seed_from_u64(2024);
    let mut compressed = 0;
    let mut kept_as_list = 0;

    for round in 0..300 {
        let ids = if round % 2 == 0 { dense_ids(&mut rng) } else { sparse_ids(&mut rng) };
        let expected: BTreeSet<i64> = ids.iter().copied().collect();

        let set = IdSetRef::compress_or_list(&ids, 20, 0.5);
        if set.is_compressed() {
            compressed += 1;
            assert!(set.coverage() >= 0.5);
        } else {
            kept_as_list += 1;
        }
        assert_eq!(set.to_ids(), expected.iter().copied().collect::<Vec<_>>());
        assert_eq!(set.len(), expected.len() as u128);
    }

    assert!(compressed > 0, "dense inputs never compressed");
    assert!(kept_as_list > 0, "sparse inputs always compressed");
}

// =============================================================================
// Rendered Predicate Tests
// =============================================================================

/// Rendered predicates select exactly the set, with BETWEEN or bounds.
#[test]
fn test_rendered_predicates_select_exact_set() {
    let mut rng = StdRng::seed_from_u64(7);
    let config = IdSetConfig {
        in_list_max: 30,
        ..IdSetConfig::default()
    };

    for round in 0..60 {
        let ids = if round % 3 == 0 { sparse_ids(&mut rng) } else { dense_ids(&mut rng) };
        let expected: BTreeSet<i64> = ids.iter().copied().collect();
        let lo = *expected.iter().next().unwrap() - 5;
        let hi = *expected.iter().last().unwrap() + 5;
        let set = IdSetRef::from_ids(ids);

        for syntax in [RangeSyntax::Between, RangeSyntax::Bounds] {
            let predicate = build_id_predicate("fid", &set, &config, syntax);
            // Sparse sets are checked against their own members plus neighbours
            let candidates: Vec<i64> = if hi - lo > 5_000 {
                expected.iter().flat_map(|id| [id - 1, *id, id + 1]).collect()
            } else {
                (lo..=hi).collect()
            };
            assert_eq!(selected(&predicate, candidates.into_iter()), expected, "{}", predicate);
        }
    }
}

/// A single id renders as an equality, a handful as an IN list.
#[test]
fn test_small_sets_render_literally() {
    let opt = FilterOptimizer::new(OptimizerConfig::default()).unwrap();
    assert_eq!(
        opt.id_predicate(BackendKind::FlatFile, "fid", &IdSetRef::from_ids([42])),
        "\"fid\" = 42"
    );
    assert_eq!(
        opt.id_predicate(BackendKind::EmbeddedSql, "fid", &IdSetRef::from_ids([3, 1, 2])),
        "\"fid\" IN (1, 2, 3)"
    );
}

/// Flat-file id predicates are literal and pass the subquery guard.
#[test]
fn test_flat_file_predicates_have_no_subquery() {
    let opt = FilterOptimizer::new(OptimizerConfig::default()).unwrap();
    let ids: Vec<i64> = (0..5_000).filter(|i| i % 7 != 0).collect();
    let predicate = opt.id_predicate(BackendKind::FlatFile, "fid", &IdSetRef::from_ids(ids));

    assert!(!predicate.to_ascii_uppercase().contains("SELECT"));
    assert!(opt.flat_file().ensure_no_subquery(&predicate).is_ok());
    assert!(opt
        .flat_file()
        .ensure_no_subquery("\"fid\" IN (SELECT \"key\" FROM mv)")
        .is_err());
}
