//! Combined Rewrite Tests
//!
//! Tests for combined filter rewriting:
//! - Rewritten and naive combinations select the same rows
//! - Dense id lists are compressed into ranges
//! - Rewrites are cached per dataset and dropped on invalidation
//! - Semi-joins over a materialized result select the naive rows

use std::collections::HashSet;

use filteropt::dataset::{BBox, BackendKind, SampleRow};
use filteropt::expr::{
    detect_spatial_predicate, parse_expression, split_conjuncts, strip_outer_parens, Detection, Evaluator,
    FunctionResolver, QualifiedName, SpatialClauseKind, SubqueryRef,
};
use filteropt::rewrite::{CombineOperator, OptimizationKind, RewriteContext};
use filteropt::{FilterOptimizer, OptimizerConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use serde_json::{json, Value};

// =============================================================================
// Helper Functions
// =============================================================================

/// `BuildMbr` yields its corners, `MbrIntersects` tests them against the row bbox
struct MbrResolver;

impl FunctionResolver for MbrResolver {
    fn call(&self, name: &str, args: &[Value], row: &SampleRow) -> Option<Value> {
        match name.to_ascii_lowercase().as_str() {
            "buildmbr" => Some(Value::Array(args.to_vec())),
            "mbrintersects" => {
                let corners = args.get(1)?.as_array()?;
                let c = |i: usize| corners.get(i).and_then(Value::as_f64);
                let query = BBox::new(c(0)?, c(1)?, c(2)?, c(3)?);
                Some(Value::Bool(row.bbox.map_or(false, |b| b.intersects(&query))))
            }
            _ => None,
        }
    }
}

/// Server-side view of one target table, one source table and one
/// materialized result, enough to evaluate membership, `EXISTS` and the
/// semi-join form
struct ServerModel {
    parcels: Vec<SampleRow>,
    rivers: Vec<BBox>,
    result: QualifiedName,
    members: HashSet<i64>,
    semi_join: Regex,
}

fn corners(b: &BBox) -> Value {
    json!([b.min_x, b.min_y, b.max_x, b.max_y])
}

fn bbox_of(value: &Value) -> Option<BBox> {
    let c = value.as_array()?;
    let at = |i: usize| c.get(i).and_then(Value::as_f64);
    Some(BBox::new(at(0)?, at(1)?, at(2)?, at(3)?))
}

impl FunctionResolver for ServerModel {
    fn call(&self, name: &str, args: &[Value], _row: &SampleRow) -> Option<Value> {
        match name.to_ascii_lowercase().as_str() {
            "st_intersects" => {
                let a = bbox_of(args.first()?)?;
                let b = bbox_of(args.get(1)?)?;
                Some(Value::Bool(a.intersects(&b)))
            }
            _ => None,
        }
    }

    fn subquery_values(&self, subquery: &SubqueryRef) -> Option<Vec<Value>> {
        if subquery.table != self.result {
            return None;
        }
        Some(self.members.iter().map(|&id| Value::from(id)).collect())
    }
}

impl ServerModel {
    fn new(parcels: Vec<SampleRow>, rivers: Vec<BBox>, result: QualifiedName, members: HashSet<i64>) -> Self {
        let semi_join = Regex::new(
            r#"^"fid" IN \(SELECT __t\."fid" FROM (.+?) AS __t INNER JOIN (.+?) AS __m ON __t\."fid" = __m\."key" WHERE (.*)\)$"#,
        )
        .unwrap();
        Self {
            parcels,
            rivers,
            result,
            members,
            semi_join,
        }
    }

    /// True when the server would return `row` for `expr`
    fn selects(&self, expr: &str, row: &SampleRow) -> bool {
        let conjuncts = split_conjuncts(expr);
        if conjuncts.len() > 1 {
            return conjuncts.iter().all(|c| self.selects(c, row));
        }
        let text = strip_outer_parens(expr);

        let negated_rest = text
            .get(..3)
            .filter(|head| head.eq_ignore_ascii_case("NOT"))
            .and_then(|_| text.get(3..))
            .filter(|rest| rest.starts_with(' ') || rest.starts_with('('));
        if let Some(rest) = negated_rest {
            return !self.selects(rest, row);
        }

        if let Some(caps) = self.semi_join.captures(text) {
            assert_eq!(&caps[1], "\"public\".\"parcels\"");
            assert_eq!(&caps[2], self.result.render());
            return self
                .parcels
                .iter()
                .filter(|t| t.id == row.id && self.members.contains(&t.id))
                .any(|t| self.selects(&caps[3], t));
        }

        if let Detection::Matched(clause) = detect_spatial_predicate(text) {
            if let SpatialClauseKind::Exists { .. } = clause.kind {
                let body = parse_expression(clause.body_text()).unwrap();
                let evaluator = Evaluator::new(self);
                let outer = corners(&row.bbox.unwrap());
                let found = self.rivers.iter().any(|river| {
                    let joined = SampleRow::new(row.id, json!({ "geom": outer.clone(), "shape": corners(river) }));
                    evaluator.matches(&body, &joined).unwrap()
                });
                return found != clause.negated;
            }
        }

        let parsed = parse_expression(text).unwrap();
        Evaluator::new(self).with_id_column("fid").matches(&parsed, row).unwrap()
    }
}

fn make_rows(rng: &mut StdRng, count: i64) -> Vec<SampleRow> {
    (0..count)
        .map(|id| {
            let x = rng.gen_range(0.0..95.0);
            let y = rng.gen_range(0.0..95.0);
            let kind = if rng.gen_bool(0.5) { "a" } else { "b" };
            SampleRow::new(id, json!({ "kind": kind, "geom": null }))
                .with_geometry(5, BBox::new(x, y, x + 5.0, y + 5.0))
        })
        .collect()
}

fn random_ids(rng: &mut StdRng) -> Vec<i64> {
    if rng.gen_bool(0.5) {
        // Dense run with a few holes
        let start = rng.gen_range(0..100);
        let len = rng.gen_range(25..100);
        (start..start + len).filter(|_| rng.gen_bool(0.9)).collect()
    } else {
        let count = rng.gen_range(1..40);
        (0..count).map(|_| rng.gen_range(0..200)).collect()
    }
}

fn id_list(column: &str, ids: &[i64]) -> String {
    let rendered: Vec<String> = ids.iter().map(|i| i.to_string()).collect();
    format!("\"{}\" IN ({})", column, rendered.join(", "))
}

fn assert_same_rows(naive: &str, rewritten: &str, rows: &[SampleRow]) {
    let resolver = MbrResolver;
    let evaluator = Evaluator::new(&resolver).with_id_column("fid");
    let naive_expr = parse_expression(naive).unwrap();
    let rewritten_expr = parse_expression(rewritten).unwrap();
    for row in rows {
        assert_eq!(
            evaluator.matches(&naive_expr, row).unwrap(),
            evaluator.matches(&rewritten_expr, row).unwrap(),
            "row {} differs\n naive: {}\n rewritten: {}",
            row.id,
            naive,
            rewritten
        );
    }
}

// =============================================================================
// Equivalence Tests
// =============================================================================

/// Any rewrite selects exactly the rows of the naive combination.
#[test]
fn test_rewrite_matches_naive_combination() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let rows = make_rows(&mut rng, 200);
    let optimizer = FilterOptimizer::new(OptimizerConfig::default()).unwrap();
    let backends = [BackendKind::Server, BackendKind::EmbeddedSql, BackendKind::FlatFile];
    let ops = [CombineOperator::And, CombineOperator::Or, CombineOperator::AndNot];

    let mut optimized = 0;
    for round in 0..150 {
        let ids = random_ids(&mut rng);
        let mut old = id_list("fid", &ids);
        if rng.gen_bool(0.3) {
            old = format!("{} AND \"kind\" = 'a'", old);
        }
        let x = rng.gen_range(0..80);
        let y = rng.gen_range(0..80);
        let new = format!("MbrIntersects(\"geom\", BuildMbr({}, {}, {}, {}))", x, y, x + 20, y + 20);

        let backend = backends[round % backends.len()];
        let op = ops[rng.gen_range(0..ops.len())];
        let ctx = RewriteContext::new(format!("layer_{}", round), backend);

        let result = optimizer.rewrite_combined(&old, &new, op, &ctx);
        if result.success {
            optimized += 1;
        }
        assert_same_rows(&op.naive(&old, &new), &result.rewritten_expression, &rows);
    }
    assert!(optimized > 0);
}

/// A semi-join over a materialized selection selects the naive rows.
#[test]
fn test_semi_join_matches_naive_combination() {
    let mut rng = StdRng::seed_from_u64(0x5e31);
    let optimizer = FilterOptimizer::new(OptimizerConfig::default()).unwrap();
    let parcels_table = QualifiedName::new(Some("public"), "parcels");
    let rounds = 40;

    let mut semi_joins = 0;
    for round in 0..rounds {
        let parcels = make_rows(&mut rng, 120);
        let rivers: Vec<BBox> = (0..rng.gen_range(1..6))
            .map(|_| {
                let x = rng.gen_range(0.0..90.0);
                let y = rng.gen_range(0.0..90.0);
                BBox::new(x, y, x + rng.gen_range(2.0..30.0), y + 3.0)
            })
            .collect();
        let members: HashSet<i64> = (0..120).filter(|_| rng.gen_bool(0.4)).collect();
        let result = QualifiedName::new(Some("filteropt_temp"), format!("mv_s1_{:02}", round));
        let model = ServerModel::new(parcels, rivers, result, members);

        let mut old = format!("\"fid\" IN (SELECT \"key\" FROM {})", model.result.render());
        if rng.gen_bool(0.5) {
            old = format!("{} AND \"kind\" = 'a'", old);
        }
        let not = if rng.gen_bool(0.25) { "NOT " } else { "" };
        let new = format!(
            "{}EXISTS (SELECT 1 FROM \"public\".\"rivers\" AS r WHERE ST_Intersects(\"parcels\".\"geom\", r.\"shape\"))",
            not
        );
        let op = if rng.gen_bool(0.5) {
            CombineOperator::And
        } else {
            CombineOperator::AndNot
        };
        let ctx = RewriteContext::new("parcels", BackendKind::Server).with_target(parcels_table.clone());

        let rewritten = optimizer.rewrite_combined(&old, &new, op, &ctx);
        if rewritten.optimization_kind == OptimizationKind::MaterializedSemiJoin {
            semi_joins += 1;
        }
        let naive = op.naive(&old, &new);
        for row in &model.parcels {
            assert_eq!(
                model.selects(&naive, row),
                model.selects(&rewritten.rewritten_expression, row),
                "row {} differs\n naive: {}\n rewritten: {}",
                row.id,
                naive,
                rewritten.rewritten_expression
            );
        }
    }
    assert_eq!(semi_joins, rounds);
}

/// A non-id filter falls back to the naive combination.
#[test]
fn test_attribute_only_filter_falls_back() {
    let optimizer = FilterOptimizer::new(OptimizerConfig::default()).unwrap();
    let ctx = RewriteContext::new("roads", BackendKind::EmbeddedSql);
    let result = optimizer.rewrite_combined("\"kind\" = 'a'", "\"kind\" = 'b'", CombineOperator::Or, &ctx);

    assert!(!result.success);
    assert_eq!(result.optimization_kind, OptimizationKind::None);
    assert_eq!(result.rewritten_expression, "(\"kind\" = 'a') OR (\"kind\" = 'b')");
}

// =============================================================================
// Range Compression Tests
// =============================================================================

/// Ids 1..=1000 combined with a bbox check become a single BETWEEN.
#[test]
fn test_dense_ids_with_spatial_filter() {
    let optimizer = FilterOptimizer::new(OptimizerConfig::default()).unwrap();
    let ids: Vec<i64> = (1..=1000).collect();
    let old = id_list("id", &ids);
    let new = "MbrIntersects(\"geom\", BuildMbr(0, 0, 10, 10))";
    let ctx = RewriteContext::new("parcels", BackendKind::EmbeddedSql).with_id_column("id");

    let result = optimizer.rewrite_combined(&old, new, CombineOperator::And, &ctx);

    assert!(result.success);
    assert_eq!(result.optimization_kind, OptimizationKind::IdListFirstWithRangeCompression);
    assert_eq!(
        result.rewritten_expression,
        format!("\"id\" BETWEEN 1 AND 1000 AND ({})", new)
    );
    assert!(result.estimated_speedup > 1.0);
}

/// Flat-file grammar gets explicit bounds instead of BETWEEN.
#[test]
fn test_flat_file_uses_bounds() {
    let optimizer = FilterOptimizer::new(OptimizerConfig::default()).unwrap();
    let ids: Vec<i64> = (10..60).collect();
    let ctx = RewriteContext::new("shapes", BackendKind::FlatFile);
    let new = "intersects($geometry, geom_from_wkt('POINT(1 1)'))";

    let result = optimizer.rewrite_combined(&id_list("fid", &ids), new, CombineOperator::And, &ctx);

    assert!(result.rewritten_expression.starts_with("(\"fid\" >= 10 AND \"fid\" <= 59)"));
    assert!(!result.rewritten_expression.contains("BETWEEN"));
}

// =============================================================================
// Cache Tests
// =============================================================================

/// Repeated rewrites are served from cache until the dataset is invalidated.
#[test]
fn test_rewrite_cache_follows_dataset_lifecycle() {
    let optimizer = FilterOptimizer::new(OptimizerConfig::default()).unwrap();
    let ids: Vec<i64> = (1..=100).collect();
    let old = id_list("fid", &ids);
    let new = "MbrIntersects(\"geom\", BuildMbr(0, 0, 1, 1))";
    let ctx = RewriteContext::new("roads", BackendKind::EmbeddedSql);

    let first = optimizer.rewrite_combined(&old, new, CombineOperator::And, &ctx);
    let applied = optimizer.metrics().snapshot().rewrites_applied;
    let second = optimizer.rewrite_combined(&old, new, CombineOperator::And, &ctx);
    assert_eq!(first, second);
    assert_eq!(optimizer.metrics().snapshot().rewrites_applied, applied);

    optimizer.invalidate_dataset("roads");
    let third = optimizer.rewrite_combined(&old, new, CombineOperator::And, &ctx);
    assert_eq!(first, third);
    assert_eq!(optimizer.metrics().snapshot().rewrites_applied, applied + 1);
}

/// Different operators never share a cached rewrite.
#[test]
fn test_cache_distinguishes_operators() {
    let optimizer = FilterOptimizer::new(OptimizerConfig::default()).unwrap();
    let old = id_list("fid", &[1, 2, 3]);
    let new = "MbrIntersects(\"geom\", BuildMbr(0, 0, 1, 1))";
    let ctx = RewriteContext::new("roads", BackendKind::EmbeddedSql);

    let and = optimizer.rewrite_combined(&old, new, CombineOperator::And, &ctx);
    let and_not = optimizer.rewrite_combined(&old, new, CombineOperator::AndNot, &ctx);
    assert_ne!(and.rewritten_expression, and_not.rewritten_expression);
    assert!(and_not.rewritten_expression.contains("NOT ("));
}
