//! Embedded SQL backend
//!
//! Embedded engines evaluate `AND` chains left to right and stop at the
//! first false term, so term order matters: cheap id checks go first,
//! spatial function calls last.

use crate::config::IdSetConfig;
use crate::expr::{
    contains_spatial_call, detect_id_predicate, quote_ident, quote_literal, split_conjuncts, Detection, IdSetRef,
    RangeSyntax,
};

use super::predicate::SpatialPredicate;

/// Id predicate text for a backend's range syntax.
///
/// A single id is an equality, short lists are `IN`, long lists are range
/// compressed when dense enough and `IN` otherwise.
pub fn build_id_predicate(column: &str, ids: &IdSetRef, config: &IdSetConfig, syntax: RangeSyntax) -> String {
    if let IdSetRef::List(list) = ids {
        if list.len() > config.in_list_max {
            if let Some(ranges) = IdSetRef::compress(list, config.range_min_ids, config.range_coverage_threshold) {
                return ranges.to_predicate(column, syntax);
            }
        }
    }
    ids.to_predicate(column, syntax)
}

/// Relative evaluation cost of a conjunct
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CostClass {
    IdLookup = 0,
    Attribute = 1,
    Spatial = 2,
}

pub fn cost_class(conjunct: &str, id_column: &str) -> CostClass {
    if contains_spatial_call(conjunct) {
        CostClass::Spatial
    } else if matches!(detect_id_predicate(conjunct, id_column), Detection::Matched(_)) {
        CostClass::IdLookup
    } else {
        CostClass::Attribute
    }
}

/// R-tree virtual table used for envelope pre-filtering
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialIndexRef {
    pub table: String,
    pub geometry_column: String,
}

pub struct EmbeddedSqlRewriter {
    ids: IdSetConfig,
}

impl EmbeddedSqlRewriter {
    pub fn new(ids: IdSetConfig) -> Self {
        Self { ids }
    }

    pub fn id_predicate(&self, column: &str, ids: &IdSetRef) -> String {
        build_id_predicate(column, ids, &self.ids, RangeSyntax::Between)
    }

    /// Sort top-level conjuncts cheapest first, keeping the order within a class
    pub fn reorder_conjuncts(&self, expr: &str, id_column: &str) -> String {
        let conjuncts = split_conjuncts(expr);
        if conjuncts.len() < 2 {
            return expr.trim().to_string();
        }
        let mut ranked: Vec<(CostClass, String)> = conjuncts
            .into_iter()
            .map(|c| (cost_class(&c, id_column), c))
            .collect();
        ranked.sort_by_key(|(class, _)| *class);
        ranked
            .iter()
            .map(|(_, c)| format!("({})", c))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// Spatial predicate against a literal source geometry.
    ///
    /// With an R-tree the candidate rows are narrowed by envelope first; the
    /// narrowing is skipped for predicates that do not imply overlap.
    pub fn spatial_predicate(
        &self,
        geometry_column: &str,
        source_geometry: &str,
        predicate: SpatialPredicate,
        index: Option<&SpatialIndexRef>,
    ) -> String {
        let exact = format!(
            "{}({}, {}) = 1",
            predicate.embedded_function(),
            quote_ident(geometry_column),
            source_geometry
        );
        match index {
            Some(index) if predicate.implies_bbox_overlap() => format!(
                "ROWID IN (SELECT ROWID FROM SpatialIndex WHERE f_table_name = {} \
                 AND f_geometry_column = {} AND search_frame = {}) AND {}",
                quote_literal(&index.table),
                quote_literal(&index.geometry_column),
                source_geometry,
                exact
            ),
            _ => exact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewriter() -> EmbeddedSqlRewriter {
        EmbeddedSqlRewriter::new(IdSetConfig::default())
    }

    #[test]
    fn test_id_predicate_forms() {
        let r = rewriter();
        assert_eq!(r.id_predicate("fid", &IdSetRef::from_ids([7])), "\"fid\" = 7");
        assert_eq!(r.id_predicate("fid", &IdSetRef::from_ids([3, 1, 2])), "\"fid\" IN (1, 2, 3)");

        let dense = IdSetRef::from_ids((1..=600).filter(|i| i % 50 != 0));
        assert_eq!(
            r.id_predicate("fid", &dense),
            "\"fid\" BETWEEN 1 AND 599 AND \"fid\" NOT IN (50, 100, 150, 200, 250, 300, 350, 400, 450, 500, 550)"
        );
    }

    #[test]
    fn test_sparse_long_list_stays_in_list() {
        let r = rewriter();
        let sparse = IdSetRef::from_ids((0..600).map(|i| i * 10));
        assert!(r.id_predicate("fid", &sparse).starts_with("\"fid\" IN (0, 10, 20"));
    }

    #[test]
    fn test_reorder_puts_ids_first_and_spatial_last() {
        let r = rewriter();
        let expr = "Intersects(\"geom\", MakePoint(1, 2)) = 1 AND kind = 'a' AND \"fid\" IN (1, 2) AND area > 3";
        assert_eq!(
            r.reorder_conjuncts(expr, "fid"),
            "(\"fid\" IN (1, 2)) AND (kind = 'a') AND (area > 3) AND (Intersects(\"geom\", MakePoint(1, 2)) = 1)"
        );
    }

    #[test]
    fn test_reorder_leaves_disjunction_alone() {
        let r = rewriter();
        let expr = "Intersects(\"geom\", g) = 1 OR \"fid\" = 1";
        assert_eq!(r.reorder_conjuncts(expr, "fid"), expr);
    }

    #[test]
    fn test_spatial_predicate_with_rtree() {
        let r = rewriter();
        let index = SpatialIndexRef {
            table: "parcels".to_string(),
            geometry_column: "geom".to_string(),
        };
        let expr = r.spatial_predicate("geom", "BuildMbr(0, 0, 1, 1)", SpatialPredicate::Intersects, Some(&index));
        assert!(expr.starts_with("ROWID IN (SELECT ROWID FROM SpatialIndex WHERE f_table_name = 'parcels'"));
        assert!(expr.ends_with("AND Intersects(\"geom\", BuildMbr(0, 0, 1, 1)) = 1"));

        let disjoint = r.spatial_predicate("geom", "g", SpatialPredicate::Disjoint, Some(&index));
        assert_eq!(disjoint, "Disjoint(\"geom\", g) = 1");
    }
}
