//! Rewrite inputs and outputs

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dataset::{BackendKind, DatasetHandle};
use crate::expr::QualifiedName;

/// Boolean operator joining an existing filter and a new one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineOperator {
    And,
    Or,
    AndNot,
}

impl CombineOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            CombineOperator::And => "AND",
            CombineOperator::Or => "OR",
            CombineOperator::AndNot => "AND NOT",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let normalized: Vec<String> = name
            .split(|c: char| c.is_whitespace() || c == '_' || c == '-')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_ascii_uppercase())
            .collect();
        match normalized.join(" ").as_str() {
            "AND" => Some(CombineOperator::And),
            "OR" => Some(CombineOperator::Or),
            "AND NOT" | "ANDNOT" => Some(CombineOperator::AndNot),
            _ => None,
        }
    }

    /// The literal combination `(old) op (new)`.
    ///
    /// An empty side yields the other side unchanged.
    pub fn naive(&self, old: &str, new: &str) -> String {
        let old = old.trim();
        let new = new.trim();
        if old.is_empty() {
            return new.to_string();
        }
        if new.is_empty() {
            return old.to_string();
        }
        format!("({}) {} ({})", old, self.as_str(), new)
    }
}

impl fmt::Display for CombineOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the rewriter needs to know about the target dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteContext {
    pub dataset_id: String,
    pub backend: BackendKind,
    pub id_column: String,
    /// Table backing the dataset, required for semi-join rewrites
    pub target: Option<QualifiedName>,
}

impl RewriteContext {
    pub fn new(dataset_id: impl Into<String>, backend: BackendKind) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            backend,
            id_column: "fid".to_string(),
            target: None,
        }
    }

    pub fn from_handle(handle: &dyn DatasetHandle) -> Self {
        Self::new(handle.dataset_id(), handle.backend_kind()).with_id_column(handle.id_column())
    }

    pub fn with_id_column(mut self, id_column: impl Into<String>) -> Self {
        self.id_column = id_column.into();
        self
    }

    pub fn with_target(mut self, target: QualifiedName) -> Self {
        self.target = Some(target);
        self
    }
}

/// Which optimization a rewrite applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationKind {
    None,
    /// Spatial check restricted to rows of a materialized result
    MaterializedSemiJoin,
    /// Id predicate moved ahead of the spatial predicate
    IdListFirst,
    /// Id list rewritten as ranges with exclusions
    RangeCompression,
    IdListFirstWithRangeCompression,
}

impl OptimizationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationKind::None => "none",
            OptimizationKind::MaterializedSemiJoin => "materialized_semi_join",
            OptimizationKind::IdListFirst => "id_list_first",
            OptimizationKind::RangeCompression => "range_compression",
            OptimizationKind::IdListFirstWithRangeCompression => "id_list_first_with_range_compression",
        }
    }

    /// Expected speedup over the naive combination
    pub fn estimated_speedup(&self) -> f64 {
        match self {
            OptimizationKind::None => 1.0,
            OptimizationKind::MaterializedSemiJoin => 5.0,
            OptimizationKind::IdListFirst => 2.0,
            OptimizationKind::RangeCompression => 1.5,
            OptimizationKind::IdListFirstWithRangeCompression => 3.0,
        }
    }
}

/// Outcome of a combined rewrite; always carries a usable expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedRewriteResult {
    pub success: bool,
    pub rewritten_expression: String,
    pub optimization_kind: OptimizationKind,
    pub estimated_speedup: f64,
}

impl CombinedRewriteResult {
    /// The naive combination, tagged as not optimized
    pub fn fallback(expression: String) -> Self {
        Self {
            success: false,
            rewritten_expression: expression,
            optimization_kind: OptimizationKind::None,
            estimated_speedup: OptimizationKind::None.estimated_speedup(),
        }
    }

    pub fn optimized(expression: String, kind: OptimizationKind) -> Self {
        Self {
            success: true,
            rewritten_expression: expression,
            optimization_kind: kind,
            estimated_speedup: kind.estimated_speedup(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_naive_forms() {
        assert_eq!(CombineOperator::And.naive("a = 1", "b = 2"), "(a = 1) AND (b = 2)");
        assert_eq!(CombineOperator::Or.naive("a = 1", "b = 2"), "(a = 1) OR (b = 2)");
        assert_eq!(CombineOperator::AndNot.naive("a = 1", "b = 2"), "(a = 1) AND NOT (b = 2)");
        assert_eq!(CombineOperator::And.naive("  ", "b = 2"), "b = 2");
        assert_eq!(CombineOperator::AndNot.naive("a = 1", ""), "a = 1");
    }

    #[test]
    fn test_parse_operator() {
        assert_eq!(CombineOperator::parse("and"), Some(CombineOperator::And));
        assert_eq!(CombineOperator::parse("AND NOT"), Some(CombineOperator::AndNot));
        assert_eq!(CombineOperator::parse("and_not"), Some(CombineOperator::AndNot));
        assert_eq!(CombineOperator::parse("xor"), None);
    }

    #[test]
    fn test_speedups() {
        assert!(OptimizationKind::IdListFirst.estimated_speedup() >= 2.0);
        assert!(
            OptimizationKind::IdListFirstWithRangeCompression.estimated_speedup()
                > OptimizationKind::IdListFirst.estimated_speedup()
        );
        let fallback = CombinedRewriteResult::fallback("x".into());
        assert!(!fallback.success);
        assert_eq!(fallback.estimated_speedup, 1.0);
    }
}
