//! Flat-file backend
//!
//! The flat-file expression grammar has no subqueries and no `BETWEEN`.
//! Only literal id predicates are ever emitted.

use regex::Regex;

use crate::config::IdSetConfig;
use crate::error::{OptimizerError, OptimizerResult};
use crate::expr::{tokenize, IdSetRef, RangeSyntax};

use super::embedded::build_id_predicate;

pub struct FlatFileRewriter {
    ids: IdSetConfig,
}

impl FlatFileRewriter {
    pub fn new(ids: IdSetConfig) -> Self {
        Self { ids }
    }

    pub fn id_predicate(&self, column: &str, ids: &IdSetRef) -> String {
        build_id_predicate(column, ids, &self.ids, RangeSyntax::Bounds)
    }

    /// Reject expressions the grammar cannot run
    pub fn ensure_no_subquery(&self, expr: &str) -> OptimizerResult<()> {
        let has_select = match tokenize(expr) {
            Ok(tokens) => tokens.iter().any(|t| t.is_keyword("SELECT")),
            Err(_) => Regex::new(r"(?i)\bselect\b")
                .map(|re| re.is_match(expr))
                .unwrap_or(true),
        };
        if has_select {
            return Err(OptimizerError::Rewrite(
                "flat-file expressions cannot contain subqueries".to_string(),
            ));
        }
        Ok(())
    }

    /// Id predicate combined with an existing expression, id check first
    pub fn restrict_to_ids(&self, expr: &str, column: &str, ids: &IdSetRef) -> OptimizerResult<String> {
        self.ensure_no_subquery(expr)?;
        let id_text = self.id_predicate(column, ids);
        if expr.trim().is_empty() {
            return Ok(id_text);
        }
        Ok(format!("{} AND ({})", id_text, expr.trim()))
    }
}
