//! Combined expression rewriting
//!
//! Rewrites `(old) op (new)` into a cheaper equivalent when `old` carries
//! reusable structure. Every rewrite selects exactly the rows the naive
//! combination selects; only evaluation order and representation change.
//!
//! Rules, tried in order:
//! 1. `old` restricts ids to a materialized result and `new` is a spatial
//!    EXISTS against another table: evaluate the EXISTS only over rows of
//!    the materialized result (server backends, AND / AND NOT).
//! 2. `old` restricts ids to literal ids and `new` is spatial: put the id
//!    check first, compressing long lists into ranges where dense.
//! 3. `old` holds a compressible id list: compress it in place.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use super::types::{CombineOperator, CombinedRewriteResult, OptimizationKind, RewriteContext};
use crate::cache::{CacheKey, SourceFingerprint};
use crate::config::IdSetConfig;
use crate::dataset::BackendKind;
use crate::expr::{
    contains_spatial_call, detect_id_predicate, detect_spatial_predicate, quote_ident, split_conjuncts,
    Detection, IdPredicate, IdSetRef, RangeSyntax, SpatialClause, SpatialClauseKind, SubqueryRef,
};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};

const TARGET_ALIAS: &str = "__t";
const RESULT_ALIAS: &str = "__m";

/// How each backend writes id ranges
pub fn range_syntax(backend: BackendKind) -> RangeSyntax {
    match backend {
        BackendKind::Server | BackendKind::EmbeddedSql => RangeSyntax::Between,
        BackendKind::FlatFile | BackendKind::InMemory => RangeSyntax::Bounds,
    }
}

/// Pattern-based rewriter with a result cache
pub struct CombinedExpressionRewriter {
    ids: IdSetConfig,
    results: Mutex<LruCache<CacheKey, CombinedRewriteResult>>,
    metrics: Arc<MetricsRegistry>,
}

impl CombinedExpressionRewriter {
    pub fn new(ids: IdSetConfig, capacity: usize, metrics: Arc<MetricsRegistry>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            ids,
            results: Mutex::new(LruCache::new(capacity)),
            metrics,
        }
    }

    /// Rewrite `(old) op (new)`; falls back to the naive form when no rule applies
    pub fn rewrite_combined(
        &self,
        old: &str,
        new: &str,
        op: CombineOperator,
        ctx: &RewriteContext,
    ) -> CombinedRewriteResult {
        if old.trim().is_empty() || new.trim().is_empty() {
            return CombinedRewriteResult::fallback(op.naive(old, new));
        }

        let key = cache_key(old, new, op, ctx);
        if let Some(hit) = self.results.lock().get(&key).cloned() {
            return hit;
        }

        let result = self.compute(old, new, op, ctx);
        self.results.lock().put(key, result.clone());
        result
    }

    /// Forget cached rewrites for one dataset
    pub fn invalidate_dataset(&self, dataset_id: &str) -> usize {
        let mut results = self.results.lock();
        let doomed: Vec<CacheKey> = results
            .iter()
            .filter(|(k, _)| k.dataset_id() == dataset_id)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            results.pop(key);
        }
        doomed.len()
    }

    pub fn cached_results(&self) -> usize {
        self.results.lock().len()
    }

    fn compute(&self, old: &str, new: &str, op: CombineOperator, ctx: &RewriteContext) -> CombinedRewriteResult {
        let mut missed: Vec<String> = Vec::new();

        let conjuncts = split_conjuncts(old);
        let mut id_match = None;
        for (idx, conjunct) in conjuncts.iter().enumerate() {
            match detect_id_predicate(conjunct, &ctx.id_column) {
                Detection::Matched(predicate) => {
                    id_match = Some((idx, predicate));
                    break;
                }
                Detection::Malformed(reason) => missed.push(reason),
                Detection::NoMatch => {}
            }
        }

        let spatial = match detect_spatial_predicate(new) {
            Detection::Matched(clause) => Some(clause),
            Detection::Malformed(reason) => {
                missed.push(reason);
                None
            }
            Detection::NoMatch => None,
        };
        let new_is_spatial = spatial.is_some() || contains_spatial_call(new);

        if let Some((idx, predicate)) = id_match {
            let rest: Vec<&str> = conjuncts
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != idx)
                .map(|(_, c)| c.as_str())
                .collect();

            let rewritten = match &predicate {
                IdPredicate::Subquery { column, source } => self
                    .semi_join(column, source, spatial.as_ref(), op, ctx, &rest)
                    .map(|expr| (expr, OptimizationKind::MaterializedSemiJoin)),
                IdPredicate::Ids { column, ids } => self.id_first(column, ids, new, new_is_spatial, op, ctx, &rest),
            };

            if let Some((expression, kind)) = rewritten {
                self.metrics.increment_rewrites_applied();
                log_event_with_fields(
                    Event::RewriteApplied,
                    &[("dataset", &ctx.dataset_id), ("kind", kind.as_str())],
                );
                return CombinedRewriteResult::optimized(expression, kind);
            }
        }

        match missed.first() {
            Some(reason) => {
                self.metrics.increment_rewrites_missed();
                log_event_with_fields(
                    Event::RewriteMissed,
                    &[("dataset", &ctx.dataset_id), ("reason", reason)],
                );
            }
            None => self.metrics.increment_rewrites_fallback(),
        }
        CombinedRewriteResult::fallback(op.naive(old, new))
    }

    fn semi_join(
        &self,
        column: &str,
        source: &SubqueryRef,
        spatial: Option<&SpatialClause>,
        op: CombineOperator,
        ctx: &RewriteContext,
        rest: &[&str],
    ) -> Option<String> {
        if ctx.backend != BackendKind::Server || op == CombineOperator::Or {
            return None;
        }
        let target = ctx.target.as_ref()?;
        let clause = spatial?;
        let (exists_source, alias) = match &clause.kind {
            SpatialClauseKind::Exists { source, alias } => (source, alias),
            SpatialClauseKind::Call => return None,
        };
        if exists_source.name.eq_ignore_ascii_case(&target.name) {
            return None;
        }
        let body = clause.rebind_body(&target.name, TARGET_ALIAS)?;

        let negate = clause.negated != (op == CombineOperator::AndNot);
        let alias_clause = alias
            .as_deref()
            .map(|a| format!("AS {} ", render_alias(a)))
            .unwrap_or_default();
        let exists = format!(
            "{}EXISTS (SELECT 1 FROM {} {}WHERE {})",
            if negate { "NOT " } else { "" },
            exists_source.render(),
            alias_clause,
            body
        );

        let col = quote_ident(column);
        let semi = format!(
            "{col} IN (SELECT {t}.{col} FROM {target} AS {t} INNER JOIN {mv} AS {m} ON {t}.{col} = {m}.{key} WHERE {exists})",
            col = col,
            t = TARGET_ALIAS,
            m = RESULT_ALIAS,
            target = target.render(),
            mv = source.table.render(),
            key = quote_ident(source.column.name()),
            exists = exists,
        );
        Some(join_conjuncts(semi, rest, None))
    }

    #[allow(clippy::too_many_arguments)]
    fn id_first(
        &self,
        column: &str,
        ids: &IdSetRef,
        new: &str,
        new_is_spatial: bool,
        op: CombineOperator,
        ctx: &RewriteContext,
        rest: &[&str],
    ) -> Option<(String, OptimizationKind)> {
        let (set, compressed) = match ids {
            IdSetRef::List(list) if list.len() >= self.ids.range_min_ids => {
                match IdSetRef::compress(list, self.ids.range_min_ids, self.ids.range_coverage_threshold) {
                    Some(ranges) => (ranges, true),
                    None => (ids.clone(), false),
                }
            }
            _ => (ids.clone(), false),
        };
        let id_text = set.to_predicate(column, range_syntax(ctx.backend));

        if new_is_spatial {
            let kind = if compressed {
                OptimizationKind::IdListFirstWithRangeCompression
            } else {
                OptimizationKind::IdListFirst
            };
            match op {
                CombineOperator::And => {
                    return Some((join_conjuncts(id_text, rest, Some(format!("({})", new))), kind))
                }
                CombineOperator::AndNot => {
                    return Some((join_conjuncts(id_text, rest, Some(format!("NOT ({})", new))), kind))
                }
                CombineOperator::Or if rest.is_empty() => {
                    return Some((format!("({}) OR ({})", id_text, new), kind))
                }
                CombineOperator::Or => {}
            }
        }

        if compressed {
            let old_rewritten = join_conjuncts(id_text, rest, None);
            return Some((op.naive(&old_rewritten, new), OptimizationKind::RangeCompression));
        }
        None
    }
}

/// `head AND (rest...) [AND tail]`
fn join_conjuncts(head: String, rest: &[&str], tail: Option<String>) -> String {
    let mut parts = vec![head];
    parts.extend(rest.iter().map(|r| format!("({})", r)));
    parts.extend(tail);
    parts.join(" AND ")
}

/// Keep simple lower-case aliases bare so unquoted references still match
fn render_alias(alias: &str) -> String {
    let simple = alias
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if simple {
        alias.to_string()
    } else {
        quote_ident(alias)
    }
}

fn cache_key(old: &str, new: &str, op: CombineOperator, ctx: &RewriteContext) -> CacheKey {
    let target = ctx.target.as_ref().map(|t| t.render()).unwrap_or_default();
    CacheKey::new(
        ctx.dataset_id.clone(),
        [op.as_str()],
        None,
        SourceFingerprint::of_geometries([old, new, ctx.id_column.as_str(), target.as_str()]),
        ctx.backend,
    )
}
