//! The optimizer facade held by the host
//!
//! One `FilterOptimizer` owns every cache the optimizer keeps (stats,
//! built expressions, combined rewrites, in-memory indexes) and the
//! session registry of materialized results. There is no process-wide
//! state: hosts construct it, share it, and drive its lifecycle through
//! `invalidate_dataset` and `cleanup_session`.
//!
//! Planning and rewriting never fail. Only `apply_filter` and the
//! dispatcher surface errors, and those are execution errors.

use std::sync::Arc;

use crate::backend::{
    EmbeddedSqlRewriter, FlatFileRewriter, InMemoryIndexer, MaterializationRegistry, MaterializedResultRef,
    ServerBackendRewriter, ServerConnection,
};
use crate::cache::{CacheKey, ExpressionCache};
use crate::config::OptimizerConfig;
use crate::dataset::{BBox, BackendKind, DatasetHandle};
use crate::error::{OptimizerError, OptimizerResult};
use crate::execution::{CancellationToken, FilterOutcome, ParallelDispatcher};
use crate::expr::{FunctionResolver, IdSetRef};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry, ObservationScope};
use crate::planner::{ExplainPlan, FilterPlan, PlanBuilder};
use crate::rewrite::{CombineOperator, CombinedExpressionRewriter, CombinedRewriteResult, RewriteContext};
use crate::stats::{DatasetStats, SelectivityEstimate, SelectivityEstimator, StatsSampler};

pub struct FilterOptimizer {
    config: OptimizerConfig,
    metrics: Arc<MetricsRegistry>,
    sampler: StatsSampler,
    estimator: SelectivityEstimator,
    planner: PlanBuilder,
    cache: ExpressionCache,
    rewriter: CombinedExpressionRewriter,
    server: ServerBackendRewriter,
    embedded: EmbeddedSqlRewriter,
    flat_file: FlatFileRewriter,
    indexer: InMemoryIndexer,
    dispatcher: ParallelDispatcher,
}

impl FilterOptimizer {
    /// Build an optimizer from a validated configuration
    pub fn new(config: OptimizerConfig) -> OptimizerResult<Self> {
        config.validate()?;
        let metrics = Arc::new(MetricsRegistry::new());
        let registry = Arc::new(MaterializationRegistry::new(metrics.clone()));

        Ok(Self {
            sampler: StatsSampler::new(&config.estimator, metrics.clone()),
            estimator: SelectivityEstimator::new(&config.estimator, metrics.clone()),
            planner: PlanBuilder::new(config.planner.clone()),
            cache: ExpressionCache::new(config.cache.capacity, metrics.clone()),
            rewriter: CombinedExpressionRewriter::new(config.ids.clone(), config.cache.capacity, metrics.clone()),
            server: ServerBackendRewriter::new(config.materialization.clone(), registry, metrics.clone()),
            embedded: EmbeddedSqlRewriter::new(config.ids.clone()),
            flat_file: FlatFileRewriter::new(config.ids.clone()),
            indexer: InMemoryIndexer::new(),
            dispatcher: ParallelDispatcher::new(&config.dispatch),
            metrics,
            config,
        })
    }

    /// Resolve host functions when sampling attribute expressions
    pub fn with_resolver(mut self, resolver: Arc<dyn FunctionResolver>) -> Self {
        self.estimator = SelectivityEstimator::new(&self.config.estimator, self.metrics.clone()).with_resolver(resolver);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.dispatcher = ParallelDispatcher::new(&self.config.dispatch).with_cancellation(token);
        self
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn server(&self) -> &ServerBackendRewriter {
        &self.server
    }

    pub fn embedded(&self) -> &EmbeddedSqlRewriter {
        &self.embedded
    }

    pub fn flat_file(&self) -> &FlatFileRewriter {
        &self.flat_file
    }

    pub fn indexer(&self) -> &InMemoryIndexer {
        &self.indexer
    }

    // ==================
    // Planning
    // ==================

    /// Plan from already collected stats
    pub fn build_plan(&self, stats: &DatasetStats, selectivity: &SelectivityEstimate) -> FilterPlan {
        let plan = self.planner.build_plan(stats, selectivity);
        self.record_plan(None, &plan);
        plan
    }

    /// Sample the dataset, estimate selectivity and plan
    pub fn plan_for_dataset(
        &self,
        dataset: &dyn DatasetHandle,
        attribute_expr: Option<&str>,
        source_extent: Option<&BBox>,
    ) -> FilterPlan {
        let stats = self.sampler.sample(dataset);
        let selectivity = self.estimator.estimate(dataset, attribute_expr, source_extent);
        let plan = self
            .planner
            .build_plan_with_expression(&stats, &selectivity, attribute_expr);
        self.record_plan(Some(dataset.dataset_id()), &plan);
        plan
    }

    pub fn explain(
        &self,
        dataset: &dyn DatasetHandle,
        attribute_expr: Option<&str>,
        source_extent: Option<&BBox>,
    ) -> ExplainPlan {
        ExplainPlan::from_plan(&self.plan_for_dataset(dataset, attribute_expr, source_extent))
            .with_dataset(dataset.dataset_id())
    }

    fn record_plan(&self, dataset_id: Option<&str>, plan: &FilterPlan) {
        self.metrics.increment_plans_built();
        let cost = format!("{:.2}", plan.estimated_cost);
        log_event_with_fields(
            Event::PlanBuilt,
            &[
                ("dataset", dataset_id.unwrap_or("")),
                ("strategy", plan.strategy.as_str()),
                ("cost", &cost),
            ],
        );
    }

    // ==================
    // Rewriting
    // ==================

    pub fn rewrite_combined(
        &self,
        old_expr: &str,
        new_expr: &str,
        op: CombineOperator,
        ctx: &RewriteContext,
    ) -> CombinedRewriteResult {
        self.rewriter.rewrite_combined(old_expr, new_expr, op, ctx)
    }

    /// Combined rewrite with the context taken from the dataset handle
    pub fn rewrite_for_dataset(
        &self,
        dataset: &dyn DatasetHandle,
        old_expr: &str,
        new_expr: &str,
        op: CombineOperator,
    ) -> CombinedRewriteResult {
        self.rewrite_combined(old_expr, new_expr, op, &RewriteContext::from_handle(dataset))
    }

    /// Id predicate in the syntax of a backend family
    pub fn id_predicate(&self, backend: BackendKind, column: &str, ids: &IdSetRef) -> String {
        match backend {
            BackendKind::Server | BackendKind::EmbeddedSql => self.embedded.id_predicate(column, ids),
            BackendKind::FlatFile | BackendKind::InMemory => self.flat_file.id_predicate(column, ids),
        }
    }

    /// Cached expression for `key`, building it at most once
    pub fn get_or_build_expression<F>(&self, key: &CacheKey, builder: F) -> String
    where
        F: FnOnce() -> String,
    {
        self.cache.get_or_build_expression(key, builder)
    }

    /// Forget everything cached for a dataset; returns the expression entries removed
    pub fn invalidate_dataset(&self, dataset_id: &str) -> usize {
        let removed = self.cache.invalidate_dataset(dataset_id);
        self.rewriter.invalidate_dataset(dataset_id);
        self.sampler.invalidate(dataset_id);
        self.indexer.clear_cache(dataset_id);
        removed
    }

    // ==================
    // Materialized results
    // ==================

    /// Drop every materialized result of a session
    pub fn cleanup_session(&self, connection: &dyn ServerConnection, session_id: &str) -> usize {
        self.server.registry().cleanup_session(connection, session_id)
    }

    pub fn resolve_materialized(&self, session_id: &str, name: &str) -> OptimizerResult<Arc<MaterializedResultRef>> {
        self.server.registry().resolve(session_id, name)
    }

    // ==================
    // Execution
    // ==================

    /// Apply an expression to a dataset.
    ///
    /// On success the dataset's cached state is invalidated. On failure
    /// nothing cached is touched and the error propagates.
    pub fn apply_filter(&self, dataset: &dyn DatasetHandle, expression: &str) -> OptimizerResult<u64> {
        let dataset_id = dataset.dataset_id();
        let scope = ObservationScope::with_fields(
            "APPLY_FILTER",
            &[("dataset", dataset_id), ("backend", dataset.backend_kind().as_str())],
        );

        if dataset.backend_kind() == BackendKind::FlatFile {
            if let Err(e) = self.flat_file.ensure_no_subquery(expression) {
                let err = OptimizerError::execution(dataset_id, e.to_string());
                self.record_failure(dataset_id, &err);
                scope.fail(&err.to_string());
                return Err(err);
            }
        }

        match dataset.execute_filter(expression) {
            Ok(rows) => {
                self.metrics.increment_executions_ok();
                self.invalidate_dataset(dataset_id);
                let rows_str = rows.to_string();
                log_event_with_fields(Event::FilterApplied, &[("dataset", dataset_id), ("rows", &rows_str)]);
                scope.complete_with_fields(&[("rows", &rows_str)]);
                Ok(rows)
            }
            Err(e) => {
                let err = OptimizerError::from_backend(dataset_id, e);
                self.record_failure(dataset_id, &err);
                scope.fail(&err.to_string());
                Err(err)
            }
        }
    }

    fn record_failure(&self, dataset_id: &str, err: &OptimizerError) {
        self.metrics.increment_executions_failed();
        let reason = err.to_string();
        log_event_with_fields(
            Event::ExecutionFailed,
            &[("dataset", dataset_id), ("code", err.code()), ("reason", &reason)],
        );
    }

    /// Run one filter per dataset, concurrently where the backends allow
    pub fn filter_many<F>(&self, datasets: &[&dyn DatasetHandle], matcher: F) -> Vec<FilterOutcome>
    where
        F: Fn(&dyn DatasetHandle) -> OptimizerResult<u64> + Send + Sync,
    {
        self.dispatcher.filter_many(datasets, matcher)
    }

    /// Apply one expression per dataset through the dispatcher
    pub fn apply_many(&self, requests: &[(&dyn DatasetHandle, &str)]) -> Vec<FilterOutcome> {
        let datasets: Vec<&dyn DatasetHandle> = requests.iter().map(|(d, _)| *d).collect();
        self.filter_many(&datasets, |dataset| {
            let expression = requests
                .iter()
                .find(|(d, _)| d.dataset_id() == dataset.dataset_id())
                .map(|(_, e)| *e)
                .unwrap_or("");
            self.apply_filter(dataset, expression)
        })
    }
}
