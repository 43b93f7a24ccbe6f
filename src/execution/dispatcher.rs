//! Concurrent filtering of independent datasets
//!
//! One filter per dataset runs on a bounded rayon pool, but only when every
//! dataset in the batch belongs to a backend family that tolerates
//! concurrent access. A single unsafe member downgrades the whole batch to
//! sequential execution.

use rayon::prelude::*;
use rayon::ThreadPool;

use super::cancel::CancellationToken;
use crate::config::DispatchConfig;
use crate::dataset::DatasetHandle;
use crate::error::{OptimizerError, OptimizerResult};
use crate::observability::{log_event_with_fields, Event};

/// How one dataset's filter ended
#[derive(Debug, Clone, PartialEq)]
pub enum FilterStatus {
    Completed { rows: u64 },
    Failed(OptimizerError),
    /// Not started because cancellation was requested
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutcome {
    pub dataset_id: String,
    pub status: FilterStatus,
}

impl FilterOutcome {
    fn from_result(dataset_id: &str, result: OptimizerResult<u64>) -> Self {
        let status = match result {
            Ok(rows) => FilterStatus::Completed { rows },
            Err(OptimizerError::Cancelled) => FilterStatus::Skipped,
            Err(e) => FilterStatus::Failed(e),
        };
        Self {
            dataset_id: dataset_id.to_string(),
            status,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, FilterStatus::Completed { .. })
    }

    pub fn rows(&self) -> Option<u64> {
        match self.status {
            FilterStatus::Completed { rows } => Some(rows),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&OptimizerError> {
        match &self.status {
            FilterStatus::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Worker count: `max_workers`, leaving one core free, never below one
pub fn worker_count(max_workers: usize) -> usize {
    let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    max_workers.min(cores.saturating_sub(1)).max(1)
}

pub struct ParallelDispatcher {
    workers: usize,
    pool: Option<ThreadPool>,
    token: CancellationToken,
}

impl ParallelDispatcher {
    pub fn new(config: &DispatchConfig) -> Self {
        let workers = worker_count(config.max_workers);
        let pool = if workers > 1 {
            rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|i| format!("filteropt-dispatch-{}", i))
                .build()
                .ok()
        } else {
            None
        };
        Self {
            workers,
            pool,
            token: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// True if this batch may run concurrently
    pub fn can_parallelize(datasets: &[&dyn DatasetHandle]) -> bool {
        datasets.iter().all(|d| d.backend_kind().is_concurrency_safe())
    }

    /// Run `filter` once per dataset; outcomes come back in input order
    pub fn filter_many<F>(&self, datasets: &[&dyn DatasetHandle], filter: F) -> Vec<FilterOutcome>
    where
        F: Fn(&dyn DatasetHandle) -> OptimizerResult<u64> + Send + Sync,
    {
        let count = datasets.len().to_string();
        let safe = Self::can_parallelize(datasets);
        let parallel = safe && datasets.len() > 1 && self.pool.is_some();

        if !safe {
            let unsafe_ids: Vec<&str> = datasets
                .iter()
                .filter(|d| !d.backend_kind().is_concurrency_safe())
                .map(|d| d.dataset_id())
                .collect();
            let joined = unsafe_ids.join(",");
            log_event_with_fields(Event::DispatchDowngraded, &[("datasets", &joined)]);
        }
        let mode = if parallel { "parallel" } else { "sequential" };
        log_event_with_fields(Event::DispatchStart, &[("datasets", &count), ("mode", mode)]);

        let run_one = |dataset: &&dyn DatasetHandle| -> FilterOutcome {
            let result = self.token.check().and_then(|_| filter(*dataset));
            FilterOutcome::from_result(dataset.dataset_id(), result)
        };

        let outcomes: Vec<FilterOutcome> = match (&self.pool, parallel) {
            (Some(pool), true) => pool.install(|| datasets.par_iter().map(run_one).collect()),
            _ => datasets.iter().map(run_one).collect(),
        };

        let failed = outcomes
            .iter()
            .filter(|o| o.error().is_some())
            .count()
            .to_string();
        log_event_with_fields(Event::DispatchComplete, &[("datasets", &count), ("failed", &failed)]);
        outcomes
    }
}

impl Default for ParallelDispatcher {
    fn default() -> Self {
        Self::new(&DispatchConfig::default())
    }
}
