//! Batched evaluation over large row sets
//!
//! Rows are visited in the order given, `chunk_size` at a time. Each batch is
//! handed to a caller-supplied matcher and the matching ids are accumulated
//! as a set, so the result does not depend on batch boundaries.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use super::cancel::CancellationToken;
use crate::dataset::BackendResult;
use crate::error::{OptimizerError, OptimizerResult};
use crate::expr::IdSetRef;
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};
use crate::planner::FilterPlan;

/// Progress after a finished batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkProgress {
    /// 1-based index of the batch just finished
    pub batch: usize,
    pub total_batches: usize,
    pub rows_processed: usize,
    pub total_rows: usize,
    pub matched_so_far: usize,
}

/// Result of a chunked run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkedOutcome {
    /// Matching ids, ascending
    pub matched: Vec<i64>,
    pub batches_processed: usize,
    pub total_batches: usize,
    /// True if the run stopped early on cancellation
    pub cancelled: bool,
}

pub struct ChunkedExecutor {
    chunk_size: usize,
    token: CancellationToken,
    metrics: Arc<MetricsRegistry>,
}

impl ChunkedExecutor {
    pub fn new(chunk_size: usize, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            token: CancellationToken::new(),
            metrics,
        }
    }

    /// Executor sized by a plan; unchunked plans run as a single batch
    pub fn for_plan(plan: &FilterPlan, metrics: Arc<MetricsRegistry>) -> Self {
        let size = if plan.is_chunked() { plan.chunk_size as usize } else { usize::MAX };
        Self::new(size, metrics)
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Run `matcher` over `ids` in batches.
    ///
    /// With `restrict`, ids outside the set are skipped before batching.
    /// A matcher error aborts the run as an execution error.
    pub fn run<M, P>(
        &self,
        dataset_id: &str,
        ids: &[i64],
        restrict: Option<&IdSetRef>,
        mut matcher: M,
        mut progress: P,
    ) -> OptimizerResult<ChunkedOutcome>
    where
        M: FnMut(&[i64]) -> BackendResult<Vec<i64>>,
        P: FnMut(&ChunkProgress),
    {
        let rows: Vec<i64> = match restrict {
            Some(set) => ids.iter().copied().filter(|id| set.contains(*id)).collect(),
            None => ids.to_vec(),
        };
        let total_batches = rows.len().div_ceil(self.chunk_size);

        let mut matched = BTreeSet::new();
        let mut processed = 0usize;
        let mut batches = 0usize;

        for batch in rows.chunks(self.chunk_size) {
            if self.token.is_cancelled() {
                let done = batches.to_string();
                let total = total_batches.to_string();
                log_event_with_fields(
                    Event::ChunkedRunCancelled,
                    &[("dataset", dataset_id), ("batches_done", &done), ("batches_total", &total)],
                );
                return Ok(ChunkedOutcome {
                    matched: matched.into_iter().collect(),
                    batches_processed: batches,
                    total_batches,
                    cancelled: true,
                });
            }

            let hits = matcher(batch).map_err(|e| OptimizerError::from_backend(dataset_id, e))?;
            matched.extend(hits);
            batches += 1;
            processed += batch.len();
            self.metrics.add_chunks_processed(1);

            let report = ChunkProgress {
                batch: batches,
                total_batches,
                rows_processed: processed,
                total_rows: rows.len(),
                matched_so_far: matched.len(),
            };
            let batch_str = batches.to_string();
            log_event_with_fields(Event::ChunkProcessed, &[("dataset", dataset_id), ("batch", &batch_str)]);
            progress(&report);
        }

        Ok(ChunkedOutcome {
            matched: matched.into_iter().collect(),
            batches_processed: batches,
            total_batches,
            cancelled: false,
        })
    }
}
