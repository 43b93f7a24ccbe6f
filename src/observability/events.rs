//! Observable optimizer events

use std::fmt;

use super::logger::Severity;

/// Observable events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Estimation
    /// Dataset statistics sampled (cache miss)
    StatsSampled,
    /// Backend reported an unusable row count
    StatsRowCountUnknown,
    /// Sampling failed or expression unparseable; conservative fallback used
    EstimationDegraded,

    // Planning
    /// Filter plan built
    PlanBuilt,

    // Rewriting
    /// Combined expression rewritten
    RewriteApplied,
    /// Pattern detected but malformed; naive combination used
    RewriteMissed,

    // Expression cache
    CacheHit,
    CacheMiss,
    CacheEvicted,
    CacheInvalidated,

    // Materialization
    MaterializationCreated,
    /// Live result of the same session reused
    MaterializationReused,
    /// Backend refused; inline expression used instead
    MaterializationFailed,
    MaterializationDropped,
    /// DROP failed; result stays registered
    MaterializationDropFailed,
    SessionCleanup,

    // Execution
    ChunkProcessed,
    ChunkedRunCancelled,
    DispatchStart,
    /// A concurrency-unsafe member forced sequential execution
    DispatchDowngraded,
    DispatchComplete,
    FilterApplied,
    ExecutionFailed,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::StatsSampled => "STATS_SAMPLED",
            Event::StatsRowCountUnknown => "STATS_ROW_COUNT_UNKNOWN",
            Event::EstimationDegraded => "ESTIMATION_DEGRADED",
            Event::PlanBuilt => "PLAN_BUILT",
            Event::RewriteApplied => "REWRITE_APPLIED",
            Event::RewriteMissed => "REWRITE_MISSED",
            Event::CacheHit => "CACHE_HIT",
            Event::CacheMiss => "CACHE_MISS",
            Event::CacheEvicted => "CACHE_EVICTED",
            Event::CacheInvalidated => "CACHE_INVALIDATED",
            Event::MaterializationCreated => "MATERIALIZATION_CREATED",
            Event::MaterializationReused => "MATERIALIZATION_REUSED",
            Event::MaterializationFailed => "MATERIALIZATION_FAILED",
            Event::MaterializationDropped => "MATERIALIZATION_DROPPED",
            Event::MaterializationDropFailed => "MATERIALIZATION_DROP_FAILED",
            Event::SessionCleanup => "SESSION_CLEANUP",
            Event::ChunkProcessed => "CHUNK_PROCESSED",
            Event::ChunkedRunCancelled => "CHUNKED_RUN_CANCELLED",
            Event::DispatchStart => "DISPATCH_START",
            Event::DispatchDowngraded => "DISPATCH_DOWNGRADED",
            Event::DispatchComplete => "DISPATCH_COMPLETE",
            Event::FilterApplied => "FILTER_APPLIED",
            Event::ExecutionFailed => "EXECUTION_FAILED",
        }
    }

    /// Severity this event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::ExecutionFailed => Severity::Error,
            Event::EstimationDegraded
            | Event::RewriteMissed
            | Event::MaterializationFailed
            | Event::MaterializationDropFailed
            | Event::StatsRowCountUnknown
            | Event::DispatchDowngraded => Severity::Warn,
            Event::CacheHit | Event::CacheMiss | Event::ChunkProcessed => Severity::Trace,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
