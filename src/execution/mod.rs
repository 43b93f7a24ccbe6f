//! Running filters: batched per dataset, concurrent across datasets

mod cancel;
mod chunked;
mod dispatcher;

pub use cancel::CancellationToken;
pub use chunked::{ChunkProgress, ChunkedExecutor, ChunkedOutcome};
pub use dispatcher::{worker_count, FilterOutcome, FilterStatus, ParallelDispatcher};
