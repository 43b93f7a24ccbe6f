//! Expression cache
//!
//! Maps (dataset, predicates, buffer, source fingerprint, backend) to the
//! expression text built for it. Constructed and owned explicitly by the
//! caller; there is no process-wide instance.

mod expression_cache;
mod key;

pub use expression_cache::{CacheEntry, ExpressionCache};
pub use key::{CacheKey, SourceFingerprint};
