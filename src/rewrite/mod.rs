//! Combining an existing filter with a new one
//!
//! The rewrite is best-effort: it never fails and never changes the
//! selected rows. When nothing reusable is found the naive `(old) op (new)`
//! comes back tagged [`OptimizationKind::None`].

mod combined;
mod types;

pub use combined::{range_syntax, CombinedExpressionRewriter};
pub use types::{CombineOperator, CombinedRewriteResult, OptimizationKind, RewriteContext};
