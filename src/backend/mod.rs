//! Backend-specific expression building
//!
//! Each backend family gets the id and spatial predicate forms its engine
//! runs fastest and accepts at all:
//!
//! - Server: session-scoped materialized results with GIST indexes
//! - EmbeddedSql: id checks first, optional R-tree pre-filter
//! - FlatFile: literal id predicates only, never subqueries
//! - InMemory: lazily built R-tree with exact geometry tests

mod embedded;
mod flat_file;
mod memory;
mod predicate;
mod registry;
mod server;

pub use embedded::{build_id_predicate, cost_class, CostClass, EmbeddedSqlRewriter, SpatialIndexRef};
pub use flat_file::FlatFileRewriter;
pub use memory::{relates, FeatureSource, InMemoryIndexer};
pub use predicate::SpatialPredicate;
pub use registry::{new_session_id, MaterializationRegistry, MaterializedResultRef, ServerConnection};
pub use server::{BufferedSource, PreparedSource, ServerBackendRewriter};
