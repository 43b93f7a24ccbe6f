//! Dataset abstraction consumed from the host
//!
//! The optimizer never touches a data source directly. Everything it reads
//! (row counts, extents, samples) and every expression it applies goes
//! through a [`DatasetHandle`] supplied by the host orchestration layer.
//!
//! # Backend families
//!
//! - Server: full SQL server with session-scoped materialized results
//! - EmbeddedSql: embedded SQL engine, left-to-right short-circuit evaluation
//! - FlatFile: columnar/flat-file store with a minimal expression grammar
//! - InMemory: feature set held entirely in memory

mod bbox;
mod errors;
mod handle;

pub use bbox::BBox;
pub use errors::{BackendError, BackendResult};
pub use handle::{BackendKind, DatasetHandle, GeometryType, SampleRow};
