//! Errors raised by host-supplied dataset handles and connections

use thiserror::Error;

/// Result type for backend calls
pub type BackendResult<T> = Result<T, BackendError>;

/// Backend errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    /// The backend rejected or failed to run a statement
    #[error("Query error: {0}")]
    Query(String),

    /// The data source is not reachable
    #[error("Data source unavailable: {0}")]
    Unavailable(String),

    /// The backend does not support the requested operation
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}
