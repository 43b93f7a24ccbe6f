//! Optimizer error taxonomy
//!
//! Planning and rewriting degrade to a correct-but-slower path; only
//! execution failures propagate to the caller.
//!
//! Error codes:
//! - FILTEROPT_ESTIMATION_FAILED (recoverable)
//! - FILTEROPT_REWRITE_FAILED (recoverable)
//! - FILTEROPT_MATERIALIZATION_FAILED (recoverable)
//! - FILTEROPT_EXECUTION_FAILED
//! - FILTEROPT_UNKNOWN_MATERIALIZED_RESULT
//! - FILTEROPT_CANCELLED
//! - FILTEROPT_CONFIG_ERROR
//! - FILTEROPT_IO_ERROR

use thiserror::Error;

use crate::dataset::BackendError;

/// Result type for optimizer operations
pub type OptimizerResult<T> = Result<T, OptimizerError>;

/// Optimizer errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OptimizerError {
    /// Sampling or statistics collection failed
    #[error("Estimation failed: {0}")]
    Estimation(String),

    /// A reusable pattern was detected but could not be rewritten
    #[error("Rewrite failed: {0}")]
    Rewrite(String),

    /// The backend refused to create a precomputed result
    #[error("Materialization failed: {0}")]
    Materialization(String),

    /// The rewritten expression failed against the backend
    #[error("Execution failed on '{dataset_id}': {message}")]
    Execution { dataset_id: String, message: String },

    /// Reference to a materialized result that was dropped or never existed
    #[error("Unknown materialized result: {0}")]
    UnknownMaterializedResult(String),

    /// Work was not started because cancellation was requested
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O failure outside the backend (config files, CLI streams)
    #[error("I/O error: {0}")]
    Io(String),
}

impl OptimizerError {
    /// Create an execution error for a dataset
    pub fn execution(dataset_id: impl Into<String>, message: impl Into<String>) -> Self {
        OptimizerError::Execution {
            dataset_id: dataset_id.into(),
            message: message.into(),
        }
    }

    /// Wrap a backend error raised while applying an expression
    pub fn from_backend(dataset_id: impl Into<String>, err: BackendError) -> Self {
        Self::execution(dataset_id, err.to_string())
    }

    /// Returns the stable error code
    pub fn code(&self) -> &'static str {
        match self {
            OptimizerError::Estimation(_) => "FILTEROPT_ESTIMATION_FAILED",
            OptimizerError::Rewrite(_) => "FILTEROPT_REWRITE_FAILED",
            OptimizerError::Materialization(_) => "FILTEROPT_MATERIALIZATION_FAILED",
            OptimizerError::Execution { .. } => "FILTEROPT_EXECUTION_FAILED",
            OptimizerError::UnknownMaterializedResult(_) => {
                "FILTEROPT_UNKNOWN_MATERIALIZED_RESULT"
            }
            OptimizerError::Cancelled => "FILTEROPT_CANCELLED",
            OptimizerError::Config(_) => "FILTEROPT_CONFIG_ERROR",
            OptimizerError::Io(_) => "FILTEROPT_IO_ERROR",
        }
    }

    /// Returns true if the optimizer can fall back to a slower correct path
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            OptimizerError::Estimation(_)
                | OptimizerError::Rewrite(_)
                | OptimizerError::Materialization(_)
        )
    }
}

impl From<std::io::Error> for OptimizerError {
    fn from(err: std::io::Error) -> Self {
        OptimizerError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for OptimizerError {
    fn from(err: serde_json::Error) -> Self {
        OptimizerError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            OptimizerError::Estimation("x".into()).code(),
            "FILTEROPT_ESTIMATION_FAILED"
        );
        assert_eq!(
            OptimizerError::execution("roads", "boom").code(),
            "FILTEROPT_EXECUTION_FAILED"
        );
        assert_eq!(OptimizerError::Cancelled.code(), "FILTEROPT_CANCELLED");
    }

    #[test]
    fn test_only_planning_errors_recoverable() {
        assert!(OptimizerError::Estimation("x".into()).is_recoverable());
        assert!(OptimizerError::Rewrite("x".into()).is_recoverable());
        assert!(OptimizerError::Materialization("x".into()).is_recoverable());
        assert!(!OptimizerError::execution("d", "x").is_recoverable());
        assert!(!OptimizerError::UnknownMaterializedResult("mv".into()).is_recoverable());
    }

    #[test]
    fn test_backend_error_becomes_execution() {
        let err = OptimizerError::from_backend("parcels", BackendError::Query("syntax".into()));
        let display = err.to_string();
        assert!(display.contains("parcels"));
        assert!(display.contains("syntax"));
    }
}
