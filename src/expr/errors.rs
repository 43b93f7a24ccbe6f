//! Expression errors

use thiserror::Error;

use super::lexer::LexError;

/// Result type for expression parsing and evaluation
pub type ExprResult<T> = Result<T, ExprError>;

/// Expression errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("Tokenize error: {0}")]
    Lex(#[from] LexError),

    #[error("Parse error at byte {position}: {message}")]
    Parse { message: String, position: usize },

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Unsupported construct: {0}")]
    Unsupported(String),

    #[error("Evaluation error: {0}")]
    Eval(String),
}

impl ExprError {
    pub fn parse(message: impl Into<String>, position: usize) -> Self {
        ExprError::Parse {
            message: message.into(),
            position,
        }
    }

    /// True if the text could not be read as an expression at all
    pub fn is_syntax(&self) -> bool {
        matches!(self, ExprError::Lex(_) | ExprError::Parse { .. })
    }
}
