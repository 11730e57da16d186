// Service Error Types
// Crate-wide error enum shared by the parser, expression engine and executor

use crate::expression::{EvalError, LexError, ParseExprError};

use std::fmt;

/// Result alias used across the service
pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Expression error: {0}")]
    Expression(String),

    #[error("Execution error: {0}")]
    Execution(String),
}

impl ServiceError {
    pub fn invalid(message: impl fmt::Display) -> Self {
        ServiceError::InvalidInput(message.to_string())
    }

    pub fn execution(message: impl fmt::Display) -> Self {
        ServiceError::Execution(message.to_string())
    }
}

impl From<EvalError> for ServiceError {
    fn from(err: EvalError) -> Self {
        ServiceError::Expression(err.to_string())
    }
}

impl From<ParseExprError> for ServiceError {
    fn from(err: ParseExprError) -> Self {
        ServiceError::Expression(err.to_string())
    }
}

impl From<LexError> for ServiceError {
    fn from(err: LexError) -> Self {
        ServiceError::Expression(err.to_string())
    }
}
