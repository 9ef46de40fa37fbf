//! Error types for compiling and running graph code

use crate::numeric::ArithError;
use thiserror::Error;

/// Rejection by the parser or the restricted compiler. Nothing has run yet.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("SyntaxError: {0}")]
    Syntax(String),
    /// A construct the restricted profile never allows (imports, dunders, ...)
    #[error("forbidden construct: {0}")]
    Forbidden(String),
    /// Valid Python the sandbox interpreter does not implement
    #[error("unsupported construct: {0}")]
    Unsupported(String),
    #[error("module '{module}' has no attribute '{attr}'")]
    UnknownMember { module: String, attr: String },
}

/// Failure raised while the compiled program runs
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecError {
    #[error("NameError: name '{0}' is not defined")]
    Name(String),
    #[error("TypeError: {0}")]
    Type(String),
    #[error("ValueError: {0}")]
    Value(String),
    #[error("IndexError: {0}")]
    Index(String),
    #[error("{0}")]
    Arith(#[from] ArithError),
    /// A sandbox resource limit was hit (array size, output size)
    #[error("LimitError: {0}")]
    Limit(String),
}

impl ExecError {
    pub fn type_error(msg: impl Into<String>) -> Self {
        ExecError::Type(msg.into())
    }

    pub fn value_error(msg: impl Into<String>) -> Self {
        ExecError::Value(msg.into())
    }
}
