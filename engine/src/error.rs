//! Error types for the study engine
//!
//! Each failure class of the generation and graph pipeline is its own variant
//! so callers can tell them apart:
//! - `EvaluationError`: one formula failed to parse or evaluate
//! - `SpecError`: a parameter specification is unusable before any draw
//! - `GenerationError`: no assignment could be produced
//! - `SandboxError`: graph code was refused, failed, or ran out of time
//! - `SettingsError`: the config file could not be written

use plot_sandbox::numeric::ArithError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("syntax error in formula '{formula}': {message}")]
    Syntax { formula: String, message: String },

    #[error("name '{0}' is not defined")]
    UnboundName(String),

    #[error("forbidden construct in formula: {0}")]
    Forbidden(String),

    #[error("unsupported construct in formula: {0}")]
    Unsupported(String),

    #[error("TypeError: {0}")]
    Type(String),

    #[error(transparent)]
    Arithmetic(#[from] ArithError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpecError {
    #[error("variable '{variable}': random_choice requires a non-empty 'choices' list")]
    EmptyChoices { variable: String },

    #[error("variable '{variable}': min ({min}) is greater than max ({max})")]
    InvalidRange {
        variable: String,
        min: String,
        max: String,
    },

    #[error("variable '{variable}': bounds must be finite numbers")]
    NonFiniteBound { variable: String },

    #[error("variable '{variable}': computed type requires 'formula'")]
    EmptyFormula { variable: String },

    #[error("variable '{variable}': {source}")]
    MalformedFormula {
        variable: String,
        #[source]
        source: EvaluationError,
    },

    #[error("constraint #{index}: {source}")]
    MalformedConstraint {
        index: usize,
        #[source]
        source: EvaluationError,
    },

    #[error("cyclic dependency among computed variables: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("invalid parameter specification: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    #[error(transparent)]
    InvalidSpec(#[from] SpecError),

    #[error("could not generate valid parameters after {attempts} attempts (last rejection: {last_rejection})")]
    Exhausted {
        attempts: usize,
        last_rejection: String,
    },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SandboxError {
    #[error("forbidden keyword '{keyword}' found in code")]
    Forbidden { keyword: String },

    #[error("code compilation errors: {0}")]
    Compilation(String),

    #[error("graph generation timed out after {seconds}s")]
    Timeout { seconds: f64 },

    #[error("error executing graph code: {0}")]
    Execution(String),
}

impl SandboxError {
    /// Short, stable name of the failure class, used in logs and CLI output
    pub fn kind(&self) -> &'static str {
        match self {
            SandboxError::Forbidden { .. } => "forbidden",
            SandboxError::Compilation(_) => "compilation",
            SandboxError::Timeout { .. } => "timeout",
            SandboxError::Execution(_) => "execution",
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write settings to {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
