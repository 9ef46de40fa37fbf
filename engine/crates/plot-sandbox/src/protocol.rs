//! Protocol types for host-worker communication
//!
//! The host writes one `WorkerRequest` as JSON to the worker's stdin and reads
//! one `WorkerResponse` back from its stdout.

use serde::{Deserialize, Serialize};

use crate::figure::Figure;
use crate::sandbox::SandboxLimits;

/// Request from host to run graph code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    /// Graph code with parameter values already substituted
    pub code: String,
    #[serde(default)]
    pub limits: SandboxLimits,
}

impl WorkerRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            limits: SandboxLimits::default(),
        }
    }
}

/// Status of execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum WorkerStatus {
    /// Execution completed and produced a figure
    Complete,
    /// The restricted compiler refused the code; nothing ran
    CompileError(String),
    /// The code raised while running
    Error(String),
}

/// Result returned from the worker to the host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub status: WorkerStatus,
    /// The drawn figure, present only on `Complete`
    #[serde(default)]
    pub figure: Option<Figure>,
    /// Text captured from `print`
    #[serde(default)]
    pub stdout: String,
}

impl Default for WorkerResponse {
    fn default() -> Self {
        Self {
            status: WorkerStatus::Complete,
            figure: None,
            stdout: String::new(),
        }
    }
}

impl WorkerResponse {
    /// Create a response indicating a runtime error
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: WorkerStatus::Error(message.into()),
            ..Default::default()
        }
    }

    pub fn compile_error(message: impl Into<String>) -> Self {
        Self {
            status: WorkerStatus::CompileError(message.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults_limits() {
        let parsed: WorkerRequest = serde_json::from_str(r#"{"code": "plt.plot([1, 2])"}"#).unwrap();
        assert_eq!(parsed.code, "plt.plot([1, 2])");
        assert_eq!(parsed.limits, SandboxLimits::default());
    }

    #[test]
    fn test_response_status_encoding() {
        let response = WorkerResponse::compile_error("forbidden construct: import statements");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"]["CompileError"], "forbidden construct: import statements");

        let ok: WorkerResponse = serde_json::from_str(r#"{"status": "Complete"}"#).unwrap();
        assert_eq!(ok.status, WorkerStatus::Complete);
        assert!(ok.figure.is_none());
    }
}
