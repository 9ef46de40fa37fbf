//! Plot Sandbox - restricted execution of plotting code
//!
//! This crate runs short, untrusted plotting programs written in a Python
//! subset:
//! - Parses with `rustpython-parser` and lowers into a closed IR, rejecting
//!   imports, dunder access and every construct the IR cannot express
//! - Interprets the IR against native `np` and `plt` modules
//! - Draws into an explicitly owned `FigureContext` instead of global state
//! - Bounds array sizes and captured output
//!
//! Wall-clock limits are not enforced here; the host runs `execute` in a
//! worker process and kills it when time runs out.

pub mod compiler;
pub mod error;
pub mod figure;
pub mod interp;
pub mod numeric;
pub mod numpy;
pub mod ops;
pub mod protocol;
pub mod pyplot;
pub mod sandbox;
pub mod value;

pub use compiler::{compile, Program};
pub use error::{CompileError, ExecError};
pub use figure::{open_figure_count, Artist, Aspect, Figure, FigureContext, Style};
pub use protocol::{WorkerRequest, WorkerResponse, WorkerStatus};
pub use sandbox::SandboxLimits;

use interp::Interpreter;

/// Compile and run graph code.
///
/// A fresh figure context backs each call and is released before returning,
/// whatever the outcome.
pub fn execute(request: &WorkerRequest) -> WorkerResponse {
    let program = match compile(&request.code) {
        Ok(program) => program,
        Err(e) => {
            tracing::debug!("[PlotSandbox] Compilation rejected: {}", e);
            return WorkerResponse::compile_error(e.to_string());
        }
    };

    let mut ctx = FigureContext::open();
    let mut interpreter = Interpreter::new(&mut ctx, request.limits);
    let result = interpreter.run(&program);
    let stdout = interpreter.into_stdout();

    match result {
        Ok(()) => {
            let figure = ctx.into_figure();
            tracing::debug!(
                "[PlotSandbox] Execution complete: {} artists, {} bytes of output",
                figure.artists.len(),
                stdout.len()
            );
            WorkerResponse {
                status: WorkerStatus::Complete,
                figure: Some(figure),
                stdout,
            }
        }
        Err(e) => {
            tracing::debug!("[PlotSandbox] Execution failed: {}", e);
            WorkerResponse {
                stdout,
                ..WorkerResponse::error(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::figure::figure_test_lock;

    #[test]
    fn test_execute_returns_figure() {
        let _guard = figure_test_lock();
        let before = open_figure_count();
        let response = execute(&WorkerRequest::new(
            "x = np.linspace(-10, 10, 100)\n\
             y = 2*x**2 + 3*x - 1\n\
             plt.figure(figsize=(8, 6))\n\
             plt.plot(x, y, 'b-', linewidth=2)\n\
             plt.axhline(y=0, color='k', linewidth=0.5)\n\
             plt.axvline(x=0, color='k', linewidth=0.5)\n\
             plt.grid(True, alpha=0.3)\n\
             plt.title('f(x) = 2x^2 + 3x - 1')\n",
        ));
        assert_eq!(response.status, WorkerStatus::Complete);
        let figure = response.figure.unwrap();
        assert_eq!(figure.artists.len(), 3);
        assert_eq!(figure.size, (8.0, 6.0));
        assert_eq!(open_figure_count(), before);
    }

    #[test]
    fn test_compile_error_runs_nothing() {
        let _guard = figure_test_lock();
        let before = open_figure_count();
        let response = execute(&WorkerRequest::new("import os\nos.system('ls')"));
        assert!(matches!(response.status, WorkerStatus::CompileError(_)));
        assert!(response.figure.is_none());
        assert_eq!(open_figure_count(), before);
    }

    #[test]
    fn test_runtime_error_releases_figure() {
        let _guard = figure_test_lock();
        let before = open_figure_count();
        let response = execute(&WorkerRequest::new("plt.plot([1, 2, 3])\nprint('drawn')\nx = 1 / 0"));
        match &response.status {
            WorkerStatus::Error(msg) => assert!(msg.contains("ZeroDivisionError")),
            other => panic!("expected runtime error, got {:?}", other),
        }
        assert!(response.figure.is_none());
        assert_eq!(response.stdout, "drawn\n");
        assert_eq!(open_figure_count(), before);
    }

    #[test]
    fn test_limits_travel_with_request() {
        let _guard = figure_test_lock();
        let mut request = WorkerRequest::new("x = np.linspace(0, 1, 5000)");
        request.limits.max_array_len = 1000;
        let response = execute(&request);
        match response.status {
            WorkerStatus::Error(msg) => assert!(msg.starts_with("LimitError")),
            other => panic!("expected limit error, got {:?}", other),
        }
    }
}
