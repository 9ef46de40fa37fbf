//! Sandboxed graph execution
//!
//! Graph code goes through four phases before a figure comes back:
//! - Scanning: the raw source is refused if it contains a denylisted keyword
//! - Splicing: `{name}` markers become the plain string form of each value
//! - Compiling: the restricted compiler parses and lowers the spliced source
//! - Running: a `sandbox-worker` child process interprets the program
//!
//! The host never interprets graph code itself. The worker gets a cleared
//! environment and a wall-clock budget; when the budget runs out the process is
//! killed, wherever it is, and the call fails with `SandboxError::Timeout`.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use plot_sandbox::{Figure, Program, SandboxLimits, WorkerRequest, WorkerResponse, WorkerStatus};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::error::SandboxError;
use crate::parameters::GeneratedAssignment;
use crate::process_utils::HideConsoleWindow;
use crate::settings::EngineSettings;

/// Substrings that reject graph code before it is compiled
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "import",
    "exec",
    "eval",
    "open",
    "file",
    "__import__",
    "compile",
    "globals",
    "locals",
    "input",
    "raw_input",
    "reload",
    "execfile",
];

pub const DEFAULT_TIMEOUT_SECS: f64 = 3.0;

/// Subcommand the worker binary is started with
pub const WORKER_SUBCOMMAND: &str = "sandbox-worker";

/// Worker stderr kept for crash reports
const STDERR_TAIL_BYTES: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    Pending,
    Scanning,
    Compiling,
    Running,
    Succeeded,
    Failed,
}

impl SandboxError {
    /// Phase in which this error stopped execution
    pub fn phase(&self) -> ExecutionPhase {
        match self {
            SandboxError::Forbidden { .. } => ExecutionPhase::Scanning,
            SandboxError::Compilation(_) => ExecutionPhase::Compiling,
            SandboxError::Timeout { .. } | SandboxError::Execution(_) => ExecutionPhase::Running,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SandboxConfig {
    pub limits: SandboxLimits,
    /// Worker executable; the running binary when `None`
    pub worker_program: Option<PathBuf>,
}

impl SandboxConfig {
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            limits: settings.sandbox_limits(),
            worker_program: settings.worker_program.clone(),
        }
    }
}

/// What a successful run produced
#[derive(Debug, Clone)]
pub struct GraphOutput {
    pub figure: Figure,
    /// Text the program printed
    pub stdout: String,
    pub elapsed: Duration,
}

// ============ Host-side phases ============

/// Refuse code containing any denylisted keyword
pub fn scan(code: &str) -> Result<(), SandboxError> {
    match FORBIDDEN_KEYWORDS.iter().find(|keyword| code.contains(*keyword)) {
        Some(keyword) => Err(SandboxError::Forbidden {
            keyword: keyword.to_string(),
        }),
        None => Ok(()),
    }
}

/// Replace `{name}` markers with each value's plain string form
pub fn splice(code: &str, values: &GeneratedAssignment) -> String {
    let mut spliced = code.to_string();
    for (name, value) in values.iter() {
        let marker = format!("{{{}}}", name);
        if spliced.contains(&marker) {
            spliced = spliced.replace(&marker, &value.python_str());
        }
    }
    spliced
}

/// Run the restricted compiler without executing anything
pub fn compile_check(code: &str) -> Result<Program, SandboxError> {
    plot_sandbox::compile(code).map_err(|e| SandboxError::Compilation(e.to_string()))
}

// ============ Executor ============

#[derive(Debug, Clone, Default)]
pub struct GraphExecutor {
    config: SandboxConfig,
}

impl GraphExecutor {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Scan, splice, compile and run `code`, killing the worker after `timeout`
    pub async fn execute(
        &self,
        code: &str,
        values: &GeneratedAssignment,
        timeout: Duration,
    ) -> Result<GraphOutput, SandboxError> {
        let mut phase = ExecutionPhase::Pending;
        let result = self.run_phases(code, values, timeout, &mut phase).await;
        match &result {
            Ok(output) => tracing::debug!(
                "[GraphExecutor] {:?} in {:?} ({} artists)",
                ExecutionPhase::Succeeded,
                output.elapsed,
                output.figure.artists.len()
            ),
            Err(e) => tracing::warn!(
                "[GraphExecutor] {:?} during {:?}: {}",
                ExecutionPhase::Failed,
                phase,
                e
            ),
        }
        result
    }

    async fn run_phases(
        &self,
        code: &str,
        values: &GeneratedAssignment,
        timeout: Duration,
        phase: &mut ExecutionPhase,
    ) -> Result<GraphOutput, SandboxError> {
        *phase = ExecutionPhase::Scanning;
        scan(code)?;

        let spliced = splice(code, values);

        *phase = ExecutionPhase::Compiling;
        compile_check(&spliced)?;

        *phase = ExecutionPhase::Running;
        let started = Instant::now();
        let response = self.run_worker(spliced, timeout).await?;
        let elapsed = started.elapsed();

        match response.status {
            WorkerStatus::Complete => {
                let figure = response
                    .figure
                    .ok_or_else(|| SandboxError::Execution("worker returned no figure".to_string()))?;
                Ok(GraphOutput {
                    figure,
                    stdout: response.stdout,
                    elapsed,
                })
            }
            WorkerStatus::CompileError(message) => Err(SandboxError::Compilation(message)),
            WorkerStatus::Error(message) => Err(SandboxError::Execution(message)),
        }
    }

    fn worker_program(&self) -> Result<PathBuf, SandboxError> {
        match &self.config.worker_program {
            Some(program) => Ok(program.clone()),
            None => std::env::current_exe()
                .map_err(|e| SandboxError::Execution(format!("cannot locate sandbox worker: {}", e))),
        }
    }

    async fn run_worker(&self, code: String, timeout: Duration) -> Result<WorkerResponse, SandboxError> {
        let program = self.worker_program()?;
        let request = serde_json::to_vec(&WorkerRequest {
            code,
            limits: self.config.limits,
        })
        .map_err(|e| SandboxError::Execution(format!("failed to encode worker request: {}", e)))?;

        let mut cmd = Command::new(&program);
        cmd.arg(WORKER_SUBCOMMAND)
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .hide_console_window();

        let mut child = cmd.spawn().map_err(|e| {
            SandboxError::Execution(format!("failed to start sandbox worker {:?}: {}", program, e))
        })?;
        tracing::debug!("[GraphExecutor] Worker {:?} started (pid {:?})", program, child.id());

        let pipe_error = |what: &str| SandboxError::Execution(format!("failed to open worker {}", what));
        let mut stdin = child.stdin.take().ok_or_else(|| pipe_error("stdin"))?;
        let mut stdout = child.stdout.take().ok_or_else(|| pipe_error("stdout"))?;
        let mut stderr = child.stderr.take().ok_or_else(|| pipe_error("stderr"))?;

        let started = Instant::now();
        let exchange = async {
            let write = async {
                stdin.write_all(&request).await?;
                stdin.shutdown().await?;
                drop(stdin);
                Ok::<_, std::io::Error>(())
            };
            let mut out = Vec::new();
            let mut err = Vec::new();
            let (written, read_out, read_err) =
                tokio::join!(write, stdout.read_to_end(&mut out), stderr.read_to_end(&mut err));
            // A worker that dies early closes stdin; its exit status says more
            let write_failed = written.err();
            read_out?;
            read_err?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, out, err, write_failed))
        };

        let outcome = tokio::time::timeout(timeout, exchange).await;
        let (status, out, err, write_failed) = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                return Err(SandboxError::Execution(format!("sandbox worker I/O failed: {}", e)));
            }
            Err(_) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!("[GraphExecutor] Failed to kill timed-out worker: {}", e);
                }
                tracing::warn!(
                    "[GraphExecutor] Worker killed after {:?} (budget {:?})",
                    started.elapsed(),
                    timeout
                );
                return Err(SandboxError::Timeout {
                    seconds: timeout.as_secs_f64(),
                });
            }
        };

        if !status.success() {
            let stderr_text = String::from_utf8_lossy(&err);
            let tail = tail_chars(stderr_text.trim(), STDERR_TAIL_BYTES);
            return Err(SandboxError::Execution(format!(
                "sandbox worker exited with {}{}",
                status,
                if tail.is_empty() { String::new() } else { format!(": {}", tail) }
            )));
        }
        if let Some(e) = write_failed {
            tracing::debug!("[GraphExecutor] Worker closed stdin early: {}", e);
        }

        serde_json::from_slice(&out)
            .map_err(|e| SandboxError::Execution(format!("malformed worker response: {}", e)))
    }
}

fn tail_chars(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

// ============ Worker side ============

/// Serve one request on stdin/stdout. Returns the process exit code.
pub fn run_sandbox_worker() -> i32 {
    let mut input = String::new();
    if let Err(e) = std::io::stdin().read_to_string(&mut input) {
        tracing::error!("[SandboxWorker] Failed to read request: {}", e);
        return 1;
    }

    let response = match serde_json::from_str::<WorkerRequest>(&input) {
        Ok(request) => {
            tracing::debug!("[SandboxWorker] Running {} bytes of graph code", request.code.len());
            plot_sandbox::execute(&request)
        }
        Err(e) => WorkerResponse::error(format!("invalid worker request: {}", e)),
    };

    let encoded = match serde_json::to_vec(&response) {
        Ok(encoded) => encoded,
        Err(e) => {
            tracing::error!("[SandboxWorker] Failed to encode response: {}", e);
            return 1;
        }
    };
    let mut stdout = std::io::stdout().lock();
    if let Err(e) = stdout.write_all(&encoded).and_then(|_| stdout.flush()) {
        tracing::error!("[SandboxWorker] Failed to write response: {}", e);
        return 1;
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn values(pairs: &[(&str, Value)]) -> GeneratedAssignment {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_scan_rejects_denylisted_keywords() {
        assert_eq!(
            scan("import os\nos.system('ls')"),
            Err(SandboxError::Forbidden {
                keyword: "import".into()
            })
        );
        assert!(scan("f = open('/etc/passwd')").is_err());
        assert!(scan("x = eval('1')").is_err());
        // Coarse by nature: the substring matches inside other words
        assert!(scan("profile = 1").is_err());
        assert!(scan("x = np.linspace(0, 1, 10)\nplt.plot(x, x)").is_ok());
    }

    #[test]
    fn test_splice_uses_python_str() {
        let vals = values(&[
            ("a", Value::Int(2)),
            ("b", Value::Float(5.0)),
            ("color", Value::Str("red".into())),
        ]);
        assert_eq!(
            splice("y = {a}*x**2 + {b}\nplt.plot(x, y, color='{color}')\n{missing}", &vals),
            "y = 2*x**2 + 5.0\nplt.plot(x, y, color='red')\n{missing}"
        );
    }

    #[test]
    fn test_compile_check_reports_restricted_constructs() {
        assert!(compile_check("x = np.linspace(0, 1, 5)").is_ok());
        let err = compile_check("x = ().__class__").unwrap_err();
        assert!(matches!(err, SandboxError::Compilation(_)));
        assert_eq!(err.phase(), ExecutionPhase::Compiling);
        assert!(matches!(compile_check("x = (1"), Err(SandboxError::Compilation(_))));
    }

    #[tokio::test]
    async fn test_execute_rejects_before_spawning() {
        let executor = GraphExecutor::new(SandboxConfig {
            worker_program: Some(PathBuf::from("/nonexistent/worker")),
            ..SandboxConfig::default()
        });
        let empty = GeneratedAssignment::default();

        let err = executor
            .execute("import os", &empty, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.phase(), ExecutionPhase::Scanning);

        let err = executor
            .execute("def f():\n    return 1", &empty, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Compilation(_)));
    }

    #[tokio::test]
    async fn test_missing_worker_is_execution_error() {
        let executor = GraphExecutor::new(SandboxConfig {
            worker_program: Some(PathBuf::from("/nonexistent/worker")),
            ..SandboxConfig::default()
        });
        let err = executor
            .execute("x = 1", &GeneratedAssignment::default(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Execution(_)));
    }

    #[test]
    fn test_tail_chars_respects_boundaries() {
        assert_eq!(tail_chars("abc", 10), "abc");
        assert_eq!(tail_chars("abcdef", 3), "def");
        assert_eq!(tail_chars("aé", 1), "");
    }
}
