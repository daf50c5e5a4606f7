//! Executor request/result shapes. Every executor, whatever its mechanism,
//! takes an `ExecutionRequest` and produces an `ExecutionResult`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Which executor runs a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    /// `sh -c` on unix, `cmd /C` on Windows.
    Shell,
    #[serde(rename = "powershell")]
    PowerShell,
    Python,
    /// Content materialised to a temporary script file, then executed.
    Script,
    /// Depth-bounded walk of a filesystem tree.
    TreeQuery,
    /// Management-object query (Windows only).
    CimQuery,
}

impl ExecutorKind {
    pub const ALL: [ExecutorKind; 6] = [
        Self::Shell,
        Self::PowerShell,
        Self::Python,
        Self::Script,
        Self::TreeQuery,
        Self::CimQuery,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Shell => "shell",
            Self::PowerShell => "powershell",
            Self::Python => "python",
            Self::Script => "script",
            Self::TreeQuery => "tree_query",
            Self::CimQuery => "cim_query",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Script text, command line, or query, depending on the executor.
    pub command: String,
    pub working_directory: Option<PathBuf>,
    pub environment: HashMap<String, String>,
    pub timeout: Duration,
    pub interpreter_path: Option<PathBuf>,
    /// Stderr is dropped unless the caller asks for it.
    pub capture_stderr: bool,
    /// Executor-specific knobs (e.g. `maxDepth` for tree queries).
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

impl ExecutionRequest {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            working_directory: None,
            environment: HashMap::new(),
            timeout,
            interpreter_path: None,
            capture_stderr: true,
            parameters: serde_json::Map::new(),
        }
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_interpreter(mut self, path: impl Into<PathBuf>) -> Self {
        self.interpreter_path = Some(path.into());
        self
    }

    pub fn with_capture_stderr(mut self, capture: bool) -> Self {
        self.capture_stderr = capture;
        self
    }

    pub fn with_parameters(mut self, parameters: serde_json::Map<String, serde_json::Value>) -> Self {
        self.parameters = parameters;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Outcome of one execution.
///
/// For a non-timeout result exactly one of `error` or `exit_code` carries
/// meaning. `timed_out == true` means no exit code is trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub error: Option<ExecutionError>,
    /// Unix ms.
    pub started_at: u64,
    pub ended_at: u64,
}

impl ExecutionResult {
    pub fn exited(exit_code: i32, stdout: String, stderr: String, started_at: u64) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout,
            stderr,
            timed_out: false,
            error: None,
            started_at,
            ended_at: crate::now_ms(),
        }
    }

    pub fn failed(kind: ErrorKind, message: impl Into<String>, started_at: u64) -> Self {
        Self {
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: false,
            error: Some(ExecutionError {
                kind,
                message: message.into(),
            }),
            started_at,
            ended_at: crate::now_ms(),
        }
    }

    pub fn timed_out(timeout: Duration, stdout: String, stderr: String, started_at: u64) -> Self {
        Self {
            exit_code: None,
            stdout,
            stderr,
            timed_out: true,
            error: Some(ExecutionError {
                kind: ErrorKind::Timeout,
                message: format!("timed out after {}ms", timeout.as_millis()),
            }),
            started_at,
            ended_at: crate::now_ms(),
        }
    }

    pub fn platform_unsupported(kind: ExecutorKind) -> Self {
        let now = crate::now_ms();
        Self::failed(
            ErrorKind::PlatformUnsupported,
            format!(
                "{} executor is not supported on {}",
                kind.name(),
                std::env::consts::OS
            ),
            now,
        )
    }

    /// Exited zero with no executor error.
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.error.is_none() && self.exit_code == Some(0)
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.ended_at.saturating_sub(self.started_at)
    }

    /// Human-readable failure summary, if this result is a failure.
    pub fn failure_message(&self) -> Option<String> {
        if self.succeeded() {
            return None;
        }
        if let Some(err) = &self.error {
            return Some(err.message.clone());
        }
        let code = self.exit_code.unwrap_or(-1);
        let detail = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        Some(format!("exit code {code}: {detail}"))
    }
}
