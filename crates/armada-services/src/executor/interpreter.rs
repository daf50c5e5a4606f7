use std::ffi::OsString;

use async_trait::async_trait;

use armada_core::{ErrorKind, ExecutionRequest, ExecutionResult, ExecutorKind};

use super::process::run_process;
use super::Executor;
use crate::cancel::CancelSignal;

/// Passes script text inline to a language interpreter (Python, PowerShell).
pub struct InterpreterExecutor {
    kind: ExecutorKind,
    program: String,
    /// Flags placed before the script text.
    flags: &'static [&'static str],
    max_output: usize,
}

impl InterpreterExecutor {
    pub fn python(program: &str, max_output: usize) -> Self {
        Self {
            kind: ExecutorKind::Python,
            program: program.to_string(),
            flags: &["-c"],
            max_output,
        }
    }

    pub fn powershell(program: &str, max_output: usize) -> Self {
        Self {
            kind: ExecutorKind::PowerShell,
            program: program.to_string(),
            flags: &["-NoProfile", "-NonInteractive", "-Command"],
            max_output,
        }
    }

    pub(super) fn program_for(&self, request: &ExecutionRequest) -> OsString {
        request
            .interpreter_path
            .as_ref()
            .map(|p| p.as_os_str().to_owned())
            .unwrap_or_else(|| self.program.clone().into())
    }
}

#[async_trait]
impl Executor for InterpreterExecutor {
    fn kind(&self) -> ExecutorKind {
        self.kind
    }

    fn supports_platform(&self) -> bool {
        true
    }

    async fn execute(&self, request: ExecutionRequest, cancel: CancelSignal) -> ExecutionResult {
        if request.command.trim().is_empty() {
            return ExecutionResult::failed(
                ErrorKind::InvalidRequest,
                "empty script",
                armada_core::now_ms(),
            );
        }
        let program = self.program_for(&request);
        let mut args: Vec<&str> = self.flags.to_vec();
        args.push(request.command.as_str());
        run_process(program, args, &request, cancel, self.max_output).await
    }
}
