use async_trait::async_trait;

use armada_core::{ErrorKind, ExecutionRequest, ExecutionResult, ExecutorKind};

use super::process::run_process;
use super::Executor;
use crate::cancel::CancelSignal;

/// Runs the request command through the platform shell.
pub struct ShellExecutor {
    shell: String,
    max_output: usize,
}

impl ShellExecutor {
    /// `shell` empty means the platform default.
    pub fn new(shell: &str, max_output: usize) -> Self {
        let shell = if shell.is_empty() {
            default_shell().to_string()
        } else {
            shell.to_string()
        };
        Self { shell, max_output }
    }
}

pub(super) fn default_shell() -> &'static str {
    if cfg!(windows) {
        "cmd"
    } else {
        "sh"
    }
}

pub(super) fn inline_flag() -> &'static str {
    if cfg!(windows) {
        "/C"
    } else {
        "-c"
    }
}

#[async_trait]
impl Executor for ShellExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Shell
    }

    fn supports_platform(&self) -> bool {
        true
    }

    async fn execute(&self, request: ExecutionRequest, cancel: CancelSignal) -> ExecutionResult {
        if request.command.trim().is_empty() {
            return ExecutionResult::failed(
                ErrorKind::InvalidRequest,
                "empty command",
                armada_core::now_ms(),
            );
        }
        let program = request
            .interpreter_path
            .as_ref()
            .map(|p| p.as_os_str().to_owned())
            .unwrap_or_else(|| self.shell.clone().into());
        let args = [inline_flag(), request.command.as_str()];
        run_process(program, args, &request, cancel, self.max_output).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn exec() -> ShellExecutor {
        ShellExecutor::new("", 64 * 1024)
    }

    #[tokio::test]
    async fn runs_in_working_directory_with_env() {
        let dir = tempfile::tempdir().unwrap();
        let req = ExecutionRequest::new("pwd; echo $ARMADA_TEST_VAR", Duration::from_secs(5))
            .with_working_directory(dir.path())
            .with_env("ARMADA_TEST_VAR", "fleet");
        let r = exec().execute(req, CancelSignal::never()).await;
        assert!(r.succeeded(), "{r:?}");
        let canonical = dir.path().canonicalize().unwrap();
        let mut lines = r.stdout.lines();
        assert_eq!(
            std::path::Path::new(lines.next().unwrap()).canonicalize().unwrap(),
            canonical
        );
        assert_eq!(lines.next(), Some("fleet"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_not_an_executor_error() {
        let req = ExecutionRequest::new("exit 7", Duration::from_secs(5));
        let r = exec().execute(req, CancelSignal::never()).await;
        assert_eq!(r.exit_code, Some(7));
        assert!(r.error.is_none());
        assert!(!r.succeeded());
    }

    #[tokio::test]
    async fn empty_command_rejected() {
        let req = ExecutionRequest::new("  ", Duration::from_secs(5));
        let r = exec().execute(req, CancelSignal::never()).await;
        assert_eq!(r.error_kind(), Some(ErrorKind::InvalidRequest));
    }
}
