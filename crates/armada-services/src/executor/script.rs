use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;

use armada_core::{ErrorKind, ExecutionRequest, ExecutionResult, ExecutorKind};

use super::process::run_process;
use super::shell::default_shell;
use super::Executor;
use crate::cancel::CancelSignal;

/// Writes the script to a temporary file and runs it. The file is removed
/// once the run ends, whatever the outcome.
pub struct ScriptExecutor {
    work_dir: PathBuf,
    max_output: usize,
}

impl ScriptExecutor {
    pub fn new(work_dir: PathBuf, max_output: usize) -> Self {
        Self {
            work_dir,
            max_output,
        }
    }

    fn materialise(&self, content: &str) -> std::io::Result<tempfile::TempPath> {
        std::fs::create_dir_all(&self.work_dir)?;
        let suffix = if cfg!(windows) { ".cmd" } else { ".sh" };
        let mut file = tempfile::Builder::new()
            .prefix("armada-")
            .suffix(suffix)
            .tempfile_in(&self.work_dir)?;
        file.write_all(content.as_bytes())?;
        file.flush()?;
        // Close the handle so the interpreter can open it on every platform.
        Ok(file.into_temp_path())
    }
}

#[async_trait]
impl Executor for ScriptExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Script
    }

    fn supports_platform(&self) -> bool {
        true
    }

    async fn execute(&self, request: ExecutionRequest, cancel: CancelSignal) -> ExecutionResult {
        let started = armada_core::now_ms();
        if request.command.trim().is_empty() {
            return ExecutionResult::failed(ErrorKind::InvalidRequest, "empty script", started);
        }
        let path = match self.materialise(&request.command) {
            Ok(p) => p,
            Err(e) => {
                return ExecutionResult::failed(
                    ErrorKind::Io,
                    format!("failed to write script to {}: {e}", self.work_dir.display()),
                    started,
                );
            }
        };

        let mut args: Vec<std::ffi::OsString> = Vec::new();
        let program = match &request.interpreter_path {
            Some(p) => p.as_os_str().to_owned(),
            None => {
                if cfg!(windows) {
                    args.push("/C".into());
                }
                default_shell().into()
            }
        };
        args.push(path.as_os_str().to_owned());

        let result = run_process(program, args, &request, cancel, self.max_output).await;

        if let Err(e) = path.close() {
            tracing::warn!(error = %e, "failed to remove script file");
        }
        result
    }
}
