use async_trait::async_trait;

use armada_core::{ErrorKind, ExecutionRequest, ExecutionResult, ExecutorKind};

use super::process::run_process;
use super::Executor;
use crate::cancel::CancelSignal;

/// Management-object query. The request command is a WQL query; the result
/// is the matching instances as JSON. Windows only.
pub struct CimQueryExecutor {
    powershell: String,
    max_output: usize,
}

impl CimQueryExecutor {
    pub fn new(powershell: &str, max_output: usize) -> Self {
        Self {
            powershell: powershell.to_string(),
            max_output,
        }
    }
}

/// PowerShell pipeline for `query`, quoted as a single-quoted literal.
fn pipeline(query: &str) -> String {
    let quoted = query.replace('\'', "''");
    format!("Get-CimInstance -Query '{quoted}' | ConvertTo-Json -Depth 4 -Compress")
}

#[async_trait]
impl Executor for CimQueryExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::CimQuery
    }

    fn supports_platform(&self) -> bool {
        cfg!(windows)
    }

    async fn execute(&self, request: ExecutionRequest, cancel: CancelSignal) -> ExecutionResult {
        if !self.supports_platform() {
            return ExecutionResult::platform_unsupported(ExecutorKind::CimQuery);
        }
        let query = request.command.trim();
        if query.is_empty() {
            return ExecutionResult::failed(
                ErrorKind::InvalidRequest,
                "empty query",
                armada_core::now_ms(),
            );
        }
        let script = pipeline(query);
        let args = ["-NoProfile", "-NonInteractive", "-Command", script.as_str()];
        run_process(&self.powershell, args, &request, cancel, self.max_output).await
    }
}
