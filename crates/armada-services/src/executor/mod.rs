//! Executor set: pluggable script/query runners behind one contract.
//!
//! Every executor turns an `ExecutionRequest` into an `ExecutionResult` and
//! never returns an error: spawn failures, timeouts, cancellation and
//! platform mismatches are all reported inside the result. The set is built
//! once at startup and looked up by `ExecutorKind`.

mod cim_query;
mod interpreter;
mod process;
mod script;
mod shell;
mod tree_query;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use armada_core::config::ExecutorSettings;
use armada_core::{ErrorKind, ExecutionRequest, ExecutionResult, ExecutorKind};

use crate::cancel::CancelSignal;

pub use cim_query::CimQueryExecutor;
pub use interpreter::InterpreterExecutor;
pub use script::ScriptExecutor;
pub use shell::ShellExecutor;
pub use tree_query::TreeQueryExecutor;

/// One capability: shell, interpreter, script file, structured query.
#[async_trait]
pub trait Executor: Send + Sync {
    fn kind(&self) -> ExecutorKind;

    /// Whether this executor can run on the current OS.
    fn supports_platform(&self) -> bool;

    /// Run the request. Must honour `request.timeout` and `cancel`, and must
    /// not leave a child process behind when either fires.
    async fn execute(&self, request: ExecutionRequest, cancel: CancelSignal) -> ExecutionResult;
}

/// Maps executor kinds to implementations.
#[derive(Default)]
pub struct ExecutorSet {
    executors: HashMap<ExecutorKind, Arc<dyn Executor>>,
}

impl ExecutorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every built-in executor, configured from `settings`.
    pub fn with_defaults(settings: &ExecutorSettings, work_dir: PathBuf) -> Self {
        let mut set = Self::new();
        let max_output = settings.max_output_bytes;
        set.register(Arc::new(ShellExecutor::new(&settings.shell_path, max_output)));
        set.register(Arc::new(InterpreterExecutor::python(
            &settings.python_path,
            max_output,
        )));
        set.register(Arc::new(InterpreterExecutor::powershell(
            &settings.powershell_path,
            max_output,
        )));
        set.register(Arc::new(ScriptExecutor::new(work_dir, max_output)));
        set.register(Arc::new(TreeQueryExecutor::new(settings.tree_max_depth)));
        set.register(Arc::new(CimQueryExecutor::new(
            &settings.powershell_path,
            max_output,
        )));
        set
    }

    /// Register an executor, replacing any previous one of the same kind.
    pub fn register(&mut self, executor: Arc<dyn Executor>) {
        self.executors.insert(executor.kind(), executor);
    }

    pub fn get(&self, kind: ExecutorKind) -> Option<Arc<dyn Executor>> {
        self.executors.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<ExecutorKind> {
        let mut kinds: Vec<_> = self.executors.keys().copied().collect();
        kinds.sort_by_key(|k| k.name());
        kinds
    }

    /// Resolve `kind` and run. Unknown kinds and platform mismatches come
    /// back as failed results.
    pub async fn execute(
        &self,
        kind: ExecutorKind,
        request: ExecutionRequest,
        cancel: CancelSignal,
    ) -> ExecutionResult {
        let Some(executor) = self.executors.get(&kind) else {
            return ExecutionResult::failed(
                ErrorKind::InvalidRequest,
                format!("no executor registered for {}", kind.name()),
                armada_core::now_ms(),
            );
        };
        if !executor.supports_platform() {
            tracing::debug!(kind = kind.name(), "executor not supported on this platform");
            return ExecutionResult::platform_unsupported(kind);
        }
        executor.execute(request, cancel).await
    }
}
