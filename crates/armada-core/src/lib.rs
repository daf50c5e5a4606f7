//! armada-core — the fleet data model, wire payloads, error kinds and
//! configuration. Every other armada crate depends on this one.

pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod execution;
pub mod policy;

pub use command::{Command, CommandResult, CommandStatus, BROADCAST_KEY};
pub use error::ErrorKind;
pub use event::ResultEvent;
pub use execution::{ExecutionError, ExecutionRequest, ExecutionResult, ExecutorKind};
pub use policy::{
    FailureAction, FinalStatus, PolicyExecutionCommand, PolicyExecutionResult, PolicyStatus,
    RunCondition, Step, StepResult, StepStatus, SuccessAction,
};

/// Unix time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
