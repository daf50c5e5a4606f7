//! Error kinds shared across the fleet.

use serde::{Deserialize, Serialize};

/// Category of a failure. Executors report these inside results rather than
/// returning errors, so callers can branch on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Executor invoked on an OS it does not support. Never retried.
    PlatformUnsupported,
    /// Operation exceeded its deadline.
    Timeout,
    /// Publish/consume failure against the broker.
    TransientBrokerError,
    /// A consumed payload did not parse.
    MalformedMessage,
    /// Non-zero exit or executor-reported failure.
    StepExecutionFailure,
    /// The child process could not be started.
    SpawnFailed,
    /// Execution was cancelled by the caller.
    Cancelled,
    /// The request itself was unusable (empty script, bad parameters).
    InvalidRequest,
    Io,
}

impl ErrorKind {
    /// Whether retrying the same operation can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::TransientBrokerError | Self::StepExecutionFailure | Self::Io
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PlatformUnsupported => "platform_unsupported",
            Self::Timeout => "timeout",
            Self::TransientBrokerError => "transient_broker_error",
            Self::MalformedMessage => "malformed_message",
            Self::StepExecutionFailure => "step_execution_failure",
            Self::SpawnFailed => "spawn_failed",
            Self::Cancelled => "cancelled",
            Self::InvalidRequest => "invalid_request",
            Self::Io => "io",
        };
        f.write_str(s)
    }
}
