//! Policy execution payloads: the agent-bound command and the server-bound result.
//!
//! Both are JSON documents with camelCase field names. `execution_id` is the
//! idempotency key for at-least-once delivery.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::execution::ExecutorKind;

// ── Step definition ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunCondition {
    #[default]
    Always,
    /// Only if no earlier step in this run has failed.
    OnSuccess,
    /// Only if an earlier step in this run has failed.
    OnFailure,
}

/// What to do after a step succeeds.
///
/// Wire form: `"continue"`, `"stop"`, or `{"jump_to_step": 3}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessAction {
    #[default]
    Continue,
    Stop,
    JumpToStep(u32),
}

/// What to do after a step fails or times out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureAction {
    Continue,
    #[default]
    Stop,
    Retry,
    JumpToStep(u32),
}

fn default_step_timeout() -> u64 {
    300
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub step_number: u32,
    pub executor_kind: ExecutorKind,
    pub script_content: String,
    #[serde(default)]
    pub run_condition: RunCondition,
    #[serde(default)]
    pub on_success: SuccessAction,
    #[serde(default)]
    pub on_failure: FailureAction,
    #[serde(default = "default_step_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

impl Step {
    fn jump_targets(&self) -> impl Iterator<Item = u32> {
        let on_success = match self.on_success {
            SuccessAction::JumpToStep(n) => Some(n),
            _ => None,
        };
        let on_failure = match self.on_failure {
            FailureAction::JumpToStep(n) => Some(n),
            _ => None,
        };
        on_success.into_iter().chain(on_failure)
    }
}

// ── Command ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyExecutionCommand {
    pub execution_id: String,
    pub agent_id: String,
    pub policy_id: String,
    pub policy_name: String,
    pub steps: Vec<Step>,
    /// Budget for the whole run.
    pub timeout_seconds: u64,
    /// Unix ms. Agents ignore the command once this has passed.
    pub expires_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("policy has no steps")]
    Empty,
    #[error("step number {0} appears more than once")]
    DuplicateStep(u32),
    #[error("step {from} jumps to unknown step {to}")]
    UnknownJumpTarget { from: u32, to: u32 },
}

impl PolicyExecutionCommand {
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms > self.expires_at
    }

    /// Check the step graph is runnable.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.steps.is_empty() {
            return Err(PolicyError::Empty);
        }
        let mut numbers = HashSet::new();
        for step in &self.steps {
            if !numbers.insert(step.step_number) {
                return Err(PolicyError::DuplicateStep(step.step_number));
            }
        }
        for step in &self.steps {
            if let Some(to) = step.jump_targets().find(|n| !numbers.contains(n)) {
                return Err(PolicyError::UnknownJumpTarget {
                    from: step.step_number,
                    to,
                });
            }
        }
        Ok(())
    }
}

// ── Result ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl PolicyStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    Success,
    PartialSuccess,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_number: u32,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub execution_time_ms: u64,
}

impl StepResult {
    pub fn skipped(step_number: u32) -> Self {
        Self {
            step_number,
            status: StepStatus::Skipped,
            exit_code: None,
            output: None,
            error_message: None,
            execution_time_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyExecutionResult {
    pub execution_id: String,
    pub agent_id: String,
    pub policy_id: String,
    pub status: PolicyStatus,
    /// `completed_steps / total_steps`, in `[0, 1]`.
    pub progress: f64,
    pub total_steps: u32,
    pub completed_steps: u32,
    /// Step number currently (or last) executing; 0 before the first step.
    pub current_step: u32,
    pub step_results: Vec<StepResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_status: Option<FinalStatus>,
    pub retry_count: u32,
    #[serde(default)]
    pub reported_to_server: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl PolicyExecutionResult {
    pub fn pending(cmd: &PolicyExecutionCommand) -> Self {
        Self {
            execution_id: cmd.execution_id.clone(),
            agent_id: cmd.agent_id.clone(),
            policy_id: cmd.policy_id.clone(),
            status: PolicyStatus::Pending,
            progress: 0.0,
            total_steps: cmd.steps.len() as u32,
            completed_steps: 0,
            current_step: 0,
            step_results: Vec::new(),
            final_status: None,
            retry_count: 0,
            reported_to_server: false,
            error_message: None,
        }
    }

    /// A run that never started: every step skipped, outcome failed.
    pub fn rejected(cmd: &PolicyExecutionCommand, reason: impl Into<String>) -> Self {
        let mut result = Self::pending(cmd);
        result.status = PolicyStatus::Failed;
        result.step_results = cmd
            .steps
            .iter()
            .map(|s| StepResult::skipped(s.step_number))
            .collect();
        result.completed_steps = result.total_steps;
        result.progress = if result.total_steps == 0 { 0.0 } else { 1.0 };
        result.final_status = Some(FinalStatus::Failed);
        result.error_message = Some(reason.into());
        result
    }

    /// Number of step results with the given status.
    pub fn count(&self, status: StepStatus) -> usize {
        self.step_results
            .iter()
            .filter(|r| r.status == status)
            .count()
    }
}
