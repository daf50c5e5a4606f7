//! Policy orchestrator: runs a policy's step graph through the executor set.
//!
//! Steps run in step-number order unless an action redirects. For each step
//! the run condition is checked against whether any earlier step in this run
//! failed; a step that is not run is recorded `skipped`. A failing step is
//! re-run up to `maxRetries` times before its `onFailure` action applies.
//!
//! The run as a whole has its own deadline. Each step's timeout is capped by
//! what remains of it; when the deadline cuts a step short the step is
//! recorded `timeout` and the run ends `timeout`. Every step that never got
//! a result is recorded `skipped`, so a finished run always accounts for
//! every step.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use armada_core::{
    ExecutionRequest, ExecutionResult, FailureAction, FinalStatus, PolicyExecutionCommand,
    PolicyExecutionResult, PolicyStatus, RunCondition, Step, StepResult, StepStatus, SuccessAction,
};

use crate::cancel::CancelSignal;
use crate::executor::ExecutorSet;

/// Each step may be invoked at most this many times per run on average;
/// jump cycles that exceed it end the run as failed.
const INVOCATIONS_PER_STEP: usize = 16;

pub struct PolicyOrchestrator {
    executors: Arc<ExecutorSet>,
    work_dir: Option<PathBuf>,
}

enum RunEnd {
    Completed,
    Failed(String),
    Cancelled,
    TimedOut,
}

enum StepEnd {
    Finished(StepResult),
    Cancelled(StepResult),
    Deadline(StepResult),
}

impl PolicyOrchestrator {
    pub fn new(executors: Arc<ExecutorSet>) -> Self {
        Self {
            executors,
            work_dir: None,
        }
    }

    /// Default working directory for steps that do not set one.
    pub fn with_work_dir(mut self, dir: PathBuf) -> Self {
        self.work_dir = Some(dir);
        self
    }

    /// Run `cmd` to a terminal state. `progress` sees a snapshot after
    /// every step and once more at the end.
    pub async fn run(
        &self,
        cmd: &PolicyExecutionCommand,
        cancel: CancelSignal,
        progress: &(dyn Fn(&PolicyExecutionResult) + Send + Sync),
    ) -> PolicyExecutionResult {
        if let Err(e) = cmd.validate() {
            tracing::warn!(execution_id = %cmd.execution_id, error = %e, "policy rejected");
            let result = PolicyExecutionResult::rejected(cmd, e.to_string());
            progress(&result);
            return result;
        }

        let mut steps: Vec<&Step> = cmd.steps.iter().collect();
        steps.sort_by_key(|s| s.step_number);
        let index: HashMap<u32, usize> = steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.step_number, i))
            .collect();
        let total = steps.len();
        let deadline = Instant::now() + Duration::from_secs(cmd.timeout_seconds);

        let mut result = PolicyExecutionResult::pending(cmd);
        result.status = PolicyStatus::Running;
        progress(&result);
        tracing::info!(
            execution_id = %cmd.execution_id,
            policy_id = %cmd.policy_id,
            steps = total,
            "policy run started"
        );

        let mut slots: Vec<Option<StepResult>> = vec![None; total];
        let mut failure_seen = false;
        let mut invocations = 0usize;
        let mut idx = 0usize;

        let end = loop {
            if idx >= total {
                break RunEnd::Completed;
            }
            if invocations >= total * INVOCATIONS_PER_STEP {
                break RunEnd::Failed(format!(
                    "step invocation limit of {} reached",
                    total * INVOCATIONS_PER_STEP
                ));
            }
            if cancel.is_cancelled() {
                break RunEnd::Cancelled;
            }
            if Instant::now() >= deadline {
                break RunEnd::TimedOut;
            }
            invocations += 1;

            let step = steps[idx];
            result.current_step = step.step_number;

            let should_run = match step.run_condition {
                RunCondition::Always => true,
                RunCondition::OnSuccess => !failure_seen,
                RunCondition::OnFailure => failure_seen,
            };
            if !should_run {
                tracing::debug!(step = step.step_number, "run condition not met; skipping");
                slots[idx] = Some(StepResult::skipped(step.step_number));
                idx += 1;
                snapshot(&mut result, &slots, &steps);
                progress(&result);
                continue;
            }

            let (end, retries) = self.run_step(cmd, step, deadline, &cancel).await;
            result.retry_count += retries;
            let step_result = match end {
                StepEnd::Finished(r) => r,
                StepEnd::Cancelled(r) => {
                    slots[idx] = Some(r);
                    break RunEnd::Cancelled;
                }
                StepEnd::Deadline(r) => {
                    slots[idx] = Some(r);
                    break RunEnd::TimedOut;
                }
            };
            let succeeded = step_result.status == StepStatus::Success;
            let failure = step_result.error_message.clone();
            slots[idx] = Some(step_result);

            let next = if succeeded {
                match step.on_success {
                    SuccessAction::Continue => Some(idx + 1),
                    SuccessAction::Stop => None,
                    SuccessAction::JumpToStep(n) => index.get(&n).copied(),
                }
            } else {
                failure_seen = true;
                match step.on_failure {
                    FailureAction::Continue => Some(idx + 1),
                    FailureAction::JumpToStep(n) => index.get(&n).copied(),
                    FailureAction::Stop | FailureAction::Retry => {
                        snapshot(&mut result, &slots, &steps);
                        break RunEnd::Failed(format!(
                            "step {} failed: {}",
                            step.step_number,
                            failure.unwrap_or_else(|| "unknown error".to_string())
                        ));
                    }
                }
            };
            snapshot(&mut result, &slots, &steps);
            progress(&result);
            match next {
                Some(i) => idx = i,
                None => break RunEnd::Completed,
            }
        };

        finish(&mut result, slots, &steps, end);
        progress(&result);
        tracing::info!(
            execution_id = %cmd.execution_id,
            status = ?result.status,
            final_status = ?result.final_status,
            completed = result.completed_steps,
            total = result.total_steps,
            "policy run finished"
        );
        result
    }

    /// Run one step, re-running failures up to `max_retries` times.
    /// Returns the outcome and the number of re-runs.
    async fn run_step(
        &self,
        cmd: &PolicyExecutionCommand,
        step: &Step,
        deadline: Instant,
        cancel: &CancelSignal,
    ) -> (StepEnd, u32) {
        let own_timeout = Duration::from_secs(step.timeout_seconds);
        let mut retries = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let capped = remaining < own_timeout;
            let timeout = own_timeout.min(remaining);
            let request = self.request_for(cmd, step, timeout);

            let exec = self
                .executors
                .execute(step.executor_kind, request, cancel.clone())
                .await;
            let mut step_result = step_result(step, &exec);

            if cancel.is_cancelled() {
                step_result.status = StepStatus::Failed;
                step_result.error_message = Some("cancelled".to_string());
                return (StepEnd::Cancelled(step_result), retries);
            }
            if exec.timed_out && capped {
                step_result.error_message = Some("policy timeout reached".to_string());
                return (StepEnd::Deadline(step_result), retries);
            }
            if step_result.status == StepStatus::Success || retries >= step.max_retries {
                return (StepEnd::Finished(step_result), retries);
            }
            retries += 1;
            tracing::debug!(
                execution_id = %cmd.execution_id,
                step = step.step_number,
                retry = retries,
                max = step.max_retries,
                "step failed; retrying"
            );
        }
    }

    fn request_for(
        &self,
        cmd: &PolicyExecutionCommand,
        step: &Step,
        timeout: Duration,
    ) -> ExecutionRequest {
        let mut request = ExecutionRequest::new(step.script_content.clone(), timeout)
            .with_env("ARMADA_EXECUTION_ID", cmd.execution_id.clone())
            .with_env("ARMADA_POLICY_ID", cmd.policy_id.clone())
            .with_env("ARMADA_STEP_NUMBER", step.step_number.to_string());
        for (key, value) in &step.parameters {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            request = request.with_env(format!("ARMADA_PARAM_{}", env_key(key)), value);
        }
        let params = &step.parameters;
        if let Some(path) = params.get("interpreterPath").and_then(|v| v.as_str()) {
            request = request.with_interpreter(path);
        }
        if let Some(capture) = params.get("captureStderr").and_then(|v| v.as_bool()) {
            request = request.with_capture_stderr(capture);
        }
        match params.get("workingDirectory").and_then(|v| v.as_str()) {
            Some(dir) => request = request.with_working_directory(dir),
            None => {
                if let Some(dir) = &self.work_dir {
                    request = request.with_working_directory(dir.clone());
                }
            }
        }
        request.with_parameters(step.parameters.clone())
    }
}

fn env_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn step_result(step: &Step, exec: &ExecutionResult) -> StepResult {
    let status = if exec.timed_out {
        StepStatus::Timeout
    } else if exec.succeeded() {
        StepStatus::Success
    } else {
        StepStatus::Failed
    };
    let output = if exec.stdout.is_empty() && exec.stderr.is_empty() {
        None
    } else if exec.stderr.is_empty() {
        Some(exec.stdout.clone())
    } else if exec.stdout.is_empty() {
        Some(exec.stderr.clone())
    } else {
        Some(format!("{}\n{}", exec.stdout, exec.stderr))
    };
    StepResult {
        step_number: step.step_number,
        status,
        exit_code: exec.exit_code,
        output,
        error_message: exec.failure_message(),
        execution_time_ms: exec.elapsed_ms(),
    }
}

/// Refresh step results and progress from the per-step slots.
fn snapshot(result: &mut PolicyExecutionResult, slots: &[Option<StepResult>], steps: &[&Step]) {
    result.step_results = slots.iter().flatten().cloned().collect();
    result.completed_steps = slots.iter().filter(|s| s.is_some()).count() as u32;
    result.progress = if steps.is_empty() {
        0.0
    } else {
        result.completed_steps as f64 / steps.len() as f64
    };
}

fn finish(
    result: &mut PolicyExecutionResult,
    mut slots: Vec<Option<StepResult>>,
    steps: &[&Step],
    end: RunEnd,
) {
    snapshot(result, &slots, steps);
    let reached = result.completed_steps;
    let progress = result.progress;

    for (slot, step) in slots.iter_mut().zip(steps) {
        if slot.is_none() {
            *slot = Some(StepResult::skipped(step.step_number));
        }
    }
    snapshot(result, &slots, steps);
    // A completed run counts every skipped step toward progress. A run that
    // stopped early reports how far it got.
    if !matches!(end, RunEnd::Completed) {
        result.completed_steps = reached;
        result.progress = progress;
    }

    let (status, final_status, error) = match end {
        RunEnd::Completed => {
            let clean = result
                .step_results
                .iter()
                .filter(|r| r.status != StepStatus::Skipped)
                .all(|r| r.status == StepStatus::Success);
            let final_status = if clean {
                FinalStatus::Success
            } else {
                FinalStatus::PartialSuccess
            };
            (PolicyStatus::Completed, final_status, None)
        }
        RunEnd::Failed(msg) => (PolicyStatus::Failed, FinalStatus::Failed, Some(msg)),
        RunEnd::Cancelled => (
            PolicyStatus::Cancelled,
            FinalStatus::Failed,
            Some("cancelled".to_string()),
        ),
        RunEnd::TimedOut => (
            PolicyStatus::Timeout,
            FinalStatus::Failed,
            Some("policy timeout reached".to_string()),
        ),
    };
    result.status = status;
    result.final_status = Some(final_status);
    result.error_message = error;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancel_pair;
    use crate::executor::Executor;
    use armada_core::{ErrorKind, ExecutorKind};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Interprets the script text:
    /// `ok`, `fail`, `sleep:<ms>`, `flaky:<n>` (fails the first n calls).
    #[derive(Default)]
    struct Scripted {
        calls: Mutex<Vec<String>>,
        flaky: Mutex<HashMap<String, u32>>,
    }

    impl Scripted {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Executor for Scripted {
        fn kind(&self) -> ExecutorKind {
            ExecutorKind::Shell
        }

        fn supports_platform(&self) -> bool {
            true
        }

        async fn execute(&self, request: ExecutionRequest, mut cancel: CancelSignal) -> ExecutionResult {
            let started = armada_core::now_ms();
            let step = request
                .environment
                .get("ARMADA_STEP_NUMBER")
                .cloned()
                .unwrap_or_default();
            self.calls.lock().unwrap().push(step);
            let script = request.command.as_str();
            if let Some(ms) = script.strip_prefix("sleep:") {
                let ms: u64 = ms.parse().unwrap();
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
                    _ = tokio::time::sleep(request.timeout) => {
                        return ExecutionResult::timed_out(request.timeout, String::new(), String::new(), started);
                    }
                    _ = cancel.cancelled() => {
                        return ExecutionResult::failed(ErrorKind::Cancelled, "cancelled", started);
                    }
                }
                return ExecutionResult::exited(0, "slept".into(), String::new(), started);
            }
            if let Some(n) = script.strip_prefix("flaky:") {
                let n: u32 = n.parse().unwrap();
                let mut seen = self.flaky.lock().unwrap();
                let count = seen.entry(script.to_string()).or_default();
                *count += 1;
                return if *count <= n {
                    ExecutionResult::exited(1, String::new(), "flaked".into(), started)
                } else {
                    ExecutionResult::exited(0, "recovered".into(), String::new(), started)
                };
            }
            match script {
                "ok" => ExecutionResult::exited(0, "done".into(), String::new(), started),
                _ => ExecutionResult::exited(2, String::new(), "boom".into(), started),
            }
        }
    }

    fn orchestrator() -> (Arc<Scripted>, PolicyOrchestrator) {
        let exec = Arc::new(Scripted::default());
        let mut set = ExecutorSet::new();
        set.register(exec.clone());
        (exec, PolicyOrchestrator::new(Arc::new(set)))
    }

    fn step(n: u32, script: &str) -> Step {
        Step {
            step_number: n,
            executor_kind: ExecutorKind::Shell,
            script_content: script.to_string(),
            run_condition: RunCondition::Always,
            on_success: SuccessAction::Continue,
            on_failure: FailureAction::Stop,
            timeout_seconds: 10,
            max_retries: 0,
            parameters: Default::default(),
        }
    }

    fn policy(steps: Vec<Step>) -> PolicyExecutionCommand {
        PolicyExecutionCommand {
            execution_id: "exec-1".into(),
            agent_id: "agent-1".into(),
            policy_id: "pol-1".into(),
            policy_name: "test".into(),
            steps,
            timeout_seconds: 60,
            expires_at: u64::MAX,
        }
    }

    async fn run(orch: &PolicyOrchestrator, p: &PolicyExecutionCommand) -> PolicyExecutionResult {
        orch.run(p, CancelSignal::never(), &|_| {}).await
    }

    fn statuses(r: &PolicyExecutionResult) -> Vec<StepStatus> {
        r.step_results.iter().map(|s| s.status).collect()
    }

    fn assert_accounted(r: &PolicyExecutionResult) {
        assert_eq!(r.step_results.len() as u32, r.total_steps);
        let sum: usize = [
            StepStatus::Success,
            StepStatus::Failed,
            StepStatus::Skipped,
            StepStatus::Timeout,
        ]
        .iter()
        .map(|s| r.count(*s))
        .sum();
        assert_eq!(sum as u32, r.total_steps);
    }

    #[tokio::test]
    async fn all_success() {
        let (_, orch) = orchestrator();
        let r = run(&orch, &policy(vec![step(1, "ok"), step(2, "ok")])).await;
        assert_eq!(r.status, PolicyStatus::Completed);
        assert_eq!(r.final_status, Some(FinalStatus::Success));
        assert_eq!(r.progress, 1.0);
        assert_eq!(r.completed_steps, 2);
        assert_accounted(&r);
    }

    #[tokio::test]
    async fn tolerated_failure_is_partial_success() {
        let (_, orch) = orchestrator();
        let mut s2 = step(2, "fail");
        s2.on_failure = FailureAction::Continue;
        let r = run(&orch, &policy(vec![step(1, "ok"), s2, step(3, "ok")])).await;
        assert_eq!(r.status, PolicyStatus::Completed);
        assert_eq!(r.final_status, Some(FinalStatus::PartialSuccess));
        assert_eq!(
            statuses(&r),
            vec![StepStatus::Success, StepStatus::Failed, StepStatus::Success]
        );
        assert_eq!(r.step_results[1].exit_code, Some(2));
        assert!(r.step_results[1]
            .error_message
            .as_deref()
            .unwrap()
            .contains("boom"));
        assert_accounted(&r);
    }

    #[tokio::test]
    async fn stop_on_failure_skips_the_rest() {
        let (exec, orch) = orchestrator();
        let r = run(&orch, &policy(vec![step(1, "fail"), step(2, "ok"), step(3, "ok")])).await;
        assert_eq!(r.status, PolicyStatus::Failed);
        assert_eq!(r.final_status, Some(FinalStatus::Failed));
        assert_eq!(
            statuses(&r),
            vec![StepStatus::Failed, StepStatus::Skipped, StepStatus::Skipped]
        );
        assert_eq!(exec.calls(), vec!["1"]);
        assert_eq!(r.completed_steps, 1);
        assert_accounted(&r);
    }

    #[tokio::test]
    async fn success_stop_ends_completed() {
        let (exec, orch) = orchestrator();
        let mut s1 = step(1, "ok");
        s1.on_success = SuccessAction::Stop;
        let r = run(&orch, &policy(vec![s1, step(2, "ok")])).await;
        assert_eq!(r.status, PolicyStatus::Completed);
        assert_eq!(r.final_status, Some(FinalStatus::Success));
        assert_eq!(exec.calls(), vec!["1"]);
        assert_eq!(r.progress, 1.0);
        assert_accounted(&r);
    }

    #[tokio::test]
    async fn jump_back_re_executes_earlier_step() {
        let (exec, orch) = orchestrator();
        let mut s2 = step(2, "flaky:1");
        s2.on_failure = FailureAction::JumpToStep(1);
        let r = run(&orch, &policy(vec![step(1, "ok"), s2])).await;
        assert_eq!(exec.calls(), vec!["1", "2", "1", "2"]);
        assert_eq!(r.status, PolicyStatus::Completed);
        assert_eq!(r.final_status, Some(FinalStatus::Success));
        assert_accounted(&r);
    }

    #[tokio::test]
    async fn jump_forward_has_no_fallthrough() {
        let (exec, orch) = orchestrator();
        let mut s1 = step(1, "ok");
        s1.on_success = SuccessAction::JumpToStep(3);
        let r = run(&orch, &policy(vec![s1, step(2, "ok"), step(3, "ok")])).await;
        assert_eq!(exec.calls(), vec!["1", "3"]);
        assert_eq!(
            statuses(&r),
            vec![StepStatus::Success, StepStatus::Skipped, StepStatus::Success]
        );
        assert_eq!(r.status, PolicyStatus::Completed);
        assert_eq!(r.completed_steps, r.total_steps);
        assert_eq!(r.progress, 1.0);
        assert_accounted(&r);
    }

    #[tokio::test]
    async fn run_conditions_follow_failure_state() {
        let (exec, orch) = orchestrator();
        let mut s1 = step(1, "fail");
        s1.on_failure = FailureAction::Continue;
        let mut s2 = step(2, "ok");
        s2.run_condition = RunCondition::OnSuccess;
        let mut s3 = step(3, "ok");
        s3.run_condition = RunCondition::OnFailure;
        let r = run(&orch, &policy(vec![s1, s2, s3])).await;
        assert_eq!(exec.calls(), vec!["1", "3"]);
        assert_eq!(
            statuses(&r),
            vec![StepStatus::Failed, StepStatus::Skipped, StepStatus::Success]
        );
        assert_eq!(r.final_status, Some(FinalStatus::PartialSuccess));
        // Condition-skipped steps count toward progress.
        assert_eq!(r.progress, 1.0);
        assert_accounted(&r);
    }

    #[tokio::test]
    async fn on_failure_condition_skipped_when_all_pass() {
        let (_, orch) = orchestrator();
        let mut s2 = step(2, "ok");
        s2.run_condition = RunCondition::OnFailure;
        let r = run(&orch, &policy(vec![step(1, "ok"), s2])).await;
        assert_eq!(statuses(&r), vec![StepStatus::Success, StepStatus::Skipped]);
        assert_eq!(r.final_status, Some(FinalStatus::Success));
    }

    #[tokio::test]
    async fn retries_before_failure_action() {
        let (exec, orch) = orchestrator();
        let mut s1 = step(1, "flaky:2");
        s1.max_retries = 2;
        let r = run(&orch, &policy(vec![s1])).await;
        assert_eq!(r.final_status, Some(FinalStatus::Success));
        assert_eq!(r.retry_count, 2);
        assert_eq!(exec.calls().len(), 3);
    }

    #[tokio::test]
    async fn exhausted_retry_falls_back_to_stop() {
        let (exec, orch) = orchestrator();
        let mut s1 = step(1, "flaky:5");
        s1.max_retries = 1;
        s1.on_failure = FailureAction::Retry;
        let r = run(&orch, &policy(vec![s1, step(2, "ok")])).await;
        assert_eq!(r.status, PolicyStatus::Failed);
        assert_eq!(r.retry_count, 1);
        assert_eq!(exec.calls(), vec!["1", "1"]);
        assert_eq!(statuses(&r), vec![StepStatus::Failed, StepStatus::Skipped]);
    }

    #[tokio::test]
    async fn runaway_jump_loop_is_capped() {
        let (exec, orch) = orchestrator();
        let mut s1 = step(1, "ok");
        s1.on_success = SuccessAction::JumpToStep(1);
        let r = run(&orch, &policy(vec![s1, step(2, "ok")])).await;
        assert_eq!(r.status, PolicyStatus::Failed);
        assert!(r.error_message.unwrap().contains("limit"));
        assert_eq!(exec.calls().len(), 2 * INVOCATIONS_PER_STEP);
    }

    #[tokio::test]
    async fn overall_timeout_interrupts_current_step() {
        let (_, orch) = orchestrator();
        let mut p = policy(vec![step(1, "sleep:10000"), step(2, "ok")]);
        p.timeout_seconds = 1;
        let started = Instant::now();
        let r = run(&orch, &p).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(r.status, PolicyStatus::Timeout);
        assert_eq!(r.final_status, Some(FinalStatus::Failed));
        assert_eq!(statuses(&r), vec![StepStatus::Timeout, StepStatus::Skipped]);
        assert_accounted(&r);
    }

    #[tokio::test]
    async fn step_timeout_follows_failure_action() {
        let (_, orch) = orchestrator();
        let mut s1 = step(1, "sleep:10000");
        s1.timeout_seconds = 1;
        s1.on_failure = FailureAction::Continue;
        let r = run(&orch, &policy(vec![s1, step(2, "ok")])).await;
        assert_eq!(r.status, PolicyStatus::Completed);
        assert_eq!(statuses(&r), vec![StepStatus::Timeout, StepStatus::Success]);
        assert_eq!(r.final_status, Some(FinalStatus::PartialSuccess));
    }

    #[tokio::test]
    async fn cancellation_stops_in_flight_step() {
        let (_, orch) = orchestrator();
        let p = policy(vec![step(1, "sleep:10000"), step(2, "ok"), step(3, "ok")]);
        let (handle, signal) = cancel_pair();
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.cancel();
        });
        let started = Instant::now();
        let r = orch.run(&p, signal, &|_| {}).await;
        canceller.await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(r.status, PolicyStatus::Cancelled);
        assert_eq!(r.final_status, Some(FinalStatus::Failed));
        assert_eq!(
            statuses(&r),
            vec![StepStatus::Failed, StepStatus::Skipped, StepStatus::Skipped]
        );
        assert_eq!(r.step_results[0].error_message.as_deref(), Some("cancelled"));
        assert_accounted(&r);
    }

    #[tokio::test]
    async fn invalid_policy_is_rejected_without_running() {
        let (exec, orch) = orchestrator();
        let mut s1 = step(1, "ok");
        s1.on_success = SuccessAction::JumpToStep(9);
        let r = run(&orch, &policy(vec![s1])).await;
        assert_eq!(r.status, PolicyStatus::Failed);
        assert!(exec.calls().is_empty());
        assert_accounted(&r);
    }

    #[tokio::test]
    async fn progress_reported_after_every_step() {
        let (_, orch) = orchestrator();
        let seen = Mutex::new(Vec::new());
        let p = policy(vec![step(1, "ok"), step(2, "ok"), step(3, "ok"), step(4, "ok")]);
        orch.run(&p, CancelSignal::never(), &|r| {
            seen.lock().unwrap().push((r.status, r.progress));
        })
        .await;
        let seen = seen.into_inner().unwrap();
        // Running snapshot, one per step, final.
        assert_eq!(seen.len(), 6);
        assert_eq!(seen[0], (PolicyStatus::Running, 0.0));
        assert_eq!(seen[2].1, 0.5);
        assert_eq!(seen.last().unwrap(), &(PolicyStatus::Completed, 1.0));
    }

    #[test]
    fn params_exported_as_env() {
        let (_, orch) = orchestrator();
        let mut s = step(1, "ok");
        s.parameters.insert("target-host".into(), serde_json::json!("web01"));
        s.parameters.insert("port".into(), serde_json::json!(8080));
        s.parameters.insert("captureStderr".into(), serde_json::json!(false));
        let req = orch.request_for(&policy(vec![]), &s, Duration::from_secs(1));
        assert_eq!(req.environment["ARMADA_PARAM_TARGET_HOST"], "web01");
        assert_eq!(req.environment["ARMADA_PARAM_PORT"], "8080");
        assert_eq!(req.environment["ARMADA_STEP_NUMBER"], "1");
        assert!(!req.capture_stderr);
        assert_eq!(req.parameters.len(), 3);
    }
}
