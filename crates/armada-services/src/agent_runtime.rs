//! Agent runtime: turns persisted commands into results.
//!
//! `intake` is the write-ahead step: a command is stored in the local queue
//! (or recognised as a duplicate, expired, or not ours) before the caller
//! acknowledges it upstream. `run` polls the queue for received commands,
//! marks them running, and executes each under a concurrency permit. Every
//! outcome lands back in the queue as an outbound result.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{broadcast, Notify, Semaphore};

use armada_core::command::{command_types, CancelSpec, ExecuteSpec};
use armada_core::config::{AgentConfig, ExecutorSettings};
use armada_core::{
    now_ms, Command, CommandResult, CommandStatus, ExecutionRequest, ExecutionResult,
    PolicyExecutionCommand, PolicyExecutionResult, PolicyStatus,
};

use crate::cancel::{cancel_pair, CancelHandle};
use crate::executor::ExecutorSet;
use crate::local_queue::{InboundStatus, LocalQueue, QueueError, RecordOutcome};
use crate::orchestrator::PolicyOrchestrator;

/// How long a cancel for an execution that never showed up is remembered.
const PRECANCEL_TTL_MS: u64 = 24 * 60 * 60 * 1000;

/// What `intake` did with a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intake {
    /// Persisted; will run.
    Accepted,
    /// Seen before by command id or policy execution id.
    Duplicate,
    /// Past its TTL or policy expiry. Recorded, never run.
    Expired,
    /// Addressed to another agent.
    Ignored,
    /// A cancel request, applied immediately.
    Cancelled,
}

pub struct AgentRuntime {
    agent_id: String,
    queue: LocalQueue,
    executors: Arc<ExecutorSet>,
    orchestrator: PolicyOrchestrator,
    work_dir: PathBuf,
    default_timeout: Duration,
    poll_interval: Duration,
    max_concurrency: usize,
    semaphore: Arc<Semaphore>,
    /// execution id (or command id for plain executions) -> cancel handle.
    running: DashMap<String, CancelHandle>,
    /// Cancels that arrived before their execution started, with the time
    /// they arrived.
    precancelled: DashMap<String, u64>,
    wake: Notify,
    result_ready: Option<Arc<Notify>>,
}

impl AgentRuntime {
    pub fn new(config: &AgentConfig, settings: &ExecutorSettings, queue: LocalQueue) -> Self {
        let executors = Arc::new(ExecutorSet::with_defaults(settings, config.work_dir.clone()));
        Self::with_executors(config, queue, executors)
    }

    pub fn with_executors(
        config: &AgentConfig,
        queue: LocalQueue,
        executors: Arc<ExecutorSet>,
    ) -> Self {
        if let Err(e) = std::fs::create_dir_all(&config.work_dir) {
            tracing::warn!(dir = %config.work_dir.display(), error = %e, "cannot create work dir");
        }
        let max_concurrency = config.max_concurrency();
        Self {
            agent_id: queue.agent_id().to_string(),
            orchestrator: PolicyOrchestrator::new(executors.clone())
                .with_work_dir(config.work_dir.clone()),
            executors,
            queue,
            work_dir: config.work_dir.clone(),
            default_timeout: Duration::from_secs(config.default_timeout_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(10)),
            max_concurrency,
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            running: DashMap::new(),
            precancelled: DashMap::new(),
            wake: Notify::new(),
            result_ready: None,
        }
    }

    /// Notified whenever a result is queued for delivery.
    pub fn with_result_notify(mut self, notify: Arc<Notify>) -> Self {
        self.result_ready = Some(notify);
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn queue(&self) -> &LocalQueue {
        &self.queue
    }

    pub fn in_flight(&self) -> usize {
        self.max_concurrency - self.semaphore.available_permits()
    }

    // ── Intake ────────────────────────────────────────────────────────────────

    /// Persist `cmd` before it is acknowledged upstream.
    pub fn intake(&self, cmd: &Command) -> Result<Intake, QueueError> {
        if !cmd.targets(&self.agent_id) {
            return Ok(Intake::Ignored);
        }
        let now = now_ms();
        if cmd.is_expired_at(now) {
            tracing::info!(command_id = %cmd.id, "command expired before receipt; not running");
            return Ok(match self.queue.record_expired(cmd)? {
                RecordOutcome::Accepted => Intake::Expired,
                RecordOutcome::Duplicate => Intake::Duplicate,
            });
        }

        match cmd.command_type.as_str() {
            command_types::CANCEL_EXECUTION => {
                if self.queue.record_command(cmd)? == RecordOutcome::Duplicate {
                    return Ok(Intake::Duplicate);
                }
                match serde_json::from_value::<CancelSpec>(cmd.payload.clone()) {
                    Ok(spec) => {
                        self.cancel_execution(&spec.execution_id);
                        self.queue
                            .set_command_status(&cmd.id, InboundStatus::Completed)?;
                    }
                    Err(e) => {
                        tracing::warn!(command_id = %cmd.id, error = %e, "malformed cancel request");
                        self.queue.set_command_status(&cmd.id, InboundStatus::Failed)?;
                    }
                }
                Ok(Intake::Cancelled)
            }
            command_types::POLICY_EXECUTION => {
                let policy = serde_json::from_value::<PolicyExecutionCommand>(cmd.payload.clone());
                if let Ok(policy) = &policy {
                    if policy.is_expired_at(now) {
                        tracing::info!(execution_id = %policy.execution_id, "policy expired before receipt; not running");
                        return Ok(match self.queue.record_expired(cmd)? {
                            RecordOutcome::Accepted => Intake::Expired,
                            RecordOutcome::Duplicate => Intake::Duplicate,
                        });
                    }
                }
                if self.queue.record_command(cmd)? == RecordOutcome::Duplicate {
                    return Ok(Intake::Duplicate);
                }
                // A malformed payload is persisted anyway and rejected when run.
                if let Ok(policy) = &policy {
                    if self.queue.record_policy(policy)? == RecordOutcome::Duplicate {
                        tracing::info!(execution_id = %policy.execution_id, "duplicate policy execution ignored");
                        self.queue
                            .set_command_status(&cmd.id, InboundStatus::Completed)?;
                        return Ok(Intake::Duplicate);
                    }
                }
                self.wake.notify_one();
                Ok(Intake::Accepted)
            }
            _ => {
                if self.queue.record_command(cmd)? == RecordOutcome::Duplicate {
                    return Ok(Intake::Duplicate);
                }
                self.wake.notify_one();
                Ok(Intake::Accepted)
            }
        }
    }

    /// Cancel a running execution, or arrange for it to be cancelled on
    /// start. Returns true if it was running.
    pub fn cancel_execution(&self, execution_id: &str) -> bool {
        match self.running.get(execution_id) {
            Some(handle) => {
                tracing::info!(execution_id, "cancelling running execution");
                handle.cancel();
                true
            }
            None => {
                let now = now_ms();
                self.prune_precancelled(now);
                if self.already_finished(execution_id) {
                    tracing::debug!(execution_id, "cancel for finished execution ignored");
                } else {
                    self.precancelled.insert(execution_id.to_string(), now);
                }
                false
            }
        }
    }

    /// True when `id` names a policy run or plain command that has already
    /// reached a final state here.
    fn already_finished(&self, id: &str) -> bool {
        let policy = match self.queue.policy_result(id) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(execution_id = id, error = %e, "policy lookup failed");
                None
            }
        };
        if let Some(snapshot) = policy {
            return snapshot.status.is_terminal();
        }
        matches!(
            self.queue.command_status(id),
            Ok(Some(
                InboundStatus::Completed
                    | InboundStatus::Expired
                    | InboundStatus::Failed
                    | InboundStatus::Cancelled
            ))
        )
    }

    fn prune_precancelled(&self, now: u64) {
        self.precancelled
            .retain(|_, at| now.saturating_sub(*at) < PRECANCEL_TTL_MS);
    }

    // ── Execution ─────────────────────────────────────────────────────────────

    /// Claim received commands and start as many as there are free permits.
    /// Returns how many were started.
    pub async fn run_once(self: &Arc<Self>) -> Result<usize, QueueError> {
        let free = self.semaphore.available_permits();
        if free == 0 {
            return Ok(0);
        }
        let claimed = self.queue.claim_received(free)?;
        let mut started = 0;
        for cmd in claimed {
            if cmd.is_expired_at(now_ms()) {
                tracing::info!(command_id = %cmd.id, "command expired while queued; not running");
                self.queue.set_command_status(&cmd.id, InboundStatus::Expired)?;
                continue;
            }
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let this = self.clone();
            started += 1;
            tokio::spawn(async move {
                this.execute(cmd).await;
                drop(permit);
            });
        }
        Ok(started)
    }

    async fn execute(&self, cmd: Command) {
        let outcome = match cmd.command_type.as_str() {
            command_types::EXECUTE => self.execute_script(&cmd).await,
            command_types::POLICY_EXECUTION => self.execute_policy(&cmd).await,
            // Applied at intake; claimed only if intake was interrupted.
            command_types::CANCEL_EXECUTION => self
                .queue
                .set_command_status(&cmd.id, InboundStatus::Completed),
            other => {
                tracing::warn!(command_id = %cmd.id, command_type = other, "unknown command type");
                self.queue.complete_command(
                    self.rejected(&cmd, format!("unknown command type {other}")),
                    InboundStatus::Failed,
                )
            }
        };
        match outcome {
            Ok(()) => {
                if let Some(n) = &self.result_ready {
                    n.notify_one();
                }
            }
            Err(e) => {
                tracing::error!(command_id = %cmd.id, error = %e, "failed to store result");
            }
        }
    }

    fn rejected(&self, cmd: &Command, reason: String) -> CommandResult {
        CommandResult {
            command_id: cmd.id.clone(),
            agent_id: self.agent_id.clone(),
            output: reason,
            status: CommandStatus::Rejected,
            exit_code: None,
        }
    }

    async fn execute_script(&self, cmd: &Command) -> Result<(), QueueError> {
        let spec = match serde_json::from_value::<ExecuteSpec>(cmd.payload.clone()) {
            Ok(s) => s,
            Err(e) => {
                return self.queue.complete_command(
                    self.rejected(cmd, format!("malformed execute payload: {e}")),
                    InboundStatus::Failed,
                );
            }
        };
        if self.precancelled.remove(&cmd.id).is_some() {
            let mut result = self.rejected(cmd, "cancelled before start".into());
            result.status = CommandStatus::Failed;
            return self.queue.complete_command(result, InboundStatus::Cancelled);
        }

        let timeout = spec
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);
        let mut request = ExecutionRequest::new(spec.script.clone(), timeout)
            .with_capture_stderr(spec.capture_stderr)
            .with_working_directory(
                spec.working_directory
                    .as_ref()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| self.work_dir.clone()),
            )
            .with_env("ARMADA_COMMAND_ID", cmd.id.clone());
        if let Some(path) = &spec.interpreter_path {
            request = request.with_interpreter(path);
        }

        let (handle, signal) = cancel_pair();
        self.running.insert(cmd.id.clone(), handle);
        tracing::debug!(command_id = %cmd.id, kind = spec.executor_kind.name(), "executing command");
        let exec = self.executors.execute(spec.executor_kind, request, signal).await;
        self.running.remove(&cmd.id);

        let result = command_result(&cmd.id, &self.agent_id, &exec);
        tracing::info!(
            command_id = %cmd.id,
            status = ?result.status,
            exit_code = ?result.exit_code,
            elapsed_ms = exec.elapsed_ms(),
            "command finished"
        );
        self.queue.complete_command(result, InboundStatus::Completed)
    }

    async fn execute_policy(&self, cmd: &Command) -> Result<(), QueueError> {
        let mut policy = match serde_json::from_value::<PolicyExecutionCommand>(cmd.payload.clone())
        {
            Ok(p) => p,
            Err(e) => {
                return self.queue.complete_command(
                    self.rejected(cmd, format!("malformed policy payload: {e}")),
                    InboundStatus::Failed,
                );
            }
        };
        // Broadcast policies are reported under this agent's id.
        policy.agent_id = self.agent_id.clone();
        // Recovery after a crash: the snapshot row may be missing if the
        // command arrived through an older intake.
        self.queue.record_policy(&policy)?;

        if self.precancelled.remove(&policy.execution_id).is_some() {
            let mut result = PolicyExecutionResult::rejected(&policy, "cancelled before start");
            result.status = PolicyStatus::Cancelled;
            return self.queue.complete_policy(&cmd.id, result);
        }

        let (handle, signal) = cancel_pair();
        self.running.insert(policy.execution_id.clone(), handle);
        let queue = self.queue.clone();
        let persist = move |snapshot: &PolicyExecutionResult| {
            if let Err(e) = queue.update_policy_progress(snapshot) {
                tracing::warn!(execution_id = %snapshot.execution_id, error = %e, "failed to persist progress");
            }
        };
        let result = self.orchestrator.run(&policy, signal, &persist).await;
        self.running.remove(&policy.execution_id);

        self.queue.complete_policy(&cmd.id, result)
    }

    /// Wait until every running execution has finished.
    pub async fn drain(&self) {
        let n = self.max_concurrency as u32;
        if let Ok(all) = self.semaphore.acquire_many(n).await {
            drop(all);
        }
    }

    /// Poll loop. On shutdown, running executions are cancelled and given a
    /// moment to record their results.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        match self.queue.recover_interrupted() {
            Ok(0) => {}
            Ok(n) => tracing::info!(recovered = n, "resuming interrupted commands"),
            Err(e) => tracing::error!(error = %e, "failed to recover interrupted commands"),
        }
        tracing::info!(
            agent_id = %self.agent_id,
            max_concurrent = self.max_concurrency,
            "agent runtime started"
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.wake.notified() => {}
                _ = shutdown.recv() => break,
            }
            if let Err(e) = self.run_once().await {
                tracing::error!(error = %e, "failed to claim commands");
            }
        }

        for entry in self.running.iter() {
            entry.value().cancel();
        }
        if tokio::time::timeout(Duration::from_secs(5), self.drain())
            .await
            .is_err()
        {
            tracing::warn!("executions still running at shutdown");
        }
        tracing::info!("agent runtime stopped");
    }
}

fn command_result(command_id: &str, agent_id: &str, exec: &ExecutionResult) -> CommandResult {
    let status = if exec.timed_out {
        CommandStatus::Timeout
    } else if exec.succeeded() {
        CommandStatus::Success
    } else {
        CommandStatus::Failed
    };
    let mut output = exec.stdout.clone();
    if !exec.stderr.is_empty() {
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&exec.stderr);
    }
    if let Some(err) = &exec.error {
        if output.is_empty() {
            output = err.message.clone();
        }
    }
    CommandResult {
        command_id: command_id.to_string(),
        agent_id: agent_id.to_string(),
        output,
        status,
        exit_code: exec.exit_code,
    }
}
