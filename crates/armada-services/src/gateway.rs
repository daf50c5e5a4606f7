//! Message bus gateway: the server's only path onto the broker.
//!
//! Commands are published keyed by target agent (or the broadcast key);
//! results are published keyed by command or execution id. When the broker
//! cannot be reached after the configured attempts, submitted commands are
//! parked in the `CommandOutbox` and republished in order by `run_flush`.
//! Anything submitted while the outbox is non-empty queues behind it, so
//! per-agent order survives an outage. A full outbox refuses the command.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::broadcast;

use armada_core::config::BrokerConfig;
use armada_core::{Command, ResultEvent, BROADCAST_KEY};

use crate::broker::{partition_for_key, Broker, BrokerError, Position, TopicDescription};
use crate::outbox::{CommandOutbox, OutboxError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Published(Position),
    /// Accepted but not yet on the broker.
    Queued,
    /// Broker unreachable and the outbox cannot take more.
    Refused,
}

/// Commands for one agent plus the offsets to acknowledge once they are
/// persisted.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentBatch {
    pub commands: Vec<Command>,
    pub next_offsets: Vec<Position>,
}

pub fn agent_group(agent_id: &str) -> String {
    format!("agent-{agent_id}")
}

/// Describe, then create whatever is missing. A topic created concurrently
/// by someone else counts as success.
pub async fn ensure_topics(broker: &dyn Broker, config: &BrokerConfig) -> Result<(), BrokerError> {
    let wanted = [config.command_topic.clone(), config.result_topic.clone()];
    let existing: HashSet<String> = broker
        .describe_topics(&wanted)
        .await?
        .into_iter()
        .map(|t| t.name)
        .collect();
    for name in wanted.iter().filter(|n| !existing.contains(*n)) {
        match broker
            .create_topic(name, config.partitions, config.replication_factor)
            .await
        {
            Ok(()) | Err(BrokerError::TopicExists(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

pub struct Gateway {
    broker: Arc<dyn Broker>,
    config: BrokerConfig,
    pending: CommandOutbox,
}

impl Gateway {
    pub fn new(broker: Arc<dyn Broker>, config: BrokerConfig, pending: CommandOutbox) -> Self {
        Self {
            broker,
            config,
            pending,
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub async fn ensure_topics(&self) -> Result<(), BrokerError> {
        ensure_topics(self.broker.as_ref(), &self.config).await
    }

    pub async fn describe(&self) -> Result<Vec<TopicDescription>, BrokerError> {
        self.broker
            .describe_topics(&[
                self.config.command_topic.clone(),
                self.config.result_topic.clone(),
            ])
            .await
    }

    /// Produce with bounded retries on transient errors. A missing topic is
    /// provisioned once and the produce retried.
    async fn produce(&self, topic: &str, key: &str, value: Bytes) -> Result<Position, BrokerError> {
        let attempts = self.config.publish_attempts.max(1);
        let mut provisioned = false;
        let mut attempt = 0;
        loop {
            match self.broker.produce(topic, key, value.clone()).await {
                Ok(pos) => return Ok(pos),
                Err(BrokerError::UnknownTopic(_)) if !provisioned => {
                    provisioned = true;
                    self.ensure_topics().await?;
                }
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    let pause = self.config.backoff(attempt);
                    tracing::debug!(topic, attempt, error = %e, "produce failed; retrying");
                    attempt += 1;
                    tokio::time::sleep(pause).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Publish a command now, retrying transient failures.
    pub async fn publish_command(&self, cmd: &Command) -> Result<Position, BrokerError> {
        let value = serde_json::to_vec(cmd)
            .map_err(|e| BrokerError::Unreachable(format!("encode command: {e}")))?;
        self.produce(&self.config.command_topic, &cmd.target_key, Bytes::from(value))
            .await
    }

    /// Publish or park. A broker outage degrades to `Queued`; only a full
    /// (or unwritable) outbox gives `Refused`.
    pub async fn submit_command(&self, cmd: Command) -> Submission {
        if self.pending_len() > 0 {
            return self.park(&cmd);
        }
        match self.publish_command(&cmd).await {
            Ok(pos) => {
                tracing::debug!(command_id = %cmd.id, target = %cmd.target_key, partition = pos.partition, offset = pos.offset, "command published");
                Submission::Published(pos)
            }
            Err(e) => {
                tracing::warn!(command_id = %cmd.id, error = %e, "broker unavailable; parking command");
                self.park(&cmd)
            }
        }
    }

    fn park(&self, cmd: &Command) -> Submission {
        match self.pending.push(cmd) {
            Ok(()) => Submission::Queued,
            Err(OutboxError::Full(waiting)) => {
                tracing::warn!(command_id = %cmd.id, waiting, "command outbox full; refusing");
                Submission::Refused
            }
            Err(e) => {
                tracing::error!(command_id = %cmd.id, error = %e, "cannot park command");
                Submission::Refused
            }
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len().unwrap_or_else(|e| {
            tracing::error!(error = %e, "command outbox unreadable");
            0
        })
    }

    /// Republish parked commands in order. Stops at the first failure and
    /// returns how many went out.
    pub async fn flush_pending(&self) -> usize {
        let mut flushed = 0;
        loop {
            let next = match self.pending.front() {
                Ok(next) => next,
                Err(e) => {
                    tracing::error!(error = %e, "command outbox unreadable");
                    None
                }
            };
            let Some((seq, cmd)) = next else { break };
            match self.publish_command(&cmd).await {
                Ok(_) => {
                    if let Err(e) = self.pending.remove(seq) {
                        tracing::error!(seq, error = %e, "published command not removed from outbox");
                        break;
                    }
                    flushed += 1;
                }
                Err(e) => {
                    tracing::debug!(error = %e, remaining = self.pending_len(), "flush deferred");
                    break;
                }
            }
        }
        if flushed > 0 {
            tracing::info!(flushed, "queued commands published");
        }
        flushed
    }

    /// Background outbox flusher.
    pub async fn run_flush(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut failures = 0u32;
        loop {
            let pause = if self.pending_len() == 0 {
                failures = 0;
                self.config.poll_interval()
            } else if self.flush_pending().await > 0 && self.pending_len() == 0 {
                failures = 0;
                self.config.poll_interval()
            } else {
                failures += 1;
                self.config.backoff(failures)
            };
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.recv() => return,
            }
        }
    }

    /// Publish a result keyed by its command or execution id.
    pub async fn publish_result(&self, event: &ResultEvent) -> Result<Position, BrokerError> {
        let value = serde_json::to_vec(event)
            .map_err(|e| BrokerError::Unreachable(format!("encode result: {e}")))?;
        self.produce(&self.config.result_topic, event.key(), Bytes::from(value))
            .await
    }

    fn agent_partitions(&self, agent_id: &str) -> Vec<u32> {
        let own = partition_for_key(agent_id, self.config.partitions);
        let broadcast = partition_for_key(BROADCAST_KEY, self.config.partitions);
        if own == broadcast {
            vec![own]
        } else {
            vec![own, broadcast]
        }
    }

    /// Uncommitted commands addressed to `agent_id` (directly or by
    /// broadcast). Records for other agents and malformed records are
    /// skipped but still advance the returned offsets.
    pub async fn fetch_agent_commands(
        &self,
        agent_id: &str,
        max: usize,
    ) -> Result<AgentBatch, BrokerError> {
        let topic = &self.config.command_topic;
        let group = agent_group(agent_id);
        let mut batch = AgentBatch::default();
        for partition in self.agent_partitions(agent_id) {
            let start = self
                .broker
                .committed(&group, topic, partition)
                .await?
                .unwrap_or(0);
            let records = self.broker.fetch(topic, partition, start, max).await?;
            if let Some(first) = records.first().filter(|r| r.offset > start) {
                tracing::warn!(
                    agent_id,
                    partition,
                    lost = first.offset - start,
                    "commands trimmed before the agent fetched them"
                );
            }
            let mut next = start;
            for record in records {
                next = record.offset + 1;
                if record.key != agent_id && record.key != BROADCAST_KEY {
                    continue;
                }
                match serde_json::from_slice::<Command>(&record.value) {
                    Ok(cmd) if cmd.targets(agent_id) => batch.commands.push(cmd),
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(partition, offset = record.offset, error = %e, "malformed command skipped");
                    }
                }
            }
            batch.next_offsets.push(Position {
                partition,
                offset: next,
            });
        }
        Ok(batch)
    }

    /// Commit offsets returned by `fetch_agent_commands`.
    pub async fn ack_agent_commands(
        &self,
        agent_id: &str,
        offsets: &[Position],
    ) -> Result<(), BrokerError> {
        let group = agent_group(agent_id);
        let allowed = self.agent_partitions(agent_id);
        for pos in offsets {
            if !allowed.contains(&pos.partition) {
                return Err(BrokerError::InvalidPartition {
                    topic: self.config.command_topic.clone(),
                    partition: pos.partition,
                });
            }
            self.broker
                .commit(&group, &self.config.command_topic, pos.partition, pos.offset)
                .await?;
        }
        Ok(())
    }
}
