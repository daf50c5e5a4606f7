//! Command poller: pulls this agent's commands from the server.
//!
//! Every fetched command goes through `AgentRuntime::intake` (which
//! persists it) before the batch offsets are acknowledged. If persisting
//! fails, nothing is acknowledged and the batch is fetched again later;
//! intake is idempotent, so the re-fetch is harmless.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use armada_services::{AgentRuntime, Intake};

use crate::link::ServerLink;

const FETCH_MAX: usize = 100;
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub fetched: usize,
    pub accepted: usize,
    pub duplicates: usize,
    pub expired: usize,
}

pub struct CommandPoller {
    link: Arc<ServerLink>,
    runtime: Arc<AgentRuntime>,
    interval: Duration,
}

impl CommandPoller {
    pub fn new(link: Arc<ServerLink>, runtime: Arc<AgentRuntime>, interval: Duration) -> Self {
        Self {
            link,
            runtime,
            interval,
        }
    }

    pub async fn poll_once(&self) -> anyhow::Result<PollReport> {
        let agent_id = self.runtime.agent_id().to_string();
        let batch = self.link.fetch_commands(&agent_id, FETCH_MAX).await?;
        let mut report = PollReport {
            fetched: batch.commands.len(),
            ..PollReport::default()
        };
        for cmd in &batch.commands {
            match self.runtime.intake(cmd)? {
                Intake::Accepted | Intake::Cancelled => report.accepted += 1,
                Intake::Duplicate => report.duplicates += 1,
                Intake::Expired => report.expired += 1,
                Intake::Ignored => {}
            }
        }
        self.link.ack(&agent_id, &batch.next_offsets).await?;
        if report.fetched > 0 {
            tracing::debug!(
                fetched = report.fetched,
                accepted = report.accepted,
                duplicates = report.duplicates,
                expired = report.expired,
                "commands received"
            );
        }
        Ok(report)
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut failures = 0u32;
        loop {
            let pause = match self.poll_once().await {
                Ok(report) => {
                    if failures > 0 {
                        tracing::info!("server link recovered");
                    }
                    failures = 0;
                    // A full batch likely means more are waiting.
                    if report.fetched >= FETCH_MAX {
                        Duration::ZERO
                    } else {
                        self.interval
                    }
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(error = %e, attempt = failures, "command poll failed");
                    backoff(self.interval, failures)
                }
            };
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.recv() => {
                    tracing::debug!("command poller shutting down");
                    return;
                }
            }
        }
    }
}

fn backoff(base: Duration, failures: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(failures.min(16)))
        .min(MAX_BACKOFF)
}
