//! Result delivery: drains `outbound_results` to the server.
//!
//! Each tick picks pending rows whose backoff has elapsed, sends them
//! concurrently through a `ResultSink`, and records the outcome. A failure
//! bumps the row's retry counter; the row itself is only removed by the
//! retention purge after it has been reported.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::{broadcast, Notify};

use armada_core::config::DeliveryConfig;
use armada_core::now_ms;

use crate::local_queue::{LocalQueue, OutboundRecord, OutboundStatus, QueueError};

/// Rows taken per tick.
const BATCH_LIMIT: usize = 1000;
/// In-flight deliveries per tick.
const CONCURRENCY: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("server answered HTTP {0}")]
    Rejected(u16),
    #[error("transport: {0}")]
    Transport(String),
}

/// Where results go. The agent's implementation posts to the server API.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Deliver one result. `Ok` carries the server's response code.
    async fn deliver(&self, record: &OutboundRecord) -> Result<u16, DeliveryError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    pub dead_lettered: usize,
    pub purged: usize,
}

pub struct DeliveryLoop<S: ResultSink> {
    queue: LocalQueue,
    sink: Arc<S>,
    config: DeliveryConfig,
    wake: Arc<Notify>,
}

impl<S: ResultSink> DeliveryLoop<S> {
    pub fn new(queue: LocalQueue, sink: Arc<S>, config: DeliveryConfig) -> Self {
        Self {
            queue,
            sink,
            config,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Notifying this runs a tick without waiting for the interval.
    pub fn waker(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    /// One delivery pass.
    pub async fn tick(&self) -> Result<TickReport, QueueError> {
        let due = self.queue.due_results(now_ms(), BATCH_LIMIT)?;
        let mut report = TickReport {
            attempted: due.len(),
            ..TickReport::default()
        };

        let sink = &self.sink;
        let outcomes: Vec<(i64, u32, Result<u16, DeliveryError>)> = stream::iter(due)
            .map(|record| async move {
                let outcome = sink.deliver(&record).await;
                (record.id, record.retry_count, outcome)
            })
            .buffer_unordered(CONCURRENCY)
            .collect()
            .await;

        for (id, retry_count, outcome) in outcomes {
            match outcome {
                Ok(code) => {
                    if self.queue.mark_sent(id, code)? {
                        report.delivered += 1;
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    let status = self.queue.record_failure(
                        id,
                        &e.to_string(),
                        self.config.max_retries,
                        self.config.backoff(retry_count + 1),
                    )?;
                    if status == OutboundStatus::Failed {
                        report.dead_lettered += 1;
                    }
                }
            }
        }

        report.purged = self.queue.purge_reported(self.config.retention())?;
        if report.attempted > 0 {
            tracing::debug!(
                attempted = report.attempted,
                delivered = report.delivered,
                failed = report.failed,
                "delivery tick"
            );
        }
        Ok(report)
    }

    /// Tick on an interval (or when woken) until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let period = Duration::from_secs(self.config.retry_interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut consecutive_errors = 0u32;

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.wake.notified() => {}
                _ = shutdown.recv() => {
                    tracing::debug!("delivery loop shutting down");
                    return;
                }
            }
            match self.tick().await {
                Ok(report) => {
                    if consecutive_errors > 0 {
                        tracing::info!("local queue available again");
                    }
                    consecutive_errors = 0;
                    if report.failed > 0 {
                        tracing::warn!(
                            failed = report.failed,
                            delivered = report.delivered,
                            "some results not delivered; will retry"
                        );
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    tracing::error!(error = %e, attempt = consecutive_errors, "delivery tick failed");
                    let pause = self.config.backoff(consecutive_errors);
                    tokio::select! {
                        _ = tokio::time::sleep(pause) => {}
                        _ = shutdown.recv() => return,
                    }
                }
            }
        }
    }
}
