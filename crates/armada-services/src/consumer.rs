//! Result consumer: the single loop reading the result topic.
//!
//! Positions come from the consumer group's committed offsets. A partition
//! the group never committed starts at the configured reset point (the log
//! end by default, so a fresh viewer group sees only new results). Every
//! consumed record goes to the fan-out, and its offset is committed after.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::broadcast;

use armada_core::config::{BrokerConfig, OffsetReset};
use armada_core::ResultEvent;

use crate::broker::{Broker, BrokerError};
use crate::fanout::ResultFanout;
use crate::gateway::ensure_topics;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub delivered: usize,
    pub malformed: usize,
}

pub struct ResultConsumer {
    broker: Arc<dyn Broker>,
    config: BrokerConfig,
    fanout: ResultFanout,
    /// partition -> next offset. Empty until the first successful poll.
    positions: BTreeMap<u32, u64>,
}

impl ResultConsumer {
    pub fn new(broker: Arc<dyn Broker>, config: BrokerConfig, fanout: ResultFanout) -> Self {
        Self {
            broker,
            config,
            fanout,
            positions: BTreeMap::new(),
        }
    }

    async fn init_positions(&mut self) -> Result<(), BrokerError> {
        ensure_topics(self.broker.as_ref(), &self.config).await?;
        let topic = &self.config.result_topic;
        let partitions = self
            .broker
            .describe_topics(std::slice::from_ref(topic))
            .await?
            .first()
            .map(|t| t.partitions)
            .ok_or_else(|| BrokerError::UnknownTopic(topic.clone()))?;

        let mut positions = BTreeMap::new();
        for partition in 0..partitions {
            let committed = self
                .broker
                .committed(&self.config.consumer_group, topic, partition)
                .await?;
            let start = match (committed, self.config.offset_reset) {
                (Some(offset), _) => offset,
                (None, OffsetReset::Earliest) => self.broker.start_offset(topic, partition).await?,
                (None, OffsetReset::Latest) => self.broker.end_offset(topic, partition).await?,
            };
            if committed.is_none() {
                // Pin the reset point so a restart resumes here.
                self.broker
                    .commit(&self.config.consumer_group, topic, partition, start)
                    .await?;
            }
            positions.insert(partition, start);
        }
        tracing::info!(
            topic = %topic,
            group = %self.config.consumer_group,
            partitions,
            "result consumer positioned"
        );
        self.positions = positions;
        Ok(())
    }

    /// One pass over every partition.
    pub async fn poll_once(&mut self) -> Result<PollReport, BrokerError> {
        if self.positions.is_empty() {
            self.init_positions().await?;
        }
        let topic = self.config.result_topic.clone();
        let mut report = PollReport::default();
        let partitions: Vec<(u32, u64)> = self.positions.iter().map(|(p, o)| (*p, *o)).collect();

        for (partition, offset) in partitions {
            let records = self
                .broker
                .fetch(&topic, partition, offset, self.config.fetch_max_records)
                .await?;
            let Some(last) = records.last().map(|r| r.offset) else {
                continue;
            };
            if let Some(first) = records.first().filter(|r| r.offset > offset) {
                tracing::warn!(
                    partition,
                    lost = first.offset - offset,
                    "results trimmed before the live consumer read them"
                );
            }
            for record in records {
                match serde_json::from_slice::<ResultEvent>(&record.value) {
                    Ok(event) => {
                        self.fanout.publish(event);
                        report.delivered += 1;
                    }
                    Err(e) => {
                        report.malformed += 1;
                        tracing::warn!(partition, offset = record.offset, error = %e, "malformed result skipped");
                    }
                }
            }
            let next = last + 1;
            self.positions.insert(partition, next);
            self.broker
                .commit(&self.config.consumer_group, &topic, partition, next)
                .await?;
        }
        Ok(report)
    }

    /// Poll until shutdown. Broker errors back off and retry; they never end
    /// the loop.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut failures = 0u32;
        loop {
            let pause = match self.poll_once().await {
                Ok(report) => {
                    if failures > 0 {
                        tracing::info!("result consumer recovered");
                    }
                    failures = 0;
                    if report.delivered + report.malformed > 0 {
                        std::time::Duration::ZERO
                    } else {
                        self.config.poll_interval()
                    }
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(error = %e, attempt = failures, "result poll failed");
                    self.config.backoff(failures)
                }
            };
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.recv() => {
                    tracing::debug!("result consumer shutting down");
                    return;
                }
            }
        }
    }
}
