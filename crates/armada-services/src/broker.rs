//! Partitioned log broker.
//!
//! `Broker` is the seam between the gateway and whatever log carries
//! commands and results. `LogBroker` is the in-process implementation the
//! server hosts: per-topic partitions of append-only records plus committed
//! offsets per consumer group.
//!
//! Records with the same key always land in the same partition, so per-key
//! order is preserved. There is no order across partitions.
//!
//! Partitions are trimmed from the front on every append once they exceed the
//! retention bound. Offsets stay absolute: a trimmed partition starts at its
//! `start_offset`, and reads or commits below it are moved up to it.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::Serialize;

use armada_core::config::BrokerConfig;
use armada_core::ErrorKind;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("broker unreachable: {0}")]
    Unreachable(String),
    #[error("unknown topic {0}")]
    UnknownTopic(String),
    #[error("topic {0} already exists")]
    TopicExists(String),
    #[error("topic {topic} has no partition {partition}")]
    InvalidPartition { topic: String, partition: u32 },
}

impl BrokerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unreachable(_) => ErrorKind::TransientBrokerError,
            _ => ErrorKind::InvalidRequest,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicDescription {
    pub name: String,
    pub partitions: u32,
    pub replication_factor: u16,
}

/// Where a record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
pub struct Position {
    pub partition: u32,
    pub offset: u64,
}

#[derive(Debug, Clone)]
pub struct Record {
    pub partition: u32,
    pub offset: u64,
    pub key: String,
    pub value: Bytes,
    /// Unix ms at append.
    pub timestamp: u64,
}

/// Partition for `key`: first 8 bytes of its blake3 hash, little-endian,
/// modulo the partition count.
pub fn partition_for_key(key: &str, partitions: u32) -> u32 {
    let hash = blake3::hash(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    (u64::from_le_bytes(prefix) % partitions.max(1) as u64) as u32
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Descriptions of the named topics that exist. Missing names are
    /// simply absent from the result.
    async fn describe_topics(&self, names: &[String]) -> Result<Vec<TopicDescription>, BrokerError>;

    async fn create_topic(
        &self,
        name: &str,
        partitions: u32,
        replication_factor: u16,
    ) -> Result<(), BrokerError>;

    /// Append to the partition chosen by `key`.
    async fn produce(&self, topic: &str, key: &str, value: Bytes) -> Result<Position, BrokerError>;

    /// Up to `max` records starting at `offset`.
    async fn fetch(
        &self,
        topic: &str,
        partition: u32,
        offset: u64,
        max: usize,
    ) -> Result<Vec<Record>, BrokerError>;

    /// Offset the next appended record will get.
    async fn end_offset(&self, topic: &str, partition: u32) -> Result<u64, BrokerError>;

    /// Oldest offset still held. Anything below it has been trimmed.
    async fn start_offset(&self, topic: &str, partition: u32) -> Result<u64, BrokerError>;

    /// Next offset to read for `group`, if it ever committed.
    async fn committed(
        &self,
        group: &str,
        topic: &str,
        partition: u32,
    ) -> Result<Option<u64>, BrokerError>;

    async fn commit(
        &self,
        group: &str,
        topic: &str,
        partition: u32,
        offset: u64,
    ) -> Result<(), BrokerError>;
}

/// How much of each partition `LogBroker` keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub max_records: usize,
    pub max_age: Option<Duration>,
}

impl Retention {
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            max_records: config.retention_records.max(1),
            max_age: config.retention_age(),
        }
    }
}

impl Default for Retention {
    fn default() -> Self {
        Self::from_config(&BrokerConfig::default())
    }
}

#[derive(Default)]
struct PartitionLog {
    /// Offset of `records[0]`.
    start: u64,
    records: VecDeque<Record>,
}

impl PartitionLog {
    fn end(&self) -> u64 {
        self.start + self.records.len() as u64
    }

    /// Drop records past the retention bound. Returns how many went.
    fn trim(&mut self, retention: &Retention, now: u64) -> usize {
        let cutoff = retention
            .max_age
            .map(|age| now.saturating_sub(age.as_millis() as u64));
        let mut dropped = 0;
        while let Some(front) = self.records.front() {
            let over_count = self.records.len() > retention.max_records;
            let too_old = cutoff.is_some_and(|c| front.timestamp < c);
            if !over_count && !too_old {
                break;
            }
            self.records.pop_front();
            self.start += 1;
            dropped += 1;
        }
        dropped
    }
}

struct Topic {
    replication_factor: u16,
    partitions: Vec<PartitionLog>,
}

/// In-process partitioned log.
pub struct LogBroker {
    topics: RwLock<HashMap<String, Topic>>,
    /// (group, topic, partition) -> next offset.
    committed: DashMap<(String, String, u32), u64>,
    available: AtomicBool,
    retention: Retention,
}

impl Default for LogBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl LogBroker {
    pub fn new() -> Self {
        Self::with_retention(Retention::default())
    }

    pub fn with_retention(retention: Retention) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            committed: DashMap::new(),
            available: AtomicBool::new(true),
            retention,
        }
    }

    /// Simulate an outage: every call fails with `Unreachable` while false.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), BrokerError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::Unreachable("broker offline".into()))
        }
    }

    fn poisoned() -> BrokerError {
        BrokerError::Unreachable("log lock poisoned".into())
    }

    fn with_partition<T>(
        &self,
        topic: &str,
        partition: u32,
        f: impl FnOnce(&PartitionLog) -> T,
    ) -> Result<T, BrokerError> {
        self.check_available()?;
        let topics = self.topics.read().map_err(|_| Self::poisoned())?;
        let t = topics
            .get(topic)
            .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))?;
        let log = t
            .partitions
            .get(partition as usize)
            .ok_or_else(|| BrokerError::InvalidPartition {
                topic: topic.to_string(),
                partition,
            })?;
        Ok(f(log))
    }
}

#[async_trait]
impl Broker for LogBroker {
    async fn describe_topics(&self, names: &[String]) -> Result<Vec<TopicDescription>, BrokerError> {
        self.check_available()?;
        let topics = self.topics.read().map_err(|_| Self::poisoned())?;
        Ok(names
            .iter()
            .filter_map(|name| {
                topics.get(name).map(|t| TopicDescription {
                    name: name.clone(),
                    partitions: t.partitions.len() as u32,
                    replication_factor: t.replication_factor,
                })
            })
            .collect())
    }

    async fn create_topic(
        &self,
        name: &str,
        partitions: u32,
        replication_factor: u16,
    ) -> Result<(), BrokerError> {
        self.check_available()?;
        let mut topics = self.topics.write().map_err(|_| Self::poisoned())?;
        if topics.contains_key(name) {
            return Err(BrokerError::TopicExists(name.to_string()));
        }
        topics.insert(
            name.to_string(),
            Topic {
                replication_factor,
                partitions: (0..partitions.max(1))
                    .map(|_| PartitionLog::default())
                    .collect(),
            },
        );
        tracing::info!(topic = name, partitions, replication_factor, "topic created");
        Ok(())
    }

    async fn produce(&self, topic: &str, key: &str, value: Bytes) -> Result<Position, BrokerError> {
        self.check_available()?;
        let mut topics = self.topics.write().map_err(|_| Self::poisoned())?;
        let t = topics
            .get_mut(topic)
            .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))?;
        let partition = partition_for_key(key, t.partitions.len() as u32);
        let log = &mut t.partitions[partition as usize];
        let offset = log.end();
        let now = armada_core::now_ms();
        log.records.push_back(Record {
            partition,
            offset,
            key: key.to_string(),
            value,
            timestamp: now,
        });
        let trimmed = log.trim(&self.retention, now);
        if trimmed > 0 {
            tracing::trace!(topic, partition, trimmed, start = log.start, "partition trimmed");
        }
        Ok(Position { partition, offset })
    }

    async fn fetch(
        &self,
        topic: &str,
        partition: u32,
        offset: u64,
        max: usize,
    ) -> Result<Vec<Record>, BrokerError> {
        self.with_partition(topic, partition, |log| {
            let skip = offset.clamp(log.start, log.end()) - log.start;
            log.records
                .iter()
                .skip(skip as usize)
                .take(max)
                .cloned()
                .collect()
        })
    }

    async fn end_offset(&self, topic: &str, partition: u32) -> Result<u64, BrokerError> {
        self.with_partition(topic, partition, |log| log.end())
    }

    async fn start_offset(&self, topic: &str, partition: u32) -> Result<u64, BrokerError> {
        self.with_partition(topic, partition, |log| log.start)
    }

    async fn committed(
        &self,
        group: &str,
        topic: &str,
        partition: u32,
    ) -> Result<Option<u64>, BrokerError> {
        self.check_available()?;
        Ok(self
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .map(|v| *v))
    }

    async fn commit(
        &self,
        group: &str,
        topic: &str,
        partition: u32,
        offset: u64,
    ) -> Result<(), BrokerError> {
        let (start, end) = self.with_partition(topic, partition, |log| (log.start, log.end()))?;
        self.committed.insert(
            (group.to_string(), topic.to_string(), partition),
            offset.clamp(start, end),
        );
        Ok(())
    }
}
