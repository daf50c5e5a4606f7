//! Configuration system for Armada.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $ARMADA_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/armada/config.toml
//!   3. ~/.config/armada/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration, shared by `armadad` and `armada-agent`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmadaConfig {
    pub server: ServerConfig,
    pub broker: BrokerConfig,
    pub agent: AgentConfig,
    pub delivery: DeliveryConfig,
    pub executors: ExecutorSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub api_port: u16,
    pub bind_addr: String,
    /// Commands accepted while the broker is down are parked here.
    pub outbox_path: PathBuf,
}

/// Where a consumer group starts when it has no committed offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetReset {
    /// Only records produced after the consumer attaches. Anything produced
    /// while no consumer is attached is never seen by this group.
    #[default]
    Latest,
    Earliest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub command_topic: String,
    pub result_topic: String,
    pub partitions: u32,
    pub replication_factor: u16,
    /// Group used by the live result consumer.
    pub consumer_group: String,
    pub offset_reset: OffsetReset,
    /// Publish attempts before a command is parked in the pending outbox.
    pub publish_attempts: u32,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub poll_interval_ms: u64,
    pub fetch_max_records: usize,
    /// Records kept per partition; older ones are trimmed.
    pub retention_records: usize,
    /// Age after which records are trimmed. 0 = no age limit.
    pub retention_secs: u64,
    /// Parked commands allowed before submissions are refused.
    pub max_pending_commands: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Empty = hostname.
    pub agent_id: String,
    pub server_url: String,
    pub queue_path: PathBuf,
    pub work_dir: PathBuf,
    /// Max concurrent executions. 0 = available parallelism.
    pub max_concurrent_executions: u32,
    pub poll_interval_ms: u64,
    pub default_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub retry_interval_secs: u64,
    pub base_backoff_secs: u64,
    pub max_backoff_secs: u64,
    /// Attempts before a result is dead-lettered. 0 = retry forever.
    pub max_retries: u32,
    /// How long delivered rows are kept before purge.
    pub retention_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Empty = platform default (`sh` / `cmd`).
    pub shell_path: String,
    pub python_path: String,
    pub powershell_path: String,
    /// Per-stream capture cap.
    pub max_output_bytes: usize,
    pub tree_max_depth: u32,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_port: 9101,
            bind_addr: "127.0.0.1".to_string(),
            outbox_path: data_dir().join("command-outbox.db"),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            command_topic: "armada.commands".to_string(),
            result_topic: "armada.results".to_string(),
            partitions: 6,
            replication_factor: 1,
            consumer_group: "armada-live".to_string(),
            offset_reset: OffsetReset::Latest,
            publish_attempts: 3,
            backoff_initial_ms: 200,
            backoff_max_ms: 10_000,
            poll_interval_ms: 250,
            fetch_max_records: 500,
            retention_records: 100_000,
            retention_secs: 7 * 24 * 3600,
            max_pending_commands: 10_000,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: String::new(),
            server_url: "http://127.0.0.1:9101".to_string(),
            queue_path: data_dir().join("agent-queue.db"),
            work_dir: std::env::temp_dir().join("armada-work"),
            max_concurrent_executions: 0,
            poll_interval_ms: 1000,
            default_timeout_secs: 300,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            retry_interval_secs: 5,
            base_backoff_secs: 2,
            max_backoff_secs: 300,
            max_retries: 0,
            retention_hours: 72,
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            shell_path: String::new(),
            python_path: if cfg!(windows) { "python" } else { "python3" }.to_string(),
            powershell_path: if cfg!(windows) { "powershell" } else { "pwsh" }.to_string(),
            max_output_bytes: 1024 * 1024,
            tree_max_depth: 8,
        }
    }
}

impl BrokerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retention_age(&self) -> Option<Duration> {
        (self.retention_secs > 0).then(|| Duration::from_secs(self.retention_secs))
    }

    /// Backoff after `attempt` consecutive failures, doubling and capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ms = self
            .backoff_initial_ms
            .saturating_mul(2u64.saturating_pow(attempt.min(32)));
        Duration::from_millis(ms.min(self.backoff_max_ms))
    }
}

impl AgentConfig {
    /// `agent_id`, falling back to the host name.
    pub fn resolved_agent_id(&self) -> String {
        if !self.agent_id.is_empty() {
            return self.agent_id.clone();
        }
        std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_else(|_| "armada-agent".to_string())
    }

    pub fn max_concurrency(&self) -> usize {
        if self.max_concurrent_executions == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.max_concurrent_executions as usize
        }
    }
}

impl DeliveryConfig {
    /// Backoff before retry number `retry_count + 1` of a result.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let secs = self
            .base_backoff_secs
            .saturating_mul(2u64.saturating_pow(retry_count.min(32)));
        Duration::from_secs(secs.min(self.max_backoff_secs))
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours.saturating_mul(3600))
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("armada")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("armada")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir())
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl ArmadaConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            ArmadaConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("ARMADA_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        write_default_at(&path)?;
        Ok(path)
    }

    /// Apply ARMADA_* overrides. `lookup` is `std::env::var` outside tests.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("ARMADA_SERVER__API_PORT") {
            if let Ok(p) = v.parse() {
                self.server.api_port = p;
            }
        }
        if let Some(v) = lookup("ARMADA_SERVER__BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Some(v) = lookup("ARMADA_BROKER__PARTITIONS") {
            if let Ok(n) = v.parse() {
                self.broker.partitions = n;
            }
        }
        if let Some(v) = lookup("ARMADA_SERVER__OUTBOX_PATH") {
            self.server.outbox_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("ARMADA_BROKER__RETENTION_RECORDS") {
            if let Ok(n) = v.parse() {
                self.broker.retention_records = n;
            }
        }
        if let Some(v) = lookup("ARMADA_BROKER__MAX_PENDING_COMMANDS") {
            if let Ok(n) = v.parse() {
                self.broker.max_pending_commands = n;
            }
        }
        if let Some(v) = lookup("ARMADA_BROKER__OFFSET_RESET") {
            match v.as_str() {
                "earliest" => self.broker.offset_reset = OffsetReset::Earliest,
                "latest" => self.broker.offset_reset = OffsetReset::Latest,
                _ => {}
            }
        }
        if let Some(v) = lookup("ARMADA_AGENT__AGENT_ID") {
            self.agent.agent_id = v;
        }
        if let Some(v) = lookup("ARMADA_AGENT__SERVER_URL") {
            self.agent.server_url = v;
        }
        if let Some(v) = lookup("ARMADA_AGENT__QUEUE_PATH") {
            self.agent.queue_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("ARMADA_AGENT__MAX_CONCURRENT_EXECUTIONS") {
            if let Ok(n) = v.parse() {
                self.agent.max_concurrent_executions = n;
            }
        }
        if let Some(v) = lookup("ARMADA_DELIVERY__MAX_RETRIES") {
            if let Ok(n) = v.parse() {
                self.delivery.max_retries = n;
            }
        }
    }
}

fn write_default_at(path: &std::path::Path) -> Result<(), ConfigError> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
    }
    let text =
        toml::to_string_pretty(&ArmadaConfig::default()).map_err(ConfigError::SerializeFailed)?;
    std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))
}
