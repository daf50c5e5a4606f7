//! Armada integration test harness.
//!
//! Every test runs a complete server in-process: log broker, gateway,
//! result consumer, fan-out and the HTTP API on an ephemeral port. Agents
//! talk to it over real HTTP, exactly as a deployed agent would.
//!
//!   cargo test --test integration
//!
//! Scenarios that run shell commands are unix-only.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::broadcast;

use armada_agent::Agent;
use armada_core::config::{ArmadaConfig, BrokerConfig, OffsetReset};
use armada_core::ResultEvent;
use armada_services::{
    CommandOutbox, Gateway, LocalQueue, LogBroker, ResultConsumer, ResultFanout,
    ResultSubscription,
};

mod delivery;
mod ordering;
mod stream;

#[cfg(unix)]
mod commands;
#[cfg(unix)]
mod policies;

pub const WAIT: Duration = Duration::from_secs(15);

// ── Server ────────────────────────────────────────────────────────────────────

pub struct Server {
    pub broker: Arc<LogBroker>,
    pub gateway: Arc<Gateway>,
    pub fanout: ResultFanout,
    pub url: String,
    shutdown: broadcast::Sender<()>,
}

impl Server {
    pub async fn start() -> Result<Self> {
        let config = BrokerConfig {
            partitions: 3,
            // Results published before the consumer positions itself still
            // reach the fan-out.
            offset_reset: OffsetReset::Earliest,
            poll_interval_ms: 20,
            backoff_initial_ms: 10,
            backoff_max_ms: 200,
            ..BrokerConfig::default()
        };
        let broker = Arc::new(LogBroker::new());
        let outbox = CommandOutbox::in_memory(config.max_pending_commands)?;
        let gateway = Arc::new(Gateway::new(broker.clone(), config.clone(), outbox));
        gateway.ensure_topics().await?;
        let fanout = ResultFanout::default();

        let (shutdown, _) = broadcast::channel(1);
        let consumer = ResultConsumer::new(broker.clone(), config, fanout.clone());
        tokio::spawn(consumer.run(shutdown.subscribe()));
        tokio::spawn(gateway.clone().run_flush(shutdown.subscribe()));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("http://{}", listener.local_addr()?);
        let state = armada_api::ApiState::new(gateway.clone(), fanout.clone());
        tokio::spawn(armada_api::serve_on(listener, state, shutdown.subscribe()));

        Ok(Self {
            broker,
            gateway,
            fanout,
            url,
            shutdown,
        })
    }

    pub fn api(&self, path: &str) -> String {
        format!("{}/api{}", self.url, path)
    }

    pub async fn post(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let resp = reqwest::Client::new()
            .post(self.api(path))
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {path}"))?;
        let status = resp.status();
        if !status.is_success() {
            bail!("POST {path}: {status}: {}", resp.text().await.unwrap_or_default());
        }
        Ok(resp.json().await?)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

// ── Agent ─────────────────────────────────────────────────────────────────────

pub struct TestAgent {
    pub agent: Option<Agent>,
    pub queue: LocalQueue,
    /// Default working directory for executed scripts.
    pub work_dir: std::path::PathBuf,
    shutdown: broadcast::Sender<()>,
    _dir: tempfile::TempDir,
}

impl TestAgent {
    pub async fn start(server: &Server, agent_id: &str) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let mut config = ArmadaConfig::default();
        config.agent.agent_id = agent_id.to_string();
        config.agent.server_url = server.url.clone();
        config.agent.queue_path = dir.path().join("queue.db");
        config.agent.work_dir = dir.path().join("work");
        config.agent.max_concurrent_executions = 4;
        config.agent.poll_interval_ms = 50;
        config.delivery.retry_interval_secs = 1;
        config.delivery.base_backoff_secs = 0;

        let queue = LocalQueue::open(&config.agent.queue_path, agent_id)?;
        let (shutdown, _) = broadcast::channel(1);
        let agent = Agent::start(&config, queue.clone(), &shutdown);
        Ok(Self {
            agent: Some(agent),
            queue,
            work_dir: config.agent.work_dir.clone(),
            shutdown,
            _dir: dir,
        })
    }

    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(agent) = self.agent.take() {
            agent.join().await;
        }
    }
}

impl Drop for TestAgent {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

// ── Waiting ───────────────────────────────────────────────────────────────────

/// Next event on `sub` whose key is `key`, skipping others.
pub async fn wait_for_result(sub: &mut ResultSubscription, key: &str) -> Result<ResultEvent> {
    tokio::time::timeout(WAIT, async {
        loop {
            match sub.next().await {
                Some(event) if event.key() == key => return Ok((*event).clone()),
                Some(_) => continue,
                None => bail!("fan-out closed"),
            }
        }
    })
    .await
    .with_context(|| format!("no result for {key} within {WAIT:?}"))?
}

/// Poll `check` until it returns true.
pub async fn eventually(mut check: impl FnMut() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        if tokio::time::Instant::now() > deadline {
            bail!("condition not met within {WAIT:?}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Ok(())
}

/// Minimal server-sent events reader over a streaming response.
pub struct SseClient {
    resp: reqwest::Response,
    buf: String,
}

impl SseClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let resp = reqwest::get(url).await?;
        if !resp.status().is_success() {
            bail!("stream answered {}", resp.status());
        }
        let buffering = resp
            .headers()
            .get("x-accel-buffering")
            .and_then(|v| v.to_str().ok());
        if buffering != Some("no") {
            bail!("stream is missing the no-buffering directive");
        }
        Ok(Self {
            resp,
            buf: String::new(),
        })
    }

    pub async fn next_json(&mut self) -> Result<serde_json::Value> {
        tokio::time::timeout(WAIT, async {
            loop {
                while let Some(end) = self.buf.find("\n\n") {
                    let block: String = self.buf.drain(..end + 2).collect();
                    let data: Vec<&str> = block
                        .lines()
                        .filter_map(|l| l.strip_prefix("data:"))
                        .map(str::trim_start)
                        .collect();
                    if !data.is_empty() {
                        return Ok(serde_json::from_str(&data.join("\n"))?);
                    }
                }
                match self.resp.chunk().await? {
                    Some(chunk) => self.buf.push_str(&String::from_utf8_lossy(&chunk)),
                    None => bail!("stream ended"),
                }
            }
        })
        .await
        .context("no stream event in time")?
    }
}
