//! Agent wiring: durable queue, runtime, delivery loop and poller as one
//! unit sharing a shutdown channel.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use armada_core::config::ArmadaConfig;
use armada_services::{AgentRuntime, DeliveryLoop, LocalQueue};

use crate::link::ServerLink;
use crate::poller::CommandPoller;

pub struct Agent {
    runtime: Arc<AgentRuntime>,
    tasks: Vec<JoinHandle<()>>,
}

impl Agent {
    /// Spawn the runtime, delivery loop and command poller.
    pub fn start(
        config: &ArmadaConfig,
        queue: LocalQueue,
        shutdown: &broadcast::Sender<()>,
    ) -> Self {
        let link = Arc::new(ServerLink::new(&config.agent.server_url));
        let delivery = DeliveryLoop::new(queue.clone(), link.clone(), config.delivery.clone());
        let runtime = Arc::new(
            AgentRuntime::new(&config.agent, &config.executors, queue)
                .with_result_notify(delivery.waker()),
        );
        let poller = CommandPoller::new(
            link,
            runtime.clone(),
            Duration::from_millis(config.agent.poll_interval_ms.max(10)),
        );
        tracing::info!(
            agent_id = %runtime.agent_id(),
            server = %config.agent.server_url,
            "agent starting"
        );

        let tasks = vec![
            tokio::spawn(runtime.clone().run(shutdown.subscribe())),
            tokio::spawn(delivery.run(shutdown.subscribe())),
            tokio::spawn(poller.run(shutdown.subscribe())),
        ];
        Self { runtime, tasks }
    }

    pub fn runtime(&self) -> &Arc<AgentRuntime> {
        &self.runtime
    }

    /// Wait for every task to finish after shutdown was signalled.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "agent task panicked");
            }
        }
    }
}

/// Open the local queue, retrying with backoff until it opens or shutdown
/// fires. `None` means shutdown came first.
pub async fn open_queue_with_retry(
    path: &Path,
    agent_id: &str,
    shutdown: &mut broadcast::Receiver<()>,
) -> Option<LocalQueue> {
    let mut failures = 0u32;
    loop {
        match open_queue(path, agent_id) {
            Ok(queue) => return Some(queue),
            Err(e) => {
                failures += 1;
                let pause = Duration::from_secs(2u64.saturating_pow(failures.min(6)));
                tracing::error!(path = %path.display(), error = %e, retry_in = ?pause, "cannot open local queue");
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = shutdown.recv() => return None,
                }
            }
        }
    }
}

fn open_queue(path: &Path, agent_id: &str) -> Result<LocalQueue> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    LocalQueue::open(path, agent_id).with_context(|| format!("failed to open {}", path.display()))
}
