//! armada-agent — runs on each managed endpoint.

use anyhow::Result;

use armada_agent::{open_queue_with_retry, Agent};
use armada_core::config::ArmadaConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = ArmadaConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = ArmadaConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        ArmadaConfig::default()
    });
    config.agent.agent_id = config.agent.resolved_agent_id();

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    let mut shutdown_rx = shutdown_tx.subscribe();
    let Some(queue) =
        open_queue_with_retry(&config.agent.queue_path, &config.agent.agent_id, &mut shutdown_rx)
            .await
    else {
        return Ok(());
    };
    match queue.stats() {
        Ok(stats) => tracing::info!(
            path = %config.agent.queue_path.display(),
            received = stats.inbound_received,
            pending_results = stats.outbound_pending,
            "local queue opened"
        ),
        Err(e) => tracing::warn!(error = %e, "failed to read queue stats"),
    }

    let agent = Agent::start(&config, queue, &shutdown_tx);
    let _ = shutdown_rx.recv().await;
    tracing::info!("shutting down");
    agent.join().await;
    tracing::info!("armada-agent stopped");
    Ok(())
}
