//! armadad — fleet command server.
//!
//! Owns the broker, publishes commands through the gateway, consumes the
//! result topic into the live fan-out, and serves the HTTP API.

use std::sync::Arc;

use anyhow::{Context, Result};

use armada_core::config::ArmadaConfig;
use armada_services::fanout::DEFAULT_CAPACITY;
use armada_services::{
    Broker, CommandOutbox, Gateway, LogBroker, ResultConsumer, ResultFanout, Retention,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = ArmadaConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = ArmadaConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        ArmadaConfig::default()
    });
    tracing::info!(
        port = config.server.api_port,
        command_topic = %config.broker.command_topic,
        result_topic = %config.broker.result_topic,
        partitions = config.broker.partitions,
        "armadad starting"
    );

    let broker: Arc<dyn Broker> = Arc::new(LogBroker::with_retention(Retention::from_config(
        &config.broker,
    )));
    let capacity = config.broker.max_pending_commands;
    let outbox = match CommandOutbox::open(&config.server.outbox_path, capacity) {
        Ok(outbox) => outbox,
        Err(e) => {
            tracing::error!(
                path = %config.server.outbox_path.display(),
                error = %e,
                "command outbox unavailable; parked commands will not survive a restart"
            );
            CommandOutbox::in_memory(capacity).context("in-memory command outbox")?
        }
    };
    let gateway = Arc::new(Gateway::new(broker.clone(), config.broker.clone(), outbox));
    if let Err(e) = gateway.ensure_topics().await {
        // Retried lazily by the first produce and by the consumer.
        tracing::warn!(error = %e, "topic provisioning failed");
    }
    let fanout = ResultFanout::new(DEFAULT_CAPACITY);

    // ── Shutdown ─────────────────────────────────────────────────────────────

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Background tasks ─────────────────────────────────────────────────────

    let consumer = ResultConsumer::new(broker.clone(), config.broker.clone(), fanout.clone());
    let consumer_task = tokio::spawn(consumer.run(shutdown_tx.subscribe()));
    let flush_task = tokio::spawn(gateway.clone().run_flush(shutdown_tx.subscribe()));

    let state = armada_api::ApiState::new(gateway, fanout);
    let api_task = {
        let shutdown = shutdown_tx.subscribe();
        let bind_addr = config.server.bind_addr.clone();
        let port = config.server.api_port;
        tokio::spawn(async move { armada_api::serve(state, &bind_addr, port, shutdown).await })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();
    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = api_task => {
            r.context("API task panicked")?.context("API server failed")?;
        }
    }
    let _ = shutdown_tx.send(());
    let _ = tokio::join!(consumer_task, flush_task);
    tracing::info!("armadad stopped");
    Ok(())
}
