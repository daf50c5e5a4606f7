use std::collections::HashSet;

use crate::*;

use armada_agent::ServerLink;
use armada_core::config::DeliveryConfig;
use armada_core::{CommandResult, CommandStatus};
use armada_services::DeliveryLoop;

fn result(n: usize) -> ResultEvent {
    ResultEvent::Command(CommandResult {
        command_id: format!("offline-{n}"),
        agent_id: "agent-1".into(),
        output: format!("result {n}"),
        status: CommandStatus::Success,
        exit_code: Some(0),
    })
}

fn config() -> DeliveryConfig {
    DeliveryConfig {
        base_backoff_secs: 0,
        ..DeliveryConfig::default()
    }
}

/// Results produced while the server is unreachable survive an agent
/// restart and are each delivered exactly once when it comes back.
#[tokio::test]
async fn test_offline_results_delivered_later() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("queue.db");

    {
        let queue = LocalQueue::open(&path, "agent-1")?;
        for n in 0..500 {
            queue.enqueue_result(&result(n))?;
        }
        let offline = DeliveryLoop::new(
            queue.clone(),
            Arc::new(ServerLink::new("http://127.0.0.1:1")),
            config(),
        );
        let report = offline.tick().await?;
        assert_eq!(report.delivered, 0);
        assert_eq!(report.failed, 500);
        assert_eq!(queue.stats()?.outbound_pending, 500);
    }

    // Restarted agent, server now reachable.
    let server = Server::start().await?;
    let mut sub = server.fanout.subscribe();
    let queue = LocalQueue::open(&path, "agent-1")?;
    let online = DeliveryLoop::new(queue.clone(), Arc::new(ServerLink::new(&server.url)), config());
    let report = online.tick().await?;
    assert_eq!(report.delivered, 500);
    let stats = queue.stats()?;
    assert_eq!(stats.outbound_sent, 500);
    assert_eq!(stats.outbound_pending, 0);

    // Nothing left to send.
    assert_eq!(online.tick().await?.attempted, 0);

    let mut seen = HashSet::new();
    tokio::time::timeout(WAIT, async {
        while seen.len() < 500 {
            match sub.next().await {
                Some(event) => assert!(seen.insert(event.key().to_string()), "duplicate result"),
                None => break,
            }
        }
    })
    .await
    .context("not every result reached the fan-out")?;
    assert_eq!(seen.len(), 500);
    Ok(())
}

/// A server that cannot reach its broker answers 503; the agent keeps the
/// result and retries.
#[tokio::test]
async fn test_broker_outage_keeps_results_pending() -> Result<()> {
    let server = Server::start().await?;
    let mut sub = server.fanout.subscribe();
    let queue = LocalQueue::open_in_memory("agent-1")?;
    queue.enqueue_result(&result(1))?;
    let delivery = DeliveryLoop::new(queue.clone(), Arc::new(ServerLink::new(&server.url)), config());

    server.broker.set_available(false);
    let report = delivery.tick().await?;
    assert_eq!(report.failed, 1);
    assert_eq!(queue.stats()?.outbound_pending, 1);

    server.broker.set_available(true);
    assert_eq!(delivery.tick().await?.delivered, 1);
    wait_for_result(&mut sub, "offline-1").await?;
    Ok(())
}
