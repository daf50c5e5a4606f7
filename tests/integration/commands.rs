use crate::*;

use armada_core::command::command_types;
use armada_core::{now_ms, Command, CommandStatus};
use armada_services::local_queue::InboundStatus;

fn execute_body(target: &str, script: &str) -> serde_json::Value {
    serde_json::json!({
        "targetKey": target,
        "type": "execute",
        "payload": {"executorKind": "shell", "script": script, "timeoutSeconds": 10}
    })
}

/// Submit over HTTP, run on the agent, see the result in the fan-out.
#[tokio::test]
async fn test_command_round_trip() -> Result<()> {
    let server = Server::start().await?;
    let mut sub = server.fanout.subscribe();
    let mut agent = TestAgent::start(&server, "agent-1").await?;

    let resp = server.post("/commands", &execute_body("agent-1", "echo hello")).await?;
    assert_eq!(resp["status"], "published");
    let id = resp["commandId"].as_str().context("missing commandId")?;

    match wait_for_result(&mut sub, id).await? {
        ResultEvent::Command(r) => {
            assert_eq!(r.agent_id, "agent-1");
            assert_eq!(r.status, CommandStatus::Success);
            assert_eq!(r.exit_code, Some(0));
            assert_eq!(r.output.trim(), "hello");
        }
        other => bail!("unexpected event {other:?}"),
    }

    // Reported results are flipped to sent in the agent's queue.
    let queue = agent.queue.clone();
    eventually(|| queue.stats().map(|s| s.outbound_sent == 1).unwrap_or(false)).await?;
    agent.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_failing_command_reports_exit_code() -> Result<()> {
    let server = Server::start().await?;
    let mut sub = server.fanout.subscribe();
    let _agent = TestAgent::start(&server, "agent-1").await?;

    let resp = server.post("/commands", &execute_body("agent-1", "echo oops >&2; exit 7")).await?;
    let id = resp["commandId"].as_str().context("missing commandId")?;
    match wait_for_result(&mut sub, id).await? {
        ResultEvent::Command(r) => {
            assert_eq!(r.status, CommandStatus::Failed);
            assert_eq!(r.exit_code, Some(7));
            assert!(r.output.contains("oops"));
        }
        other => bail!("unexpected event {other:?}"),
    }
    Ok(())
}

/// A broadcast command runs once on every agent.
#[tokio::test]
async fn test_broadcast_reaches_every_agent() -> Result<()> {
    let server = Server::start().await?;
    let mut sub = server.fanout.subscribe();
    let _a = TestAgent::start(&server, "agent-a").await?;
    let _b = TestAgent::start(&server, "agent-b").await?;

    let resp = server.post("/commands", &execute_body("*", "echo all")).await?;
    let id = resp["commandId"].as_str().context("missing commandId")?.to_string();

    let first = wait_for_result(&mut sub, &id).await?;
    let second = wait_for_result(&mut sub, &id).await?;
    let mut agents = vec![first.agent_id().to_string(), second.agent_id().to_string()];
    agents.sort();
    assert_eq!(agents, ["agent-a", "agent-b"]);
    Ok(())
}

/// Expired commands are recorded but never executed.
#[tokio::test]
async fn test_expired_command_not_executed() -> Result<()> {
    let server = Server::start().await?;
    let mut sub = server.fanout.subscribe();

    let stale = Command::new(
        "agent-1",
        command_types::EXECUTE,
        serde_json::json!({"executorKind": "shell", "script": "echo stale"}),
        1,
        now_ms() - 10_000,
    );
    server.gateway.publish_command(&stale).await?;
    let marker = Command::new(
        "agent-1",
        command_types::EXECUTE,
        serde_json::json!({"executorKind": "shell", "script": "echo fresh"}),
        60,
        now_ms(),
    );
    server.gateway.publish_command(&marker).await?;

    let agent = TestAgent::start(&server, "agent-1").await?;
    // Same partition, so the stale command was seen before the marker ran.
    wait_for_result(&mut sub, &marker.id).await?;

    assert_eq!(
        agent.queue.command_status(&stale.id)?,
        Some(InboundStatus::Expired)
    );
    let stats = agent.queue.stats()?;
    assert_eq!(stats.outbound_pending + stats.outbound_sent, 1);
    Ok(())
}

/// Redelivery of the same command id runs it only once.
#[tokio::test]
async fn test_duplicate_submission_runs_once() -> Result<()> {
    let server = Server::start().await?;
    let mut sub = server.fanout.subscribe();
    let agent = TestAgent::start(&server, "agent-1").await?;

    let mut body = execute_body("agent-1", "echo once");
    body["id"] = "fixed-command-id".into();
    server.post("/commands", &body).await?;
    server.post("/commands", &body).await?;

    wait_for_result(&mut sub, "fixed-command-id").await?;
    // Give a second execution every chance to show up.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let again = tokio::time::timeout(Duration::from_millis(200), async {
        loop {
            match sub.next().await {
                Some(e) if e.key() == "fixed-command-id" => return true,
                Some(_) => continue,
                None => return false,
            }
        }
    })
    .await;
    assert!(again.is_err(), "command ran twice");
    assert_eq!(agent.queue.stats()?.outbound_sent, 1);
    Ok(())
}
