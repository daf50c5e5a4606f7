use crate::*;

use armada_agent::ServerLink;

/// Commands submitted for one agent arrive in submission order.
#[tokio::test]
async fn test_same_key_ordering() -> Result<()> {
    let server = Server::start().await?;
    let mut submitted = Vec::new();
    for n in 0..20 {
        let body = serde_json::json!({
            "targetKey": "agent-9",
            "type": "execute",
            "payload": {"executorKind": "shell", "script": format!("echo {n}")}
        });
        let resp = server.post("/commands", &body).await?;
        submitted.push(resp["commandId"].as_str().context("missing commandId")?.to_string());
        // Interleave another agent's traffic.
        let other = serde_json::json!({"targetKey": "agent-x", "type": "execute", "payload": {"n": n}});
        server.post("/commands", &other).await?;
    }

    let link = ServerLink::new(&server.url);
    let batch = link.fetch_commands("agent-9", 100).await?;
    let received: Vec<String> = batch.commands.into_iter().map(|c| c.id).collect();
    assert_eq!(received, submitted);
    Ok(())
}

/// Commands accepted during a broker outage are published in order once
/// it returns, and still reach the agent in submission order.
#[tokio::test]
async fn test_queued_commands_flush_in_order() -> Result<()> {
    let server = Server::start().await?;
    server.broker.set_available(false);

    let mut submitted = Vec::new();
    for n in 0..5 {
        let body = serde_json::json!({
            "targetKey": "agent-9",
            "type": "execute",
            "payload": {"executorKind": "shell", "script": format!("echo {n}")}
        });
        let resp = server.post("/commands", &body).await?;
        assert_eq!(resp["status"], "queued");
        submitted.push(resp["commandId"].as_str().context("missing commandId")?.to_string());
    }
    assert_eq!(server.gateway.pending_len(), 5);

    server.broker.set_available(true);
    let gateway = server.gateway.clone();
    eventually(|| gateway.pending_len() == 0).await?;

    let link = ServerLink::new(&server.url);
    let received: Vec<String> = link
        .fetch_commands("agent-9", 100)
        .await?
        .commands
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(received, submitted);
    Ok(())
}
