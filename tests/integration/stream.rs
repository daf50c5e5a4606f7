use crate::*;

/// Two live viewers each receive every result, in order.
#[tokio::test]
async fn test_stream_fans_out_to_every_subscriber() -> Result<()> {
    let server = Server::start().await?;
    let stream_url = server.api("/results/stream");
    let mut a = SseClient::connect(&stream_url).await?;
    let mut b = SseClient::connect(&stream_url).await?;
    let fanout = server.fanout.clone();
    eventually(|| fanout.subscriber_count() == 2).await?;

    for n in 0..3 {
        let body = serde_json::json!({
            "commandId": format!("cmd-{n}"),
            "agentId": "agent-1",
            "output": format!("out {n}"),
        });
        server.post("/commands/response", &body).await?;
    }

    for client in [&mut a, &mut b] {
        for n in 0..3 {
            let event = client.next_json().await?;
            assert_eq!(event["kind"], "command");
            assert_eq!(event["commandId"], format!("cmd-{n}"));
            assert_eq!(event["output"], format!("out {n}"));
            assert_eq!(event["status"], "success");
        }
    }
    Ok(())
}

/// A viewer that never reads does not hold up another.
#[tokio::test]
async fn test_idle_subscriber_does_not_block_others() -> Result<()> {
    let server = Server::start().await?;
    let stream_url = server.api("/results/stream");
    let _idle = SseClient::connect(&stream_url).await?;
    let mut active = SseClient::connect(&stream_url).await?;
    let fanout = server.fanout.clone();
    eventually(|| fanout.subscriber_count() == 2).await?;

    for n in 0..50 {
        let body = serde_json::json!({
            "commandId": format!("cmd-{n}"),
            "agentId": "agent-1",
            "output": "x".repeat(512),
        });
        server.post("/commands/response", &body).await?;
        let event = active.next_json().await?;
        assert_eq!(event["commandId"], format!("cmd-{n}"));
    }
    Ok(())
}

/// The `agentId` filter only passes that agent's results.
#[tokio::test]
async fn test_stream_filters_by_agent() -> Result<()> {
    let server = Server::start().await?;
    let mut client = SseClient::connect(&server.api("/results/stream?agentId=agent-2")).await?;
    let fanout = server.fanout.clone();
    eventually(|| fanout.subscriber_count() == 1).await?;

    for agent in ["agent-1", "agent-2"] {
        let body = serde_json::json!({"commandId": format!("from-{agent}"), "agentId": agent, "output": ""});
        server.post("/commands/response", &body).await?;
    }
    let event = client.next_json().await?;
    assert_eq!(event["commandId"], "from-agent-2");
    Ok(())
}
