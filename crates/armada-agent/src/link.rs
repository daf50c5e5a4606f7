//! ServerLink: the agent's HTTP uplink to armadad.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use armada_core::{Command, ResultEvent};
use armada_services::delivery::{DeliveryError, ResultSink};
use armada_services::{OutboundRecord, Position};

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server answered HTTP {0}: {1}")]
    Status(u16, String),
}

/// Commands fetched for this agent and the offsets to acknowledge.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandBatch {
    pub commands: Vec<Command>,
    pub next_offsets: Vec<Position>,
}

#[derive(Serialize)]
struct AckBody<'a> {
    offsets: &'a [Position],
}

pub struct ServerLink {
    client: Client,
    base_url: String,
}

impl ServerLink {
    pub fn new(server_url: &str) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: format!("{}/api", server_url.trim_end_matches('/')),
        }
    }

    pub async fn fetch_commands(&self, agent_id: &str, max: usize) -> Result<CommandBatch, LinkError> {
        let resp = self
            .client
            .get(format!("{}/agents/{}/commands?max={}", self.base_url, agent_id, max))
            .send()
            .await?;
        if !resp.status().is_success() {
            let code = resp.status().as_u16();
            return Err(LinkError::Status(code, resp.text().await.unwrap_or_default()));
        }
        Ok(resp.json::<CommandBatch>().await?)
    }

    pub async fn ack(&self, agent_id: &str, offsets: &[Position]) -> Result<(), LinkError> {
        if offsets.is_empty() {
            return Ok(());
        }
        let resp = self
            .client
            .post(format!("{}/agents/{}/commands/ack", self.base_url, agent_id))
            .json(&AckBody { offsets })
            .send()
            .await?;
        if !resp.status().is_success() {
            let code = resp.status().as_u16();
            return Err(LinkError::Status(code, resp.text().await.unwrap_or_default()));
        }
        Ok(())
    }
}

#[async_trait]
impl ResultSink for ServerLink {
    async fn deliver(&self, record: &OutboundRecord) -> Result<u16, DeliveryError> {
        let request = match &record.event {
            ResultEvent::Command(r) => self
                .client
                .post(format!("{}/commands/response", self.base_url))
                .json(r),
            ResultEvent::Policy(r) => self
                .client
                .post(format!("{}/policies/results", self.base_url))
                .json(r),
        };
        let resp = request
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        let code = resp.status().as_u16();
        if resp.status().is_success() {
            Ok(code)
        } else {
            Err(DeliveryError::Rejected(code))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::sync::broadcast;

    use armada_core::config::BrokerConfig;
    use armada_core::{now_ms, CommandResult, CommandStatus};
    use armada_services::local_queue::OutboundStatus;
    use armada_services::{CommandOutbox, Gateway, LogBroker, ResultFanout};

    async fn server() -> (Arc<Gateway>, String, broadcast::Sender<()>) {
        let broker = Arc::new(LogBroker::new());
        let outbox = CommandOutbox::in_memory(16).unwrap();
        let gateway = Arc::new(Gateway::new(broker, BrokerConfig::default(), outbox));
        gateway.ensure_topics().await.unwrap();
        let state = armada_api::ApiState::new(gateway.clone(), ResultFanout::default());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let (tx, rx) = broadcast::channel(1);
        tokio::spawn(armada_api::serve_on(listener, state, rx));
        (gateway, url, tx)
    }

    #[tokio::test]
    async fn fetch_then_ack_advances() {
        let (gateway, url, _stop) = server().await;
        let cmd = Command::new("agent-7", "execute", serde_json::json!({"n": 1}), 60, now_ms());
        gateway.publish_command(&cmd).await.unwrap();

        let link = ServerLink::new(&url);
        let batch = link.fetch_commands("agent-7", 10).await.unwrap();
        assert_eq!(batch.commands.len(), 1);
        assert_eq!(batch.commands[0].id, cmd.id);

        // Not acknowledged yet: fetched again.
        let again = link.fetch_commands("agent-7", 10).await.unwrap();
        assert_eq!(again.commands.len(), 1);

        link.ack("agent-7", &batch.next_offsets).await.unwrap();
        assert!(link.fetch_commands("agent-7", 10).await.unwrap().commands.is_empty());
    }

    #[tokio::test]
    async fn deliver_posts_to_result_endpoint() {
        let (_gateway, url, _stop) = server().await;
        let link = ServerLink::new(&url);
        let record = OutboundRecord {
            id: 1,
            result_id: "c1".into(),
            agent_id: "agent-7".into(),
            event: ResultEvent::Command(CommandResult {
                command_id: "c1".into(),
                agent_id: "agent-7".into(),
                output: "ok".into(),
                status: CommandStatus::Success,
                exit_code: Some(0),
            }),
            status: OutboundStatus::Pending,
            retry_count: 0,
            response_code: None,
            last_error: None,
            created_at: now_ms(),
            last_attempt_at: None,
        };
        assert_eq!(link.deliver(&record).await.unwrap(), 200);
    }

    #[tokio::test]
    async fn unreachable_server_is_transport_error() {
        let link = ServerLink::new("http://127.0.0.1:1");
        let err = link.fetch_commands("agent-7", 10).await.unwrap_err();
        assert!(matches!(err, LinkError::Http(_)));
    }
}
