//! HTTP API handlers: the collaborator, agent and viewer surface.

pub mod agents;
pub mod commands;
pub mod policies;
pub mod status;
pub mod stream;

use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;
use serde::Serialize;

use armada_services::{BrokerError, Gateway, ResultFanout, Submission};

#[derive(Clone)]
pub struct ApiState {
    pub gateway: Arc<Gateway>,
    pub fanout: ResultFanout,
    pub started_at: Instant,
}

impl ApiState {
    pub fn new(gateway: Arc<Gateway>, fanout: ResultFanout) -> Self {
        Self {
            gateway,
            fanout,
            started_at: Instant::now(),
        }
    }
}

// ── Shared helpers ────────────────────────────────────────────────────────────

/// Client mistakes are 400; everything else the broker says is 503.
fn broker_error(e: BrokerError) -> (StatusCode, String) {
    let code = match e {
        BrokerError::InvalidPartition { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, e.to_string())
}

/// Ids are logged truncated to 16 chars.
fn short_id(id: &str) -> &str {
    id.get(..16).unwrap_or(id)
}

fn bad_request(msg: impl Into<String>) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, msg.into())
}

/// `status` is `published` or `queued`; partition and offset only when
/// published.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionInfo {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

impl TryFrom<Submission> for SubmissionInfo {
    type Error = (StatusCode, String);

    /// A refused submission is a 503: the broker is down and the outbox is
    /// full, so the caller has to retry later.
    fn try_from(s: Submission) -> Result<Self, Self::Error> {
        match s {
            Submission::Published(pos) => Ok(Self {
                status: "published",
                partition: Some(pos.partition),
                offset: Some(pos.offset),
            }),
            Submission::Queued => Ok(Self {
                status: "queued",
                partition: None,
                offset: None,
            }),
            Submission::Refused => Err((
                StatusCode::SERVICE_UNAVAILABLE,
                "broker unavailable and command outbox full".to_string(),
            )),
        }
    }
}

pub use agents::{handle_agent_ack, handle_agent_commands};
pub use commands::{handle_command_response, handle_submit_command};
pub use policies::{handle_dispatch_policy, handle_policy_result};
pub use status::handle_status;
pub use stream::handle_result_stream;
