//! /status handler.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use armada_services::broker::TopicDescription;

use super::ApiState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub broker_reachable: bool,
    pub topics: Vec<TopicDescription>,
    /// Commands accepted but not yet on the broker.
    pub pending_commands: usize,
    pub subscribers: usize,
    pub uptime_secs: u64,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let (broker_reachable, topics) = match state.gateway.describe().await {
        Ok(topics) => (true, topics),
        Err(e) => {
            tracing::debug!(error = %e, "status: broker describe failed");
            (false, Vec::new())
        }
    };
    Json(StatusResponse {
        broker_reachable,
        topics,
        pending_commands: state.gateway.pending_len(),
        subscribers: state.fanout.subscriber_count(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}
