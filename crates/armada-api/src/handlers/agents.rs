//! /agents handlers: how agents pull their commands.
//!
//! An agent fetches, persists what it got, then acknowledges the returned
//! offsets. Anything fetched but never acknowledged is fetched again.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use armada_services::{AgentBatch, Position};

use super::{bad_request, broker_error, ApiState};

// ── /agents/{id}/commands (GET) ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct FetchQuery {
    pub max: Option<usize>,
}

pub async fn handle_agent_commands(
    State(state): State<ApiState>,
    Path(agent_id): Path<String>,
    Query(query): Query<FetchQuery>,
) -> Result<Json<AgentBatch>, (StatusCode, String)> {
    if agent_id.is_empty() {
        return Err(bad_request("agent id is required"));
    }
    let max = query
        .max
        .unwrap_or(state.gateway.config().fetch_max_records)
        .clamp(1, 10_000);
    let batch = state
        .gateway
        .fetch_agent_commands(&agent_id, max)
        .await
        .map_err(broker_error)?;
    if !batch.commands.is_empty() {
        tracing::debug!(agent_id = %agent_id, commands = batch.commands.len(), "commands fetched");
    }
    Ok(Json(batch))
}

// ── /agents/{id}/commands/ack (POST) ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AckRequest {
    pub offsets: Vec<Position>,
}

#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub committed: usize,
}

pub async fn handle_agent_ack(
    State(state): State<ApiState>,
    Path(agent_id): Path<String>,
    Json(req): Json<AckRequest>,
) -> Result<Json<AckResponse>, (StatusCode, String)> {
    state
        .gateway
        .ack_agent_commands(&agent_id, &req.offsets)
        .await
        .map_err(broker_error)?;
    Ok(Json(AckResponse {
        committed: req.offsets.len(),
    }))
}
