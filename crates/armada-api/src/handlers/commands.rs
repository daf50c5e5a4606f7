//! /commands handlers: command submission and plain command results.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use armada_core::{now_ms, Command, CommandResult, ResultEvent};

use super::{bad_request, broker_error, short_id, ApiState, SubmissionInfo};

pub const DEFAULT_TTL_SECONDS: u64 = 300;

// ── /commands (POST) ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitCommandRequest {
    /// Derived from the content when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub target_key: String,
    #[serde(rename = "type")]
    pub command_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitCommandResponse {
    pub command_id: String,
    #[serde(flatten)]
    pub submission: SubmissionInfo,
}

pub async fn handle_submit_command(
    State(state): State<ApiState>,
    Json(req): Json<SubmitCommandRequest>,
) -> Result<(StatusCode, Json<SubmitCommandResponse>), (StatusCode, String)> {
    if req.target_key.trim().is_empty() {
        return Err(bad_request("targetKey is required"));
    }
    if req.command_type.trim().is_empty() {
        return Err(bad_request("type is required"));
    }

    let mut cmd = Command::new(
        req.target_key,
        req.command_type,
        req.payload,
        req.ttl_seconds.unwrap_or(DEFAULT_TTL_SECONDS),
        now_ms(),
    );
    if let Some(id) = req.id.filter(|id| !id.is_empty()) {
        cmd.id = id;
    }
    let command_id = cmd.id.clone();
    tracing::info!(
        command_id = short_id(&command_id),
        target = %cmd.target_key,
        command_type = %cmd.command_type,
        "command submitted"
    );

    let submission = SubmissionInfo::try_from(state.gateway.submit_command(cmd).await)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitCommandResponse {
            command_id,
            submission,
        }),
    ))
}

// ── /commands/response (POST) ─────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultAccepted {
    pub key: String,
    pub partition: u32,
    pub offset: u64,
}

pub async fn handle_command_response(
    State(state): State<ApiState>,
    Json(result): Json<CommandResult>,
) -> Result<Json<ResultAccepted>, (StatusCode, String)> {
    if result.command_id.is_empty() || result.agent_id.is_empty() {
        return Err(bad_request("commandId and agentId are required"));
    }
    let event = ResultEvent::Command(result);
    let pos = state
        .gateway
        .publish_result(&event)
        .await
        .map_err(broker_error)?;
    Ok(Json(ResultAccepted {
        key: event.key().to_string(),
        partition: pos.partition,
        offset: pos.offset,
    }))
}
