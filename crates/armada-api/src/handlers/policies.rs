//! /policies handlers: policy dispatch and policy results.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use armada_core::command::command_types;
use armada_core::{now_ms, Command, PolicyExecutionCommand, PolicyExecutionResult, ResultEvent};

use super::commands::ResultAccepted;
use super::{bad_request, broker_error, short_id, ApiState, SubmissionInfo};

// ── /policies (POST) ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchPolicyRequest {
    /// Defaults to the policy's `agentId`.
    #[serde(default)]
    pub target_key: Option<String>,
    #[serde(flatten)]
    pub policy: PolicyExecutionCommand,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchPolicyResponse {
    pub command_id: String,
    pub execution_id: String,
    #[serde(flatten)]
    pub submission: SubmissionInfo,
}

pub async fn handle_dispatch_policy(
    State(state): State<ApiState>,
    Json(req): Json<DispatchPolicyRequest>,
) -> Result<(StatusCode, Json<DispatchPolicyResponse>), (StatusCode, String)> {
    let policy = req.policy;
    if policy.execution_id.is_empty() {
        return Err(bad_request("executionId is required"));
    }
    policy.validate().map_err(|e| bad_request(e.to_string()))?;

    let now = now_ms();
    if policy.is_expired_at(now) {
        return Err(bad_request("policy has already expired"));
    }
    let target = req
        .target_key
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| policy.agent_id.clone());
    if target.is_empty() {
        return Err(bad_request("targetKey or agentId is required"));
    }
    // The command lives exactly as long as the policy does.
    let ttl_seconds = (policy.expires_at - now).div_ceil(1000);

    let payload = serde_json::to_value(&policy)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let cmd = Command::new(target, command_types::POLICY_EXECUTION, payload, ttl_seconds, now);
    let command_id = cmd.id.clone();
    tracing::info!(
        execution_id = short_id(&policy.execution_id),
        policy_id = %policy.policy_id,
        target = %cmd.target_key,
        steps = policy.steps.len(),
        "policy dispatched"
    );

    let submission = SubmissionInfo::try_from(state.gateway.submit_command(cmd).await)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(DispatchPolicyResponse {
            command_id,
            execution_id: policy.execution_id,
            submission,
        }),
    ))
}

// ── /policies/results (POST) ──────────────────────────────────────────────────

pub async fn handle_policy_result(
    State(state): State<ApiState>,
    Json(result): Json<PolicyExecutionResult>,
) -> Result<Json<ResultAccepted>, (StatusCode, String)> {
    if result.execution_id.is_empty() || result.agent_id.is_empty() {
        return Err(bad_request("executionId and agentId are required"));
    }
    let event = ResultEvent::Policy(result);
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
