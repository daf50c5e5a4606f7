use crate::*;

use armada_core::{now_ms, FinalStatus, PolicyExecutionResult, PolicyStatus, StepStatus};

fn policy(execution_id: &str, steps: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "executionId": execution_id,
        "agentId": "agent-1",
        "policyId": "baseline",
        "policyName": "Baseline hardening",
        "steps": steps,
        "timeoutSeconds": 60,
        "expiresAt": now_ms() + 60_000,
    })
}

async fn wait_for_policy(sub: &mut ResultSubscription, execution_id: &str) -> Result<PolicyExecutionResult> {
    match wait_for_result(sub, execution_id).await? {
        ResultEvent::Policy(r) => Ok(r),
        other => bail!("unexpected event {other:?}"),
    }
}

/// Step 2 fails with `continue`: the run completes as a partial success.
#[tokio::test]
async fn test_policy_partial_success() -> Result<()> {
    let server = Server::start().await?;
    let mut sub = server.fanout.subscribe();
    let agent = TestAgent::start(&server, "agent-1").await?;

    let body = policy(
        "exec-partial",
        serde_json::json!([
            {"stepNumber": 1, "executorKind": "shell", "scriptContent": "echo one"},
            {"stepNumber": 2, "executorKind": "shell", "scriptContent": "exit 4", "onFailure": "continue"},
            {"stepNumber": 3, "executorKind": "shell", "scriptContent": "echo three"}
        ]),
    );
    let resp = server.post("/policies", &body).await?;
    assert_eq!(resp["executionId"], "exec-partial");
    assert_eq!(resp["status"], "published");

    let result = wait_for_policy(&mut sub, "exec-partial").await?;
    assert_eq!(result.status, PolicyStatus::Completed);
    assert_eq!(result.final_status, Some(FinalStatus::PartialSuccess));
    assert_eq!(result.total_steps, 3);
    assert_eq!(result.completed_steps, 3);
    let statuses: Vec<StepStatus> = result.step_results.iter().map(|s| s.status).collect();
    assert_eq!(statuses, [StepStatus::Success, StepStatus::Failed, StepStatus::Success]);
    assert_eq!(result.step_results[1].exit_code, Some(4));
    assert_eq!(result.step_results[0].output.as_deref().map(str::trim), Some("one"));

    // The agent's snapshot matches and is marked reported.
    let queue = agent.queue.clone();
    eventually(|| {
        queue
            .policy_result("exec-partial")
            .ok()
            .flatten()
            .is_some_and(|r| r.reported_to_server)
    })
    .await?;
    Ok(())
}

/// A failing step jumping back re-runs the earlier step.
#[tokio::test]
async fn test_policy_jump_back_reexecutes() -> Result<()> {
    let server = Server::start().await?;
    let mut sub = server.fanout.subscribe();
    let agent = TestAgent::start(&server, "agent-1").await?;

    let body = policy(
        "exec-jump",
        serde_json::json!([
            {"stepNumber": 1, "executorKind": "shell", "scriptContent": "echo run >> marker"},
            {"stepNumber": 2, "executorKind": "shell",
             "scriptContent": "test $(wc -l < marker) -ge 2",
             "onFailure": {"jump_to_step": 1}}
        ]),
    );
    server.post("/policies", &body).await?;

    let result = wait_for_policy(&mut sub, "exec-jump").await?;
    assert_eq!(result.status, PolicyStatus::Completed);
    assert_eq!(result.final_status, Some(FinalStatus::Success));
    assert_eq!(result.current_step, 2);

    let marker = std::fs::read_to_string(agent.work_dir.join("marker"))?;
    assert_eq!(marker.lines().count(), 2, "step 1 ran twice");
    Ok(())
}

/// A cancel request stops the running step and skips the rest.
#[tokio::test]
async fn test_policy_cancel() -> Result<()> {
    let server = Server::start().await?;
    let mut sub = server.fanout.subscribe();
    let agent = TestAgent::start(&server, "agent-1").await?;

    let body = policy(
        "exec-cancel",
        serde_json::json!([
            {"stepNumber": 1, "executorKind": "shell", "scriptContent": "sleep 30"},
            {"stepNumber": 2, "executorKind": "shell", "scriptContent": "echo never"}
        ]),
    );
    server.post("/policies", &body).await?;

    let runtime = agent.agent.as_ref().context("agent stopped")?.runtime().clone();
    eventually(|| runtime.in_flight() == 1).await?;
    let started = std::time::Instant::now();
    server
        .post(
            "/commands",
            &serde_json::json!({
                "targetKey": "agent-1",
                "type": "cancel_execution",
                "payload": {"executionId": "exec-cancel"}
            }),
        )
        .await?;

    let result = wait_for_policy(&mut sub, "exec-cancel").await?;
    assert!(started.elapsed() < Duration::from_secs(20));
    assert_eq!(result.status, PolicyStatus::Cancelled);
    assert_eq!(result.final_status, Some(FinalStatus::Failed));
    assert_eq!(result.step_results.len(), 2);
    assert_eq!(result.step_results[1].status, StepStatus::Skipped);
    Ok(())
}

/// A policy resent with the same execution id is not run again.
#[tokio::test]
async fn test_policy_execution_id_is_idempotent() -> Result<()> {
    let server = Server::start().await?;
    let mut sub = server.fanout.subscribe();
    let agent = TestAgent::start(&server, "agent-1").await?;

    let steps = serde_json::json!([
        {"stepNumber": 1, "executorKind": "shell", "scriptContent": "echo run >> once"}
    ]);
    server.post("/policies", &policy("exec-once", steps.clone())).await?;
    wait_for_policy(&mut sub, "exec-once").await?;

    // Different command (new expiry), same execution id.
    let mut again = policy("exec-once", steps);
    again["expiresAt"] = (now_ms() + 120_000).into();
    server.post("/policies", &again).await?;
    tokio::time::sleep(Duration::from_secs(1)).await;

    let runs = std::fs::read_to_string(agent.work_dir.join("once"))?;
    assert_eq!(runs.lines().count(), 1);
    Ok(())
}
