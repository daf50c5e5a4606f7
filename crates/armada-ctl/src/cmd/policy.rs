//! Dispatch a policy from a JSON file.

use anyhow::{Context, Result};
use serde::Deserialize;

use super::http::{base_url, post_json_body};
use super::submit::print_submission;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DispatchResponse {
    command_id: String,
    execution_id: String,
    status: String,
    partition: Option<u32>,
    offset: Option<u64>,
}

pub async fn cmd_policy(port: u16, file: &str, target: Option<&str>) -> Result<()> {
    let text = std::fs::read_to_string(file).with_context(|| format!("failed to read {}", file))?;
    let mut body: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", file))?;
    if let Some(t) = target {
        body["targetKey"] = t.into();
    }

    let resp: DispatchResponse =
        post_json_body(&format!("{}/policies", base_url(port)), &body).await?;
    println!("execution {}", resp.execution_id);
    print_submission(&resp.command_id, &resp.status, resp.partition, resp.offset);
    Ok(())
}
