//! Submit a single `execute` command.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, post_json_body};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub command_id: String,
    pub status: String,
    pub partition: Option<u32>,
    pub offset: Option<u64>,
}

pub struct SubmitArgs<'a> {
    pub target: &'a str,
    pub executor: &'a str,
    pub script: &'a str,
    pub ttl_seconds: Option<u64>,
    pub timeout_seconds: Option<u64>,
}

pub fn request_body(args: &SubmitArgs<'_>) -> serde_json::Value {
    let mut payload = serde_json::json!({
        "executorKind": args.executor,
        "script": args.script,
    });
    if let Some(t) = args.timeout_seconds {
        payload["timeoutSeconds"] = t.into();
    }
    let mut body = serde_json::json!({
        "targetKey": args.target,
        "type": "execute",
        "payload": payload,
    });
    if let Some(ttl) = args.ttl_seconds {
        body["ttlSeconds"] = ttl.into();
    }
    body
}

pub async fn cmd_submit(port: u16, args: SubmitArgs<'_>) -> Result<()> {
    let resp: SubmitResponse =
        post_json_body(&format!("{}/commands", base_url(port)), &request_body(&args)).await?;
    print_submission(&resp.command_id, &resp.status, resp.partition, resp.offset);
    Ok(())
}

pub fn print_submission(id: &str, status: &str, partition: Option<u32>, offset: Option<u64>) {
    match (partition, offset) {
        (Some(p), Some(o)) => println!("{} {} (partition {}, offset {})", status, id, p, o),
        _ => println!("{} {} (broker unavailable; will be sent when it returns)", status, id),
    }
}
