//! Server status command.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    broker_reachable: bool,
    topics: Vec<TopicInfo>,
    pending_commands: usize,
    subscribers: usize,
    uptime_secs: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TopicInfo {
    name: String,
    partitions: u32,
    replication_factor: u16,
}

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  Armada Server Status");
    println!("═══════════════════════════════════════");
    println!(
        "  Broker           : {}",
        if resp.broker_reachable { "reachable" } else { "UNREACHABLE" }
    );
    println!("  Pending commands : {}", resp.pending_commands);
    println!("  Live subscribers : {}", resp.subscribers);
    println!("  Uptime           : {}s", resp.uptime_secs);

    if resp.topics.is_empty() {
        println!("\n  No topics provisioned.");
    } else {
        println!("\n  Topics:");
        for t in &resp.topics {
            println!(
                "  ─ {:<24} partitions={} replication={}",
                t.name, t.partitions, t.replication_factor
            );
        }
    }
    Ok(())
}
