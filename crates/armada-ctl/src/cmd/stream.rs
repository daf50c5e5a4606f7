//! Tail the live result stream.

use anyhow::{Context, Result, bail};

use super::http::base_url;

/// Splits a server-sent event byte stream into `data` payloads.
#[derive(Default)]
struct EventReader {
    buf: String,
}

impl EventReader {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.push_str(&String::from_utf8_lossy(chunk));
        let mut out = Vec::new();
        while let Some(end) = self.buf.find("\n\n") {
            let block: String = self.buf.drain(..end + 2).collect();
            let data: Vec<&str> = block
                .lines()
                .filter_map(|l| l.strip_prefix("data:"))
                .map(|d| d.strip_prefix(' ').unwrap_or(d))
                .collect();
            if !data.is_empty() {
                out.push(data.join("\n"));
            }
        }
        out
    }
}

fn describe(event: &serde_json::Value) -> String {
    let agent = event["agentId"].as_str().unwrap_or("?");
    match event["kind"].as_str() {
        Some("command") => format!(
            "command {} on {}: {} exit={} {}",
            event["commandId"].as_str().unwrap_or("?"),
            agent,
            event["status"].as_str().unwrap_or("?"),
            event["exitCode"],
            event["output"].as_str().unwrap_or("").trim_end(),
        ),
        Some("policy") => format!(
            "policy {} on {}: {} {}/{} final={}",
            event["executionId"].as_str().unwrap_or("?"),
            agent,
            event["status"].as_str().unwrap_or("?"),
            event["completedSteps"],
            event["totalSteps"],
            event["finalStatus"].as_str().unwrap_or("-"),
        ),
        _ => event.to_string(),
    }
}

pub async fn cmd_stream(port: u16, agent: Option<&str>, raw: bool) -> Result<()> {
    let mut url = format!("{}/results/stream", base_url(port));
    if let Some(a) = agent {
        url.push_str(&format!("?agentId={}", a));
    }
    let mut resp = reqwest::get(&url)
        .await
        .with_context(|| format!("failed to connect to armadad at {} (is it running?)", url))?;
    if !resp.status().is_success() {
        bail!("armadad answered {}", resp.status());
    }
    eprintln!("Streaming results (Ctrl-C to stop)...");

    let mut reader = EventReader::default();
    while let Some(chunk) = resp.chunk().await.context("stream interrupted")? {
        for data in reader.push(&chunk) {
            if raw {
                println!("{}", data);
                continue;
            }
            match serde_json::from_str::<serde_json::Value>(&data) {
                Ok(event) => println!("{}", describe(&event)),
                Err(_) => println!("{}", data),
            }
        }
    }
    eprintln!("Stream closed by server.");
    Ok(())
}
