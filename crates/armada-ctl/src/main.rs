//! armada-ctl — command-line interface for the Armada server.

use anyhow::{Context, Result};

mod cmd;

use cmd::submit::SubmitArgs;

const DEFAULT_PORT: u16 = 9101;

fn print_usage() {
    println!("Usage: armada-ctl [--port <port>] <command>");
    println!();
    println!("Commands:");
    println!("  status                               Show broker, outbox and stream status");
    println!("  submit <target> <executor> <script>  Send an execute command");
    println!("         [--ttl <secs>] [--timeout <secs>]");
    println!("  policy <file.json> [--target <key>]  Dispatch a policy execution");
    println!("  stream [--agent <id>] [--raw]        Tail live results");
    println!();
    println!("  <target> is an agent id or * for every agent.");
    println!("  <executor> is one of shell, powershell, python, script, tree_query, cim_query.");
    println!();
    println!("Options:");
    println!("  --port <port>   API port (default: {})", DEFAULT_PORT);
}

/// Pull `--name <value>` out of `args`.
fn take_opt<'a>(args: &mut Vec<&'a str>, name: &str) -> Result<Option<&'a str>> {
    match args.iter().position(|a| *a == name) {
        Some(i) => {
            let value = *args
                .get(i + 1)
                .with_context(|| format!("{} requires a value", name))?;
            args.drain(i..=i + 1);
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn take_flag(args: &mut Vec<&str>, name: &str) -> bool {
    match args.iter().position(|a| *a == name) {
        Some(i) => {
            args.remove(i);
            true
        }
        None => false,
    }
}

fn parse_secs(value: Option<&str>, name: &str) -> Result<Option<u64>> {
    value
        .map(|v| v.parse().with_context(|| format!("{} must be a number", name)))
        .transpose()
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut remaining: Vec<&str> = args.iter().map(String::as_str).collect();

    let port = match take_opt(&mut remaining, "--port")? {
        Some(p) => p.parse().context("--port must be a number")?,
        None => DEFAULT_PORT,
    };

    match remaining.first().copied() {
        None | Some("status") => cmd::status::cmd_status(port).await,
        Some("submit") => {
            let ttl = parse_secs(take_opt(&mut remaining, "--ttl")?, "--ttl")?;
            let timeout = parse_secs(take_opt(&mut remaining, "--timeout")?, "--timeout")?;
            match remaining.as_slice() {
                [_, target, executor, script] => {
                    cmd::submit::cmd_submit(
                        port,
                        SubmitArgs {
                            target,
                            executor,
                            script,
                            ttl_seconds: ttl,
                            timeout_seconds: timeout,
                        },
                    )
                    .await
                }
                _ => usage_error("submit needs <target> <executor> <script>"),
            }
        }
        Some("policy") => {
            let target = take_opt(&mut remaining, "--target")?;
            match remaining.as_slice() {
                [_, file] => cmd::policy::cmd_policy(port, file, target).await,
                _ => usage_error("policy needs <file.json>"),
            }
        }
        Some("stream") => {
            let agent = take_opt(&mut remaining, "--agent")?;
            let raw = take_flag(&mut remaining, "--raw");
            cmd::stream::cmd_stream(port, agent, raw).await
        }
        Some("help") | Some("--help") | Some("-h") => {
            print_usage();
            Ok(())
        }
        Some(_) => usage_error(&format!("Unknown command: {}", remaining.join(" "))),
    }
}

fn usage_error(msg: &str) -> Result<()> {
    eprintln!("{}", msg);
    eprintln!();
    print_usage();
    std::process::exit(1);
}
