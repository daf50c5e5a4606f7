//! Commands and command results: the unit the bus carries to agents and back.
//!
//! A `Command` is immutable once published. Receivers key idempotency off
//! `id` and must discard anything whose `issued_at + ttl_seconds` has passed.

use serde::{Deserialize, Serialize};

use crate::execution::ExecutorKind;

/// Target key meaning "every agent".
pub const BROADCAST_KEY: &str = "*";

/// Well-known `type` strings.
pub mod command_types {
    pub const EXECUTE: &str = "execute";
    pub const POLICY_EXECUTION: &str = "policy_execution";
    pub const CANCEL_EXECUTION: &str = "cancel_execution";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub id: String,
    /// Specific agent id, or [`BROADCAST_KEY`].
    pub target_key: String,
    #[serde(rename = "type")]
    pub command_type: String,
    /// Opaque; structure is defined by `command_type`.
    pub payload: serde_json::Value,
    pub ttl_seconds: u64,
    /// Unix ms at which the command was issued.
    pub issued_at: u64,
}

impl Command {
    /// Build a command and derive its id from the content.
    pub fn new(
        target_key: impl Into<String>,
        command_type: impl Into<String>,
        payload: serde_json::Value,
        ttl_seconds: u64,
        issued_at: u64,
    ) -> Self {
        let target_key = target_key.into();
        let command_type = command_type.into();
        let id = derive_id(&target_key, &command_type, issued_at, &payload);
        Self {
            id,
            target_key,
            command_type,
            payload,
            ttl_seconds,
            issued_at,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.target_key == BROADCAST_KEY
    }

    /// True if this command is addressed to `agent_id` (directly or by broadcast).
    pub fn targets(&self, agent_id: &str) -> bool {
        self.is_broadcast() || self.target_key == agent_id
    }

    /// Unix ms after which the command must not be executed.
    pub fn expires_at(&self) -> u64 {
        self.issued_at
            .saturating_add(self.ttl_seconds.saturating_mul(1000))
    }

    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms > self.expires_at()
    }
}

/// `hex(blake3(len_le(target_key) || target_key || len_le(command_type) ||
/// command_type || issued_at_le || payload_json))`. Lengths are u64 LE.
pub fn derive_id(
    target_key: &str,
    command_type: &str,
    issued_at: u64,
    payload: &serde_json::Value,
) -> String {
    let payload_bytes = serde_json::to_vec(payload).unwrap_or_default();
    let mut h = blake3::Hasher::new();
    for field in [target_key, command_type] {
        h.update(&(field.len() as u64).to_le_bytes());
        h.update(field.as_bytes());
    }
    h.update(&issued_at.to_le_bytes());
    h.update(&payload_bytes);
    hex::encode(h.finalize().as_bytes())
}

/// Payload of an `execute` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteSpec {
    pub executor_kind: ExecutorKind,
    pub script: String,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default = "default_true")]
    pub capture_stderr: bool,
    #[serde(default)]
    pub interpreter_path: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Payload of a `cancel_execution` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelSpec {
    pub execution_id: String,
}

/// Outcome of a plain command on one agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    #[default]
    Success,
    Failed,
    Timeout,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub command_id: String,
    pub agent_id: String,
    pub output: String,
    #[serde(default)]
    pub status: CommandStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(ttl_seconds: u64) -> Command {
        Command::new(
            "agent-1",
            command_types::EXECUTE,
            serde_json::json!({ "executorKind": "shell", "script": "true" }),
            ttl_seconds,
            1_000,
        )
    }

    #[test]
    fn expiry_is_exclusive_of_the_deadline() {
        let c = command(10);
        assert_eq!(c.expires_at(), 11_000);
        assert!(!c.is_expired_at(11_000));
        assert!(c.is_expired_at(11_001));
    }

    #[test]
    fn id_depends_on_target_and_payload() {
        let a = command(10);
        let b = Command::new("agent-2", "execute", a.payload.clone(), 10, 1_000);
        assert_eq!(a.id.len(), 64);
        assert_ne!(a.id, b.id);
        assert_eq!(a.id, command(99).id, "ttl is not part of the id");
    }

    #[test]
    fn id_depends_on_command_type() {
        let a = command(10);
        let b = Command::new("agent-1", "cancel_execution", a.payload.clone(), 10, a.issued_at);
        assert_ne!(a.id, b.id);
        assert_ne!(
            derive_id("ab", "c", 1, &serde_json::Value::Null),
            derive_id("a", "bc", 1, &serde_json::Value::Null)
        );
    }

    #[test]
    fn broadcast_targets_everyone() {
        let mut c = command(10);
        assert!(c.targets("agent-1"));
        assert!(!c.targets("agent-2"));
        c.target_key = BROADCAST_KEY.to_string();
        assert!(c.targets("agent-2"));
    }

    #[test]
    fn wire_names_are_camel_case() {
        let v = serde_json::to_value(command(5)).unwrap();
        assert_eq!(v["targetKey"], "agent-1");
        assert_eq!(v["type"], "execute");
        assert_eq!(v["ttlSeconds"], 5);
    }

    #[test]
    fn result_status_defaults_to_success() {
        let r: CommandResult = serde_json::from_str(
            r#"{"commandId":"c","agentId":"a","output":"ok"}"#,
        )
        .unwrap();
        assert_eq!(r.status, CommandStatus::Success);
        assert!(r.exit_code.is_none());
    }
}
