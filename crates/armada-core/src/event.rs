//! Result events: what the result topic carries and the live stream emits.

use serde::{Deserialize, Serialize};

use crate::command::CommandResult;
use crate::policy::PolicyExecutionResult;

/// One result flowing back from an agent.
///
/// Wire form is the inner object plus a `"kind"` discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultEvent {
    Command(CommandResult),
    Policy(PolicyExecutionResult),
}

impl ResultEvent {
    /// Broker key: the command id or the policy execution id.
    pub fn key(&self) -> &str {
        match self {
            Self::Command(r) => &r.command_id,
            Self::Policy(r) => &r.execution_id,
        }
    }

    pub fn agent_id(&self) -> &str {
        match self {
            Self::Command(r) => &r.agent_id,
            Self::Policy(r) => &r.agent_id,
        }
    }
}
