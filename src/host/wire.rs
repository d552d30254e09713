use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Shell flavor the agent uses for a `runcommands` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind {
    #[serde(rename = "bat")]
    Bat,
    #[serde(rename = "ps")]
    Ps,
}

/// Outbound agent message, field for field the host's `runcommands` contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCommand {
    pub action: String,
    #[serde(rename = "type")]
    pub kind: CommandKind,
    pub cmds: Vec<String>,
    #[serde(rename = "runAsUser")]
    pub run_as_user: bool,
    pub reply: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responseid: Option<String>,
}

impl AgentCommand {
    /// A `runcommands` request. A correlation token makes it a request/reply
    /// pair; without one the agent executes and stays silent.
    pub fn run_commands(
        kind: CommandKind,
        cmds: Vec<String>,
        run_as_user: bool,
        responseid: Option<String>,
    ) -> Self {
        Self {
            action: "runcommands".to_string(),
            kind,
            cmds,
            run_as_user,
            reply: responseid.is_some(),
            responseid,
        }
    }
}

/// Inbound `runcommands` reply; only the fields the reply router cares about.
/// Depending on agent build, output arrives in `console` or in `result`
/// (which older agents set to a bare "OK").
#[derive(Debug, Clone, Deserialize)]
pub struct AgentReply {
    pub action: String,
    pub responseid: String,
    #[serde(default)]
    pub console: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
}

impl AgentReply {
    pub fn text(&self) -> String {
        if let Some(console) = &self.console {
            return console.clone();
        }
        match &self.result {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }
}
