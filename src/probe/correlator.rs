use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::host::wire::{AgentCommand, CommandKind};
use crate::host::HostServer;

/// Why a dispatched command never produced a reply. These are ordinary data
/// states, not errors: a batch of probes must finish even when individual
/// targets are unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// Transmission to the agent (direct or via peer) failed.
    SendFailed,
    /// Agent is not connected here and no peer relay exists.
    NoRoute,
    /// No reply arrived within the window.
    Timeout,
}

impl DeliveryFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryFailure::SendFailed => "send_failed",
            DeliveryFailure::NoRoute => "no_route",
            DeliveryFailure::Timeout => "timeout",
        }
    }
}

/// Resolution of one dispatched command. Always produced; the dispatch path
/// never returns `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Reply text as the agent sent it.
    Reply(String),
    Failure(DeliveryFailure),
}

/// Pairs outbound correlation tokens with their eventual replies.
///
/// The host hands every inbound agent message to `handle_agent_message`; a
/// message resolves a waiter only while its token is still pending. Removing
/// the entry on first resolution is what enforces at-most-once: a reply that
/// loses the race against the timeout finds nothing to resolve.
#[derive(Debug, Default)]
pub struct ReplyRouter {
    pending: Mutex<HashMap<String, oneshot::Sender<String>>>,
}

impl ReplyRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, token: &str) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending map lock poisoned")
            .insert(token.to_string(), tx);
        rx
    }

    /// Drop a pending entry (timed out or send failed). Returns whether the
    /// token was still pending.
    fn discard(&self, token: &str) -> bool {
        self.pending
            .lock()
            .expect("pending map lock poisoned")
            .remove(token)
            .is_some()
    }

    /// Resolve a pending token with the reply text. `false` when the token
    /// is unknown, e.g. the reply arrived after its timeout already fired.
    pub fn complete(&self, token: &str, raw: String) -> bool {
        let sender = self
            .pending
            .lock()
            .expect("pending map lock poisoned")
            .remove(token);
        match sender {
            Some(tx) => tx.send(raw).is_ok(),
            None => {
                trace!(token, "reply for unknown token ignored");
                false
            }
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().expect("pending map lock poisoned").len()
    }

    /// Global inbound hook. Inspects any host-delivered agent message and
    /// resolves it if it is a `runcommands` reply we are waiting on.
    pub fn handle_agent_message(&self, message: &Value) -> bool {
        if message.get("action").and_then(Value::as_str) != Some("runcommands") {
            return false;
        }
        let Ok(reply) = serde_json::from_value::<crate::host::wire::AgentReply>(message.clone())
        else {
            return false;
        };
        let text = reply.text();
        self.complete(&reply.responseid, text)
    }
}

/// Dispatches `runcommands` requests to agents and awaits their replies
/// through the shared [`ReplyRouter`].
#[derive(Clone)]
pub struct Correlator {
    host: Arc<dyn HostServer>,
    router: Arc<ReplyRouter>,
}

impl Correlator {
    pub fn new(host: Arc<dyn HostServer>, router: Arc<ReplyRouter>) -> Self {
        Self { host, router }
    }

    /// Random + time-based. Collisions are treated as negligible; this is a
    /// correlation token, not a credential.
    fn make_token() -> String {
        format!(
            "odc_{}{:x}",
            Uuid::new_v4().simple(),
            Utc::now().timestamp_millis()
        )
    }

    /// Send command lines to an agent and wait for the reply.
    ///
    /// Delivery paths in order: direct (agent connected here), then peer
    /// relay, else an immediate `NoRoute` without waiting out the timeout.
    /// Exactly one resolution per call: reply, or timeout, or a failure
    /// marker — never an `Err`.
    pub async fn run_commands(
        &self,
        node_id: &str,
        kind: CommandKind,
        lines: Vec<String>,
        run_as_user: bool,
        timeout: Duration,
    ) -> CommandOutcome {
        let token = Self::make_token();
        let rx = self.router.register(&token);
        let command = AgentCommand::run_commands(kind, lines, run_as_user, Some(token.clone()));

        if self.host.is_agent_connected(node_id) {
            if let Err(e) = self.host.send_to_agent(node_id, &command).await {
                warn!(node_id, error = %e, "direct send to agent failed");
                self.router.discard(&token);
                return CommandOutcome::Failure(DeliveryFailure::SendFailed);
            }
        } else if self.host.relay_available() {
            if let Err(e) = self.host.relay_to_peer(node_id, &command).await {
                warn!(node_id, error = %e, "peer relay send failed");
                self.router.discard(&token);
                return CommandOutcome::Failure(DeliveryFailure::SendFailed);
            }
        } else {
            self.router.discard(&token);
            debug!(node_id, "no delivery path to agent");
            return CommandOutcome::Failure(DeliveryFailure::NoRoute);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(raw)) => CommandOutcome::Reply(raw),
            // Sender dropped without a value: entry was discarded under us.
            Ok(Err(_)) => CommandOutcome::Failure(DeliveryFailure::Timeout),
            Err(_) => {
                self.router.discard(&token);
                debug!(node_id, token, "command reply timed out");
                CommandOutcome::Failure(DeliveryFailure::Timeout)
            }
        }
    }

    /// Fire-and-forget dispatch (`reply:false`, no pending entry). Used for
    /// the best-effort service restart; the outcome does not matter.
    pub async fn fire(
        &self,
        node_id: &str,
        kind: CommandKind,
        lines: Vec<String>,
        run_as_user: bool,
    ) {
        let command = AgentCommand::run_commands(kind, lines, run_as_user, None);

        if self.host.is_agent_connected(node_id) {
            if let Err(e) = self.host.send_to_agent(node_id, &command).await {
                debug!(node_id, error = %e, "fire-and-forget send failed");
            }
        } else if self.host.relay_available() {
            if let Err(e) = self.host.relay_to_peer(node_id, &command).await {
                debug!(node_id, error = %e, "fire-and-forget relay failed");
            }
        } else {
            debug!(node_id, "fire-and-forget command has no route");
        }
    }
}
