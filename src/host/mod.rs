pub mod offline;
pub mod wire;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::host::wire::AgentCommand;

/// Summary of an agent currently connected to the host, as returned by the
/// agent-listing endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct AgentSummary {
    pub node_id: String,
    pub name: Option<String>,
    pub os_desc: Option<String>,
}

/// Device record as the host reports it when enumerating a device group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub node_id: String,
    pub name: Option<String>,
    #[serde(default)]
    pub os_desc: Option<String>,
}

impl DeviceRecord {
    /// Probes only make sense on Windows agents; the probe command is a CMD
    /// one-liner.
    pub fn is_windows(&self) -> bool {
        self.os_desc
            .as_deref()
            .map(|os| os.to_ascii_lowercase().contains("windows"))
            .unwrap_or(false)
    }
}

/// The host addresses devices with a long id of the form `node//<short id>`.
/// Callers (browser script, admin API) may pass either form; the prefix check
/// is case-insensitive, matching how the host itself recognizes long ids.
pub fn normalize_node_id(id: &str) -> String {
    let id = id.trim();
    let has_prefix = id
        .get(..6)
        .is_some_and(|p| p.eq_ignore_ascii_case("node//"));
    if has_prefix {
        id.to_string()
    } else {
        format!("node//{id}")
    }
}

/// Boundary to the remote-management host this monitor is embedded in.
///
/// The host owns the agent connections, the peer mesh and the device
/// database; this crate only ever talks to agents through it. Production
/// embeds the monitor with an adapter over the host's internals; tests and
/// the standalone binary supply fakes.
#[async_trait]
pub trait HostServer: Send + Sync {
    /// Whether the agent is connected to this host process (direct delivery
    /// possible).
    fn is_agent_connected(&self, node_id: &str) -> bool;

    /// Deliver a command to a locally connected agent. An error means the
    /// send itself failed, not that the agent declined.
    async fn send_to_agent(&self, node_id: &str, command: &AgentCommand) -> Result<()>;

    /// Whether this host is part of a multi-node deployment with a peer
    /// dispatch channel.
    fn relay_available(&self) -> bool;

    /// Best-effort delivery through a peer host that may own the agent
    /// connection.
    async fn relay_to_peer(&self, node_id: &str, command: &AgentCommand) -> Result<()>;

    /// All devices in a device group, keyed by node id.
    async fn devices_in_group(&self, group_id: &str) -> Result<HashMap<String, DeviceRecord>>;

    /// Agents currently connected to this host process.
    fn connected_agents(&self) -> Vec<AgentSummary>;
}
