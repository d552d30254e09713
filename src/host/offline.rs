use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::host::wire::AgentCommand;
use crate::host::{AgentSummary, DeviceRecord, HostServer};

/// Host adapter for running the binary outside a host process. No agents are
/// ever connected and no relay exists, so every probe resolves with a
/// no-route failure. Useful for exercising the HTTP surface and the UI
/// injector during development.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineHost;

#[async_trait]
impl HostServer for OfflineHost {
    fn is_agent_connected(&self, _node_id: &str) -> bool {
        false
    }

    async fn send_to_agent(&self, node_id: &str, _command: &AgentCommand) -> Result<()> {
        bail!("no agent connection for {node_id}");
    }

    fn relay_available(&self) -> bool {
        false
    }

    async fn relay_to_peer(&self, node_id: &str, _command: &AgentCommand) -> Result<()> {
        bail!("no peer relay configured (standalone mode, target {node_id})");
    }

    async fn devices_in_group(&self, _group_id: &str) -> Result<HashMap<String, DeviceRecord>> {
        Ok(HashMap::new())
    }

    fn connected_agents(&self) -> Vec<AgentSummary> {
        Vec::new()
    }
}
