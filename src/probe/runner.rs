use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::host::wire::CommandKind;
use crate::host::{normalize_node_id, HostServer};
use crate::probe::correlator::{CommandOutcome, Correlator, ReplyRouter};
use crate::probe::parser::parse_probe_output;
use crate::probe::DeviceStatus;
use crate::settings::SettingsStore;

/// Runs port probes against agents: one round-trip per device, bounded
/// fan-out across many devices.
#[derive(Clone)]
pub struct ProbeRunner {
    host: Arc<dyn HostServer>,
    correlator: Correlator,
    settings: Arc<SettingsStore>,
}

/// CMD one-liner echoing `p1=`/`p2=` flags for the two well-known ports.
/// netstat needs no elevation, which keeps the probe runnable as the agent.
fn probe_command(app_port: u16, signin_port: u16) -> String {
    format!(
        "(netstat -an | findstr /C::{app_port} >nul && echo p1=True || echo p1=False) & \
         (netstat -an | findstr /C::{signin_port} >nul && echo p2=True || echo p2=False)"
    )
}

fn restart_command(service: &str) -> String {
    format!(
        "Try {{ Restart-Service -Name {service} -Force -ErrorAction Stop; 'OK' }} Catch {{ 'ERR:' + $_ }}"
    )
}

impl ProbeRunner {
    pub fn new(
        host: Arc<dyn HostServer>,
        router: Arc<ReplyRouter>,
        settings: Arc<SettingsStore>,
    ) -> Self {
        Self {
            correlator: Correlator::new(host.clone(), router),
            host,
            settings,
        }
    }

    /// One round-trip check of the two ports on one device. Never fails:
    /// unreachable targets come back as Offline or Unknown records.
    pub async fn probe_device(&self, node_id: &str) -> DeviceStatus {
        let node_id = normalize_node_id(node_id);

        // Fast path: nothing is listening for this agent anywhere we can
        // reach, so skip the dispatch and the timeout wait.
        if !self.host.is_agent_connected(&node_id) && !self.host.relay_available() {
            return DeviceStatus::offline();
        }

        let cfg = self.settings.current().await;
        let line = probe_command(cfg.app_port, cfg.signin_port);

        match self
            .correlator
            .run_commands(&node_id, CommandKind::Bat, vec![line], false, cfg.probe_timeout())
            .await
        {
            CommandOutcome::Reply(raw) => {
                let reading = parse_probe_output(&raw);
                debug!(node_id, status = ?reading.status, "probe reply parsed");
                DeviceStatus::from_reading(reading, raw)
            }
            CommandOutcome::Failure(failure) => {
                debug!(node_id, failure = failure.as_str(), "probe did not complete");
                DeviceStatus::unreachable(failure)
            }
        }
    }

    /// Probe many devices with a small worker pool over a shared queue.
    /// Exactly one record per input id; a lost worker costs its device an
    /// `Error` record, never the rest of the batch.
    pub async fn probe_many(&self, ids: Vec<String>) -> HashMap<String, DeviceStatus> {
        let ids: Vec<String> = ids.iter().map(|id| normalize_node_id(id)).collect();
        if ids.is_empty() {
            return HashMap::new();
        }

        let workers = self.settings.current().await.probe_workers.max(1);
        let queue = Arc::new(Mutex::new(VecDeque::from(ids.clone())));
        let results: Arc<tokio::sync::Mutex<HashMap<String, DeviceStatus>>> =
            Arc::new(tokio::sync::Mutex::new(HashMap::new()));

        let mut handles = Vec::new();
        for _ in 0..workers.min(ids.len()) {
            let runner = self.clone();
            let queue = queue.clone();
            let results = results.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let next = queue.lock().expect("probe queue lock poisoned").pop_front();
                    let Some(id) = next else { break };
                    let status = runner.probe_device(&id).await;
                    results.lock().await.insert(id, status);
                }
            }));
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "probe worker lost");
            }
        }

        let mut out = Arc::try_unwrap(results)
            .map(|m| m.into_inner())
            .unwrap_or_default();
        for id in ids {
            out.entry(id).or_insert_with(DeviceStatus::errored);
        }
        out
    }

    /// Best-effort bounce of the monitored service; the reply is not awaited.
    pub async fn restart_service(&self, node_id: &str) {
        let node_id = normalize_node_id(node_id);
        let service = self.settings.current().await.service_name.clone();
        info!(node_id, service, "both ports closed, requesting service restart");
        self.correlator
            .fire(
                &node_id,
                CommandKind::Ps,
                vec![restart_command(&service)],
                false,
            )
            .await;
    }
}
