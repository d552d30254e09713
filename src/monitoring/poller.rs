use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::host::HostServer;
use crate::monitoring::cache::StatusCache;
use crate::probe::runner::ProbeRunner;
use crate::probe::AppStatus;
use crate::settings::SettingsStore;

/// Repeating poll over the configured device group: probe every Windows
/// device, cache the results, bounce the service where both ports are
/// closed. Saving settings from the admin form wakes the loop for an
/// immediate run.
#[derive(Clone)]
pub struct Poller {
    host: Arc<dyn HostServer>,
    runner: ProbeRunner,
    cache: Arc<StatusCache>,
    settings: Arc<SettingsStore>,
}

impl Poller {
    pub fn new(
        host: Arc<dyn HostServer>,
        runner: ProbeRunner,
        cache: Arc<StatusCache>,
        settings: Arc<SettingsStore>,
    ) -> Self {
        Self {
            host,
            runner,
            cache,
            settings,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("poll loop started");
            loop {
                let cfg = self.settings.current().await;
                if let Some(group) = cfg.mesh_id.clone() {
                    self.run_cycle(&group).await;
                } else {
                    debug!("no device group configured, poll cycle skipped");
                }

                tokio::select! {
                    _ = tokio::time::sleep(cfg.poll_interval()) => {}
                    _ = self.settings.changed() => {
                        debug!("settings changed, rescheduling poll loop");
                    }
                }
            }
        })
    }

    /// One cycle over the group. Per-device isolation: a failed enumeration
    /// skips the cycle, but no single device can abort the rest.
    pub async fn run_cycle(&self, group_id: &str) {
        let devices = match self.host.devices_in_group(group_id).await {
            Ok(devices) => devices,
            Err(e) => {
                warn!(group_id, error = %e, "device enumeration failed");
                return;
            }
        };

        let ids: Vec<String> = devices
            .values()
            .filter(|d| d.is_windows())
            .map(|d| d.node_id.clone())
            .collect();
        if ids.is_empty() {
            debug!(group_id, "no Windows devices in group");
            return;
        }

        let total = ids.len();
        let results = self.runner.probe_many(ids).await;
        for (node_id, status) in results {
            // Both ports confirmed closed: one restart per device per cycle.
            // Unknown is not a confirmation, so it never triggers a restart.
            if status.status == AppStatus::Offline {
                self.runner.restart_service(&node_id).await;
            }
            self.cache.insert(node_id, status).await;
        }
        debug!(group_id, devices = total, "poll cycle finished");

        if let Some(path) = self.settings.current().await.status_file {
            if let Err(e) = self.cache.save_snapshot(Path::new(&path)).await {
                warn!(error = %e, "status snapshot not written");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::host::wire::AgentCommand;
    use crate::host::{AgentSummary, DeviceRecord};
    use crate::probe::correlator::ReplyRouter;
    use crate::settings::Settings;

    /// Host double with a fixed group; probe replies are canned per node and
    /// delivered through the reply router like the real inbound hook would.
    struct GroupHost {
        router: Arc<ReplyRouter>,
        devices: HashMap<String, DeviceRecord>,
        replies: HashMap<String, String>,
        fail_send: HashSet<String>,
        sent: Mutex<Vec<(String, AgentCommand)>>,
    }

    impl GroupHost {
        fn sent_for(&self, node_id: &str) -> Vec<AgentCommand> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(id, _)| id == node_id)
                .map(|(_, c)| c.clone())
                .collect()
        }

        fn restarts_for(&self, node_id: &str) -> usize {
            self.sent_for(node_id)
                .iter()
                .filter(|c| c.cmds.iter().any(|l| l.contains("Restart-Service")))
                .count()
        }
    }

    #[async_trait]
    impl HostServer for GroupHost {
        fn is_agent_connected(&self, node_id: &str) -> bool {
            self.devices.contains_key(node_id)
        }

        async fn send_to_agent(&self, node_id: &str, command: &AgentCommand) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((node_id.to_string(), command.clone()));
            if self.fail_send.contains(node_id) {
                bail!("agent socket gone");
            }
            if let Some(token) = command.responseid.clone() {
                let raw = self.replies.get(node_id).cloned().unwrap_or_default();
                let router = self.router.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    router.complete(&token, raw);
                });
            }
            Ok(())
        }

        fn relay_available(&self) -> bool {
            false
        }

        async fn relay_to_peer(&self, _node_id: &str, _command: &AgentCommand) -> Result<()> {
            Ok(())
        }

        async fn devices_in_group(&self, _g: &str) -> Result<HashMap<String, DeviceRecord>> {
            Ok(self.devices.clone())
        }

        fn connected_agents(&self) -> Vec<AgentSummary> {
            Vec::new()
        }
    }

    fn windows_device(node_id: &str) -> (String, DeviceRecord) {
        (
            node_id.to_string(),
            DeviceRecord {
                node_id: node_id.to_string(),
                name: Some(node_id.to_string()),
                os_desc: Some("Windows 10 Pro".to_string()),
            },
        )
    }

    fn poller_with(host: Arc<GroupHost>, router: Arc<ReplyRouter>) -> (Poller, Arc<StatusCache>) {
        let settings = Arc::new(SettingsStore::in_memory(Settings {
            mesh_id: Some("mesh//g".to_string()),
            probe_timeout_secs: 2,
            ..Settings::default()
        }));
        let runner = ProbeRunner::new(host.clone(), router, settings.clone());
        let cache = Arc::new(StatusCache::new());
        (
            Poller::new(host, runner, cache.clone(), settings),
            cache,
        )
    }

    #[tokio::test]
    async fn restart_fires_once_per_closed_device_and_failures_are_isolated() {
        let router = Arc::new(ReplyRouter::new());
        let host = Arc::new(GroupHost {
            router: router.clone(),
            devices: HashMap::from([
                windows_device("node//online"),
                windows_device("node//closed"),
                windows_device("node//broken"),
            ]),
            replies: HashMap::from([
                ("node//online".to_string(), "p1=True\np2=False".to_string()),
                ("node//closed".to_string(), "p1=False\np2=False".to_string()),
            ]),
            fail_send: HashSet::from(["node//broken".to_string()]),
            sent: Mutex::new(Vec::new()),
        });

        let (poller, cache) = poller_with(host.clone(), router);
        poller.run_cycle("mesh//g").await;

        // the broken device did not stop the others from being probed
        let statuses = cache.snapshot().await;
        assert_eq!(statuses.len(), 3);
        assert_eq!(statuses["node//online"].status, AppStatus::AppOnline);
        assert_eq!(statuses["node//closed"].status, AppStatus::Offline);
        assert_eq!(statuses["node//broken"].status, AppStatus::Unknown);
        assert_eq!(
            statuses["node//broken"].failure.as_deref(),
            Some("send_failed")
        );

        // exactly one restart, only for the dual-closed device
        assert_eq!(host.restarts_for("node//closed"), 1);
        assert_eq!(host.restarts_for("node//online"), 0);
        assert_eq!(host.restarts_for("node//broken"), 0);
    }

    #[tokio::test]
    async fn non_windows_devices_are_skipped() {
        let router = Arc::new(ReplyRouter::new());
        let host = Arc::new(GroupHost {
            router: router.clone(),
            devices: HashMap::from([
                windows_device("node//win"),
                (
                    "node//linux".to_string(),
                    DeviceRecord {
                        node_id: "node//linux".to_string(),
                        name: None,
                        os_desc: Some("Debian 12".to_string()),
                    },
                ),
            ]),
            replies: HashMap::from([("node//win".to_string(), "p1=True".to_string())]),
            fail_send: HashSet::new(),
            sent: Mutex::new(Vec::new()),
        });

        let (poller, cache) = poller_with(host.clone(), router);
        poller.run_cycle("mesh//g").await;

        let statuses = cache.snapshot().await;
        assert_eq!(statuses.len(), 1);
        assert!(statuses.contains_key("node//win"));
        assert!(host.sent_for("node//linux").is_empty());
    }

    #[tokio::test]
    async fn settings_update_wakes_sleeping_poll_loop() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CycleHost {
            enumerations: AtomicUsize,
        }

        #[async_trait]
        impl HostServer for CycleHost {
            fn is_agent_connected(&self, _n: &str) -> bool {
                false
            }
            async fn send_to_agent(&self, _n: &str, _c: &AgentCommand) -> Result<()> {
                Ok(())
            }
            fn relay_available(&self) -> bool {
                false
            }
            async fn relay_to_peer(&self, _n: &str, _c: &AgentCommand) -> Result<()> {
                Ok(())
            }
            async fn devices_in_group(&self, _g: &str) -> Result<HashMap<String, DeviceRecord>> {
                self.enumerations.fetch_add(1, Ordering::SeqCst);
                Ok(HashMap::new())
            }
            fn connected_agents(&self) -> Vec<AgentSummary> {
                Vec::new()
            }
        }

        async fn wait_for_cycles(host: &CycleHost, at_least: usize, deadline: Duration) -> usize {
            let started = std::time::Instant::now();
            loop {
                let seen = host.enumerations.load(Ordering::SeqCst);
                if seen >= at_least || started.elapsed() > deadline {
                    return seen;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }

        let host = Arc::new(CycleHost {
            enumerations: AtomicUsize::new(0),
        });
        // interval far beyond the test's lifetime: a second cycle can only
        // come from the settings-change wakeup
        let settings = Arc::new(SettingsStore::in_memory(Settings {
            mesh_id: Some("mesh//g".to_string()),
            poll_interval_secs: 600,
            ..Settings::default()
        }));
        let router = Arc::new(ReplyRouter::new());
        let runner = ProbeRunner::new(host.clone(), router, settings.clone());
        let cache = Arc::new(StatusCache::new());
        let handle = Poller::new(host.clone(), runner, cache, settings.clone()).spawn();

        assert_eq!(
            wait_for_cycles(&host, 1, Duration::from_secs(2)).await,
            1,
            "startup cycle did not run"
        );
        // let the loop reach its sleep before notifying
        tokio::time::sleep(Duration::from_millis(50)).await;

        settings
            .update(|s| s.poll_interval_secs = 700)
            .await
            .unwrap();

        let seen = wait_for_cycles(&host, 2, Duration::from_secs(2)).await;
        assert!(seen >= 2, "poll loop did not wake on settings change");

        handle.abort();
    }

    #[tokio::test]
    async fn enumeration_failure_leaves_cache_untouched() {
        struct FailingHost;

        #[async_trait]
        impl HostServer for FailingHost {
            fn is_agent_connected(&self, _n: &str) -> bool {
                false
            }
            async fn send_to_agent(&self, _n: &str, _c: &AgentCommand) -> Result<()> {
                Ok(())
            }
            fn relay_available(&self) -> bool {
                false
            }
            async fn relay_to_peer(&self, _n: &str, _c: &AgentCommand) -> Result<()> {
                Ok(())
            }
            async fn devices_in_group(&self, _g: &str) -> Result<HashMap<String, DeviceRecord>> {
                bail!("db offline")
            }
            fn connected_agents(&self) -> Vec<AgentSummary> {
                Vec::new()
            }
        }

        let host = Arc::new(FailingHost);
        let router = Arc::new(ReplyRouter::new());
        let settings = Arc::new(SettingsStore::in_memory(Settings::default()));
        let runner = ProbeRunner::new(host.clone(), router, settings.clone());
        let cache = Arc::new(StatusCache::new());
        let poller = Poller::new(host, runner, cache.clone(), settings);

        poller.run_cycle("mesh//g").await;
        assert!(cache.snapshot().await.is_empty());
    }
}
