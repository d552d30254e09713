use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, RwLock};
use tracing::warn;

/// Floor for the poll interval; the admin form clamps up to this.
pub const MIN_POLL_INTERVAL_SECS: u64 = 10;

fn default_poll_interval() -> u64 {
    60
}
fn default_probe_timeout() -> u64 {
    15
}
fn default_probe_workers() -> usize {
    8
}
fn default_cache_ttl() -> u64 {
    15
}
fn default_app_port() -> u16 {
    20707
}
fn default_signin_port() -> u16 {
    20773
}
fn default_service_name() -> String {
    "OneDriveCheckService".to_string()
}

/// Monitor settings, persisted as a flat JSON file. Only the group id and
/// the poll interval are exposed in the admin form; the rest are tuning
/// knobs with serde defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Device group to poll. `None` disables the poll loop.
    #[serde(default)]
    pub mesh_id: Option<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_probe_workers")]
    pub probe_workers: usize,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_app_port")]
    pub app_port: u16,
    #[serde(default = "default_signin_port")]
    pub signin_port: u16,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Optional path for persisting the latest status snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_file: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mesh_id: None,
            poll_interval_secs: default_poll_interval(),
            probe_timeout_secs: default_probe_timeout(),
            probe_workers: default_probe_workers(),
            cache_ttl_secs: default_cache_ttl(),
            app_port: default_app_port(),
            signin_port: default_signin_port(),
            service_name: default_service_name(),
            status_file: None,
        }
    }
}

impl Settings {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings file {}", path.display()))?;
        serde_json::from_str(&raw).context("parsing settings JSON")
    }

    /// Missing or broken settings files fall back to defaults; the monitor
    /// must come up either way.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::from_file(path) {
            Ok(s) => s,
            Err(e) => {
                if path.exists() {
                    warn!(path = %path.display(), error = %e, "settings unreadable, using defaults");
                }
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("serializing settings")?;
        std::fs::write(path, json)
            .with_context(|| format!("writing settings file {}", path.display()))
    }

    /// Clamped poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(MIN_POLL_INTERVAL_SECS))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Shared settings handle: the admin form writes, the poller and probe
/// runner read, updates persist to disk and wake the poller.
#[derive(Debug)]
pub struct SettingsStore {
    path: Option<PathBuf>,
    inner: RwLock<Settings>,
    changed: Notify,
}

impl SettingsStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = Settings::load_or_default(&path);
        Self {
            path: Some(path),
            inner: RwLock::new(settings),
            changed: Notify::new(),
        }
    }

    /// Store without a backing file (tests, embedded hosts that persist
    /// settings themselves).
    pub fn in_memory(settings: Settings) -> Self {
        Self {
            path: None,
            inner: RwLock::new(settings),
            changed: Notify::new(),
        }
    }

    pub async fn current(&self) -> Settings {
        self.inner.read().await.clone()
    }

    /// Apply a mutation, clamp, persist, and wake anyone waiting on
    /// `changed()`.
    pub async fn update(&self, apply: impl FnOnce(&mut Settings)) -> Result<Settings> {
        let updated = {
            let mut guard = self.inner.write().await;
            apply(&mut guard);
            guard.poll_interval_secs = guard.poll_interval_secs.max(MIN_POLL_INTERVAL_SECS);
            guard.clone()
        };
        if let Some(path) = &self.path {
            updated.save(path)?;
        }
        self.changed.notify_waiters();
        Ok(updated)
    }

    /// Resolves when settings change after this call.
    pub async fn changed(&self) {
        self.changed.notified().await;
    }
}
