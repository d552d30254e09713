use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::RwLock;

use crate::probe::DeviceStatus;

#[derive(Debug, Clone)]
struct CacheEntry {
    status: DeviceStatus,
    stored_at: Instant,
}

/// Last computed status per device. A short TTL keeps rapid repeated
/// requests (the browser script polls every few seconds) from re-probing.
#[derive(Debug, Default)]
pub struct StatusCache {
    inner: RwLock<HashMap<String, CacheEntry>>,
}

impl StatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry for `node_id` if it is younger than `ttl`.
    pub async fn fresh(&self, node_id: &str, ttl: Duration) -> Option<DeviceStatus> {
        let map = self.inner.read().await;
        map.get(node_id)
            .filter(|e| e.stored_at.elapsed() < ttl)
            .map(|e| e.status.clone())
    }

    pub async fn insert(&self, node_id: String, status: DeviceStatus) {
        let mut map = self.inner.write().await;
        map.insert(
            node_id,
            CacheEntry {
                status,
                stored_at: Instant::now(),
            },
        );
    }

    /// Everything currently cached, fresh or not.
    pub async fn snapshot(&self) -> HashMap<String, DeviceStatus> {
        let map = self.inner.read().await;
        map.iter()
            .map(|(k, e)| (k.clone(), e.status.clone()))
            .collect()
    }

    /// Best-effort persistence of the latest snapshot as flat JSON.
    pub async fn save_snapshot(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot().await;
        let json = serde_json::to_string_pretty(&snapshot).context("serializing status snapshot")?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("writing status snapshot {}", path.display()))
    }
}
