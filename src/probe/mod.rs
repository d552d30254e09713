pub mod correlator;
pub mod parser;
pub mod runner;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::probe::correlator::DeliveryFailure;

/// Three-state health label (plus the two "could not tell" states) shown in
/// the device-list column. The serialized strings are the UI contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppStatus {
    #[serde(rename = "App Online")]
    AppOnline,
    #[serde(rename = "Not signed in")]
    NotSignedIn,
    Offline,
    Unknown,
    Error,
}

/// Last probe result for one device. Recomputed every poll cycle or
/// on-demand request; cached in memory keyed by node id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub status: AppStatus,
    pub port20707: bool,
    pub port20773: bool,
    /// Unix millis of the probe that produced this record.
    pub last_checked: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw: String,
    /// Delivery failure kind when the probe never produced output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl DeviceStatus {
    fn stamped(status: AppStatus, port20707: bool, port20773: bool) -> Self {
        Self {
            status,
            port20707,
            port20773,
            last_checked: Utc::now().timestamp_millis(),
            raw: String::new(),
            failure: None,
        }
    }

    /// Agent has no connection to the host; the ports are unreachable.
    pub fn offline() -> Self {
        Self::stamped(AppStatus::Offline, false, false)
    }

    /// Command was dispatched but never produced usable output. Distinct
    /// from Offline: nothing was learned about the ports.
    pub fn unreachable(failure: DeliveryFailure) -> Self {
        Self {
            failure: Some(failure.as_str().to_string()),
            ..Self::stamped(AppStatus::Unknown, false, false)
        }
    }

    /// Probe task failed outright (lost worker). Should not happen; kept so
    /// one device can never take down a whole fan-out.
    pub fn errored() -> Self {
        Self::stamped(AppStatus::Error, false, false)
    }

    /// Record for a parsed reply, keeping the raw output for debugging.
    pub fn from_reading(reading: parser::ProbeReading, raw: String) -> Self {
        Self {
            raw,
            ..Self::stamped(reading.status, reading.port20707, reading.port20773)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_ui_labels() {
        assert_eq!(
            serde_json::to_value(AppStatus::AppOnline).unwrap(),
            "App Online"
        );
        assert_eq!(
            serde_json::to_value(AppStatus::NotSignedIn).unwrap(),
            "Not signed in"
        );
        assert_eq!(serde_json::to_value(AppStatus::Offline).unwrap(), "Offline");
    }

    #[test]
    fn unreachable_carries_failure_marker() {
        let st = DeviceStatus::unreachable(DeliveryFailure::Timeout);
        assert_eq!(st.status, AppStatus::Unknown);
        assert_eq!(st.failure.as_deref(), Some("timeout"));
        assert!(!st.port20707 && !st.port20773);

        let v = serde_json::to_value(&st).unwrap();
        assert_eq!(v["status"], "Unknown");
        assert_eq!(v["failure"], "timeout");
        // empty raw output stays off the wire
        assert!(v.get("raw").is_none());
    }
}
