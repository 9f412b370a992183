use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stage of the discovery state machine. Transitions are strictly ordered
/// (idle -> ping -> port -> probe -> completed); `Cancelled` and `Error` are
/// reachable from any active phase.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanPhase {
    Idle,
    Ping,
    Port,
    Probe,
    Completed,
    Cancelled,
    Error,
}

impl ScanPhase {
    /// True while the session still has work in flight.
    pub fn is_active(self) -> bool {
        matches!(self, ScanPhase::Ping | ScanPhase::Port | ScanPhase::Probe)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ScanPhase::Completed | ScanPhase::Cancelled | ScanPhase::Error
        )
    }
}

/// One HTTP(S) endpoint classified as serving a browsable interface,
/// discovered during the probe phase.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WebService {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub url: String,
    pub status_code: u16,
    pub detection_reason: String,
    pub title: Option<String>,
}

/// Point-in-time copy of a scan session, safe to hand to pollers.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    pub phase: String,
    pub progress: u8,
    pub error: Option<String>,
    pub logs: Vec<String>,
    pub active_hosts: Vec<String>,
    pub open_ports: BTreeMap<String, Vec<u16>>,
    /// Keyed "webGuis" on the wire; the UI renders these as linkable web
    /// interfaces.
    #[serde(rename = "webGuis")]
    pub web_services: BTreeMap<String, Vec<WebService>>,
    pub total_expected_hosts: u64,
    pub total_hosts_scanned: u64,
    pub current_chunk: u32,
    pub total_chunks: u32,
}

/// Health of one monitored endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Online,
    Offline,
    Checking,
}

/// Current status record for one monitored endpoint, keyed in the store by
/// its normalized identifier.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub status: Health,
    /// RFC3339 timestamp of the most recent check.
    pub last_checked: String,
    /// RFC3339 timestamp of the last status transition. Preserved across
    /// polls where the status did not change.
    pub status_changed_at: String,
    pub response_time_ms: Option<u64>,
    pub http_status: Option<u16>,
    pub error: Option<String>,
    /// The endpoint string actually probed, protocol included.
    pub endpoint: String,
}

/// Current RFC3339 UTC timestamp.
pub fn now_rfc3339() -> String {
    let now = time::OffsetDateTime::now_utc();
    now.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
