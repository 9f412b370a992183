use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Scheduler interval floor; configured values below this are clamped up.
pub const MIN_HEALTH_CHECK_INTERVAL_MS: u64 = 2000;

/// One monitored entity in the configuration tree. Owned by the config
/// collaborator; the core only reads it.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct TreeNode {
    pub id: String,
    pub name: String,
    /// `host[:port]` or full URL used for health checks.
    pub internal_address: Option<String>,
    /// Display/link address, never probed.
    pub external_address: Option<String>,
    /// Legacy addressing pair, still honored when `internal_address` is
    /// absent.
    pub ip: Option<String>,
    pub health_check_port: Option<u16>,
    pub disable_health_check: bool,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// Resolve the address this node is health-checked at, if any.
    /// A node is monitorable iff this returns `Some` and the node is not
    /// explicitly disabled.
    pub fn monitor_address(&self) -> Option<String> {
        if self.disable_health_check {
            return None;
        }
        if let Some(addr) = self.internal_address.as_deref() {
            let addr = addr.trim();
            if !addr.is_empty() {
                return Some(addr.to_string());
            }
        }
        match (self.ip.as_deref(), self.health_check_port) {
            (Some(ip), Some(port)) if !ip.trim().is_empty() => {
                Some(format!("{}:{}", ip.trim(), port))
            }
            _ => None,
        }
    }
}

/// Settings consumed by the core; everything has a workable default so a
/// missing config file still yields a running (if empty) dashboard.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub health_check_interval_ms: u64,
    /// Webhook URL notified on online/offline transitions.
    pub webhook_url: Option<String>,
    /// Override for the port-scan port list, e.g. "80,443,8000-8010".
    pub scan_ports: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            health_check_interval_ms: 30_000,
            webhook_url: None,
            scan_ports: None,
        }
    }
}

impl Settings {
    pub fn effective_interval_ms(&self) -> u64 {
        self.health_check_interval_ms.max(MIN_HEALTH_CHECK_INTERVAL_MS)
    }
}

/// Root of the persisted configuration: a forest of nodes plus settings.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct DashboardConfig {
    pub nodes: Vec<TreeNode>,
    pub settings: Settings,
}

impl DashboardConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read config: {}", path.as_ref().display()))?;
        let cfg: DashboardConfig = serde_json::from_str(&raw)
            .with_context(|| format!("invalid config JSON: {}", path.as_ref().display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(error = %e, "config not loaded, starting with defaults");
                DashboardConfig::default()
            }
        }
    }
}

/// Depth-first walk over the forest collecting `(node, monitor address)`
/// pairs for every monitorable node.
pub fn monitorable_nodes(nodes: &[TreeNode]) -> Vec<(&TreeNode, String)> {
    let mut out = Vec::new();
    let mut stack: Vec<&TreeNode> = nodes.iter().rev().collect();
    while let Some(node) = stack.pop() {
        if let Some(addr) = node.monitor_address() {
            out.push((node, addr));
        }
        for child in node.children.iter().rev() {
            stack.push(child);
        }
    }
    out
}
