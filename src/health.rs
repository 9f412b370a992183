use crate::config::TreeNode;
use crate::notify::Notifier;
use crate::status::{normalize_identifier, StatusStore};
use crate::types::{now_rfc3339, Health, NodeStatus};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinSet;

/// Health-check timeout. Deliberately shorter than the scan-probe timeout;
/// responsiveness matters more than page contents here.
pub const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

const CHECK_USER_AGENT: &str = concat!("netwarden-healthcheck/", env!("CARGO_PKG_VERSION"));

/// Periodically sweeps the node tree, probing every monitorable endpoint
/// concurrently and recording transitions in the status store.
#[derive(Clone)]
pub struct HealthChecker {
    store: StatusStore,
    nodes: Arc<RwLock<Vec<TreeNode>>>,
    notifier: Arc<dyn Notifier>,
    client: reqwest::Client,
    /// One-shot flag flipped after the first full sweep; notifications are
    /// suppressed until then so a restart does not replay every status.
    initial_sweep_done: Arc<AtomicBool>,
}

impl HealthChecker {
    pub fn new(store: StatusStore, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(CHECK_USER_AGENT)
            .danger_accept_invalid_certs(true)
            .timeout(CHECK_TIMEOUT)
            .build()?;
        Ok(HealthChecker {
            store,
            nodes: Arc::new(RwLock::new(Vec::new())),
            notifier,
            client,
            initial_sweep_done: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn store(&self) -> &StatusStore {
        &self.store
    }

    /// Swap in a new node tree and reconcile the store: surviving
    /// identifiers keep their records, new ones start as `checking`, stale
    /// ones are dropped.
    pub async fn set_nodes(&self, nodes: Vec<TreeNode>) {
        let identifiers: Vec<String> = crate::config::monitorable_nodes(&nodes)
            .iter()
            .map(|(_, addr)| normalize_identifier(addr))
            .collect();
        self.store.reconcile(&identifiers).await;
        *self.nodes.write().await = nodes;
        tracing::info!(monitored = identifiers.len(), "node tree reconfigured");
    }

    /// Run forever on the configured interval.
    pub async fn run(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.run_sweep().await;
        }
    }

    /// One full pass over all monitorable nodes. Checks run concurrently;
    /// a hanging endpoint costs only its own timeout. Individual failures
    /// never abort the sweep.
    pub async fn run_sweep(&self) {
        let targets: Vec<(String, String)> = {
            let nodes = self.nodes.read().await;
            crate::config::monitorable_nodes(&nodes)
                .into_iter()
                .map(|(node, addr)| (node.name.clone(), addr))
                .collect()
        };
        if targets.is_empty() {
            self.initial_sweep_done.store(true, Ordering::Release);
            return;
        }

        let mut set = JoinSet::new();
        for (name, address) in targets {
            let checker = self.clone();
            set.spawn(async move { checker.check_one(&name, &address).await });
        }

        let mut online = 0usize;
        let mut offline = 0usize;
        while let Some(res) = set.join_next().await {
            match res {
                Ok(true) => online += 1,
                Ok(false) => offline += 1,
                Err(e) => tracing::warn!(error = %e, "health check task panicked"),
            }
        }

        self.initial_sweep_done.store(true, Ordering::Release);
        tracing::info!(online, offline, "health sweep complete");
    }

    /// Check a single node and record the result. Returns whether it was
    /// online, for the sweep summary.
    async fn check_one(&self, name: &str, address: &str) -> bool {
        let identifier = normalize_identifier(address);
        let outcome = check_endpoint(&self.client, address).await;
        let prev = self.store.get(&identifier).await;
        let initial_done = self.initial_sweep_done.load(Ordering::Acquire);

        let (record, event) = apply_outcome(prev.as_ref(), &outcome, initial_done);
        let online = record.status == Health::Online;
        self.store.insert(identifier.clone(), record).await;

        if let Some(event) = event {
            tracing::info!(node = name, %identifier, event, "status transition");
            self.notifier.notify(name, &identifier, event);
        }
        online
    }
}

/// Result of probing one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub online: bool,
    pub http_status: Option<u16>,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
    /// The URL actually requested, protocol included.
    pub endpoint: String,
}

/// Probe an endpoint with protocol fallback.
///
/// An address that already names its protocol gets a single attempt. A bare
/// `host[:port]` is tried as https first; when that fails in a way that
/// smells of protocol mismatch or an unreachable TLS port, it is retried
/// once as http. The https failure is kept if the retry also fails.
pub async fn check_endpoint(client: &reqwest::Client, address: &str) -> CheckOutcome {
    let address = address.trim();
    if address.starts_with("http://") || address.starts_with("https://") {
        return attempt(client, address.to_string()).await.into_outcome();
    }

    let https_outcome = attempt(client, format!("https://{address}")).await;
    if https_outcome.online || !https_outcome.fallback_worthy {
        return https_outcome.into_outcome();
    }
    let http_outcome = attempt(client, format!("http://{address}")).await;
    // An HTTP response of any status proves plain http was the right
    // protocol; only a transport-level retry failure falls back to the
    // original https error.
    if http_outcome.online || http_outcome.http_status.is_some() {
        http_outcome.into_outcome()
    } else {
        https_outcome.into_outcome()
    }
}

struct Attempt {
    online: bool,
    http_status: Option<u16>,
    response_time_ms: Option<u64>,
    error: Option<String>,
    endpoint: String,
    /// Whether the failure looked like a wrong-protocol or unreachable
    /// connection, justifying an http retry.
    fallback_worthy: bool,
}

impl Attempt {
    fn into_outcome(self) -> CheckOutcome {
        CheckOutcome {
            online: self.online,
            http_status: self.http_status,
            response_time_ms: self.response_time_ms,
            error: self.error,
            endpoint: self.endpoint,
        }
    }
}

async fn attempt(client: &reqwest::Client, url: String) -> Attempt {
    let started = std::time::Instant::now();
    match client.get(&url).send().await {
        Ok(response) => {
            let elapsed = started.elapsed().as_millis() as u64;
            let status = response.status().as_u16();
            if status < 500 {
                Attempt {
                    online: true,
                    http_status: Some(status),
                    response_time_ms: Some(elapsed),
                    error: None,
                    endpoint: url,
                    fallback_worthy: false,
                }
            } else {
                Attempt {
                    online: false,
                    http_status: Some(status),
                    response_time_ms: Some(elapsed),
                    error: Some(format!("server error (HTTP {status})")),
                    endpoint: url,
                    // A live server answering 5xx is not a protocol
                    // mismatch; no point retrying as http.
                    fallback_worthy: false,
                }
            }
        }
        Err(e) => Attempt {
            online: false,
            http_status: None,
            response_time_ms: None,
            error: Some(categorize_error(&e)),
            endpoint: url,
            fallback_worthy: is_fallback_worthy(&e),
        },
    }
}

/// Fold a transport failure into the small fixed set of reasons shown on
/// status records.
fn categorize_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        return "timeout".to_string();
    }
    if let Some(kind) = io_error_kind(e) {
        match kind {
            std::io::ErrorKind::ConnectionRefused => return "connection refused".to_string(),
            std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted => {
                return "connection reset".to_string()
            }
            std::io::ErrorKind::TimedOut => return "timeout".to_string(),
            _ => {}
        }
    }
    let text = full_error_text(e);
    if text.contains("dns") || text.contains("resolve") {
        "DNS lookup failed".to_string()
    } else if e.is_connect() {
        "connection failed".to_string()
    } else {
        format!("request failed: {e}")
    }
}

/// Errors that justify retrying a bare address over plain http: anything
/// connection-level (refused, reset, timeout) or TLS-handshake-shaped.
fn is_fallback_worthy(e: &reqwest::Error) -> bool {
    if e.is_timeout() || e.is_connect() {
        return true;
    }
    let text = full_error_text(e);
    text.contains("tls") || text.contains("ssl") || text.contains("handshake")
        || text.contains("certificate")
        || text.contains("reset")
}

fn io_error_kind(e: &reqwest::Error) -> Option<std::io::ErrorKind> {
    let mut source = std::error::Error::source(e);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            return Some(io.kind());
        }
        source = err.source();
    }
    None
}

fn full_error_text(e: &reqwest::Error) -> String {
    let mut text = e.to_string().to_lowercase();
    let mut source = std::error::Error::source(e);
    while let Some(err) = source {
        text.push(' ');
        text.push_str(&err.to_string().to_lowercase());
        source = err.source();
    }
    text
}

/// Merge a check outcome with the previous record, deciding the new status
/// record and whether a notification event fires.
///
/// `status_changed_at` is carried over while the status is unchanged.
/// Notifications require a previous record that was a real online/offline
/// state (never the `checking` placeholder), a differing new state, and a
/// completed initial sweep.
pub(crate) fn apply_outcome(
    prev: Option<&NodeStatus>,
    outcome: &CheckOutcome,
    initial_sweep_done: bool,
) -> (NodeStatus, Option<&'static str>) {
    let now = now_rfc3339();
    let new_health = if outcome.online {
        Health::Online
    } else {
        Health::Offline
    };

    let changed = prev.map(|p| p.status != new_health).unwrap_or(true);
    let status_changed_at = match prev {
        Some(p) if !changed => p.status_changed_at.clone(),
        _ => now.clone(),
    };

    let event = match prev.map(|p| p.status) {
        Some(Health::Online) if new_health == Health::Offline => Some("offline"),
        Some(Health::Offline) if new_health == Health::Online => Some("online"),
        _ => None,
    };
    let event = if initial_sweep_done { event } else { None };

    let record = NodeStatus {
        status: new_health,
        last_checked: now,
        status_changed_at,
        response_time_ms: outcome.response_time_ms,
        http_status: outcome.http_status,
        error: outcome.error.clone(),
        endpoint: outcome.endpoint.clone(),
    };
    (record, event)
}
