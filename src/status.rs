use crate::types::{Health, NodeStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Normalize an endpoint address into the identifier used to key status
/// records: protocol prefix and trailing slashes stripped, whitespace
/// trimmed. Idempotent, so identifiers can safely be re-normalized.
pub fn normalize_identifier(address: &str) -> String {
    let s = address.trim();
    let s = s
        .strip_prefix("https://")
        .or_else(|| s.strip_prefix("http://"))
        .unwrap_or(s);
    s.trim_end_matches('/').to_string()
}

/// In-memory map from normalized identifier to current status record.
///
/// Written only by the health-check scheduler; everyone else reads
/// snapshots. The live map is never handed out, so pollers cannot observe a
/// sweep mid-write.
#[derive(Clone, Default)]
pub struct StatusStore {
    inner: Arc<RwLock<HashMap<String, NodeStatus>>>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy-on-read view of all records.
    pub async fn snapshot(&self) -> HashMap<String, NodeStatus> {
        self.inner.read().await.clone()
    }

    pub async fn get(&self, identifier: &str) -> Option<NodeStatus> {
        self.inner.read().await.get(identifier).cloned()
    }

    pub async fn insert(&self, identifier: String, status: NodeStatus) {
        self.inner.write().await.insert(identifier, status);
    }

    /// Reconcile the store against the identifiers currently present in
    /// configuration: surviving entries are preserved verbatim, new ones are
    /// seeded as `checking`, stale ones dropped.
    pub async fn reconcile(&self, identifiers: &[String]) {
        let mut map = self.inner.write().await;
        map.retain(|key, _| identifiers.iter().any(|id| id == key));
        for id in identifiers {
            map.entry(id.clone())
                .or_insert_with(|| NodeStatus::initial(id.clone()));
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

impl NodeStatus {
    /// Placeholder record for a node that has not completed a check yet.
    pub fn initial(endpoint: String) -> Self {
        let now = crate::types::now_rfc3339();
        NodeStatus {
            status: Health::Checking,
            last_checked: now.clone(),
            status_changed_at: now,
            response_time_ms: None,
            http_status: None,
            error: None,
            endpoint,
        }
    }
}
