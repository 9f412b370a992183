use crate::types::now_rfc3339;
use serde_json::json;
use std::time::Duration;

/// Sink for online/offline transition events. Delivery is fire-and-forget:
/// implementations must never surface failures back to the scheduler.
pub trait Notifier: Send + Sync {
    fn notify(&self, node_name: &str, endpoint: &str, event: &str);
}

/// Posts transition events as JSON to a configured webhook URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        WebhookNotifier { client, url }
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, node_name: &str, endpoint: &str, event: &str) {
        let payload = json!({
            "node": node_name,
            "endpoint": endpoint,
            "event": event,
            "timestamp": now_rfc3339(),
        });
        let client = self.client.clone();
        let url = self.url.clone();
        let node = node_name.to_string();
        tokio::spawn(async move {
            match client.post(&url).json(&payload).send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!(node = %node, "webhook delivered");
                }
                Ok(resp) => {
                    tracing::warn!(node = %node, status = %resp.status(), "webhook rejected");
                }
                Err(e) => {
                    tracing::warn!(node = %node, error = %e, "webhook delivery failed");
                }
            }
        });
    }
}

/// No-op sink used when no webhook is configured.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _node_name: &str, _endpoint: &str, _event: &str) {}
}
