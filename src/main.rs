use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use netwarden::config::DashboardConfig;
use netwarden::health::HealthChecker;
use netwarden::notify::{Notifier, NullNotifier, WebhookNotifier};
use netwarden::ports;
use netwarden::scan::{ScanManager, ScannerConfig};
use netwarden::server::{self, AppState};
use netwarden::status::StatusStore;

/// netwarden — self-hosted infrastructure dashboard core: LAN discovery
/// scans and endpoint health monitoring behind a polling HTTP API.
#[derive(Debug, Clone, Parser)]
#[command(name = "netwarden", version, about)]
struct Cli {
    /// Address to bind the HTTP API and UI on.
    #[arg(long, default_value = "127.0.0.1:8090")]
    bind: String,

    /// Path to the dashboard configuration (node tree + settings).
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// External scanning tool invoked for discovery.
    #[arg(long, default_value = "nmap")]
    scanner: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = DashboardConfig::load_or_default(&cli.config);

    let scan_ports = match config.settings.scan_ports.as_deref() {
        Some(spec) => ports::parse_ports_spec(spec)?,
        None => ports::well_known_ports(),
    };
    let scan = ScanManager::new(ScannerConfig {
        program: cli.scanner,
        ports: scan_ports,
        ..ScannerConfig::default()
    });

    let notifier: Arc<dyn Notifier> = match config.settings.webhook_url.clone() {
        Some(url) => Arc::new(WebhookNotifier::new(url)),
        None => Arc::new(NullNotifier),
    };
    let health = HealthChecker::new(StatusStore::new(), notifier)?;
    health.set_nodes(config.nodes).await;

    let interval = Duration::from_millis(config.settings.effective_interval_ms());
    tokio::spawn(health.clone().run(interval));

    server::spawn_server(&cli.bind, AppState { scan, health }).await
}
