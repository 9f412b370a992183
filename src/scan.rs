use crate::ports;
use crate::probe;
use crate::runner::{self, RunEnd};
use crate::subnet;
use crate::types::{ProgressReport, ScanPhase, WebService};
use anyhow::{anyhow, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Knobs for the discovery pipeline. Defaults match a real deployment;
/// tests shrink the timings and point `program` at a stub.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// External scanning tool, resolved through PATH.
    pub program: String,
    /// TCP ports covered by the port-scan phase.
    pub ports: Vec<u16>,
    /// Floor between phase start and phase transition, so trivially fast
    /// scans do not flicker through the UI.
    pub min_phase_duration: Duration,
    /// Pause between individual HTTP probes, throttling outbound requests.
    pub inter_probe_delay: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        ScannerConfig {
            program: "nmap".to_string(),
            ports: ports::well_known_ports(),
            min_phase_duration: Duration::from_secs(2),
            inter_probe_delay: Duration::from_millis(100),
        }
    }
}

/// Accumulated state of one discovery run. Reset on every `start`; terminal
/// phases leave it frozen until then.
#[derive(Debug, Default)]
struct ScanSession {
    phase: Option<ScanPhase>,
    error: Option<String>,
    cancelled: bool,
    logs: Vec<String>,
    active_hosts: Vec<String>,
    open_ports: BTreeMap<String, Vec<u16>>,
    web_services: BTreeMap<String, Vec<WebService>>,
    progress: u8,
    total_expected_hosts: u64,
    total_hosts_scanned: u64,
    current_chunk: u32,
    total_chunks: u32,
}

impl ScanSession {
    fn phase(&self) -> ScanPhase {
        self.phase.unwrap_or(ScanPhase::Idle)
    }

    fn log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
    }

    fn add_host(&mut self, host: String) {
        if !self.active_hosts.contains(&host) {
            self.active_hosts.push(host);
        }
    }

    fn add_open_port(&mut self, host: &str, port: u16) -> bool {
        let entry = self.open_ports.entry(host.to_string()).or_default();
        match entry.binary_search(&port) {
            Ok(_) => false,
            Err(pos) => {
                entry.insert(pos, port);
                true
            }
        }
    }

    fn add_web_service(&mut self, service: WebService) -> bool {
        let entry = self.web_services.entry(service.host.clone()).or_default();
        if entry
            .iter()
            .any(|s| s.protocol == service.protocol && s.port == service.port)
        {
            return false;
        }
        entry.push(service);
        true
    }
}

/// Drives the discovery pipeline: ping sweep, port scan, HTTP probing.
/// One underlying subprocess at a time; `start` while a session is active
/// fails fast.
///
/// The session sits behind a plain mutex: every update is a short,
/// await-free critical section, which keeps the log sequence ordered even
/// though lines arrive from the subprocess reader while pollers snapshot.
#[derive(Clone)]
pub struct ScanManager {
    state: Arc<Mutex<ScanSession>>,
    config: Arc<ScannerConfig>,
    cancel_token: Arc<Mutex<CancellationToken>>,
}

impl ScanManager {
    pub fn new(config: ScannerConfig) -> Self {
        ScanManager {
            state: Arc::new(Mutex::new(ScanSession::default())),
            config: Arc::new(config),
            cancel_token: Arc::new(Mutex::new(CancellationToken::new())),
        }
    }

    fn session(&self) -> MutexGuard<'_, ScanSession> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Begin a discovery run against `target` (or the auto-detected local
    /// /24). Validates before anything is spawned; rejected input leaves an
    /// `error` phase, but an in-progress session is never disturbed.
    pub async fn start(&self, target: Option<String>) -> Result<()> {
        let subnet_str = match target {
            Some(t) => t,
            None => subnet::detect_local_subnet()
                .ok_or_else(|| anyhow!("no subnet given and no local network detected"))?,
        };

        let token = CancellationToken::new();
        {
            let mut session = self.session();
            if session.phase().is_active() {
                return Err(anyhow!("Scan already running"));
            }
            if !subnet::validate(&subnet_str) {
                *session = ScanSession::default();
                session.phase = Some(ScanPhase::Error);
                let msg = format!("invalid scan target: {subnet_str} (expected a private CIDR)");
                session.error = Some(msg.clone());
                session.log(msg.clone());
                return Err(anyhow!(msg));
            }

            let prefix: u8 = subnet_str
                .split('/')
                .nth(1)
                .and_then(|p| p.parse().ok())
                .unwrap_or(32);
            let expected = subnet::expected_host_count(prefix);

            *session = ScanSession::default();
            session.phase = Some(ScanPhase::Ping);
            session.total_expected_hosts = expected;
            session.total_chunks = subnet::estimated_chunks(expected);
            session.log(format!(
                "Starting network scan: {} -sn -T4 {subnet_str}",
                self.config.program
            ));
            *self.cancel_token.lock().unwrap_or_else(|p| p.into_inner()) = token.clone();
        }

        let manager = self.clone();
        tokio::spawn(async move {
            manager.run_pipeline(subnet_str, token).await;
        });
        Ok(())
    }

    /// Request cooperative cancellation. The subprocess is signalled; probe
    /// iterations notice the flag between requests.
    pub fn cancel(&self) {
        {
            let mut session = self.session();
            if !session.phase().is_active() {
                return;
            }
            session.cancelled = true;
            session.log("Cancellation requested".to_string());
        }
        self.cancel_token.lock().unwrap_or_else(|p| p.into_inner()).cancel();
    }

    /// Side-effect-free snapshot for pollers.
    pub fn get_progress(&self) -> ProgressReport {
        let session = self.session();
        ProgressReport {
            phase: phase_name(session.phase()).to_string(),
            progress: session.progress,
            error: session.error.clone(),
            logs: session.logs.clone(),
            active_hosts: session.active_hosts.clone(),
            open_ports: session.open_ports.clone(),
            web_services: session.web_services.clone(),
            total_expected_hosts: session.total_expected_hosts,
            total_hosts_scanned: session.total_hosts_scanned,
            current_chunk: session.current_chunk,
            total_chunks: session.total_chunks,
        }
    }

    async fn run_pipeline(&self, subnet_str: String, token: CancellationToken) {
        match self.ping_phase(&subnet_str, &token).await {
            PhaseOutcome::Continue => {}
            PhaseOutcome::Finished => return,
        }
        match self.port_phase(&token).await {
            PhaseOutcome::Continue => {}
            PhaseOutcome::Finished => return,
        }
        self.probe_phase(&token).await;
    }

    /// Host discovery: `-sn` sweep, collecting live hosts and chunk-aware
    /// progress from the tool's stats output.
    async fn ping_phase(&self, subnet_str: &str, token: &CancellationToken) -> PhaseOutcome {
        let started = Instant::now();
        let expected = self.session().total_expected_hosts;
        let args = vec![
            "-sn".to_string(),
            "-T4".to_string(),
            "--stats-every".to_string(),
            "2s".to_string(),
            subnet_str.to_string(),
        ];

        let manager = self.clone();
        let end = runner::run_scanner(&self.config.program, &args, token, move |line| {
            let event = parse_ping_line(line);
            let mut session = manager.session();
            session.log(line);
            match event {
                PingEvent::HostUp(host) => {
                    tracing::info!(host = %host, "host is up");
                    session.add_host(host);
                }
                PingEvent::HostsCompleted(done) => {
                    let before = chunk_floor(session.current_chunk);
                    session.total_hosts_scanned = before + done;
                    session.progress = capped_percentage(session.total_hosts_scanned, expected);
                }
                PingEvent::TimingPercent(pct) => {
                    // Best-effort estimate within the current chunk; never
                    // walks an existing count backwards.
                    let before = chunk_floor(session.current_chunk);
                    let span = expected.saturating_sub(before).min(subnet::SCANNER_CHUNK_SIZE);
                    let estimate = before + (pct / 100.0 * span as f64) as u64;
                    session.total_hosts_scanned = session.total_hosts_scanned.max(estimate);
                    session.progress = capped_percentage(session.total_hosts_scanned, expected);
                }
                PingEvent::ChunkBoundary => {
                    if session.current_chunk > 0 {
                        session.total_hosts_scanned = chunk_floor(session.current_chunk + 1);
                    }
                    session.current_chunk += 1;
                    session.progress = capped_percentage(session.total_hosts_scanned, expected);
                }
                PingEvent::Other => {}
            }
        })
        .await;

        self.enforce_phase_floor(started).await;

        let mut session = self.session();
        match end {
            Err(e) => fail(&mut session, format!("ping scan failed: {e}")),
            Ok(RunEnd::Cancelled) => cancel_session(&mut session),
            Ok(RunEnd::Exited(_)) if session.cancelled => cancel_session(&mut session),
            Ok(RunEnd::Exited(code)) if code != Some(0) => fail(
                &mut session,
                format!("scanner exited with status {code:?} during ping scan"),
            ),
            Ok(RunEnd::Exited(_)) => {
                session.total_hosts_scanned = session.total_expected_hosts;
                session.current_chunk = session.current_chunk.max(1);
                let found = session.active_hosts.len();
                session.log(format!("Ping scan complete: {found} host(s) up"));
                if found == 0 {
                    complete(&mut session);
                } else {
                    session.phase = Some(ScanPhase::Port);
                    session.progress = 0;
                    session.log(format!(
                        "Starting port scan on {found} host(s), {} port(s)",
                        self.config.ports.len()
                    ));
                    return PhaseOutcome::Continue;
                }
            }
        }
        PhaseOutcome::Finished
    }

    /// TCP connect scan over the well-known port list for every live host.
    async fn port_phase(&self, token: &CancellationToken) -> PhaseOutcome {
        let started = Instant::now();
        let hosts = self.session().active_hosts.clone();
        let host_count = hosts.len() as u64;
        let mut args = vec![
            "-Pn".to_string(),
            "-T4".to_string(),
            "--stats-every".to_string(),
            "2s".to_string(),
            format!("-p{}", ports::ports_argument(&self.config.ports)),
        ];
        args.extend(hosts);

        let manager = self.clone();
        // Open-port lines carry no host of their own; they attach to the
        // most recent scan-report line.
        let mut current_host = String::new();
        let mut host_index: u64 = 0;
        let end = runner::run_scanner(&self.config.program, &args, token, move |line| {
            let event = parse_port_line(line);
            let mut session = manager.session();
            session.log(line);
            match event {
                PortEvent::Report(host) => {
                    current_host = host;
                    host_index += 1;
                    if host_count > 0 {
                        // Fractional host position; refined by any later
                        // stats or timing line.
                        session.progress = percentage(host_index - 1, host_count);
                    }
                }
                PortEvent::OpenPort(port) => {
                    if !current_host.is_empty() && session.add_open_port(&current_host, port) {
                        tracing::info!(host = %current_host, port, "open port");
                    }
                }
                PortEvent::HostsCompleted(done) => {
                    session.progress = percentage(done, host_count);
                }
                PortEvent::TimingPercent(pct) => {
                    session.progress = (pct.round() as u64).min(100) as u8;
                }
                PortEvent::Other => {}
            }
        })
        .await;

        self.enforce_phase_floor(started).await;

        let mut session = self.session();
        match end {
            Err(e) => fail(&mut session, format!("port scan failed: {e}")),
            Ok(RunEnd::Cancelled) => cancel_session(&mut session),
            Ok(RunEnd::Exited(_)) if session.cancelled => cancel_session(&mut session),
            Ok(RunEnd::Exited(code)) if code != Some(0) => fail(
                &mut session,
                format!("scanner exited with status {code:?} during port scan"),
            ),
            Ok(RunEnd::Exited(_)) => {
                let open_total: usize = session.open_ports.values().map(|v| v.len()).sum();
                session.log(format!("Port scan complete: {open_total} open port(s)"));
                if open_total == 0 {
                    complete(&mut session);
                } else {
                    session.phase = Some(ScanPhase::Probe);
                    session.progress = 0;
                    session.log("Probing discovered ports for web services".to_string());
                    return PhaseOutcome::Continue;
                }
            }
        }
        PhaseOutcome::Finished
    }

    /// HTTP/HTTPS probing of every discovered (host, port) pair. Sequential
    /// on purpose; the throttle keeps small embedded devices happy.
    async fn probe_phase(&self, token: &CancellationToken) {
        let started = Instant::now();
        let pairs: Vec<(String, u16)> = {
            let session = self.session();
            session
                .open_ports
                .iter()
                .flat_map(|(host, ports)| ports.iter().map(move |&p| (host.clone(), p)))
                .collect()
        };

        let client = match probe::build_probe_client() {
            Ok(c) => c,
            Err(e) => {
                fail(&mut self.session(), format!("failed to build probe client: {e}"));
                return;
            }
        };

        let total_probes = (pairs.len() * 2) as u64;
        let mut done: u64 = 0;
        'outer: for (host, port) in &pairs {
            for protocol in ["http", "https"] {
                if token.is_cancelled() || self.session().cancelled {
                    break 'outer;
                }
                let found = probe::probe(&client, host, *port, protocol).await;
                done += 1;
                {
                    let mut session = self.session();
                    session.progress = percentage(done, total_probes);
                    if let Some(service) = found {
                        let describe = format!(
                            "Found web service {} ({})",
                            service.url,
                            service.title.as_deref().unwrap_or("untitled")
                        );
                        if session.add_web_service(service) {
                            session.log(describe);
                        }
                    }
                }
                tokio::time::sleep(self.config.inter_probe_delay).await;
            }
        }

        self.enforce_phase_floor(started).await;

        let mut session = self.session();
        if session.cancelled || token.is_cancelled() {
            cancel_session(&mut session);
        } else {
            complete(&mut session);
        }
    }

    async fn enforce_phase_floor(&self, started: Instant) {
        let elapsed = started.elapsed();
        if elapsed < self.config.min_phase_duration {
            tokio::time::sleep(self.config.min_phase_duration - elapsed).await;
        }
    }
}

enum PhaseOutcome {
    Continue,
    Finished,
}

fn fail(session: &mut ScanSession, message: String) {
    tracing::error!(error = %message, "scan failed");
    session.phase = Some(ScanPhase::Error);
    session.error = Some(message.clone());
    session.log(message);
}

fn cancel_session(session: &mut ScanSession) {
    session.phase = Some(ScanPhase::Cancelled);
    session.log("Scan cancelled".to_string());
}

fn complete(session: &mut ScanSession) {
    session.phase = Some(ScanPhase::Completed);
    session.progress = 100;
    for line in render_report(&session.active_hosts, &session.open_ports, &session.web_services) {
        session.logs.push(line);
    }
}

fn phase_name(phase: ScanPhase) -> &'static str {
    match phase {
        ScanPhase::Idle => "idle",
        ScanPhase::Ping => "ping",
        ScanPhase::Port => "port",
        ScanPhase::Probe => "probe",
        ScanPhase::Completed => "completed",
        ScanPhase::Cancelled => "cancelled",
        ScanPhase::Error => "error",
    }
}

/// Progress percentage capped below 100 so the ping phase never reports
/// done before its process actually closes.
fn capped_percentage(done: u64, total: u64) -> u8 {
    percentage(done, total).min(95)
}

fn percentage(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    (((done as f64 / total as f64) * 100.0).round() as u64).min(100) as u8
}

fn chunk_floor(current_chunk: u32) -> u64 {
    current_chunk.saturating_sub(1) as u64 * subnet::SCANNER_CHUNK_SIZE
}

#[derive(Debug, Clone, PartialEq)]
enum PingEvent {
    HostUp(String),
    HostsCompleted(u64),
    TimingPercent(f64),
    ChunkBoundary,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
enum PortEvent {
    Report(String),
    OpenPort(u16),
    HostsCompleted(u64),
    TimingPercent(f64),
    Other,
}

fn report_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^Nmap scan report for (\S+)(?: \((\d+\.\d+\.\d+\.\d+)\))?")
            .expect("static regex")
    })
}

fn stats_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+) hosts completed").expect("static regex"))
}

fn timing_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"About ([\d.]+)% done").expect("static regex"))
}

fn chunk_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^Initiating (?:ARP )?Ping Scan").expect("static regex"))
}

fn open_port_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)/tcp\s+open").expect("static regex"))
}

/// Classify one line of ping-sweep output. The parser is the only place
/// that knows the tool's phrasing; everything downstream sees events.
fn parse_ping_line(line: &str) -> PingEvent {
    if let Some(caps) = report_re().captures(line) {
        let host = caps
            .get(2)
            .or_else(|| caps.get(1))
            .map(|m| m.as_str().to_string());
        if let Some(host) = host {
            return PingEvent::HostUp(host);
        }
    }
    if chunk_re().is_match(line) {
        return PingEvent::ChunkBoundary;
    }
    if let Some(caps) = stats_re().captures(line) {
        if let Ok(done) = caps[1].parse() {
            return PingEvent::HostsCompleted(done);
        }
    }
    if let Some(caps) = timing_re().captures(line) {
        if let Ok(pct) = caps[1].parse() {
            return PingEvent::TimingPercent(pct);
        }
    }
    PingEvent::Other
}

/// Classify one line of port-scan output.
fn parse_port_line(line: &str) -> PortEvent {
    if let Some(caps) = report_re().captures(line) {
        let host = caps
            .get(2)
            .or_else(|| caps.get(1))
            .map(|m| m.as_str().to_string());
        if let Some(host) = host {
            return PortEvent::Report(host);
        }
    }
    if let Some(caps) = open_port_re().captures(line) {
        if let Ok(port) = caps[1].parse() {
            return PortEvent::OpenPort(port);
        }
    }
    if let Some(caps) = stats_re().captures(line) {
        if let Ok(done) = caps[1].parse() {
            return PortEvent::HostsCompleted(done);
        }
    }
    if let Some(caps) = timing_re().captures(line) {
        if let Ok(pct) = caps[1].parse() {
            return PortEvent::TimingPercent(pct);
        }
    }
    PortEvent::Other
}

/// Human-readable summary appended to the log when a scan completes; this
/// is the durable artifact the UI shows after the fact.
fn render_report(
    active_hosts: &[String],
    open_ports: &BTreeMap<String, Vec<u16>>,
    web_services: &BTreeMap<String, Vec<WebService>>,
) -> Vec<String> {
    let mut out = Vec::new();
    out.push("=== Scan report ===".to_string());
    out.push(format!("Hosts up: {}", active_hosts.len()));
    for host in active_hosts {
        match open_ports.get(host) {
            Some(ports) if !ports.is_empty() => {
                let list = ports
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                out.push(format!("{host}: open ports {list}"));
            }
            _ => out.push(format!("{host}: no open ports")),
        }
        if let Some(services) = web_services.get(host) {
            for svc in services {
                let title = svc.title.as_deref().unwrap_or("untitled");
                out.push(format!("  {} - {title}", svc.url));
            }
        }
    }
    out.push("=== End of report ===".to_string());
    out
}
