//! End-to-end pipeline tests driven by a stub scanner script and a local
//! HTTP listener standing in for a discovered web service.

use netwarden::scan::{ScanManager, ScannerConfig};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Write an executable stub that emits canned scanner output: ping-sweep
/// lines when invoked with `-sn`, port-scan lines otherwise.
fn write_fake_scanner(tag: &str, web_port: u16) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "netwarden-fake-scanner-{tag}-{}.sh",
        std::process::id()
    ));
    let script = format!(
        r#"#!/bin/sh
case "$*" in
  *-sn*)
    echo "Starting Nmap 7.94 ( https://nmap.org )"
    echo "Initiating Ping Scan at 12:00"
    echo "Nmap scan report for 127.0.0.1"
    echo "Nmap scan report for 127.0.0.1"
    echo "Stats: 0:00:01 elapsed; 1 hosts completed (1 up)"
    echo "Nmap done: 2 IP addresses (1 host up) scanned in 0.05 seconds"
    ;;
  *)
    echo "Nmap scan report for 127.0.0.1"
    echo "{web_port}/tcp open  http"
    echo "Nmap done: 1 IP address (1 host up) scanned in 0.10 seconds"
    ;;
esac
"#
    );
    let mut file = std::fs::File::create(&path).expect("create stub scanner");
    file.write_all(script.as_bytes()).expect("write stub scanner");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod stub scanner");
    path
}

/// Write a stub that just hangs, for cancellation and mutual-exclusion
/// tests.
fn write_hanging_scanner(tag: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "netwarden-hanging-scanner-{tag}-{}.sh",
        std::process::id()
    ));
    let mut file = std::fs::File::create(&path).expect("create stub scanner");
    file.write_all(b"#!/bin/sh\nsleep 60\n").expect("write stub scanner");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod stub scanner");
    path
}

/// Minimal HTTP server answering every request with a titled HTML page.
async fn spawn_web_service() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let port = listener.local_addr().expect("local addr").port();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 2048];
                let _ = sock.read(&mut buf).await;
                let body = "<html><head><title>My App</title></head><body>ok</body></html>";
                let resp = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = sock.write_all(resp.as_bytes()).await;
                let _ = sock.shutdown().await;
            });
        }
    });
    port
}

fn fast_config(program: PathBuf) -> ScannerConfig {
    ScannerConfig {
        program: program.to_string_lossy().into_owned(),
        ports: vec![80],
        min_phase_duration: Duration::ZERO,
        inter_probe_delay: Duration::from_millis(1),
    }
}

async fn wait_for_terminal(manager: &ScanManager) -> netwarden::types::ProgressReport {
    for _ in 0..300 {
        let report = manager.get_progress();
        if matches!(report.phase.as_str(), "completed" | "cancelled" | "error") {
            return report;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("scan did not reach a terminal phase in time");
}

#[tokio::test]
async fn full_pipeline_discovers_titled_web_service() {
    let web_port = spawn_web_service().await;
    let scanner = write_fake_scanner("full", web_port);
    let manager = ScanManager::new(fast_config(scanner));

    manager
        .start(Some("192.168.1.0/30".to_string()))
        .await
        .expect("scan starts");

    let report = wait_for_terminal(&manager).await;
    assert_eq!(report.phase, "completed", "error: {:?}", report.error);
    assert_eq!(report.progress, 100);
    assert_eq!(report.total_expected_hosts, 2);

    // Duplicate scan-report lines collapse to one host.
    assert_eq!(report.active_hosts, vec!["127.0.0.1"]);
    assert_eq!(report.open_ports["127.0.0.1"], vec![web_port]);

    let services = &report.web_services["127.0.0.1"];
    assert_eq!(services.len(), 1, "https probe of a plain port must not add an entry");
    assert_eq!(services[0].protocol, "http");
    assert_eq!(services[0].port, web_port);
    assert_eq!(services[0].title.as_deref(), Some("My App"));

    // The final report is part of the durable log.
    assert!(report.logs.iter().any(|l| l.contains("=== Scan report ===")));
    assert!(report
        .logs
        .iter()
        .any(|l| l.contains(&format!("open ports {web_port}"))));
    assert!(report.logs.iter().any(|l| l.contains("My App")));
}

#[tokio::test]
async fn second_start_is_rejected_without_disturbing_the_session() {
    let scanner = write_hanging_scanner("exclusive");
    let manager = ScanManager::new(fast_config(scanner));

    manager
        .start(Some("10.10.0.0/30".to_string()))
        .await
        .expect("first scan starts");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let before = manager.get_progress();
    let err = manager
        .start(Some("10.10.0.0/30".to_string()))
        .await
        .expect_err("second start must fail");
    assert!(err.to_string().contains("Scan already running"));

    let after = manager.get_progress();
    assert_eq!(after.phase, "ping");
    assert_eq!(after.logs, before.logs);
    assert_eq!(after.total_expected_hosts, before.total_expected_hosts);

    manager.cancel();
    wait_for_terminal(&manager).await;
}

#[tokio::test]
async fn cancel_mid_ping_ends_in_cancelled() {
    let scanner = write_hanging_scanner("cancel");
    let manager = ScanManager::new(fast_config(scanner));

    manager
        .start(Some("172.16.5.0/30".to_string()))
        .await
        .expect("scan starts");
    tokio::time::sleep(Duration::from_millis(200)).await;
    manager.cancel();

    let report = wait_for_terminal(&manager).await;
    assert_eq!(report.phase, "cancelled");
    assert!(report.error.is_none());
    assert!(report.logs.iter().any(|l| l.contains("Scan cancelled")));
}

#[tokio::test]
async fn empty_sweep_completes_without_port_phase() {
    let path = std::env::temp_dir().join(format!(
        "netwarden-empty-scanner-{}.sh",
        std::process::id()
    ));
    std::fs::write(
        &path,
        "#!/bin/sh\necho \"Nmap done: 2 IP addresses (0 hosts up) scanned in 0.05 seconds\"\n",
    )
    .expect("write stub scanner");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod stub scanner");

    let manager = ScanManager::new(fast_config(path));
    manager
        .start(Some("192.168.77.0/30".to_string()))
        .await
        .expect("scan starts");

    let report = wait_for_terminal(&manager).await;
    assert_eq!(report.phase, "completed");
    assert!(report.active_hosts.is_empty());
    assert!(report.open_ports.is_empty());
    assert!(report.logs.iter().any(|l| l.contains("Hosts up: 0")));
}

#[tokio::test]
async fn spawn_failure_surfaces_as_error_phase() {
    let manager = ScanManager::new(fast_config(PathBuf::from(
        "/nonexistent/netwarden-missing-scanner",
    )));
    manager
        .start(Some("10.1.1.0/30".to_string()))
        .await
        .expect("start itself succeeds; the failure is asynchronous");

    let report = wait_for_terminal(&manager).await;
    assert_eq!(report.phase, "error");
    assert!(report.error.unwrap().contains("ping scan failed"));
}
