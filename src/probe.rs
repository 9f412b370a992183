use crate::titles;
use crate::types::WebService;
use std::time::Duration;

/// Probe timeout. Longer than the health-check timeout so slow pages still
/// get far enough for title extraction.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(8);

/// Body read cap.
const MAX_BODY_BYTES: usize = 50 * 1024;
/// A closing title tag inside this prefix ends the read early.
const EARLY_TITLE_WINDOW: usize = 2 * 1024;

/// Pretend to be a browser; some embedded admin pages refuse obvious bots.
const PROBE_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// HTTP client for discovery probes: relaxed TLS so self-signed management
/// interfaces are still detected, identity encoding so the body heuristics
/// see plain bytes.
pub fn build_probe_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(PROBE_USER_AGENT)
        .danger_accept_invalid_certs(true)
        .timeout(PROBE_TIMEOUT)
        .no_gzip()
        .no_brotli()
        .no_deflate()
        .redirect(reqwest::redirect::Policy::none())
        .build()
}

/// GET `protocol://host:port/` and classify the response.
///
/// Resolves to `None` on any network failure (refused, reset, DNS, timeout)
/// or when the response does not look like a web service; probing never
/// aborts a scan.
pub async fn probe(
    client: &reqwest::Client,
    host: &str,
    port: u16,
    protocol: &str,
) -> Option<WebService> {
    let url = format!("{protocol}://{host}:{port}/");
    let response = match client
        .get(&url)
        .header(reqwest::header::ACCEPT_ENCODING, "identity")
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "probe attempt failed");
            return None;
        }
    };

    let status = response.status().as_u16();
    let headers = HeaderSummary::from_headers(response.headers());
    let body = read_body_capped(response).await;

    let reason = classify(status, &headers, &body)?;
    let title = titles::extract_title(&body, headers.server.as_deref());

    Some(WebService {
        protocol: protocol.to_string(),
        host: host.to_string(),
        port,
        url,
        status_code: status,
        detection_reason: reason.to_string(),
        title,
    })
}

/// The header fields the classifier cares about, extracted up front so the
/// response body can be consumed afterwards.
#[derive(Debug, Default, Clone)]
pub struct HeaderSummary {
    pub server: Option<String>,
    pub content_type: Option<String>,
    pub has_set_cookie: bool,
}

impl HeaderSummary {
    fn from_headers(headers: &reqwest::header::HeaderMap) -> Self {
        let text = |name: reqwest::header::HeaderName| {
            headers
                .get(&name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        };
        HeaderSummary {
            server: text(reqwest::header::SERVER),
            content_type: text(reqwest::header::CONTENT_TYPE),
            has_set_cookie: headers.contains_key(reqwest::header::SET_COOKIE),
        }
    }
}

/// Stream the body up to the cap, stopping early once a `</title>` shows up
/// within the first couple of kilobytes. Early stop and cap are both success
/// paths.
async fn read_body_capped(response: reqwest::Response) -> String {
    let mut collected: Vec<u8> = Vec::new();
    let mut response = response;
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let room = MAX_BODY_BYTES - collected.len();
                collected.extend_from_slice(&chunk[..chunk.len().min(room)]);
                if collected.len() >= MAX_BODY_BYTES {
                    break;
                }
                let window = &collected[..collected.len().min(EARLY_TITLE_WINDOW)];
                if contains_ignore_case(window, b"</title>") {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                // Keep whatever arrived; a truncated body still classifies.
                tracing::debug!(error = %e, "body read ended early");
                break;
            }
        }
    }
    String::from_utf8_lossy(&collected).into_owned()
}

fn contains_ignore_case(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len())
        .any(|w| w.eq_ignore_ascii_case(needle))
}

/// Status codes that indicate something is serving HTTP even when it is
/// unhappy: auth walls, missing index pages, and broken backends all count
/// as discovered services.
fn status_indicates_web(status: u16) -> bool {
    (200..=399).contains(&status) || matches!(status, 401 | 403 | 404 | 405 | 500 | 502 | 503)
}

/// Decide whether a response came from a web service, returning the first
/// matching detection reason.
pub fn classify(status: u16, headers: &HeaderSummary, body: &str) -> Option<&'static str> {
    if status_indicates_web(status) {
        return Some("status-code");
    }
    if let Some(server) = headers.server.as_deref() {
        if titles::from_server_signature(server).is_some() {
            return Some("server-header");
        }
    }
    if let Some(ct) = headers.content_type.as_deref() {
        let ct = ct.to_lowercase();
        if ct.contains("text/html") || ct.contains("application/json") {
            return Some("content-type");
        }
    }
    if headers.has_set_cookie {
        return Some("set-cookie");
    }
    let lowered = body.to_lowercase();
    if ["<html", "<script", "<link", "<!doctype"]
        .iter()
        .any(|tag| lowered.contains(tag))
    {
        return Some("html-body");
    }
    if ["api", "login", "dashboard"].iter().any(|kw| lowered.contains(kw)) {
        return Some("body-keyword");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(server: Option<&str>, content_type: Option<&str>, cookie: bool) -> HeaderSummary {
        HeaderSummary {
            server: server.map(String::from),
            content_type: content_type.map(String::from),
            has_set_cookie: cookie,
        }
    }

    #[test]
    fn classifies_on_status_code() {
        assert_eq!(classify(200, &headers(None, None, false), ""), Some("status-code"));
        assert_eq!(classify(401, &headers(None, None, false), ""), Some("status-code"));
        assert_eq!(classify(503, &headers(None, None, false), ""), Some("status-code"));
    }

    #[test]
    fn unlisted_status_needs_other_evidence() {
        assert_eq!(classify(418, &headers(None, None, false), ""), None);
        assert_eq!(
            classify(418, &headers(Some("nginx/1.25"), None, false), ""),
            Some("server-header")
        );
        assert_eq!(
            classify(426, &headers(None, Some("text/html; charset=utf-8"), false), ""),
            Some("content-type")
        );
        assert_eq!(classify(418, &headers(None, None, true), ""), Some("set-cookie"));
    }

    #[test]
    fn classifies_on_body_contents() {
        assert_eq!(
            classify(418, &headers(None, None, false), "<HTML><body>"),
            Some("html-body")
        );
        assert_eq!(
            classify(418, &headers(None, None, false), "please login here"),
            Some("body-keyword")
        );
        assert_eq!(classify(418, &headers(None, None, false), "plain tcp banner"), None);
    }

    #[test]
    fn early_title_window_detection() {
        assert!(contains_ignore_case(b"xx</TITLE>yy", b"</title>"));
        assert!(!contains_ignore_case(b"<title>open", b"</title>"));
    }
}
