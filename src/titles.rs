use regex::Regex;
use std::sync::OnceLock;

const MAX_TITLE_LEN: usize = 80;

/// Server-signature to product-name lookup, matched case-insensitively
/// against the `Server` header when nothing in the body names the service.
const SERVER_PRODUCTS: &[(&str, &str)] = &[
    ("plex", "Plex Media Server"),
    ("jellyfin", "Jellyfin"),
    ("emby", "Emby Server"),
    ("synology", "Synology DSM"),
    ("unifi", "UniFi Controller"),
    ("grafana", "Grafana"),
    ("prometheus", "Prometheus"),
    ("home assistant", "Home Assistant"),
    ("pihole", "Pi-hole"),
    ("pi-hole", "Pi-hole"),
    ("nginx", "nginx"),
    ("apache", "Apache HTTP Server"),
    ("caddy", "Caddy"),
    ("lighttpd", "lighttpd"),
    ("iis", "Microsoft IIS"),
    ("node", "Node.js Server"),
    ("traefik", "Traefik"),
];

fn title_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("static regex"))
}

fn meta_re(attr: &'static str, cell: &'static OnceLock<Regex>) -> &'static Regex {
    cell.get_or_init(|| {
        // Matches both attribute orders: property-then-content and
        // content-then-property.
        Regex::new(&format!(
            r#"(?is)<meta[^>]*(?:property|name)\s*=\s*["']{attr}["'][^>]*content\s*=\s*["']([^"']+)["']|<meta[^>]*content\s*=\s*["']([^"']+)["'][^>]*(?:property|name)\s*=\s*["']{attr}["']"#
        ))
        .expect("static regex")
    })
}

fn og_title_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    meta_re("og:title", &RE)
}

fn twitter_title_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    meta_re("twitter:title", &RE)
}

fn h1_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<h1[^>]*>(.*?)</h1>").expect("static regex"))
}

fn tag_strip_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("static regex"))
}

/// Extract a display title for a probed endpoint.
///
/// Strategies are tried in order of preference, each pure, first hit wins:
/// `<title>` tag, Open Graph title, Twitter-card title, first `<h1>`,
/// well-known JSON name fields, then a `Server`-header product lookup.
pub fn extract_title(body: &str, server_header: Option<&str>) -> Option<String> {
    from_title_tag(body)
        .or_else(|| from_meta(og_title_re(), body))
        .or_else(|| from_meta(twitter_title_re(), body))
        .or_else(|| from_h1(body))
        .or_else(|| from_json_fields(body))
        .or_else(|| from_server_signature(server_header?))
}

/// Product name for a `Server` header alone, used when a response carried no
/// usable body.
pub fn from_server_signature(server_header: &str) -> Option<String> {
    let lowered = server_header.to_lowercase();
    SERVER_PRODUCTS
        .iter()
        .find(|(sig, _)| lowered.contains(sig))
        .map(|(_, product)| product.to_string())
}

fn from_title_tag(body: &str) -> Option<String> {
    let caps = title_tag_re().captures(body)?;
    clean(caps.get(1)?.as_str())
}

fn from_meta(re: &Regex, body: &str) -> Option<String> {
    let caps = re.captures(body)?;
    let raw = caps.get(1).or_else(|| caps.get(2))?.as_str();
    clean(raw)
}

fn from_h1(body: &str) -> Option<String> {
    let caps = h1_re().captures(body)?;
    // Headings may wrap inner markup (spans, links); strip it.
    let inner = tag_strip_re().replace_all(caps.get(1)?.as_str(), " ");
    clean(&inner)
}

fn from_json_fields(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body.trim()).ok()?;
    let obj = value.as_object()?;
    for key in ["name", "title", "app_name", "appName", "application", "product"] {
        if let Some(s) = obj.get(key).and_then(|v| v.as_str()) {
            if let Some(t) = clean(s) {
                return Some(t);
            }
        }
    }
    None
}

/// Unescape common HTML entities, collapse whitespace to one line, truncate.
fn clean(raw: &str) -> Option<String> {
    let unescaped = unescape_entities(raw);
    let mut collapsed = String::with_capacity(unescaped.len());
    let mut last_space = true;
    for ch in unescaped.chars() {
        if ch.is_whitespace() {
            if !last_space {
                collapsed.push(' ');
                last_space = true;
            }
        } else {
            collapsed.push(ch);
            last_space = false;
        }
    }
    let trimmed = collapsed.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut out: String = trimmed.to_string();
    if out.chars().count() > MAX_TITLE_LEN {
        out = out.chars().take(MAX_TITLE_LEN).collect();
    }
    Some(out)
}

fn unescape_entities(s: &str) -> String {
    // The handful of entities that actually show up in page titles.
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
}
