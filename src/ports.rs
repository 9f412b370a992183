use anyhow::{bail, Result};

/// Well-known TCP ports probed during the port-scan phase. The scan is
/// deliberately restricted to this list rather than the full 1-65535 range:
/// discovery targets services a dashboard would link to, not exhaustive
/// enumeration.
pub fn well_known_ports() -> Vec<u16> {
    const DEFAULT: &[u16] = &[
        21, 22, 23, 25, 53, 80, 110, 123, 139, 143, 161, 389, 443, 445, 465, 587, 631, 993, 995,
        1433, 1521, 1883, 2049, 2375, 3000, 3128, 3306, 3389, 5000, 5432, 5672, 5900, 5985, 6379,
        7001, 8000, 8008, 8080, 8081, 8088, 8096, 8123, 8443, 8500, 8888, 9000, 9090, 9091, 9200,
        9443, 32400, 51820,
    ];
    DEFAULT.to_vec()
}

/// Parse a comma-separated ports override from configuration, e.g.
/// `"80,443,8000-8010"`. Ranges are inclusive; duplicates are dropped while
/// preserving first-appearance order.
pub fn parse_ports_spec(spec: &str) -> Result<Vec<u16>> {
    let mut out: Vec<u16> = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for item in spec.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        if let Some((a, b)) = item.split_once('-') {
            let start = parse_port(a.trim())?;
            let end = parse_port(b.trim())?;
            if start > end {
                bail!("invalid range {start}-{end} (start > end)");
            }
            for p in start..=end {
                if seen.insert(p) {
                    out.push(p);
                }
            }
        } else {
            let p = parse_port(item)?;
            if seen.insert(p) {
                out.push(p);
            }
        }
    }

    if out.is_empty() {
        bail!("ports spec contained no ports: {spec:?}");
    }
    Ok(out)
}

/// Render a port list in the `-p` argument form the external scanner takes.
pub fn ports_argument(ports: &[u16]) -> String {
    ports
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_port(s: &str) -> Result<u16> {
    let val: u32 = s.parse()?;
    if val == 0 || val > 65535 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_singles_and_ranges() {
        let ports = parse_ports_spec("80, 443, 8000-8002").unwrap();
        assert_eq!(ports, vec![80, 443, 8000, 8001, 8002]);
    }

    #[test]
    fn dedup_preserves_first_appearance() {
        let ports = parse_ports_spec("8001,8000-8002").unwrap();
        assert_eq!(ports, vec![8001, 8000, 8002]);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(parse_ports_spec("0").is_err());
        assert!(parse_ports_spec("70000").is_err());
        assert!(parse_ports_spec("443-80").is_err());
        assert!(parse_ports_spec("  ,, ").is_err());
    }

    #[test]
    fn default_list_covers_web_ports() {
        let d = well_known_ports();
        assert!(d.contains(&80) && d.contains(&443) && d.contains(&8080));
    }

    #[test]
    fn argument_form_is_comma_joined() {
        assert_eq!(ports_argument(&[80, 443]), "80,443");
    }
}
