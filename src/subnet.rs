use if_addrs::{get_if_addrs, IfAddr};
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;

/// Per-invocation host batch size of the external scanner; it processes
/// large ranges in groups of this many hosts, which drives the chunk
/// counters used for progress estimation.
pub const SCANNER_CHUNK_SIZE: u64 = 4096;

/// Validate a scan target in strict `A.B.C.D/N` form.
///
/// Accepts only syntactically well-formed CIDRs with a prefix in 8..=32
/// whose network address falls in RFC1918 private space or loopback.
/// Everything else (hostnames, public ranges, bare IPs, sloppy whitespace)
/// is rejected. Pure predicate; called before any subprocess is spawned.
pub fn validate(subnet: &str) -> bool {
    parse_private_cidr(subnet).is_some()
}

/// Parse and range-check a scan target, returning the network on success.
pub fn parse_private_cidr(subnet: &str) -> Option<Ipv4Net> {
    let (addr_part, prefix_part) = subnet.split_once('/')?;
    // Reject forms like "10.0.0.0/+24" or leading/trailing whitespace that
    // a lenient integer parse would let through.
    if !prefix_part.bytes().all(|b| b.is_ascii_digit()) || prefix_part.is_empty() {
        return None;
    }
    let prefix: u8 = prefix_part.parse().ok()?;
    if !(8..=32).contains(&prefix) {
        return None;
    }

    let mut octets = [0u8; 4];
    let mut parts = addr_part.split('.');
    for slot in octets.iter_mut() {
        let part = parts.next()?;
        if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *slot = part.parse().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }

    let addr = Ipv4Addr::from(octets);
    let net = Ipv4Net::new(addr, prefix).ok()?;
    if is_private_or_loopback(net.network()) {
        Some(net)
    } else {
        None
    }
}

/// RFC1918 private ranges plus loopback. Scans are refused outside these.
fn is_private_or_loopback(ip: Ipv4Addr) -> bool {
    let o = ip.octets();
    o[0] == 10
        || (o[0] == 172 && (16..=31).contains(&o[1]))
        || (o[0] == 192 && o[1] == 168)
        || o[0] == 127
}

/// Number of usable host addresses implied by a prefix length.
///
/// `2^(32-prefix) - 2` (network and broadcast excluded), floored at 1 so a
/// /31 or /32 still counts as one target.
pub fn expected_host_count(prefix: u8) -> u64 {
    let span = 1u64 << (32 - prefix as u32);
    span.saturating_sub(2).max(1)
}

/// Estimated number of scanner chunks for a host count, minimum 1.
pub fn estimated_chunks(hosts: u64) -> u32 {
    hosts.div_ceil(SCANNER_CHUNK_SIZE).max(1) as u32
}

/// Default scan target when none is supplied: the first non-loopback IPv4
/// interface address, widened to its /24.
pub fn detect_local_subnet() -> Option<String> {
    for iface in get_if_addrs().ok()? {
        if let IfAddr::V4(v4) = iface.addr {
            let ip = v4.ip;
            if ip.is_loopback() {
                continue;
            }
            let o = ip.octets();
            return Some(format!("{}.{}.{}.0/24", o[0], o[1], o[2]));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_rfc1918_ranges() {
        assert!(validate("10.0.0.0/24"));
        assert!(validate("172.16.0.0/12"));
        assert!(validate("172.31.255.0/24"));
        assert!(validate("192.168.1.0/30"));
        assert!(validate("127.0.0.0/8"));
    }

    #[test]
    fn rejects_public_and_edge_ranges() {
        assert!(!validate("8.8.8.8/24"));
        assert!(!validate("172.32.0.0/12")); // just past the /12 block
        assert!(!validate("192.169.0.0/16"));
        assert!(!validate("11.0.0.0/8"));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(!validate("not-an-ip"));
        assert!(!validate("10.0.0.0"));
        assert!(!validate("10.0.0/24"));
        assert!(!validate("10.0.0.256/24"));
        assert!(!validate("10.0.0.0/7"));
        assert!(!validate("10.0.0.0/33"));
        assert!(!validate("10.0.0.0/"));
        assert!(!validate(" 10.0.0.0/24"));
        assert!(!validate("10.0.0.0/+24"));
    }

    #[test]
    fn host_counts_from_prefix() {
        assert_eq!(expected_host_count(24), 254);
        assert_eq!(expected_host_count(30), 2);
        assert_eq!(expected_host_count(32), 1);
        assert_eq!(expected_host_count(31), 1);
        assert_eq!(expected_host_count(16), 65534);
    }

    #[test]
    fn chunk_estimate_rounds_up() {
        assert_eq!(estimated_chunks(2), 1);
        assert_eq!(estimated_chunks(4096), 1);
        assert_eq!(estimated_chunks(4097), 2);
        assert_eq!(estimated_chunks(65534), 16);
    }
}
