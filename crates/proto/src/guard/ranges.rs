//! Blocked network range table.
//!
//! Probes must never be pointed back at the hosting provider's own edge.
//! Every destination address is checked against this table before any
//! connect; the check is pure address arithmetic and performs no I/O.

use std::net::{IpAddr, Ipv4Addr};

/// IPv4 ranges probes are never allowed to reach, in CIDR notation.
const BLOCKED_V4: &[(Ipv4Addr, u8)] = &[
    (Ipv4Addr::new(173, 245, 48, 0), 20),
    (Ipv4Addr::new(103, 21, 244, 0), 22),
    (Ipv4Addr::new(103, 22, 200, 0), 22),
    (Ipv4Addr::new(103, 31, 4, 0), 22),
    (Ipv4Addr::new(141, 101, 64, 0), 18),
    (Ipv4Addr::new(108, 162, 192, 0), 18),
    (Ipv4Addr::new(190, 93, 240, 0), 20),
    (Ipv4Addr::new(188, 114, 96, 0), 20),
    (Ipv4Addr::new(197, 234, 240, 0), 22),
    (Ipv4Addr::new(198, 41, 128, 0), 17),
    (Ipv4Addr::new(162, 158, 0, 0), 15),
    (Ipv4Addr::new(104, 16, 0, 0), 13),
    (Ipv4Addr::new(104, 24, 0, 0), 14),
    (Ipv4Addr::new(172, 64, 0, 0), 13),
    (Ipv4Addr::new(131, 0, 72, 0), 22),
];

/// Checks an address against the blocked table.
///
/// Returns the matched range in CIDR notation, or `None` when the address is
/// allowed. Only IPv4 ranges are blocked; IPv6 destinations pass through.
pub fn classify(addr: IpAddr) -> Option<String> {
    let v4 = match addr {
        IpAddr::V4(v4) => v4,
        IpAddr::V6(_) => return None,
    };
    let bits = u32::from(v4);
    for &(network, prefix) in BLOCKED_V4 {
        let mask = prefix_mask(prefix);
        if bits & mask == u32::from(network) & mask {
            return Some(format!("{}/{}", network, prefix));
        }
    }
    None
}

fn prefix_mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocked_address_matches_range() {
        let matched = classify(IpAddr::V4(Ipv4Addr::new(104, 16, 1, 1)));
        assert_eq!(matched.as_deref(), Some("104.16.0.0/13"));
    }

    #[test]
    fn test_range_boundaries() {
        // 104.16.0.0/13 spans 104.16.0.0 - 104.23.255.255.
        assert!(classify(IpAddr::V4(Ipv4Addr::new(104, 23, 255, 255))).is_some());
        assert_eq!(
            classify(IpAddr::V4(Ipv4Addr::new(104, 24, 0, 0))).as_deref(),
            Some("104.24.0.0/14")
        );
        assert!(classify(IpAddr::V4(Ipv4Addr::new(104, 15, 255, 255))).is_none());
    }

    #[test]
    fn test_ordinary_addresses_allowed() {
        for addr in [
            Ipv4Addr::new(127, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(8, 8, 8, 8),
            Ipv4Addr::new(192, 168, 1, 1),
        ] {
            assert!(classify(IpAddr::V4(addr)).is_none(), "{} should pass", addr);
        }
    }

    #[test]
    fn test_ipv6_passes_through() {
        assert!(classify("2606:4700::1".parse().unwrap()).is_none());
    }
}
