// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Address classification for outbound requests

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Cloud instance metadata endpoint
pub const METADATA_V4: Ipv4Addr = Ipv4Addr::new(169, 254, 169, 254);
/// Default Docker bridge gateway
pub const DOCKER_BRIDGE_V4: Ipv4Addr = Ipv4Addr::new(172, 17, 0, 1);

/// An address block such as `10.0.0.0/8` or `fd00::/8`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    network: IpAddr,
    prefix: u8,
}

impl Cidr {
    /// Parse `addr/prefix`; a bare address is a single-host block
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix.parse::<u8>().ok()?)),
            None => (s, None),
        };
        let network: IpAddr = addr.parse().ok()?;
        let max = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix = prefix.unwrap_or(max);
        if prefix > max {
            return None;
        }
        Some(Self { network, prefix })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, normalize(ip)) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - self.prefix as u32).unwrap_or(0);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = u128::MAX.checked_shl(128 - self.prefix as u32).unwrap_or(0);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

/// Unwrap IPv6 forms that carry an IPv4 address
pub fn normalize(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => embedded_v4(v6).map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    }
}

fn embedded_v4(v6: Ipv6Addr) -> Option<Ipv4Addr> {
    if let Some(v4) = v6.to_ipv4_mapped() {
        return Some(v4);
    }
    let segments = v6.segments();
    // NAT64 well-known prefix 64:ff9b::/96
    if segments[..6] == [0x64, 0xff9b, 0, 0, 0, 0] {
        let octets = v6.octets();
        return Some(Ipv4Addr::new(octets[12], octets[13], octets[14], octets[15]));
    }
    // Deprecated IPv4-compatible ::a.b.c.d, excluding :: and ::1
    if segments[..6] == [0, 0, 0, 0, 0, 0] && u128::from(v6) > 1 {
        let octets = v6.octets();
        return Some(Ipv4Addr::new(octets[12], octets[13], octets[14], octets[15]));
    }
    None
}

/// Why an address must not be contacted, or `None` when it is public
pub fn blocked_reason(ip: IpAddr) -> Option<&'static str> {
    match normalize(ip) {
        IpAddr::V4(v4) => blocked_v4(v4),
        IpAddr::V6(v6) => blocked_v6(v6),
    }
}

fn blocked_v4(ip: Ipv4Addr) -> Option<&'static str> {
    let [a, b, c, _] = ip.octets();
    if ip == METADATA_V4 {
        return Some("cloud metadata address");
    }
    if ip == DOCKER_BRIDGE_V4 {
        return Some("container bridge gateway");
    }
    if ip.is_unspecified() || a == 0 {
        return Some("unspecified address");
    }
    if ip.is_loopback() {
        return Some("loopback address");
    }
    if ip.is_private() {
        return Some("private address");
    }
    if ip.is_link_local() {
        return Some("link-local address");
    }
    if a == 100 && (b & 0xc0) == 64 {
        return Some("carrier-grade NAT address");
    }
    if ip.is_broadcast() || ip.is_multicast() {
        return Some("multicast or broadcast address");
    }
    if a >= 240 || (a == 192 && b == 0 && c == 0) || (a == 198 && (b & 0xfe) == 18) {
        return Some("reserved address");
    }
    if ip.is_documentation() {
        return Some("documentation address");
    }
    None
}

fn blocked_v6(ip: Ipv6Addr) -> Option<&'static str> {
    let first = ip.segments()[0];
    if ip.is_unspecified() {
        return Some("unspecified address");
    }
    if ip.is_loopback() {
        return Some("loopback address");
    }
    if (first & 0xfe00) == 0xfc00 {
        return Some("unique local address");
    }
    if (first & 0xffc0) == 0xfe80 || (first & 0xffc0) == 0xfec0 {
        return Some("link-local address");
    }
    if ip.is_multicast() {
        return Some("multicast address");
    }
    if first == 0x2001 && ip.segments()[1] == 0x0db8 {
        return Some("documentation address");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_blocks_internal_v4() {
        for addr in [
            "127.0.0.1",
            "127.8.9.10",
            "0.0.0.0",
            "10.1.2.3",
            "172.16.0.1",
            "172.31.255.255",
            "192.168.1.1",
            "169.254.169.254",
            "169.254.1.1",
            "100.64.0.1",
            "100.127.255.254",
            "224.0.0.1",
            "255.255.255.255",
            "172.17.0.1",
        ] {
            assert!(blocked_reason(ip(addr)).is_some(), "{} should be blocked", addr);
        }
    }

    #[test]
    fn test_allows_public_v4() {
        for addr in ["93.184.216.34", "8.8.8.8", "172.32.0.1", "100.128.0.1", "1.1.1.1"] {
            assert_eq!(blocked_reason(ip(addr)), None, "{} should be allowed", addr);
        }
    }

    #[test]
    fn test_blocks_internal_v6() {
        for addr in ["::1", "::", "fd00::1", "fc00::1", "fe80::1", "ff02::1"] {
            assert!(blocked_reason(ip(addr)).is_some(), "{} should be blocked", addr);
        }
        assert_eq!(blocked_reason(ip("2606:4700:4700::1111")), None);
    }

    #[test]
    fn test_embedded_v4_forms_are_unwrapped() {
        assert_eq!(
            blocked_reason(ip("::ffff:127.0.0.1")),
            Some("loopback address")
        );
        assert_eq!(
            blocked_reason(ip("::ffff:169.254.169.254")),
            Some("cloud metadata address")
        );
        assert_eq!(blocked_reason(ip("64:ff9b::10.0.0.1")), Some("private address"));
        assert_eq!(blocked_reason(ip("::ffff:8.8.8.8")), None);
    }

    #[test]
    fn test_cidr_parse_and_contains() {
        let block = Cidr::parse("203.0.113.0/24").unwrap();
        assert!(block.contains(ip("203.0.113.77")));
        assert!(!block.contains(ip("203.0.114.1")));
        assert!(block.contains(ip("::ffff:203.0.113.5")));

        let host = Cidr::parse("198.51.100.7").unwrap();
        assert!(host.contains(ip("198.51.100.7")));
        assert!(!host.contains(ip("198.51.100.8")));

        let v6 = Cidr::parse("2001:db8:abcd::/48").unwrap();
        assert!(v6.contains(ip("2001:db8:abcd:1::1")));

        let all = Cidr::parse("0.0.0.0/0").unwrap();
        assert!(all.contains(ip("8.8.8.8")));

        assert_eq!(Cidr::parse("10.0.0.0/33"), None);
        assert_eq!(Cidr::parse("not-an-ip/8"), None);
        assert_eq!(Cidr::parse("10.0.0.0/x"), None);
    }
}
