//! Address reachability over unicast, multicast and prefix targets.

use std::net::{IpAddr, SocketAddr};

use ipnetwork::IpNetwork;

/// A probe target: a bare IP, an IP with a transport port, or a prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetAddr {
    Ip(IpAddr),
    Socket(SocketAddr),
    Prefix(IpNetwork),
}

impl TargetAddr {
    /// The address probes are sent to; for a prefix, its network address.
    pub fn ip(&self) -> IpAddr {
        match self {
            TargetAddr::Ip(ip) => *ip,
            TargetAddr::Socket(sa) => sa.ip(),
            TargetAddr::Prefix(net) => net.network(),
        }
    }
}

/// Reports whether a packet from `from` can answer for `target`.
///
/// Multicast targets are always reachable, since replies may come from
/// any group member. A prefix target is reachable from any address it
/// contains; anything else requires address equality.
pub fn reachable(target: &TargetAddr, from: IpAddr) -> bool {
    let tip = target.ip().to_canonical();
    if tip.is_multicast() {
        return true;
    }
    let from = from.to_canonical();
    match target {
        TargetAddr::Prefix(net) => net.contains(from),
        _ => tip == from,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_unicast_requires_equality() {
        let target = TargetAddr::Ip(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)));
        assert!(reachable(&target, "192.0.2.1".parse().unwrap()));
        assert!(!reachable(&target, "192.0.2.2".parse().unwrap()));
    }

    #[test]
    fn test_socket_target_uses_its_ip() {
        let target = TargetAddr::Socket("192.0.2.1:33434".parse().unwrap());
        assert!(reachable(&target, "192.0.2.1".parse().unwrap()));
        assert!(!reachable(&target, "198.51.100.1".parse().unwrap()));
    }

    #[test]
    fn test_multicast_always_reachable() {
        let v4 = TargetAddr::Ip(IpAddr::V4(Ipv4Addr::new(224, 0, 0, 251)));
        assert!(reachable(&v4, "192.0.2.7".parse().unwrap()));
        let v6 = TargetAddr::Ip(IpAddr::V6("ff02::1".parse::<Ipv6Addr>().unwrap()));
        assert!(reachable(&v6, "fe80::1".parse().unwrap()));
    }

    #[test]
    fn test_prefix_containment() {
        let net: IpNetwork = "192.0.2.0/24".parse().unwrap();
        let target = TargetAddr::Prefix(net);
        assert!(reachable(&target, "192.0.2.200".parse().unwrap()));
        assert!(!reachable(&target, "198.51.100.1".parse().unwrap()));

        let net6: IpNetwork = "2001:db8::/32".parse().unwrap();
        let target6 = TargetAddr::Prefix(net6);
        assert!(reachable(&target6, "2001:db8::42".parse().unwrap()));
        assert!(!reachable(&target6, "2001:db9::42".parse().unwrap()));
    }

    #[test]
    fn test_mapped_addresses_compare_canonically() {
        let target = TargetAddr::Ip(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)));
        let mapped: IpAddr = "::ffff:192.0.2.1".parse().unwrap();
        assert!(reachable(&target, mapped));
    }
}
