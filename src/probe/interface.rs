//! Network interface lookup.
//!
//! Probes can be steered out of a specific interface and reports name the
//! interface a packet arrived on, so both directions need a light handle
//! resolved from the system interface table.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use pnet::datalink;

/// A resolved network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub index: u32,
    /// First non-link-local IPv4 address on the interface, if any.
    pub ipv4: Option<Ipv4Addr>,
    /// First non-link-local IPv6 address on the interface, if any.
    pub ipv6: Option<Ipv6Addr>,
}

impl Interface {
    /// Looks up an interface by name.
    pub fn by_name(name: &str) -> Option<Interface> {
        datalink::interfaces()
            .into_iter()
            .find(|ifi| ifi.name == name)
            .map(Interface::from_datalink)
    }

    /// Looks up an interface by index.
    pub fn by_index(index: u32) -> Option<Interface> {
        if index == 0 {
            return None;
        }
        datalink::interfaces()
            .into_iter()
            .find(|ifi| ifi.index == index)
            .map(Interface::from_datalink)
    }

    fn from_datalink(ifi: datalink::NetworkInterface) -> Interface {
        let mut ipv4 = None;
        let mut ipv6 = None;
        let loopback = ifi.is_loopback();
        for net in &ifi.ips {
            match net.ip() {
                IpAddr::V4(a) if ipv4.is_none() => ipv4 = Some(a),
                IpAddr::V6(a) if ipv6.is_none() && (loopback || !is_link_local_ipv6(&a)) => {
                    ipv6 = Some(a)
                }
                _ => {}
            }
        }
        Interface {
            name: ifi.name,
            index: ifi.index,
            ipv4,
            ipv6,
        }
    }
}

/// Reports whether an IPv6 address is link-local unicast (fe80::/10).
pub fn is_link_local_ipv6(addr: &Ipv6Addr) -> bool {
    (0xfe80..=0xfebf).contains(&addr.segments()[0])
}

/// Reports whether an IPv6 address needs a scope identifier to be
/// routable: link-local unicast, or link-/interface-local multicast.
pub(crate) fn needs_zone(addr: &Ipv6Addr) -> bool {
    let scope = addr.segments()[0];
    is_link_local_ipv6(addr) || scope & 0xff0f == 0xff02 || scope & 0xff0f == 0xff01
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_local_detection() {
        assert!(is_link_local_ipv6(&"fe80::1".parse().unwrap()));
        assert!(is_link_local_ipv6(&"febf::1".parse().unwrap()));
        assert!(!is_link_local_ipv6(&"fe7f::1".parse().unwrap()));
        assert!(!is_link_local_ipv6(&"2001:db8::1".parse().unwrap()));
        assert!(!is_link_local_ipv6(&"::1".parse().unwrap()));
    }

    #[test]
    fn test_needs_zone() {
        assert!(needs_zone(&"fe80::1".parse().unwrap()));
        assert!(needs_zone(&"ff02::1".parse().unwrap()));
        assert!(needs_zone(&"ff12::1".parse().unwrap()));
        assert!(!needs_zone(&"ff0e::1".parse().unwrap()));
        assert!(!needs_zone(&"2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn test_nonexistent_interface() {
        assert!(Interface::by_name("ipoam-no-such-interface0").is_none());
        assert!(Interface::by_index(0).is_none());
    }

    #[test]
    fn test_loopback_round_trip() {
        // Not every environment exposes a loopback interface; skip if absent.
        let Some(lo) = datalink::interfaces().into_iter().find(|i| i.is_loopback()) else {
            return;
        };
        let by_name = Interface::by_name(&lo.name).unwrap();
        let by_index = Interface::by_index(lo.index).unwrap();
        assert_eq!(by_name, by_index);
        assert_eq!(by_name.index, lo.index);
    }
}
