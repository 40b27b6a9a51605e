//! Subcommand implementations and the helpers they share.

pub mod connectivity;
pub mod discovery;
pub mod interfaces;

use std::net::IpAddr;

use anyhow::{Context, Result, bail};

use ipoam::Interface;

const PATTERN: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Fills a probe payload of the requested length with the ASCII pattern.
pub(crate) fn fill_payload(len: usize) -> Vec<u8> {
    PATTERN.iter().copied().cycle().take(len).collect()
}

/// Resolves a comma-separated destination list to addresses, filtered by
/// family. Mixing unicast and multicast destinations is prohibited.
pub(crate) fn resolve_destinations(
    s: &str,
    ipv4_only: bool,
    ipv6_only: bool,
) -> Result<Vec<IpAddr>> {
    let mut ips = Vec::new();
    for part in s.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Ok(ip) = part.parse::<IpAddr>() {
            ips.push(ip);
            continue;
        }
        let resolved =
            dns_lookup::lookup_host(part).with_context(|| format!("failed to resolve {part}"))?;
        ips.extend(resolved);
    }
    ips.retain(|ip| if ip.is_ipv4() { !ipv6_only } else { !ipv4_only });
    if ips.is_empty() {
        bail!("no usable destination in {s:?}");
    }
    if ips.iter().any(|ip| ip.is_multicast()) && ips.iter().any(|ip| !ip.is_multicast()) {
        bail!("prohibited from mixing unicast and multicast destinations");
    }
    Ok(ips)
}

/// Looks up the outbound interface named on the command line.
pub(crate) fn outbound_interface(name: Option<&str>) -> Result<Option<Interface>> {
    match name {
        Some(name) => Interface::by_name(name)
            .map(Some)
            .with_context(|| format!("unknown interface {name:?}")),
        None => Ok(None),
    }
}

/// The reverse-looked-up name of an address, unless numeric output was
/// requested or the lookup fails.
pub(crate) fn rev_name(ip: IpAddr, numeric: bool) -> Option<String> {
    if numeric {
        return None;
    }
    dns_lookup::lookup_addr(&ip).ok()
}

/// Display form for report sources: the name when resolvable, the
/// literal otherwise.
pub(crate) fn host_string(ip: IpAddr, numeric: bool) -> String {
    rev_name(ip, numeric).unwrap_or_else(|| ip.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_payload() {
        let p = fill_payload(56);
        assert_eq!(p.len(), 56);
        assert!(p.starts_with(b"0123456789abcdefghijklmnopqrstuvwxyz0123456789"));
        assert!(fill_payload(0).is_empty());
    }

    #[test]
    fn test_resolve_literal_list() {
        let ips = resolve_destinations("192.0.2.1, 2001:db8::1", false, false).unwrap();
        assert_eq!(ips.len(), 2);
        let v4 = resolve_destinations("192.0.2.1,2001:db8::1", true, false).unwrap();
        assert_eq!(v4, vec!["192.0.2.1".parse::<IpAddr>().unwrap()]);
    }

    #[test]
    fn test_resolve_rejects_mixed_cast() {
        assert!(resolve_destinations("192.0.2.1,224.0.0.251", false, false).is_err());
    }

    #[test]
    fn test_resolve_rejects_empty_result() {
        assert!(resolve_destinations("192.0.2.1", false, true).is_err());
        assert!(resolve_destinations(",", false, false).is_err());
    }
}
