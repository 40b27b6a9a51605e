//! IP-layer Operations, Administration, and Maintenance (RFC 7276)
//! primitives for building ping- and traceroute-like diagnostics.
//!
//! A [`Tester`] pairs a probe endpoint (ICMP echo or UDP) with a
//! maintenance endpoint that receives the replies and returned ICMP
//! errors, correlates them back to the probe in flight, and emits
//! [`Report`]s decorated with IP-layer metadata. [`Loopback`] covers the
//! simple synchronous request/reply case.

pub mod error;
pub mod loopback;
pub mod maint;
pub mod probe;
pub mod reach;
pub mod tester;

pub use error::Error;
pub use loopback::{Loopback, LoopbackReport};
pub use maint::{Report, parse_icmp_error, parse_orig_udp};
pub use probe::{
    Cookie, Echo, IcmpBody, IcmpErrorBody, IcmpMessage, IcmpType, Interface, IpHeader,
    Ipv4Header, Ipv4PacketConn, Ipv6Header, Ipv6PacketConn, PROTOCOL_ICMP, PROTOCOL_IPV6_ICMP,
    PROTOCOL_UDP,
};
pub use reach::{TargetAddr, reachable};
pub use tester::{ControlMessage, Tester};
