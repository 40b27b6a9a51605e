//! Probe-side building blocks: cookies, packet codecs, socket endpoints,
//! kernel filters and interface lookup.

pub mod cookie;
pub(crate) mod endpoint;
pub mod filter;
pub mod interface;
pub mod ip;
pub mod packet;

pub use cookie::{Cookie, PROTOCOL_ICMP, PROTOCOL_IPV6_ICMP, PROTOCOL_UDP};
pub use endpoint::{Ipv4PacketConn, Ipv6PacketConn};
pub use interface::Interface;
pub use ip::{IpHeader, Ipv4Header, Ipv6Header};
pub use packet::{Echo, IcmpBody, IcmpErrorBody, IcmpMessage, IcmpType};
