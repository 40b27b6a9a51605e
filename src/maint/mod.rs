//! Maintenance side: the report model and the background receiver that
//! demultiplexes inbound ICMP traffic by cookie.

pub(crate) mod receiver;
pub mod report;

pub use report::{Report, parse_icmp_error, parse_orig_udp};
