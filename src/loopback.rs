//! One-shot loopback probing for request/reply flows.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::error::Error;
use crate::maint::report::parse_icmp_error;
use crate::probe::endpoint::{Ipv4PacketConn, Ipv6PacketConn, probe_endpoint};
use crate::probe::filter;
use crate::probe::interface::Interface;
use crate::probe::packet::{Echo, IcmpMessage, IcmpType};
use crate::reach::{TargetAddr, reachable};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// A report of one loopback test.
#[derive(Debug)]
pub struct LoopbackReport {
    /// The address that answered.
    pub addr: IpAddr,
    /// Round-trip time.
    pub rtt: Duration,
    /// The ICMP error message that ended the test, if the network
    /// returned one instead of a reply.
    pub icmp_error: Option<IcmpMessage>,
}

/// A loopback test configuration.
///
/// `run` transmits a single echo request and synchronously waits for the
/// matching reply or a returned ICMP error.
#[derive(Debug, Default)]
pub struct Loopback {
    /// Local listening address; empty for unspecified.
    pub local_addr: String,
    /// Outbound interface.
    pub interface: Option<Interface>,
    /// Read deadline; zero means 3 seconds.
    pub timeout: Duration,
}

impl Loopback {
    /// Starts the loopback test and waits for it to complete.
    ///
    /// The reply is matched on the peer address and the echo sequence
    /// number. The echo identifier is deliberately not checked:
    /// unprivileged datagram ICMP endpoints override it on transmit.
    pub fn run(&self, echo: Echo, target: &TargetAddr) -> Result<LoopbackReport, Error> {
        let timeout = if self.timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            self.timeout
        };
        let ip = target.ip();
        let network = if ip.is_ipv4() { "ip4:icmp" } else { "ip6:ipv6-icmp" };
        let ep = probe_endpoint(network, &self.local_addr)?;

        if ip.is_ipv4() {
            let _ = filter::set_icmp_filter(ep.socket(), &filter::reply_filter4());
            if ip.is_multicast() {
                if let Some(ifi) = &self.interface {
                    let _ = Ipv4PacketConn::new(ep.socket()).set_multicast_interface(ifi);
                }
            }
        } else {
            let _ = filter::set_icmp6_filter(ep.socket(), &filter::reply_filter6());
            if ip.is_multicast() {
                if let Some(ifi) = &self.interface {
                    let _ = Ipv6PacketConn::new(ep.socket()).set_multicast_interface(ifi);
                }
            }
        }

        let seq = echo.seq;
        let data_len = echo.data.len();
        let m = IcmpMessage::echo_request(ep.protocol, echo);
        let begin = Instant::now();
        ep.write_to(&m.marshal(), ip, 0, self.interface.as_ref())?;

        let deadline = begin + timeout;
        let mut buf = vec![0u8; 128 + data_len];
        loop {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return Err(Error::Timeout);
            };
            ep.socket()
                .set_read_timeout(Some(remaining))
                .map_err(Error::Read)?;
            let received = match ep.read_from(&mut buf) {
                Ok(received) => received,
                Err(e) if e.is_would_block() => return Err(Error::Timeout),
                Err(e) => return Err(e),
            };
            let rtt = begin.elapsed();
            let peer = received.peer;
            let rm = IcmpMessage::parse(ep.protocol, received.payload)?;

            match rm.icmp_type {
                IcmpType::EchoReply => {
                    if reachable(target, peer)
                        && rm.echo().is_some_and(|reply| reply.seq == seq)
                    {
                        return Ok(LoopbackReport {
                            addr: peer,
                            rtt,
                            icmp_error: None,
                        });
                    }
                }
                t if t.is_error() => {
                    // Only an error quoting our own request ends the test.
                    if let Ok((_, orig_payload)) = parse_icmp_error(&rm) {
                        if let Ok(inner) = IcmpMessage::parse(ep.protocol, &orig_payload) {
                            if inner.icmp_type == IcmpType::EchoRequest {
                                return Ok(LoopbackReport {
                                    addr: peer,
                                    rtt,
                                    icmp_error: Some(rm),
                                });
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }
}
