//! The OAM tester: a probe endpoint paired with a maintenance endpoint
//! and a background receiver.

use std::net::IpAddr;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::maint::receiver::Maint;
use crate::maint::report::Report;
use crate::probe::cookie::{PROTOCOL_ICMP, PROTOCOL_IPV6_ICMP, PROTOCOL_UDP};
use crate::probe::endpoint::{
    Endpoint, Ipv4PacketConn, Ipv6PacketConn, maint_endpoint, probe_endpoint,
};
use crate::probe::filter;
use crate::probe::interface::Interface;
use crate::probe::packet::{Echo, IcmpMessage};

/// How often the receiver wakes from a pending read to observe shutdown.
const MAINT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Per-packet probe options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlMessage {
    /// ICMP echo identifier.
    pub id: u16,
    /// ICMP echo sequence number.
    pub seq: u16,
    /// UDP destination port.
    pub port: u16,
}

impl Default for ControlMessage {
    fn default() -> ControlMessage {
        ControlMessage {
            id: process::id() as u16,
            seq: 1,
            port: 33434,
        }
    }
}

/// A tester for IP-layer OAM.
///
/// `new` binds a probe endpoint and a maintenance endpoint (which may be
/// one and the same socket) and installs the maintenance receive filters.
/// The receiver thread starts lazily on the first [`Tester::probe`];
/// matched replies and returned errors arrive on [`Tester::report`].
pub struct Tester {
    pconn: Arc<Endpoint>,
    mconn: Arc<Endpoint>,
    maint: Arc<Maint>,
    report_rx: Receiver<Report>,
    cancel: CancellationToken,
    init: AtomicBool,
}

impl Tester {
    /// Creates a tester for the given probe network.
    ///
    /// The network must be one of `"ip4:icmp"`, `"ip4:1"`,
    /// `"ip6:ipv6-icmp"`, `"ip6:58"`, `"udp"`, `"udp4"` or `"udp6"`;
    /// `address` is the local listening address, empty for unspecified.
    ///
    /// ```no_run
    /// use ipoam::Tester;
    ///
    /// let t = Tester::new("ip4:icmp", "0.0.0.0")?;
    /// # Ok::<(), ipoam::Error>(())
    /// ```
    pub fn new(network: &str, address: &str) -> Result<Tester, Error> {
        let pconn = Arc::new(probe_endpoint(network, address)?);

        let open_maint = |maint_network: &str| -> Result<Arc<Endpoint>, Error> {
            match maint_endpoint(maint_network, &pconn.ip.to_string()) {
                Ok(m) => Ok(Arc::new(m)),
                Err(e) => {
                    let _ = pconn.close();
                    Err(e)
                }
            }
        };
        let mconn = match network {
            // An unprivileged datagram probe socket already receives its
            // own replies and errors; a raw probe socket gets a dedicated
            // raw listener so reads carry the full IPv4 header.
            "ip4:icmp" | "ip4:1" => {
                if pconn.raw_socket {
                    open_maint(network)?
                } else {
                    Arc::clone(&pconn)
                }
            }
            "ip6:ipv6-icmp" | "ip6:58" => Arc::clone(&pconn),
            "udp" => open_maint("ip4:icmp+ip6:ipv6-icmp")?,
            "udp4" => open_maint("ip4:icmp")?,
            "udp6" => open_maint("ip6:ipv6-icmp")?,
            _ => {
                let _ = pconn.close();
                return Err(Error::UnknownNetwork(network.to_string()));
            }
        };

        // Receive filters and ancillary-data flags are best-effort: not
        // every socket mode supports them and the receiver discards stray
        // types anyway.
        let _ = mconn.socket().set_read_timeout(Some(MAINT_POLL_INTERVAL));
        if mconn.ip.is_ipv4() {
            let _ = filter::set_icmp_filter(mconn.socket(), &filter::reply_filter4());
            let _ = filter::set_control_flags4(mconn.socket());
        } else {
            let _ = filter::set_icmp6_filter(mconn.socket(), &filter::reply_filter6());
            let _ = filter::set_control_flags6(mconn.socket());
        }

        let (tx, report_rx) = mpsc::sync_channel(1);
        Ok(Tester {
            pconn,
            mconn,
            maint: Arc::new(Maint::new(tx)),
            report_rx,
            cancel: CancellationToken::new(),
            init: AtomicBool::new(false),
        })
    }

    /// Transmits a single probe packet to `ip`, out of `ifi` when given.
    ///
    /// The probe's fingerprint is stored before the packet leaves, so any
    /// reply observes it. Passing `None` for `cm` uses the defaults
    /// `{id: pid, seq: 1, port: 33434}`.
    pub fn probe(
        &self,
        payload: &[u8],
        cm: Option<&ControlMessage>,
        ip: IpAddr,
        ifi: Option<&Interface>,
    ) -> Result<(), Error> {
        if !self.init.swap(true, Ordering::SeqCst) {
            let maint = Arc::clone(&self.maint);
            let conn = Arc::clone(&self.mconn);
            let cancel = self.cancel.clone();
            thread::spawn(move || maint.monitor(&conn, &cancel));
        }

        let default_cm = ControlMessage::default();
        let cm = cm.unwrap_or(&default_cm);

        match self.pconn.protocol {
            PROTOCOL_UDP => {
                self.maint
                    .set_udp_cookie(PROTOCOL_UDP, self.pconn.sport, cm.port);
                self.pconn.write_to(payload, ip, cm.port, ifi).map(drop)
            }
            PROTOCOL_ICMP | PROTOCOL_IPV6_ICMP => {
                self.maint.set_icmp_cookie(self.pconn.protocol, cm.id, cm.seq);
                // The echo request family follows the destination.
                let protocol = if ip.is_ipv4() {
                    PROTOCOL_ICMP
                } else {
                    PROTOCOL_IPV6_ICMP
                };
                let m = IcmpMessage::echo_request(
                    protocol,
                    Echo {
                        id: cm.id,
                        seq: cm.seq,
                        data: payload.to_vec(),
                    },
                );
                if ip.is_multicast() {
                    if let Some(ifi) = ifi {
                        match ip {
                            IpAddr::V4(_) => Ipv4PacketConn::new(self.pconn.socket())
                                .set_multicast_interface(ifi)
                                .map_err(Error::Write)?,
                            IpAddr::V6(_) => Ipv6PacketConn::new(self.pconn.socket())
                                .set_multicast_interface(ifi)
                                .map_err(Error::Write)?,
                        }
                    }
                }
                self.pconn.write_to(&m.marshal(), ip, 0, ifi).map(drop)
            }
            protocol => Err(Error::UnknownNetwork(format!("protocol {protocol}"))),
        }
    }

    /// The buffered test report channel.
    pub fn report(&self) -> &Receiver<Report> {
        &self.report_rx
    }

    /// Enables emitting test reports.
    pub fn start_report(&self) {
        self.maint.start_report();
    }

    /// Disables emitting test reports; arriving packets are dropped
    /// silently until re-enabled.
    pub fn stop_report(&self) {
        self.maint.stop_report();
    }

    /// The kernel-option handle of the probe connection, IPv4 testers
    /// only.
    pub fn ipv4_packet_conn(&self) -> Option<Ipv4PacketConn<'_>> {
        self.pconn
            .ip
            .is_ipv4()
            .then(|| Ipv4PacketConn::new(self.pconn.socket()))
    }

    /// The kernel-option handle of the probe connection, IPv6 testers
    /// only.
    pub fn ipv6_packet_conn(&self) -> Option<Ipv6PacketConn<'_>> {
        self.pconn
            .ip
            .is_ipv6()
            .then(|| Ipv6PacketConn::new(self.pconn.socket()))
    }

    /// Closes both the maintenance and probe connections; an aliased pair
    /// is closed once. The receiver terminates on its next wakeup.
    pub fn close(&self) -> Result<(), Error> {
        self.cancel.cancel();
        let perr = self.pconn.close();
        if Arc::ptr_eq(&self.pconn, &self.mconn) {
            return perr;
        }
        let merr = self.mconn.close();
        perr.and(merr)
    }
}

impl Drop for Tester {
    fn drop(&mut self) {
        self.cancel.cancel();
        let _ = self.pconn.close();
        if !Arc::ptr_eq(&self.pconn, &self.mconn) {
            let _ = self.mconn.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_message_defaults() {
        let cm = ControlMessage::default();
        assert_eq!(cm.id, process::id() as u16);
        assert_eq!(cm.seq, 1);
        assert_eq!(cm.port, 33434);
    }

    #[test]
    fn test_unknown_network_rejected() {
        assert!(matches!(
            Tester::new("tcp4", "0.0.0.0"),
            Err(Error::UnknownNetwork(_))
        ));
    }

    #[test]
    fn test_packet_conn_family_selection() {
        // UDP endpoints bind without privileges everywhere.
        let t = Tester::new("udp4", "127.0.0.1:0");
        let Ok(t) = t else {
            return;
        };
        assert!(t.ipv4_packet_conn().is_some());
        assert!(t.ipv6_packet_conn().is_none());
        let _ = t.close();
    }
}
