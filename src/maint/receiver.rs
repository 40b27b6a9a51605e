//! The maintenance receiver.
//!
//! One background thread per tester reads the maintenance socket,
//! reconstructs IP-layer metadata, and demultiplexes inbound ICMP traffic
//! back to the probe in flight via the cookie. Matching packets become
//! reports on a bounded channel; a slow consumer backpressures the
//! receiver, which in turn backpressures the kernel socket buffer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::SyncSender;
use std::time::SystemTime;

use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::maint::report::{Report, parse_icmp_error, parse_orig_udp};
use crate::probe::cookie::{Cookie, PROTOCOL_ICMP, PROTOCOL_IPV6_ICMP, PROTOCOL_UDP};
use crate::probe::endpoint::Endpoint;
use crate::probe::interface::Interface;
use crate::probe::packet::{IcmpMessage, IcmpType};

/// Shared maintenance state: the current cookie, the emit gate, and the
/// report channel sender.
pub(crate) struct Maint {
    report: SyncSender<Report>,
    cookie: AtomicU64,
    emit: AtomicBool,
}

impl Maint {
    pub(crate) fn new(report: SyncSender<Report>) -> Maint {
        Maint {
            report,
            cookie: AtomicU64::new(0),
            // Emission defaults to enabled.
            emit: AtomicBool::new(true),
        }
    }

    pub(crate) fn set_icmp_cookie(&self, protocol: u8, id: u16, seq: u16) {
        self.cookie
            .store(Cookie::icmp(protocol, id, seq).bits(), Ordering::SeqCst);
    }

    pub(crate) fn set_udp_cookie(&self, protocol: u8, sport: u16, dport: u16) {
        self.cookie
            .store(Cookie::udp(protocol, sport, dport).bits(), Ordering::SeqCst);
    }

    fn cookie(&self) -> Cookie {
        Cookie::from_bits(self.cookie.load(Ordering::SeqCst))
    }

    pub(crate) fn start_report(&self) {
        self.emit.store(true, Ordering::SeqCst);
    }

    pub(crate) fn stop_report(&self) {
        self.emit.store(false, Ordering::SeqCst);
    }

    /// Sends a report unless emission is disabled. A send against a full
    /// channel blocks; a send against a dropped receiver is discarded.
    fn write_report(&self, r: Report) {
        if self.emit.load(Ordering::SeqCst) {
            let _ = self.report.send(r);
        }
    }

    /// The receiver loop. Runs until the endpoint is closed or a read
    /// fails non-recoverably.
    pub(crate) fn monitor(&self, conn: &Endpoint, cancel: &CancellationToken) {
        // Replies accepted regardless of cookie: the kernel rewrites the
        // echo identifier on Linux datagram ICMP sockets, so the sent id
        // never round-trips.
        let kernel_owns_id = cfg!(target_os = "linux") && !conn.raw_socket;
        let mut buf = vec![0u8; 1 << 16];

        loop {
            if cancel.is_cancelled() {
                return;
            }

            let mut r = Report::default();
            let received = match conn.read_from(&mut buf) {
                Ok(received) => received,
                Err(Error::Closed) => return,
                // The read timeout is only there to observe shutdown.
                Err(e) if e.is_would_block() => continue,
                Err(e) => {
                    let transient = e.is_interrupted();
                    r.error = Some(e);
                    self.write_report(r);
                    if transient {
                        continue;
                    }
                    return;
                }
            };

            r.time = Some(SystemTime::now());
            r.src = Some(received.peer);
            r.dst = received.control.dst;
            r.interface = received.control.ifindex.and_then(Interface::by_index);
            let mut tc = received.control.tc;
            let mut hops = received.control.hops;
            if let Some(h) = &received.header {
                // Raw IPv4 maintenance reads deliver the IP header; it
                // backfills what the ancillary data does not carry, and it
                // is authoritative where IP_RECVTTL is unreliable.
                tc = tc.or(Some(h.tos));
                hops = hops.or(Some(h.ttl));
                if r.dst.is_none() {
                    r.dst = Some(h.dst.into());
                }
            }
            r.tc = tc.unwrap_or(0);
            r.hops = hops.unwrap_or(0);

            let m = match IcmpMessage::parse(conn.protocol, received.payload) {
                Ok(m) => m,
                Err(e) => {
                    r.error = Some(e);
                    self.write_report(r);
                    continue;
                }
            };

            // One snapshot per packet; every comparison below uses it.
            let mcookie = self.cookie();

            if m.icmp_type == IcmpType::EchoReply {
                let cookie = m
                    .echo()
                    .map(|echo| Cookie::icmp(conn.protocol, echo.id, echo.seq))
                    .unwrap_or_default();
                r.icmp = Some(m);
                if cookie == mcookie || kernel_owns_id {
                    self.write_report(r);
                }
                continue;
            }

            match parse_icmp_error(&m) {
                Err(e) => {
                    r.icmp = Some(m);
                    r.error = Some(e);
                    self.write_report(r);
                    continue;
                }
                Ok((orig_header, orig_payload)) => {
                    let inner_protocol = orig_header.protocol();
                    r.icmp = Some(m);
                    r.orig_header = Some(orig_header);
                    r.orig_payload = Some(orig_payload);
                    match inner_protocol {
                        PROTOCOL_ICMP | PROTOCOL_IPV6_ICMP => {
                            let inner = match IcmpMessage::parse(
                                conn.protocol,
                                r.orig_payload.as_deref().unwrap_or_default(),
                            ) {
                                Ok(inner) => inner,
                                Err(e) => {
                                    r.error = Some(e);
                                    self.write_report(r);
                                    continue;
                                }
                            };
                            let cookie = inner
                                .echo()
                                .map(|echo| Cookie::icmp(conn.protocol, echo.id, echo.seq))
                                .unwrap_or_default();
                            if cookie == mcookie || kernel_owns_id {
                                self.write_report(r);
                            }
                        }
                        PROTOCOL_UDP => {
                            let cookie = parse_orig_udp(r.orig_payload.as_deref().unwrap_or_default())
                                .map(|(sport, dport)| Cookie::udp(PROTOCOL_UDP, sport, dport))
                                .unwrap_or_default();
                            if cookie == mcookie {
                                self.write_report(r);
                            }
                        }
                        // Unknown inner transport, e.g. an IPv6 fragment
                        // extension header; the application can filter.
                        _ => self.write_report(r),
                    }
                }
            }
        }
    }
}
