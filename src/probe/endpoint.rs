//! Socket endpoints.
//!
//! One endpoint type covers the four kernel socket permutations the tester
//! needs: privileged raw ICMP and unprivileged datagram ICMP for each IP
//! family, plus plain UDP for traceroute-style probing. Construction tries
//! the raw flavor first and quietly falls back to the datagram flavor, so
//! callers never branch on privileges.
//!
//! Reads go through `recvmsg` so the IP-layer metadata (TTL/hop limit,
//! traffic class, destination address, inbound interface) arrives as
//! ancillary data next to the payload. Raw IPv4 sockets additionally
//! deliver the full IP header in front of the ICMP message; `read_from`
//! parses and strips it, which keeps the TTL available on systems where
//! the ancillary flavor is unreliable.

use std::io;
use std::mem;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV6};
use std::os::fd::AsRawFd;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::error::Error;
use crate::probe::cookie::{PROTOCOL_ICMP, PROTOCOL_IPV6_ICMP, PROTOCOL_UDP};
use crate::probe::interface::{Interface, needs_zone};
use crate::probe::ip::Ipv4Header;

const CONTROL_SIZE: usize = 256;

#[repr(C, align(8))]
struct ControlBuffer([u8; CONTROL_SIZE]);

/// IP-layer metadata recovered from ancillary data on one read.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ControlData {
    pub(crate) tc: Option<u8>,
    pub(crate) hops: Option<u8>,
    pub(crate) dst: Option<IpAddr>,
    pub(crate) ifindex: Option<u32>,
}

/// One packet as returned by [`Endpoint::read_from`].
pub(crate) struct Received<'a> {
    pub(crate) payload: &'a [u8],
    /// The delivered IPv4 header, raw IPv4 ICMP mode only.
    pub(crate) header: Option<Ipv4Header>,
    pub(crate) control: ControlData,
    pub(crate) peer: IpAddr,
}

/// A probe or maintenance packet connection.
pub(crate) struct Endpoint {
    /// IANA protocol number: ICMP, IPv6-ICMP or UDP.
    pub(crate) protocol: u8,
    /// True when bound as a privileged raw ICMP socket.
    pub(crate) raw_socket: bool,
    /// Local address recorded after bind.
    pub(crate) ip: IpAddr,
    /// Local port, UDP endpoints only.
    pub(crate) sport: u16,
    socket: Socket,
    closed: AtomicBool,
}

/// Opens the endpoint a probe network names.
pub(crate) fn probe_endpoint(network: &str, address: &str) -> Result<Endpoint, Error> {
    match network {
        "ip4:icmp" | "ip4:1" | "ip6:ipv6-icmp" | "ip6:58" => icmp_endpoint(network, address),
        "udp" | "udp4" | "udp6" => udp_endpoint(network, address),
        _ => Err(Error::UnknownNetwork(network.to_string())),
    }
}

/// Opens a maintenance endpoint; only ICMP listeners qualify.
pub(crate) fn maint_endpoint(network: &str, address: &str) -> Result<Endpoint, Error> {
    match network {
        "ip4:icmp" | "ip4:1" | "ip6:ipv6-icmp" | "ip6:58" | "ip4:icmp+ip6:ipv6-icmp" => {
            icmp_endpoint(network, address)
        }
        _ => Err(Error::UnknownNetwork(network.to_string())),
    }
}

fn icmp_endpoint(network: &str, address: &str) -> Result<Endpoint, Error> {
    let ip: IpAddr = if address.is_empty() {
        match network {
            "ip6:ipv6-icmp" | "ip6:58" => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            _ => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    } else {
        address
            .parse()
            .map_err(|_| Error::InvalidAddress(address.to_string()))?
    };

    // The address family decides the socket family, the dual-stack
    // maintenance network included.
    let (domain, proto, protocol) = if ip.is_ipv4() {
        (Domain::IPV4, Protocol::ICMPV4, PROTOCOL_ICMP)
    } else {
        (Domain::IPV6, Protocol::ICMPV6, PROTOCOL_IPV6_ICMP)
    };

    // Raw ICMP needs CAP_NET_RAW; fall back to the unprivileged datagram
    // flavor where the kernel owns echo identifiers.
    let (socket, raw_socket) = match Socket::new(domain, Type::RAW, Some(proto)) {
        Ok(s) => (s, true),
        Err(_) => (
            Socket::new(domain, Type::DGRAM, Some(proto)).map_err(Error::Bind)?,
            false,
        ),
    };
    socket
        .bind(&SockAddr::from(SocketAddr::new(ip, 0)))
        .map_err(Error::Bind)?;

    let ip = local_ip(&socket).unwrap_or(ip);
    Ok(Endpoint {
        protocol,
        raw_socket,
        ip,
        sport: 0,
        socket,
        closed: AtomicBool::new(false),
    })
}

fn udp_endpoint(network: &str, address: &str) -> Result<Endpoint, Error> {
    let sa: SocketAddr = if address.is_empty() {
        match network {
            "udp6" => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
            _ => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        }
    } else {
        address
            .parse()
            .map_err(|_| Error::InvalidAddress(address.to_string()))?
    };
    match network {
        "udp4" if sa.is_ipv6() => return Err(Error::InvalidAddress(address.to_string())),
        "udp6" if sa.is_ipv4() => return Err(Error::InvalidAddress(address.to_string())),
        _ => {}
    }

    let domain = if sa.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).map_err(Error::Bind)?;
    socket
        .bind(&SockAddr::from(sa))
        .map_err(Error::Bind)?;

    let local = socket
        .local_addr()
        .map_err(Error::Bind)?
        .as_socket()
        .ok_or_else(|| Error::InvalidAddress(address.to_string()))?;
    Ok(Endpoint {
        protocol: PROTOCOL_UDP,
        raw_socket: false,
        ip: local.ip(),
        sport: local.port(),
        socket,
        closed: AtomicBool::new(false),
    })
}

fn local_ip(socket: &Socket) -> Option<IpAddr> {
    socket
        .local_addr()
        .ok()
        .and_then(|a| a.as_socket())
        .map(|a| a.ip())
}

impl Endpoint {
    pub(crate) fn socket(&self) -> &Socket {
        &self.socket
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Marks the endpoint closed and shuts the socket down. A second call
    /// reports the endpoint as already closed.
    pub(crate) fn close(&self) -> Result<(), Error> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        // Raw sockets are connectionless; shutdown only serves to wake a
        // pending reader and is allowed to fail.
        let _ = self.socket.shutdown(std::net::Shutdown::Both);
        Ok(())
    }

    /// Reads one packet, its ancillary metadata, and the IPv4 header when
    /// the socket mode delivers one.
    pub(crate) fn read_from<'b>(&self, buf: &'b mut [u8]) -> Result<Received<'b>, Error> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let (n, peer, control) = self.recv_msg(buf)?;
        let mut payload = &buf[..n];
        let mut header = None;
        if self.raw_socket && self.protocol == PROTOCOL_ICMP {
            let h = Ipv4Header::parse(payload)?;
            payload = &payload[h.header_len..];
            header = Some(h);
        }
        Ok(Received {
            payload,
            header,
            control,
            peer,
        })
    }

    /// Transmits one packet to `ip:port`, steered out of `ifi` when given.
    /// ICMP callers pass port zero; the kernel prepends the IP header in
    /// every mode.
    pub(crate) fn write_to(
        &self,
        b: &[u8],
        ip: IpAddr,
        port: u16,
        ifi: Option<&Interface>,
    ) -> Result<usize, Error> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let dst = match ip {
            IpAddr::V4(_) => SocketAddr::new(ip, port),
            IpAddr::V6(a) => {
                let zone = match ifi {
                    Some(ifi) if needs_zone(&a) => ifi.index,
                    _ => 0,
                };
                SocketAddr::V6(SocketAddrV6::new(a, port, 0, zone))
            }
        };
        let dst = SockAddr::from(dst);
        match ifi {
            Some(ifi) => self
                .send_msg(b, &dst, ifi.index, ip.is_ipv6())
                .map_err(Error::Write),
            None => self.socket.send_to(b, &dst).map_err(Error::Write),
        }
    }

    fn recv_msg(&self, buf: &mut [u8]) -> Result<(usize, IpAddr, ControlData), Error> {
        let mut name: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut control = ControlBuffer([0; CONTROL_SIZE]);
        let mut iov = libc::iovec {
            iov_base: buf.as_mut_ptr().cast(),
            iov_len: buf.len(),
        };
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_name = (&raw mut name).cast();
        msg.msg_namelen = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = control.0.as_mut_ptr().cast();
        msg.msg_controllen = CONTROL_SIZE as _;

        let n = unsafe { libc::recvmsg(self.socket.as_raw_fd(), &mut msg, 0) };
        if n < 0 {
            return Err(Error::Read(io::Error::last_os_error()));
        }

        let peer = unsafe { SockAddr::new(name, msg.msg_namelen) }
            .as_socket()
            .map(|a| a.ip())
            .ok_or(Error::ParseIcmp("unusable peer address"))?;
        Ok((n as usize, peer, parse_control(&msg)))
    }

    #[cfg(target_os = "linux")]
    fn send_msg(&self, b: &[u8], dst: &SockAddr, ifindex: u32, v6: bool) -> io::Result<usize> {
        let mut control = ControlBuffer([0; CONTROL_SIZE]);
        let mut iov = libc::iovec {
            iov_base: b.as_ptr() as *mut libc::c_void,
            iov_len: b.len(),
        };
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_name = dst.as_ptr() as *mut libc::c_void;
        msg.msg_namelen = dst.len();
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = control.0.as_mut_ptr().cast();

        unsafe {
            if v6 {
                let len = mem::size_of::<libc::in6_pktinfo>();
                msg.msg_controllen = libc::CMSG_SPACE(len as _) as _;
                let cmsg = libc::CMSG_FIRSTHDR(&msg);
                (*cmsg).cmsg_level = libc::IPPROTO_IPV6;
                (*cmsg).cmsg_type = libc::IPV6_PKTINFO;
                (*cmsg).cmsg_len = libc::CMSG_LEN(len as _) as _;
                let mut pi: libc::in6_pktinfo = mem::zeroed();
                pi.ipi6_ifindex = ifindex as _;
                ptr::write_unaligned(libc::CMSG_DATA(cmsg).cast(), pi);
            } else {
                let len = mem::size_of::<libc::in_pktinfo>();
                msg.msg_controllen = libc::CMSG_SPACE(len as _) as _;
                let cmsg = libc::CMSG_FIRSTHDR(&msg);
                (*cmsg).cmsg_level = libc::IPPROTO_IP;
                (*cmsg).cmsg_type = libc::IP_PKTINFO;
                (*cmsg).cmsg_len = libc::CMSG_LEN(len as _) as _;
                let mut pi: libc::in_pktinfo = mem::zeroed();
                pi.ipi_ifindex = ifindex as _;
                ptr::write_unaligned(libc::CMSG_DATA(cmsg).cast(), pi);
            }
        }

        let n = unsafe { libc::sendmsg(self.socket.as_raw_fd(), &msg, 0) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    #[cfg(not(target_os = "linux"))]
    fn send_msg(&self, b: &[u8], dst: &SockAddr, _ifindex: u32, _v6: bool) -> io::Result<usize> {
        self.socket.send_to(b, dst)
    }
}

fn parse_control(msg: &libc::msghdr) -> ControlData {
    let mut meta = ControlData::default();
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(msg);
        while !cmsg.is_null() {
            let data = libc::CMSG_DATA(cmsg);
            match ((*cmsg).cmsg_level, (*cmsg).cmsg_type) {
                #[cfg(target_os = "linux")]
                (libc::IPPROTO_IP, libc::IP_TTL) => {
                    meta.hops = Some(ptr::read_unaligned(data.cast::<libc::c_int>()) as u8);
                }
                #[cfg(target_os = "linux")]
                (libc::IPPROTO_IP, libc::IP_PKTINFO) => {
                    let pi = ptr::read_unaligned(data.cast::<libc::in_pktinfo>());
                    meta.dst = Some(IpAddr::V4(Ipv4Addr::from(u32::from_be(
                        pi.ipi_addr.s_addr,
                    ))));
                    meta.ifindex = Some(pi.ipi_ifindex as u32);
                }
                #[cfg(target_os = "macos")]
                (libc::IPPROTO_IP, libc::IP_RECVTTL) => {
                    meta.hops = Some(ptr::read_unaligned(data.cast::<u8>()));
                }
                #[cfg(target_os = "macos")]
                (libc::IPPROTO_IP, libc::IP_RECVDSTADDR) => {
                    let addr = ptr::read_unaligned(data.cast::<libc::in_addr>());
                    meta.dst = Some(IpAddr::V4(Ipv4Addr::from(u32::from_be(addr.s_addr))));
                }
                (libc::IPPROTO_IPV6, libc::IPV6_HOPLIMIT) => {
                    meta.hops = Some(ptr::read_unaligned(data.cast::<libc::c_int>()) as u8);
                }
                (libc::IPPROTO_IPV6, libc::IPV6_TCLASS) => {
                    meta.tc = Some(ptr::read_unaligned(data.cast::<libc::c_int>()) as u8);
                }
                (libc::IPPROTO_IPV6, libc::IPV6_PKTINFO) => {
                    let pi = ptr::read_unaligned(data.cast::<libc::in6_pktinfo>());
                    meta.dst = Some(IpAddr::V6(Ipv6Addr::from(pi.ipi6_addr.s6_addr)));
                    meta.ifindex = Some(pi.ipi6_ifindex as u32);
                }
                _ => {}
            }
            cmsg = libc::CMSG_NXTHDR(msg, cmsg);
        }
    }
    meta
}

/// Kernel-option handle for an IPv4 probe connection.
pub struct Ipv4PacketConn<'a> {
    socket: &'a Socket,
}

impl<'a> Ipv4PacketConn<'a> {
    pub(crate) fn new(socket: &'a Socket) -> Ipv4PacketConn<'a> {
        Ipv4PacketConn { socket }
    }

    /// Sets the TTL on outgoing unicast packets.
    pub fn set_ttl(&self, hops: u32) -> io::Result<()> {
        self.socket.set_ttl(hops)
    }

    /// Sets the TOS byte on outgoing packets.
    pub fn set_tos(&self, tos: u32) -> io::Result<()> {
        self.socket.set_tos(tos)
    }

    /// Sets the TTL on outgoing multicast packets.
    pub fn set_multicast_ttl(&self, hops: u32) -> io::Result<()> {
        self.socket.set_multicast_ttl_v4(hops)
    }

    /// Sets the outgoing interface for multicast packets.
    pub fn set_multicast_interface(&self, ifi: &Interface) -> io::Result<()> {
        let addr = ifi.ipv4.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("interface {} has no IPv4 address", ifi.name),
            )
        })?;
        self.socket.set_multicast_if_v4(&addr)
    }
}

/// Kernel-option handle for an IPv6 probe connection.
pub struct Ipv6PacketConn<'a> {
    socket: &'a Socket,
}

impl<'a> Ipv6PacketConn<'a> {
    pub(crate) fn new(socket: &'a Socket) -> Ipv6PacketConn<'a> {
        Ipv6PacketConn { socket }
    }

    /// Sets the hop limit on outgoing unicast packets.
    pub fn set_hop_limit(&self, hops: u32) -> io::Result<()> {
        self.socket.set_unicast_hops_v6(hops)
    }

    /// Sets the traffic class on outgoing packets.
    pub fn set_traffic_class(&self, tclass: u32) -> io::Result<()> {
        self.socket.set_tclass_v6(tclass)
    }

    /// Sets the hop limit on outgoing multicast packets.
    pub fn set_multicast_hop_limit(&self, hops: u32) -> io::Result<()> {
        self.socket.set_multicast_hops_v6(hops)
    }

    /// Sets the outgoing interface for multicast packets.
    pub fn set_multicast_interface(&self, ifi: &Interface) -> io::Result<()> {
        self.socket.set_multicast_if_v6(ifi.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_udp_endpoint_records_ephemeral_port() {
        let ep = probe_endpoint("udp4", "127.0.0.1:0").unwrap();
        assert_eq!(ep.protocol, PROTOCOL_UDP);
        assert!(!ep.raw_socket);
        assert_eq!(ep.ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_ne!(ep.sport, 0);
    }

    #[test]
    fn test_udp_endpoint_empty_address_defaults() {
        let ep = probe_endpoint("udp", "").unwrap();
        assert!(ep.ip.is_ipv4());
        let ep6 = probe_endpoint("udp6", "").unwrap();
        assert!(ep6.ip.is_ipv6());
    }

    #[test]
    fn test_udp_family_mismatch_rejected() {
        assert!(matches!(
            probe_endpoint("udp4", "[::1]:0"),
            Err(Error::InvalidAddress(_))
        ));
        assert!(matches!(
            probe_endpoint("udp6", "127.0.0.1:0"),
            Err(Error::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_unknown_network_rejected() {
        assert!(matches!(
            probe_endpoint("tcp", "127.0.0.1:0"),
            Err(Error::UnknownNetwork(_))
        ));
        assert!(matches!(
            maint_endpoint("udp4", "0.0.0.0:0"),
            Err(Error::UnknownNetwork(_))
        ));
    }

    #[test]
    fn test_icmp_endpoint_when_permitted() {
        // Raw sockets need CAP_NET_RAW and datagram ICMP needs a matching
        // ping_group_range; tolerate both being unavailable.
        match probe_endpoint("ip4:icmp", "127.0.0.1") {
            Ok(ep) => {
                assert_eq!(ep.protocol, PROTOCOL_ICMP);
                assert_eq!(ep.ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
                assert_eq!(ep.sport, 0);
            }
            Err(Error::Bind(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn test_close_is_once_only() {
        let ep = probe_endpoint("udp4", "127.0.0.1:0").unwrap();
        assert!(ep.close().is_ok());
        assert!(matches!(ep.close(), Err(Error::Closed)));
        let mut buf = [0u8; 16];
        assert!(matches!(ep.read_from(&mut buf), Err(Error::Closed)));
        assert!(matches!(
            ep.write_to(b"x", IpAddr::V4(Ipv4Addr::LOCALHOST), 9, None),
            Err(Error::Closed)
        ));
    }

    #[test]
    fn test_udp_write_to_localhost() {
        let ep = probe_endpoint("udp4", "127.0.0.1:0").unwrap();
        let sink = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = sink.local_addr().unwrap().port();
        let n = ep
            .write_to(b"probe", IpAddr::V4(Ipv4Addr::LOCALHOST), port, None)
            .unwrap();
        assert_eq!(n, 5);
        let mut buf = [0u8; 16];
        let (n, _) = sink.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"probe");
    }
}
