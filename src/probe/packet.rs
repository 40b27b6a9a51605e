//! ICMP message marshaling and parsing.
//!
//! The wire model is deliberately small: echo bodies for probes and
//! replies, a generic error body for the four error messages the
//! maintenance receiver cares about, and a raw catch-all for everything
//! else. The ICMPv4 checksum is computed by pnet; ICMPv6 checksums are
//! left to the kernel, which fills them on both raw and datagram ICMPv6
//! sockets.

use std::fmt;

use pnet::packet::icmp::{IcmpPacket, MutableIcmpPacket, checksum};

use crate::error::Error;
use crate::probe::cookie::{PROTOCOL_ICMP, PROTOCOL_IPV6_ICMP};

pub const ICMPV4_ECHO_REPLY: u8 = 0;
pub const ICMPV4_DEST_UNREACHABLE: u8 = 3;
pub const ICMPV4_ECHO_REQUEST: u8 = 8;
pub const ICMPV4_TIME_EXCEEDED: u8 = 11;
pub const ICMPV4_PARAMETER_PROBLEM: u8 = 12;

pub const ICMPV6_DEST_UNREACHABLE: u8 = 1;
pub const ICMPV6_PACKET_TOO_BIG: u8 = 2;
pub const ICMPV6_TIME_EXCEEDED: u8 = 3;
pub const ICMPV6_PARAMETER_PROBLEM: u8 = 4;
pub const ICMPV6_ECHO_REQUEST: u8 = 128;
pub const ICMPV6_ECHO_REPLY: u8 = 129;

/// ICMP header size shared by v4 and v6.
pub const ICMP_HEADER_LEN: usize = 8;

/// Protocol-independent ICMP message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpType {
    EchoRequest,
    EchoReply,
    DestinationUnreachable,
    /// ICMPv6 only.
    PacketTooBig,
    TimeExceeded,
    ParameterProblem,
    Other(u8),
}

impl IcmpType {
    /// Maps a wire type value under the given ICMP protocol.
    pub fn from_wire(protocol: u8, t: u8) -> IcmpType {
        match (protocol, t) {
            (PROTOCOL_ICMP, ICMPV4_ECHO_REQUEST) | (PROTOCOL_IPV6_ICMP, ICMPV6_ECHO_REQUEST) => {
                IcmpType::EchoRequest
            }
            (PROTOCOL_ICMP, ICMPV4_ECHO_REPLY) | (PROTOCOL_IPV6_ICMP, ICMPV6_ECHO_REPLY) => {
                IcmpType::EchoReply
            }
            (PROTOCOL_ICMP, ICMPV4_DEST_UNREACHABLE)
            | (PROTOCOL_IPV6_ICMP, ICMPV6_DEST_UNREACHABLE) => IcmpType::DestinationUnreachable,
            (PROTOCOL_IPV6_ICMP, ICMPV6_PACKET_TOO_BIG) => IcmpType::PacketTooBig,
            (PROTOCOL_ICMP, ICMPV4_TIME_EXCEEDED) | (PROTOCOL_IPV6_ICMP, ICMPV6_TIME_EXCEEDED) => {
                IcmpType::TimeExceeded
            }
            (PROTOCOL_ICMP, ICMPV4_PARAMETER_PROBLEM)
            | (PROTOCOL_IPV6_ICMP, ICMPV6_PARAMETER_PROBLEM) => IcmpType::ParameterProblem,
            (_, t) => IcmpType::Other(t),
        }
    }

    /// The wire type value under the given ICMP protocol.
    pub fn to_wire(self, protocol: u8) -> u8 {
        let v6 = protocol == PROTOCOL_IPV6_ICMP;
        match self {
            IcmpType::EchoRequest => {
                if v6 { ICMPV6_ECHO_REQUEST } else { ICMPV4_ECHO_REQUEST }
            }
            IcmpType::EchoReply => {
                if v6 { ICMPV6_ECHO_REPLY } else { ICMPV4_ECHO_REPLY }
            }
            IcmpType::DestinationUnreachable => {
                if v6 { ICMPV6_DEST_UNREACHABLE } else { ICMPV4_DEST_UNREACHABLE }
            }
            IcmpType::PacketTooBig => ICMPV6_PACKET_TOO_BIG,
            IcmpType::TimeExceeded => {
                if v6 { ICMPV6_TIME_EXCEEDED } else { ICMPV4_TIME_EXCEEDED }
            }
            IcmpType::ParameterProblem => {
                if v6 { ICMPV6_PARAMETER_PROBLEM } else { ICMPV4_PARAMETER_PROBLEM }
            }
            IcmpType::Other(t) => t,
        }
    }

    /// True for the error messages that embed the original datagram.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            IcmpType::DestinationUnreachable
                | IcmpType::PacketTooBig
                | IcmpType::TimeExceeded
                | IcmpType::ParameterProblem
        )
    }
}

impl fmt::Display for IcmpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IcmpType::EchoRequest => write!(f, "echo request"),
            IcmpType::EchoReply => write!(f, "echo reply"),
            IcmpType::DestinationUnreachable => write!(f, "destination unreachable"),
            IcmpType::PacketTooBig => write!(f, "packet too big"),
            IcmpType::TimeExceeded => write!(f, "time exceeded"),
            IcmpType::ParameterProblem => write!(f, "parameter problem"),
            IcmpType::Other(t) => write!(f, "type {t}"),
        }
    }
}

/// An ICMP echo request or reply body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Echo {
    pub id: u16,
    pub seq: u16,
    pub data: Vec<u8>,
}

/// The body of an ICMP error message.
///
/// `info` holds bytes 4..8 of the message: the MTU of a packet-too-big,
/// the pointer of a parameter problem, zero otherwise. `data` is the
/// embedded original datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcmpErrorBody {
    pub info: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IcmpBody {
    Echo(Echo),
    Error(IcmpErrorBody),
    Raw(Vec<u8>),
}

/// A parsed ICMP message, v4 or v6 according to `protocol`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcmpMessage {
    /// `PROTOCOL_ICMP` or `PROTOCOL_IPV6_ICMP`.
    pub protocol: u8,
    pub icmp_type: IcmpType,
    pub code: u8,
    pub body: IcmpBody,
}

impl IcmpMessage {
    /// Builds an echo request ready for [`IcmpMessage::marshal`].
    pub fn echo_request(protocol: u8, echo: Echo) -> IcmpMessage {
        IcmpMessage {
            protocol,
            icmp_type: IcmpType::EchoRequest,
            code: 0,
            body: IcmpBody::Echo(echo),
        }
    }

    /// Parses an ICMP message from `b` under the given protocol.
    pub fn parse(protocol: u8, b: &[u8]) -> Result<IcmpMessage, Error> {
        if b.len() < 4 {
            return Err(Error::ParseIcmp("short ICMP header"));
        }
        let icmp_type = IcmpType::from_wire(protocol, b[0]);
        let code = b[1];
        let body = match icmp_type {
            IcmpType::EchoRequest | IcmpType::EchoReply => {
                if b.len() < ICMP_HEADER_LEN {
                    return Err(Error::ParseIcmp("short ICMP echo body"));
                }
                IcmpBody::Echo(Echo {
                    id: u16::from_be_bytes([b[4], b[5]]),
                    seq: u16::from_be_bytes([b[6], b[7]]),
                    data: b[8..].to_vec(),
                })
            }
            t if t.is_error() => {
                if b.len() < ICMP_HEADER_LEN {
                    return Err(Error::ParseIcmp("short ICMP error body"));
                }
                IcmpBody::Error(IcmpErrorBody {
                    info: u32::from_be_bytes([b[4], b[5], b[6], b[7]]),
                    data: b[8..].to_vec(),
                })
            }
            _ => IcmpBody::Raw(b[4..].to_vec()),
        };
        Ok(IcmpMessage {
            protocol,
            icmp_type,
            code,
            body,
        })
    }

    /// Serializes the message. The ICMPv4 checksum is filled in; the
    /// ICMPv6 checksum is left zero for the kernel.
    pub fn marshal(&self) -> Vec<u8> {
        let mut b = vec![0u8; 4];
        b[0] = self.icmp_type.to_wire(self.protocol);
        b[1] = self.code;
        match &self.body {
            IcmpBody::Echo(echo) => {
                b.extend_from_slice(&echo.id.to_be_bytes());
                b.extend_from_slice(&echo.seq.to_be_bytes());
                b.extend_from_slice(&echo.data);
            }
            IcmpBody::Error(body) => {
                b.extend_from_slice(&body.info.to_be_bytes());
                b.extend_from_slice(&body.data);
            }
            IcmpBody::Raw(data) => b.extend_from_slice(data),
        }
        if self.protocol == PROTOCOL_ICMP {
            let sum = IcmpPacket::new(&b).map(|packet| checksum(&packet));
            if let Some(sum) = sum {
                if let Some(mut packet) = MutableIcmpPacket::new(&mut b) {
                    packet.set_checksum(sum);
                }
            }
        }
        b
    }

    /// The echo body, for requests and replies.
    pub fn echo(&self) -> Option<&Echo> {
        match &self.body {
            IcmpBody::Echo(echo) => Some(echo),
            _ => None,
        }
    }

    /// The error body, for the four error message types.
    pub fn error_body(&self) -> Option<&IcmpErrorBody> {
        match &self.body {
            IcmpBody::Error(body) => Some(body),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marshal_echo_request_v4() {
        let m = IcmpMessage::echo_request(
            PROTOCOL_ICMP,
            Echo {
                id: 0x1234,
                seq: 0x5678,
                data: b"HELLO-R-U-THERE".to_vec(),
            },
        );
        let b = m.marshal();
        assert_eq!(b[0], ICMPV4_ECHO_REQUEST);
        assert_eq!(b[1], 0);
        // The stored checksum must agree with a fresh computation over
        // the marshaled message.
        let packet = IcmpPacket::new(&b).unwrap();
        assert_ne!(packet.get_checksum(), 0);
        assert_eq!(packet.get_checksum(), checksum(&packet));
    }

    #[test]
    fn test_marshal_echo_request_v6_leaves_checksum() {
        let m = IcmpMessage::echo_request(
            PROTOCOL_IPV6_ICMP,
            Echo {
                id: 1,
                seq: 2,
                data: vec![0xaa; 4],
            },
        );
        let b = m.marshal();
        assert_eq!(b[0], ICMPV6_ECHO_REQUEST);
        assert_eq!(u16::from_be_bytes([b[2], b[3]]), 0);
    }

    #[test]
    fn test_parse_echo_reply_roundtrip() {
        let echo = Echo {
            id: 0xbeef,
            seq: 7,
            data: vec![1, 2, 3, 4],
        };
        let m = IcmpMessage {
            protocol: PROTOCOL_ICMP,
            icmp_type: IcmpType::EchoReply,
            code: 0,
            body: IcmpBody::Echo(echo.clone()),
        };
        let parsed = IcmpMessage::parse(PROTOCOL_ICMP, &m.marshal()).unwrap();
        assert_eq!(parsed.icmp_type, IcmpType::EchoReply);
        assert_eq!(parsed.echo(), Some(&echo));
    }

    #[test]
    fn test_parse_error_message() {
        let b = [
            ICMPV4_TIME_EXCEEDED,
            0,
            0,
            0,
            0,
            0,
            0,
            0,
            0x45,
            0,
            0,
            0,
        ];
        let m = IcmpMessage::parse(PROTOCOL_ICMP, &b).unwrap();
        assert_eq!(m.icmp_type, IcmpType::TimeExceeded);
        assert!(m.icmp_type.is_error());
        assert_eq!(m.error_body().unwrap().data, vec![0x45, 0, 0, 0]);
    }

    #[test]
    fn test_parse_short_input() {
        assert!(IcmpMessage::parse(PROTOCOL_ICMP, &[8, 0]).is_err());
        assert!(IcmpMessage::parse(PROTOCOL_ICMP, &[8, 0, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_type_mapping_is_per_protocol() {
        // Wire value 3 means time exceeded under ICMPv6 but destination
        // unreachable under ICMPv4.
        assert_eq!(
            IcmpType::from_wire(PROTOCOL_IPV6_ICMP, 3),
            IcmpType::TimeExceeded
        );
        assert_eq!(
            IcmpType::from_wire(PROTOCOL_ICMP, 3),
            IcmpType::DestinationUnreachable
        );
        assert_eq!(
            IcmpType::PacketTooBig.to_wire(PROTOCOL_IPV6_ICMP),
            ICMPV6_PACKET_TOO_BIG
        );
    }
}
