//! Test reports and ICMP error dissection.

use std::net::IpAddr;
use std::time::SystemTime;

use crate::error::Error;
use crate::probe::cookie::{PROTOCOL_ICMP, PROTOCOL_IPV6_ICMP};
use crate::probe::interface::Interface;
use crate::probe::ip::{IPV6_HEADER_LEN, IpHeader, Ipv4Header, Ipv6Header};
use crate::probe::packet::IcmpMessage;

/// A test report for one received packet, reply or error.
#[derive(Debug, Default)]
pub struct Report {
    /// On-link operation or parse failure; other fields are populated
    /// only as far as they were derivable before the failure.
    pub error: Option<Error>,
    /// Reception timestamp.
    pub time: Option<SystemTime>,
    /// Source address on the received packet.
    pub src: Option<IpAddr>,
    /// The received ICMP message.
    pub icmp: Option<IcmpMessage>,

    /// Original datagram header when `icmp` is an error message.
    pub orig_header: Option<IpHeader>,
    /// Original datagram payload following the header, IPv4 options
    /// included in the strip.
    pub orig_payload: Option<Vec<u8>>,

    // The remaining fields may stay zero when the tester runs over an
    // unprivileged datagram-oriented ICMP endpoint.
    /// IPv4 TOS or IPv6 traffic class on the received packet.
    pub tc: u8,
    /// IPv4 TTL or IPv6 hop limit on the received packet.
    pub hops: u8,
    /// Destination address on the received packet.
    pub dst: Option<IpAddr>,
    /// Inbound interface of the received packet.
    pub interface: Option<Interface>,
}

/// Recovers the original IP header and transport payload from an ICMP
/// error message.
///
/// The body must carry at least the embedded header plus the RFC 792/4443
/// minimum of eight bytes of original transport data; shorter bodies fail
/// with [`Error::TruncatedIcmpError`].
pub fn parse_icmp_error(m: &IcmpMessage) -> Result<(IpHeader, Vec<u8>), Error> {
    let body = m
        .error_body()
        .ok_or(Error::ParseIcmp("not an ICMP error message"))?;
    let truncated = || Error::TruncatedIcmpError {
        icmp_type: m.icmp_type.to_wire(m.protocol),
        code: m.code,
    };
    match m.protocol {
        PROTOCOL_ICMP => {
            let h = Ipv4Header::parse(&body.data)?;
            if body.data.len() < h.header_len + 8 {
                return Err(truncated());
            }
            let payload = body.data[h.header_len..].to_vec();
            Ok((IpHeader::V4(h), payload))
        }
        PROTOCOL_IPV6_ICMP => {
            let h = Ipv6Header::parse(&body.data)?;
            if body.data.len() < IPV6_HEADER_LEN + 8 {
                return Err(truncated());
            }
            let payload = body.data[IPV6_HEADER_LEN..].to_vec();
            Ok((IpHeader::V6(h), payload))
        }
        _ => Err(Error::ParseIcmp("not an ICMP protocol")),
    }
}

/// Extracts the source and destination ports from the original transport
/// payload of a UDP probe quoted in an ICMP error.
pub fn parse_orig_udp(b: &[u8]) -> Option<(u16, u16)> {
    if b.len() < 4 {
        return None;
    }
    Some((
        u16::from_be_bytes([b[0], b[1]]),
        u16::from_be_bytes([b[2], b[3]]),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ip::IPV4_HEADER_LEN;
    use crate::probe::ip::testdata::{ipv4_header_bytes, ipv6_header_bytes};
    use crate::probe::packet::{IcmpBody, IcmpErrorBody, IcmpType};

    fn error_message(protocol: u8, icmp_type: IcmpType, data: Vec<u8>) -> IcmpMessage {
        IcmpMessage {
            protocol,
            icmp_type,
            code: 0,
            body: IcmpBody::Error(IcmpErrorBody { info: 0, data }),
        }
    }

    #[test]
    fn test_error_parser_roundtrip_v4() {
        let header = ipv4_header_bytes(17, 1);
        let inner = [0xde, 0xad, 0x82, 0x9a, 0x00, 0x08, 0x00, 0x00];
        let mut data = header.clone();
        data.extend_from_slice(&inner);

        let m = error_message(PROTOCOL_ICMP, IcmpType::DestinationUnreachable, data);
        let (h, payload) = parse_icmp_error(&m).unwrap();
        assert_eq!(h, IpHeader::V4(Ipv4Header::parse(&header).unwrap()));
        assert_eq!(payload, inner);
    }

    #[test]
    fn test_error_parser_roundtrip_v4_with_options() {
        let mut header = ipv4_header_bytes(17, 1);
        header[0] = 0x46;
        header.extend_from_slice(&[0x94, 0x04, 0x00, 0x00]);
        let inner = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let mut data = header.clone();
        data.extend_from_slice(&inner);

        let m = error_message(PROTOCOL_ICMP, IcmpType::TimeExceeded, data);
        let (h, payload) = parse_icmp_error(&m).unwrap();
        // Options are stripped along with the fixed header.
        assert_eq!(h.header_len(), IPV4_HEADER_LEN + 4);
        assert_eq!(payload, inner);
    }

    #[test]
    fn test_error_parser_roundtrip_v6() {
        let header = ipv6_header_bytes(17);
        let inner = [0xc0, 0x01, 0x82, 0x9a, 0x00, 0x08, 0x00, 0x00];
        let mut data = header.clone();
        data.extend_from_slice(&inner);

        let m = error_message(PROTOCOL_IPV6_ICMP, IcmpType::TimeExceeded, data);
        let (h, payload) = parse_icmp_error(&m).unwrap();
        assert_eq!(h, IpHeader::V6(Ipv6Header::parse(&header).unwrap()));
        assert_eq!(payload, inner);
    }

    #[test]
    fn test_truncated_error_detected() {
        // IPv4 header only, no inner transport bytes at all.
        let m = error_message(
            PROTOCOL_ICMP,
            IcmpType::DestinationUnreachable,
            ipv4_header_bytes(17, 1),
        );
        assert!(matches!(
            parse_icmp_error(&m),
            Err(Error::TruncatedIcmpError { icmp_type: 3, .. })
        ));

        // Seven of the required eight inner bytes.
        let mut data = ipv6_header_bytes(17);
        data.extend_from_slice(&[0; 7]);
        let m = error_message(PROTOCOL_IPV6_ICMP, IcmpType::PacketTooBig, data);
        assert!(matches!(
            parse_icmp_error(&m),
            Err(Error::TruncatedIcmpError { icmp_type: 2, .. })
        ));
    }

    #[test]
    fn test_non_error_message_rejected() {
        let m = IcmpMessage {
            protocol: PROTOCOL_ICMP,
            icmp_type: IcmpType::EchoReply,
            code: 0,
            body: IcmpBody::Echo(crate::probe::packet::Echo {
                id: 1,
                seq: 1,
                data: vec![],
            }),
        };
        assert!(matches!(parse_icmp_error(&m), Err(Error::ParseIcmp(_))));
    }

    #[test]
    fn test_parse_orig_udp() {
        let b = [0xd4, 0x31, 0x82, 0x9a, 0x00, 0x08, 0x00, 0x00];
        assert_eq!(parse_orig_udp(&b), Some((0xd431, 0x829a)));
        assert_eq!(parse_orig_udp(&b[..3]), None);
    }
}
