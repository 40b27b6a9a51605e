//! End-to-end tester scenarios over the loopback network.
//!
//! Raw ICMP sockets need CAP_NET_RAW and datagram ICMP needs a matching
//! ping_group_range, so every socket-dependent test tolerates a bind
//! failure and asserts only on what it could actually exercise.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use ipoam::error::Error;
use ipoam::{ControlMessage, IcmpType, Tester};

fn tester(network: &str, address: &str) -> Option<Tester> {
    match Tester::new(network, address) {
        Ok(t) => Some(t),
        Err(Error::Bind(_)) => None,
        Err(e) => panic!("unexpected constructor error: {e}"),
    }
}

#[test]
fn test_icmp_echo_roundtrip_localhost() {
    let Some(t) = tester("ip4:icmp", "127.0.0.1") else {
        return;
    };
    let cm = ControlMessage {
        id: 0xbeef,
        seq: 1,
        port: 0,
    };
    if t.probe(
        b"HELLO-R-U-THERE",
        Some(&cm),
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        None,
    )
    .is_err()
    {
        let _ = t.close();
        return;
    }

    // Loopback replies arrive nearly immediately or not at all.
    if let Ok(r) = t.report().recv_timeout(Duration::from_secs(1)) {
        assert!(r.error.is_none(), "unexpected report error: {:?}", r.error);
        assert_eq!(r.src, Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        assert!(r.time.is_some());
        let m = r.icmp.expect("report without ICMP message");
        assert_eq!(m.icmp_type, IcmpType::EchoReply);
        let echo = m.echo().expect("echo reply without echo body");
        assert_eq!(echo.seq, 1);
        assert_eq!(echo.data, b"HELLO-R-U-THERE");
    }
    let _ = t.close();
}

#[test]
fn test_probe_with_default_control_message() {
    let Some(t) = tester("ip4:icmp", "127.0.0.1") else {
        return;
    };
    if t.probe(b"HELLO", None, IpAddr::V4(Ipv4Addr::LOCALHOST), None)
        .is_err()
    {
        let _ = t.close();
        return;
    }
    if let Ok(r) = t.report().recv_timeout(Duration::from_secs(1)) {
        let m = r.icmp.expect("report without ICMP message");
        // Defaults: seq starts at one.
        assert_eq!(m.echo().map(|e| e.seq), Some(1));
    }
    let _ = t.close();
}

#[test]
fn test_stop_report_suppresses_emission() {
    let Some(t) = tester("ip4:icmp", "127.0.0.1") else {
        return;
    };
    t.stop_report();
    if t.probe(b"QUIET", None, IpAddr::V4(Ipv4Addr::LOCALHOST), None)
        .is_err()
    {
        let _ = t.close();
        return;
    }
    assert!(
        t.report().recv_timeout(Duration::from_millis(500)).is_err(),
        "report emitted while emission was stopped"
    );
    t.start_report();
    let _ = t.close();
}

#[test]
fn test_close_terminates_receiver_and_is_once_only() {
    let Some(t) = tester("ip4:icmp", "127.0.0.1") else {
        return;
    };
    // One probe with a reply nobody drains, then close under the
    // receiver's feet.
    let _ = t.probe(b"BYE", None, IpAddr::V4(Ipv4Addr::LOCALHOST), None);
    assert!(t.close().is_ok());
    assert!(matches!(t.close(), Err(Error::Closed)));
    // The receiver observes the closed endpoint within its poll interval;
    // the channel drains whatever was in flight and then disconnects.
    let _ = t.report().recv_timeout(Duration::from_millis(600));
}

#[test]
fn test_close_without_probe() {
    // Closing a tester whose receiver never started must not hang.
    let Some(t) = tester("ip4:icmp", "127.0.0.1") else {
        return;
    };
    assert!(t.close().is_ok());
}

#[test]
fn test_udp_tester_construction() {
    // A UDP tester needs a raw ICMP maintenance socket, so this only
    // works with privileges.
    let Some(t) = tester("udp4", "0.0.0.0:0") else {
        return;
    };
    assert!(t.ipv4_packet_conn().is_some());
    assert!(t.ipv6_packet_conn().is_none());
    assert!(t.close().is_ok());
}

#[test]
fn test_ipv6_tester_aliases_endpoints() {
    let Some(t) = tester("ip6:ipv6-icmp", "::1") else {
        return;
    };
    assert!(t.ipv6_packet_conn().is_some());
    assert!(t.ipv4_packet_conn().is_none());
    // Aliased probe/maintenance endpoints close exactly once.
    assert!(t.close().is_ok());
    assert!(matches!(t.close(), Err(Error::Closed)));
}

#[test]
fn test_unknown_network() {
    assert!(matches!(
        Tester::new("ip4:tcp", "0.0.0.0"),
        Err(Error::UnknownNetwork(_))
    ));
}
