//! The `rt` subcommand: hop-by-hop path discovery over UDP or ICMP
//! probes.

use std::net::IpAddr;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result, bail};

use ipoam::{ControlMessage, IcmpType, Report, Tester};

use crate::cli::RtArgs;
use crate::cmd;

pub fn run(args: &RtArgs) -> Result<()> {
    let mut args = args.clone();
    if let Some(src) = args.source {
        if src.is_ipv4() {
            args.ipv4_only = true;
        } else {
            args.ipv6_only = true;
        }
    }
    let dsts = cmd::resolve_destinations(&args.destination, args.ipv4_only, args.ipv6_only)?;
    let Some(dst) = dsts.first().copied() else {
        bail!("destination for {} not found", args.destination);
    };
    let ifi = cmd::outbound_interface(args.interface.as_deref())?;

    let address = |with_port: bool| match (args.source, with_port, dst.is_ipv4()) {
        (Some(src), true, true) => format!("{src}:0"),
        (Some(src), true, false) => format!("[{src}]:0"),
        (Some(src), false, _) => src.to_string(),
        (None, true, true) => "0.0.0.0:0".to_string(),
        (None, true, false) => "[::]:0".to_string(),
        (None, false, true) => "0.0.0.0".to_string(),
        (None, false, false) => "::".to_string(),
    };
    let network = match (dst.is_ipv4(), args.use_icmp) {
        (true, false) => "udp4",
        (true, true) => "ip4:icmp",
        (false, false) => "udp6",
        (false, true) => "ip6:ipv6-icmp",
    };
    let ipt = Tester::new(network, &address(!args.use_icmp))
        .with_context(|| format!("{network} tester"))?;
    if let Some(p) = ipt.ipv4_packet_conn() {
        let _ = p.set_tos(args.tc);
    }
    if let Some(p) = ipt.ipv6_packet_conn() {
        let _ = p.set_traffic_class(args.tc);
    }

    let max_hops = args.hops.clamp(1, 255);
    let payload = cmd::fill_payload(args.pldlen);
    let wait = Duration::from_secs(args.wait.max(1));
    println!(
        "Path discovery for {}: {} hops max, {} per-hop probes, {} bytes payload",
        args.destination,
        max_hops,
        args.count,
        payload.len()
    );
    if dsts.len() > 1 {
        println!(
            "Warning: {} has multiple addresses, using {}",
            args.destination, dst
        );
    }

    let mut cm = ControlMessage {
        id: std::process::id() as u16,
        seq: 1,
        port: args.port,
    };
    for ttl in 1..=max_hops {
        let mut rows: Vec<(Option<IpAddr>, Duration, Option<Report>)> = Vec::new();
        let mut reached = false;

        for _ in 0..args.count.max(1) {
            if let Some(p) = ipt.ipv4_packet_conn() {
                let _ = p.set_ttl(ttl);
            }
            if let Some(p) = ipt.ipv6_packet_conn() {
                let _ = p.set_hop_limit(ttl);
            }
            let begin = SystemTime::now();
            if let Err(err) = ipt.probe(&payload, Some(&cm), dst, ifi.as_ref()) {
                println!("error={:?}", err.to_string());
            }
            cm.seq = if cm.seq == u16::MAX { 1 } else { cm.seq + 1 };
            cm.port = if cm.port == u16::MAX {
                args.port
            } else {
                cm.port + 1
            };

            match ipt.report().recv_timeout(wait) {
                Ok(r) => {
                    let rtt = r
                        .time
                        .and_then(|t| t.duration_since(begin).ok())
                        .unwrap_or_default();
                    reached = reached || has_reached(&r);
                    rows.push((r.src, rtt, Some(r)));
                }
                Err(_) => rows.push((None, wait, None)),
            }
        }

        print_hop(ttl, rows, &args);
        if reached {
            break;
        }
    }

    let _ = ipt.close();
    Ok(())
}

/// A destination answered: an echo reply, or port/destination
/// unreachable from the target itself.
fn has_reached(r: &Report) -> bool {
    if r.error.is_some() {
        return false;
    }
    r.icmp.as_ref().is_some_and(|m| {
        matches!(
            m.icmp_type,
            IcmpType::EchoReply | IcmpType::DestinationUnreachable
        )
    })
}

fn print_hop(ttl: u32, mut rows: Vec<(Option<IpAddr>, Duration, Option<Report>)>, args: &RtArgs) {
    rows.sort_by_key(|(src, _, _)| *src);
    let mut line = format!("{ttl:>3}  ");
    let mut prev: Option<Option<IpAddr>> = None;
    for (src, rtt, r) in &rows {
        if r.as_ref().is_some_and(|r| r.error.is_some()) {
            continue;
        }
        if prev == Some(*src) {
            line += &format!("  {rtt:?}");
            continue;
        }
        if prev.is_some() {
            line += "\n     ";
        }
        match src {
            None => line += "*",
            Some(ip) => {
                match cmd::rev_name(*ip, args.numeric) {
                    Some(name) => line += &format!("{name} ({ip})"),
                    None => line += &ip.to_string(),
                }
                if args.verbose {
                    if let Some(ifi) = r.as_ref().and_then(|r| r.interface.as_ref()) {
                        line += &format!(" if={}", ifi.name);
                    }
                }
            }
        }
        line += &format!("  {rtt:?}");
        prev = Some(*src);
    }
    println!("{line}");
}
