//! The `cv` subcommand: repeated echo rounds with per-destination
//! statistics.

use std::collections::HashMap;
use std::net::IpAddr;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use ipoam::{ControlMessage, IcmpType, Report, Tester};

use crate::cli::CvArgs;
use crate::cmd;

#[derive(Default)]
struct CvStat {
    transmitted: u64,
    received: u64,
    op_errors: u64,
    icmp_errors: u64,
    min_rtt: Option<Duration>,
    max_rtt: Duration,
    rtt_sum: Duration,
}

impl CvStat {
    fn on_arrival(&mut self, rtt: Duration, r: &Report) {
        if r.error.is_some() {
            self.op_errors += 1;
            return;
        }
        let is_reply = r
            .icmp
            .as_ref()
            .is_some_and(|m| m.icmp_type == IcmpType::EchoReply);
        if !is_reply {
            self.icmp_errors += 1;
            return;
        }
        self.received += 1;
        self.min_rtt = Some(self.min_rtt.map_or(rtt, |min| min.min(rtt)));
        self.max_rtt = self.max_rtt.max(rtt);
        self.rtt_sum += rtt;
    }
}

pub fn run(args: &CvArgs) -> Result<()> {
    let mut args = args.clone();
    if let Some(src) = args.source {
        // A source address pins the test to its family.
        if src.is_ipv4() {
            args.ipv4_only = true;
        } else {
            args.ipv6_only = true;
        }
    }
    let dsts = cmd::resolve_destinations(&args.destination, args.ipv4_only, args.ipv6_only)?;
    let ifi = cmd::outbound_interface(args.interface.as_deref())?;
    let payload = cmd::fill_payload(args.pldlen);
    let wait = Duration::from_secs(args.wait.max(1));

    let mut testers: [Option<Tester>; 2] = [None, None];
    for ip in &dsts {
        if ip.is_ipv4() && testers[0].is_none() {
            let address = args
                .source
                .map(|s| s.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            let t = Tester::new("ip4:icmp", &address).context("IPv4 tester")?;
            if args.xmit_only {
                t.stop_report();
            }
            if let Some(p) = t.ipv4_packet_conn() {
                let _ = p.set_ttl(args.hops);
                let _ = p.set_multicast_ttl(args.mchops);
                let _ = p.set_tos(args.tc);
            }
            testers[0] = Some(t);
        }
        if ip.is_ipv6() && testers[1].is_none() {
            let address = args
                .source
                .map(|s| s.to_string())
                .unwrap_or_else(|| "::".to_string());
            let t = Tester::new("ip6:ipv6-icmp", &address).context("IPv6 tester")?;
            if args.xmit_only {
                t.stop_report();
            }
            if let Some(p) = t.ipv6_packet_conn() {
                let _ = p.set_hop_limit(args.hops);
                let _ = p.set_multicast_hop_limit(args.mchops);
                let _ = p.set_traffic_class(args.tc);
            }
            testers[1] = Some(t);
        }
    }

    println!(
        "Connectivity verification for {}: {} bytes payload",
        args.destination,
        payload.len()
    );

    let mut stats: HashMap<IpAddr, CvStat> = HashMap::new();
    let mut round = 0u64;
    loop {
        round += 1;
        let cm = ControlMessage {
            id: std::process::id() as u16,
            seq: (round & 0xffff) as u16,
            port: 33434,
        };
        let begin = Instant::now();

        for ip in &dsts {
            let tester = if ip.is_ipv4() {
                testers[0].as_ref()
            } else {
                testers[1].as_ref()
            };
            let Some(tester) = tester else { continue };
            let st = stats.entry(*ip).or_default();
            st.transmitted += 1;
            if let Err(err) = tester.probe(&payload, Some(&cm), *ip, ifi.as_ref()) {
                st.op_errors += 1;
                if !args.quiet {
                    println!("error={:?}", err.to_string());
                }
            }
        }

        // Drain reports until the next round is due.
        let deadline = begin + wait;
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            let mut idle = true;
            for tester in testers.iter().flatten() {
                if let Ok(r) = tester.report().try_recv() {
                    idle = false;
                    let rtt = begin.elapsed();
                    if let Some(src) = r.src {
                        stats.entry(src).or_default().on_arrival(rtt, &r);
                    }
                    print_report(&args, &r, rtt);
                }
            }
            if idle {
                thread::sleep(remaining.min(Duration::from_millis(5)));
            }
        }

        if args.count > 0 && round == args.count {
            break;
        }
    }

    if args.verbose {
        print_summary(&args.destination, &stats, args.numeric);
    }
    for tester in testers.into_iter().flatten() {
        let _ = tester.close();
    }
    Ok(())
}

fn print_report(args: &CvArgs, r: &Report, rtt: Duration) {
    if args.quiet {
        return;
    }
    if let Some(err) = &r.error {
        println!("error={:?}", err.to_string());
        return;
    }
    let Some(m) = &r.icmp else { return };
    let src = r
        .src
        .map(|ip| cmd::host_string(ip, args.numeric))
        .unwrap_or_else(|| "?".to_string());
    if m.icmp_type != IcmpType::EchoReply {
        println!(
            "from={} icmp.type={:?} icmp.code={} rtt={:?}",
            src,
            m.icmp_type.to_string(),
            m.code,
            rtt
        );
        return;
    }
    let Some(echo) = m.echo() else { return };
    if !args.verbose {
        println!(
            "{} bytes from={} echo.seq={} rtt={:?}",
            echo.data.len(),
            src,
            echo.seq,
            rtt
        );
        return;
    }
    let mut line = format!("{} bytes", echo.data.len());
    match r.dst {
        Some(dst) => line += &format!(
            " tc={:#x} hops={} from={} to={}",
            r.tc,
            r.hops,
            src,
            cmd::host_string(dst, args.numeric)
        ),
        None => line += &format!(" from={src}"),
    }
    if let Some(ifi) = &r.interface {
        line += &format!(" if={}", ifi.name);
    }
    line += &format!(" echo.id={} echo.seq={} rtt={:?}", echo.id, echo.seq, rtt);
    println!("{line}");
}

fn print_summary(dsts: &str, stats: &HashMap<IpAddr, CvStat>, numeric: bool) {
    println!("\nStatistical information for {dsts}:");
    for (ip, st) in stats {
        let mut line = format!("{}:", cmd::host_string(*ip, numeric));
        if st.transmitted > 0 && st.received <= st.transmitted {
            let loss = (st.transmitted - st.received) as f64 * 100.0 / st.transmitted as f64;
            line += &format!(" loss={loss:.1}%");
        }
        line += &format!(
            " rcvd={} sent={} op.err={} icmp.err={}",
            st.received, st.transmitted, st.op_errors, st.icmp_errors
        );
        let avg = if st.received > 0 {
            st.rtt_sum / st.received as u32
        } else {
            Duration::ZERO
        };
        line += &format!(
            " min={:?} avg={:?} max={:?}",
            st.min_rtt.unwrap_or_default(),
            avg,
            st.max_rtt
        );
        println!("{line}");
    }
}
