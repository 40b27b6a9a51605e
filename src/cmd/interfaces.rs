//! The `sh` subcommand: network facility inspection.

use anyhow::{Result, bail};
use pnet::datalink;

use crate::cli::ShArgs;

pub fn run(args: &ShArgs) -> Result<()> {
    match args.object.as_str() {
        "int" | "interfaces" => interfaces(args),
        object => bail!("unknown facility {object:?}"),
    }
}

fn interfaces(args: &ShArgs) -> Result<()> {
    let mut ift = datalink::interfaces();
    if let Some(name) = &args.name {
        ift.retain(|ifi| &ifi.name == name);
        if ift.is_empty() {
            bail!("interface {name:?} not found");
        }
    }

    for ifi in &ift {
        let status = if ifi.is_up() { "up" } else { "down" };
        if args.brief {
            println!("{}: index={} status={}", ifi.name, ifi.index, status);
            continue;
        }
        let hwaddr = ifi
            .mac
            .map(|mac| mac.to_string())
            .unwrap_or_else(|| "<nil>".to_string());
        println!(
            "{}: index={} status={} hwaddr={}",
            ifi.name, ifi.index, status, hwaddr
        );
        for net in &ifi.ips {
            if net.is_ipv4() && !args.ipv6_only {
                println!("\tinet {net}");
            }
            if net.is_ipv6() && !args.ipv4_only {
                println!("\tinet6 {net}");
            }
        }
    }
    Ok(())
}
