use std::net::IpAddr;

use clap::{Parser, Subcommand};

/// IP-layer OAM diagnostics: connectivity verification, path discovery
/// and facility inspection
#[derive(Parser, Debug)]
#[command(name = "ipoam")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Verify IP-layer connectivity
    #[command(visible_alias = "ping")]
    Cv(CvArgs),
    /// Discover an IP-layer path
    #[command(visible_aliases = ["pathdisc", "traceroute"])]
    Rt(RtArgs),
    /// Show network facility information
    #[command(visible_aliases = ["show", "list"])]
    Sh(ShArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct CvArgs {
    /// Run IPv4 test only
    #[arg(short = '4', long = "ipv4")]
    pub ipv4_only: bool,

    /// Run IPv6 test only
    #[arg(short = '6', long = "ipv6")]
    pub ipv6_only: bool,

    /// Don't use DNS reverse lookup
    #[arg(short = 'n', long = "numeric")]
    pub numeric: bool,

    /// Quiet output except summary
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Run transmission only
    #[arg(short = 'x', long = "xmit-only")]
    pub xmit_only: bool,

    /// Show verbose information
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Iteration count, zero runs until interrupted
    #[arg(long = "count", default_value_t = 0)]
    pub count: u64,

    /// IPv4 TTL or IPv6 hop limit on outgoing unicast packets
    #[arg(long = "hops", default_value_t = 64)]
    pub hops: u32,

    /// IPv4 TTL or IPv6 hop limit on outgoing multicast packets
    #[arg(long = "mchops", default_value_t = 5)]
    pub mchops: u32,

    /// IPv4 TOS or IPv6 traffic class on outgoing packets
    #[arg(long = "tc", default_value_t = 0)]
    pub tc: u32,

    /// ICMP echo payload length
    #[arg(long = "pldlen", default_value_t = 56)]
    pub pldlen: usize,

    /// Seconds between transmitting each echo
    #[arg(long = "wait", default_value_t = 1)]
    pub wait: u64,

    /// Outbound interface name
    #[arg(long = "if", value_name = "NAME")]
    pub interface: Option<String>,

    /// Source IP address
    #[arg(long = "src", value_name = "IP")]
    pub source: Option<IpAddr>,

    /// A hostname, IP address, or comma-separated list of IP addresses
    pub destination: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RtArgs {
    /// Run IPv4 test only
    #[arg(short = '4', long = "ipv4")]
    pub ipv4_only: bool,

    /// Run IPv6 test only
    #[arg(short = '6', long = "ipv6")]
    pub ipv6_only: bool,

    /// Use ICMP for probe packets instead of UDP
    #[arg(short = 'm', long = "icmp")]
    pub use_icmp: bool,

    /// Don't use DNS reverse lookup
    #[arg(short = 'n', long = "numeric")]
    pub numeric: bool,

    /// Show verbose information
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Maximum IPv4 TTL or IPv6 hop limit
    #[arg(long = "hops", default_value_t = 30)]
    pub hops: u32,

    /// Per-hop probe count
    #[arg(long = "count", default_value_t = 3)]
    pub count: u32,

    /// IPv4 TOS or IPv6 traffic class on probe packets
    #[arg(long = "tc", default_value_t = 0)]
    pub tc: u32,

    /// Probe packet payload length
    #[arg(long = "pldlen", default_value_t = 56)]
    pub pldlen: usize,

    /// Base destination port, range will be [port, port+hops)
    #[arg(long = "port", default_value_t = 33434)]
    pub port: u16,

    /// Seconds to wait for a response to each probe
    #[arg(long = "wait", default_value_t = 1)]
    pub wait: u64,

    /// Outbound interface name
    #[arg(long = "if", value_name = "NAME")]
    pub interface: Option<String>,

    /// Source IP address
    #[arg(long = "src", value_name = "IP")]
    pub source: Option<IpAddr>,

    /// A hostname or IP address
    pub destination: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ShArgs {
    /// Show IPv4 information only
    #[arg(short = '4', long = "ipv4")]
    pub ipv4_only: bool,

    /// Show IPv6 information only
    #[arg(short = '6', long = "ipv6")]
    pub ipv6_only: bool,

    /// Show brief information
    #[arg(short = 'b', long)]
    pub brief: bool,

    /// Facility to show: int|interfaces
    pub object: String,

    /// Interface name
    pub name: Option<String>,
}
