//! CLI arguments and config file structure for the `statemask` binary

use std::path::PathBuf;

use cfg_if::cfg_if;
use ipnet::{Ipv4Net, Ipv6Net};
use rfc6146::{Ipv4Endpoint, Ipv6Endpoint, L4Proto};

use crate::nat::pool6::parse_translation_prefix;

// Used to trick the build process into including a CLI argument based on a feature flag
cfg_if! {
    if #[cfg(feature = "profiler")] {
        #[derive(Debug, clap::Args)]
        pub struct ProfilerArgs {
            /// Expose the puffin HTTP server on this endpoint
            #[clap(long)]
            pub puffin_endpoint: Option<std::net::SocketAddr>,
        }
    } else {
        #[derive(Debug, clap::Args)]
        pub struct ProfilerArgs;
    }
}

#[derive(Debug, clap::Parser)]
#[clap(author, version, about="Stateful NAT64 session and binding daemon", long_about = None)]
pub struct Args {
    #[command(flatten)]
    config_data: Option<Config>,

    /// Path to a config file to read
    #[clap(short = 'c', long = "config", conflicts_with = "Config")]
    config_file: Option<PathBuf>,

    /// Path of the control socket for route administration
    #[clap(long, default_value = "/run/statemask.sock")]
    pub control_socket: PathBuf,

    #[command(flatten)]
    pub profiler_args: ProfilerArgs,

    /// Enable verbose logging
    #[clap(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn data(&self) -> Result<Config, Box<dyn std::error::Error>> {
        match self.config_file {
            Some(ref path) => {
                // Read the data from the config file
                let file = std::fs::File::open(path).map_err(|error| match error.kind() {
                    std::io::ErrorKind::NotFound => {
                        log::error!("Config file not found: {}", path.display());
                        std::process::exit(1)
                    }
                    _ => error,
                })?;
                let data: Config = serde_json::from_reader(file)?;

                // We need at least one pool prefix
                if data.pool4_prefixes.is_empty() {
                    log::error!("No pool prefixes specified. At least one prefix must be specified in the `pool4` property of the config file");
                    std::process::exit(1);
                }

                Ok(data)
            }
            None => match &self.config_data {
                Some(data) => Ok(data.clone()),
                None => {
                    log::error!("No configuration provided. Either use --config to specify a file or set the configuration via CLI args (see --help)");
                    std::process::exit(1)
                }
            },
        }
    }
}

/// Program configuration. Specifiable via either CLI args or a config file
#[derive(Debug, clap::Args, serde::Deserialize, Clone)]
#[group()]
pub struct Config {
    /// IPv4 prefixes to lend transport endpoints from
    #[clap(long = "pool-prefix")]
    #[serde(rename = "pool4")]
    pub pool4_prefixes: Vec<Ipv4Net>,

    /// RFC6052 IPv6 translation prefix
    #[clap(long, default_value_t = ("64:ff9b::/96").parse().unwrap(), value_parser = parse_translation_prefix)]
    #[serde(rename = "prefix", default = "default_translation_prefix")]
    pub translation_prefix: Ipv6Net,

    /// Static bindings to install at boot
    #[clap(skip)]
    #[serde(default)]
    pub static_routes: Vec<StaticRoute>,

    /// UDP session timeout in seconds
    #[clap(long, default_value = "300")]
    #[serde(default = "default_udp_timeout")]
    pub udp_timeout: u64,

    /// TCP session timeout in seconds
    #[clap(long, default_value = "7200")]
    #[serde(default = "default_tcp_timeout")]
    pub tcp_timeout: u64,

    /// ICMP session timeout in seconds
    #[clap(long, default_value = "60")]
    #[serde(default = "default_icmp_timeout")]
    pub icmp_timeout: u64,

    /// Lowest TCP/UDP port the pool lends out
    #[clap(long, default_value = "1024")]
    #[serde(default = "default_port_min")]
    pub port_min: u16,

    /// Highest TCP/UDP port the pool lends out
    #[clap(long, default_value = "65535")]
    #[serde(default = "default_port_max")]
    pub port_max: u16,

    /// Stride between lendable ports (2 with an even `port_min` lends even
    /// ports only)
    #[clap(long, default_value = "1")]
    #[serde(default = "default_port_stride")]
    pub port_stride: u16,

    /// Seconds between expiry reaper passes
    #[clap(long, default_value = "2")]
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval: u64,
}

/// One static binding as written in the config file
#[derive(Debug, Clone, serde::Deserialize)]
pub struct StaticRoute {
    pub proto: L4Proto,
    pub v4: Ipv4Endpoint,
    pub v6: Ipv6Endpoint,
}

fn default_translation_prefix() -> Ipv6Net {
    ("64:ff9b::/96").parse().unwrap()
}

fn default_udp_timeout() -> u64 {
    300
}

fn default_tcp_timeout() -> u64 {
    7200
}

fn default_icmp_timeout() -> u64 {
    60
}

fn default_port_min() -> u16 {
    1024
}

fn default_port_max() -> u16 {
    65535
}

fn default_port_stride() -> u16 {
    1
}

fn default_reaper_interval() -> u64 {
    2
}
