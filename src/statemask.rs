//! Entrypoint for the `statemask` binary.
//!
//! This binary is the state plane of a stateful NAT64: it owns the binding
//! and session tables, lends IPv4 transport endpoints to IPv6-sourced
//! flows, reaps expired sessions, and serves route administration over a
//! Unix socket. Packet I/O is the deployment's business; everything here is
//! reachable through the library crate.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use statemask::args::Args;
use statemask::common::logging::enable_logger;
use statemask::common::profiler::start_puffin_server;
use statemask::control;
use statemask::nat::pool4::Ipv4Pool;
use statemask::nat::pool6::PrefixPool;
use statemask::nat::routes::{L3Proto, RouteRequest};
use statemask::nat::{Nat64, Timeouts};

#[tokio::main]
pub async fn main() {
    // Parse CLI args
    let args = Args::parse();

    // Initialize logging
    enable_logger(args.verbose);

    // Load the config from wherever the user put it
    let config = args.data().unwrap();

    // Maybe start the profiler server
    let _puffin_server = start_puffin_server(&args.profiler_args);

    // Build the pools
    let pool4 = Ipv4Pool::new(
        &config.pool4_prefixes,
        config.port_min,
        config.port_max,
        config.port_stride,
    )
    .unwrap_or_else(|error| {
        log::error!("Could not build the IPv4 pool: {}", error);
        std::process::exit(1);
    });
    let pool6 = PrefixPool::with_prefixes(&[config.translation_prefix]).unwrap_or_else(|error| {
        log::error!("Could not build the prefix pool: {}", error);
        std::process::exit(1);
    });

    // Build the engine
    let nat = Arc::new(Nat64::new(
        pool4,
        pool6,
        Timeouts {
            udp: Duration::from_secs(config.udp_timeout),
            tcp: Duration::from_secs(config.tcp_timeout),
            icmp: Duration::from_secs(config.icmp_timeout),
        },
    ));

    // Install the static routes from the config before anything flows
    for route in &config.static_routes {
        if let Err(error) = nat.add_static_route(&RouteRequest {
            l4_proto: route.proto,
            l3_proto: L3Proto::Ipv6,
            v4: Some(route.v4),
            v6: Some(route.v6),
        }) {
            log::error!(
                "Could not install static route {} <-> {}: {}",
                route.v6,
                route.v4,
                error
            );
            std::process::exit(1);
        }
    }

    // Reap expired sessions in the background
    {
        let nat = nat.clone();
        let interval = Duration::from_secs(config.reaper_interval);
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            loop {
                timer.tick().await;
                let removed = nat.purge_expired();
                if removed > 0 {
                    log::debug!("Reaped {} expired sessions", removed);
                }
            }
        });
    }

    // Serve admin requests until we are told to stop
    tokio::select! {
        result = control::serve(nat, &args.control_socket) => {
            if let Err(error) = result {
                log::error!("Control channel failed: {}", error);
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("Shutting down");
        }
    }
}
