//! The pool of IPv4 transport endpoints
//!
//! The translator's outward-facing identity is a set of configured IPv4
//! prefixes. Every address in those prefixes carries one identifier pool per
//! L4 protocol, and a binding exists exactly as long as it holds one
//! `(address, identifier)` loan from here.
//!
//! This pool is locked independently of the BIB/session tables, so a loan
//! can be visible here a moment before (or after) the matching binding is
//! visible there. Callers tolerate that window; see the route admin code.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use num_pool::NumPool;
use rfc6146::{Ipv4Endpoint, L4Proto};

#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum PoolError {
    #[error("Address {0} does not belong to the IPv4 pool")]
    AddressNotInPool(Ipv4Addr),
    #[error("Endpoint {0} is already lent out")]
    Taken(Ipv4Endpoint),
    #[error("No {0} endpoint is left to lend")]
    Exhausted(L4Proto),
    #[error("Endpoint {0} was returned to a full pool")]
    Overflow(Ipv4Endpoint),
    #[error("Invalid port range: [{min}, {max}] with stride {stride}")]
    InvalidPortRange { min: u16, max: u16, stride: u16 },
}

/// One pool address and its three identifier pools
#[derive(Debug)]
struct AddressEntry {
    address: Ipv4Addr,
    udp: NumPool,
    tcp: NumPool,
    icmp: NumPool,
}

impl AddressEntry {
    fn pool_mut(&mut self, proto: L4Proto) -> &mut NumPool {
        match proto {
            L4Proto::Udp => &mut self.udp,
            L4Proto::Tcp => &mut self.tcp,
            L4Proto::Icmp => &mut self.icmp,
        }
    }
}

/// The IPv4 side of the translator: addresses plus lendable identifiers
#[derive(Debug)]
pub struct Ipv4Pool {
    prefixes: Vec<Ipv4Net>,
    addresses: Vec<AddressEntry>,
}

impl Ipv4Pool {
    /// Construct a pool over a prefix list
    ///
    /// TCP and UDP lend ports from `[port_min, port_max]` in steps of
    /// `port_stride`; ICMP identifiers always span the full 16-bit space.
    pub fn new(
        prefixes: &[Ipv4Net],
        port_min: u16,
        port_max: u16,
        port_stride: u16,
    ) -> Result<Self, PoolError> {
        let map_range_error = |_| PoolError::InvalidPortRange {
            min: port_min,
            max: port_max,
            stride: port_stride,
        };

        let mut addresses = Vec::new();
        for prefix in prefixes {
            for address in prefix.hosts() {
                addresses.push(AddressEntry {
                    address,
                    udp: NumPool::new(port_min, port_max, port_stride).map_err(map_range_error)?,
                    tcp: NumPool::new(port_min, port_max, port_stride).map_err(map_range_error)?,
                    icmp: NumPool::new(0, u16::MAX, 1).map_err(map_range_error)?,
                });
            }
        }

        log::info!(
            "IPv4 pool ready: {} addresses across {} prefixes",
            addresses.len(),
            prefixes.len()
        );
        Ok(Self {
            prefixes: prefixes.to_vec(),
            addresses,
        })
    }

    /// Check if an address belongs to the pool's prefixes
    #[must_use]
    pub fn contains(&self, address: Ipv4Addr) -> bool {
        self.prefixes.iter().any(|prefix| prefix.contains(&address))
    }

    /// Borrow a specific endpoint
    #[profiling::function]
    pub fn get(&mut self, proto: L4Proto, endpoint: &Ipv4Endpoint) -> Result<(), PoolError> {
        let entry = self
            .addresses
            .iter_mut()
            .find(|entry| entry.address == endpoint.address)
            .ok_or(PoolError::AddressNotInPool(endpoint.address))?;

        entry
            .pool_mut(proto)
            .get(endpoint.l4_id)
            .map_err(|_| PoolError::Taken(*endpoint))
    }

    /// Borrow any free endpoint, first address with room wins
    #[profiling::function]
    pub fn get_any(&mut self, proto: L4Proto) -> Result<Ipv4Endpoint, PoolError> {
        for entry in &mut self.addresses {
            if let Ok(l4_id) = entry.pool_mut(proto).get_any() {
                return Ok(Ipv4Endpoint::new(entry.address, l4_id));
            }
        }
        Err(PoolError::Exhausted(proto))
    }

    /// Return a borrowed endpoint
    #[profiling::function]
    pub fn ret(&mut self, proto: L4Proto, endpoint: &Ipv4Endpoint) -> Result<(), PoolError> {
        let entry = self
            .addresses
            .iter_mut()
            .find(|entry| entry.address == endpoint.address)
            .ok_or(PoolError::AddressNotInPool(endpoint.address))?;

        entry
            .pool_mut(proto)
            .ret(endpoint.l4_id)
            .map_err(|_| PoolError::Overflow(*endpoint))
    }
}
