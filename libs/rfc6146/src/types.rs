use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// The L4 protocols the translator keeps state for
///
/// Every table in this crate is partitioned three ways on this tag; an entry
/// only ever exists in the partition matching its own protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum L4Proto {
    Udp,
    Tcp,
    Icmp,
}

impl L4Proto {
    pub const ALL: [Self; 3] = [Self::Udp, Self::Tcp, Self::Icmp];

    /// Index of this protocol's table partition
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for L4Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Udp => "udp",
            Self::Tcp => "tcp",
            Self::Icmp => "icmp",
        })
    }
}

/// An IPv4 transport endpoint: an address plus a port or ICMP identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ipv4Endpoint {
    pub address: Ipv4Addr,
    pub l4_id: u16,
}

/// An IPv6 transport endpoint: an address plus a port or ICMP identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ipv6Endpoint {
    pub address: Ipv6Addr,
    pub l4_id: u16,
}

impl Ipv4Endpoint {
    #[must_use]
    pub const fn new(address: Ipv4Addr, l4_id: u16) -> Self {
        Self { address, l4_id }
    }
}

impl Ipv6Endpoint {
    #[must_use]
    pub const fn new(address: Ipv6Addr, l4_id: u16) -> Self {
        Self { address, l4_id }
    }
}

impl fmt::Display for Ipv4Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.address, self.l4_id)
    }
}

impl fmt::Display for Ipv6Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.address, self.l4_id)
    }
}

/// Parse error for the `address#l4-id` endpoint notation
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
#[error("Invalid endpoint: {0:?}. Expected the form `address#l4-id`")]
pub struct EndpointParseError(String);

impl FromStr for Ipv4Endpoint {
    type Err = EndpointParseError;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        let (address, l4_id) = split_endpoint(string)?;
        Ok(Self {
            address: address.parse().map_err(|_| EndpointParseError(string.to_string()))?,
            l4_id,
        })
    }
}

impl FromStr for Ipv6Endpoint {
    type Err = EndpointParseError;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        let (address, l4_id) = split_endpoint(string)?;
        Ok(Self {
            address: address.parse().map_err(|_| EndpointParseError(string.to_string()))?,
            l4_id,
        })
    }
}

fn split_endpoint(string: &str) -> Result<(&str, u16), EndpointParseError> {
    let (address, l4_id) = string
        .rsplit_once('#')
        .ok_or_else(|| EndpointParseError(string.to_string()))?;
    let l4_id = l4_id
        .parse()
        .map_err(|_| EndpointParseError(string.to_string()))?;
    Ok((address, l4_id))
}

// Endpoints cross the admin boundary as `address#l4-id` strings, so that is
// also how they serialize
macro_rules! endpoint_serde {
    ($type: ty) => {
        impl Serialize for $type {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $type {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let string = String::deserialize(deserializer)?;
                string.parse().map_err(de::Error::custom)
            }
        }
    };
}

endpoint_serde!(Ipv4Endpoint);
endpoint_serde!(Ipv6Endpoint);

/// The two IPv4 endpoints of a flow, as seen on the IPv4 side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Pair {
    /// The IPv4 host's endpoint
    pub remote: Ipv4Endpoint,
    /// The translator's endpoint (borrowed from the IPv4 pool)
    pub local: Ipv4Endpoint,
}

/// The two IPv6 endpoints of a flow, as seen on the IPv6 side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv6Pair {
    /// The pool6-mapped image of the IPv4 host
    pub remote: Ipv6Endpoint,
    /// The IPv6 host's endpoint (the one the binding is keyed on)
    pub local: Ipv6Endpoint,
}

/// The relevant half of an inbound IPv4 packet's 5-tuple
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tuple4 {
    pub src: Ipv4Endpoint,
    pub dst: Ipv4Endpoint,
    pub proto: L4Proto,
}
