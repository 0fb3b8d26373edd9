//! The pool of IPv6 translation prefixes
//!
//! Every IPv4 host is reachable from the IPv6 side as an address formed by
//! splicing its IPv4 address into one of these prefixes, following the
//! [RFC6052 Section 2.2](https://datatracker.ietf.org/doc/html/rfc6052#section-2.2)
//! layout (the byte at bits 64..71 is skipped and left zero).

use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use ipnet::Ipv6Net;

/// All allowed translation prefix lengths according to [RFC6052 Section 2.2](https://datatracker.ietf.org/doc/html/rfc6052#section-2.2)
pub const ALLOWED_PREFIX_LENS: [u8; 6] = [32, 40, 48, 56, 64, 96];

#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum PrefixError {
    #[error("Invalid prefix length: {0}. Must be one of 32, 40, 48, 56, 64, or 96")]
    InvalidPrefixLength(u8),
    #[error("Prefix {0} is already in the pool")]
    Duplicate(Ipv6Net),
    #[error("Prefix {0} is not in the pool")]
    NotFound(Ipv6Net),
    #[error("The pool holds no prefixes")]
    Empty,
}

/// An ordered pool of RFC6052 translation prefixes
///
/// The first prefix is the one new outbound mappings embed into; the rest
/// are still recognized on the way back in.
#[derive(Debug, Default, Clone)]
pub struct PrefixPool {
    prefixes: Vec<Ipv6Net>,
}

impl PrefixPool {
    /// Construct an empty pool
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct a pool from an ordered prefix list
    pub fn with_prefixes(prefixes: &[Ipv6Net]) -> Result<Self, PrefixError> {
        let mut pool = Self::new();
        for prefix in prefixes {
            pool.add(*prefix)?;
        }
        Ok(pool)
    }

    /// Append a prefix to the pool
    pub fn add(&mut self, prefix: Ipv6Net) -> Result<(), PrefixError> {
        if !ALLOWED_PREFIX_LENS.contains(&prefix.prefix_len()) {
            return Err(PrefixError::InvalidPrefixLength(prefix.prefix_len()));
        }

        // Normalize away any stray host bits before comparing or storing
        let prefix = prefix.trunc();
        if self.prefixes.contains(&prefix) {
            return Err(PrefixError::Duplicate(prefix));
        }

        self.prefixes.push(prefix);
        log::debug!("Added translation prefix {}", prefix);
        Ok(())
    }

    /// Remove a prefix from the pool
    pub fn remove(&mut self, prefix: &Ipv6Net) -> Result<(), PrefixError> {
        let prefix = prefix.trunc();
        let index = self
            .prefixes
            .iter()
            .position(|candidate| *candidate == prefix)
            .ok_or(PrefixError::NotFound(prefix))?;
        self.prefixes.remove(index);
        log::debug!("Removed translation prefix {}", prefix);
        Ok(())
    }

    /// The prefix new mappings embed into (the first one)
    #[must_use]
    pub fn peek(&self) -> Option<&Ipv6Net> {
        self.prefixes.first()
    }

    /// Find the pool prefix covering an address
    #[must_use]
    pub fn get(&self, address: &Ipv6Addr) -> Option<&Ipv6Net> {
        self.prefixes.iter().find(|prefix| prefix.contains(address))
    }

    /// Check if any pool prefix covers an address
    #[must_use]
    pub fn contains(&self, address: &Ipv6Addr) -> bool {
        self.get(address).is_some()
    }

    /// Number of prefixes in the pool
    #[must_use]
    pub fn count(&self) -> usize {
        self.prefixes.len()
    }

    /// Iterate the prefixes in pool order
    pub fn iter(&self) -> impl Iterator<Item = &Ipv6Net> {
        self.prefixes.iter()
    }

    /// Embed an IPv4 address into the pool's first prefix
    pub fn embed(&self, address: Ipv4Addr) -> Result<Ipv6Addr, PrefixError> {
        let prefix = self.peek().ok_or(PrefixError::Empty)?;
        Ok(embed_in_prefix(address, prefix))
    }

    /// Recover the IPv4 address embedded in a pool-covered IPv6 address
    #[must_use]
    pub fn extract(&self, address: &Ipv6Addr) -> Option<Ipv4Addr> {
        self.get(address)
            .map(|prefix| extract_from_prefix(address, prefix.prefix_len()))
    }
}

/// Splice an IPv4 address into a translation prefix
fn embed_in_prefix(address: Ipv4Addr, prefix: &Ipv6Net) -> Ipv6Addr {
    let mut bytes = prefix.network().octets();
    let v4 = address.octets();

    let mut slot = (prefix.prefix_len() / 8) as usize;
    for byte in v4 {
        // Bits 64..71 stay zero no matter where the split lands
        if slot == 8 {
            slot += 1;
        }
        bytes[slot] = byte;
        slot += 1;
    }
    Ipv6Addr::from(bytes)
}

/// Reverse of [`embed_in_prefix`]
fn extract_from_prefix(address: &Ipv6Addr, prefix_len: u8) -> Ipv4Addr {
    let bytes = address.octets();
    let mut v4 = [0u8; 4];

    let mut slot = (prefix_len / 8) as usize;
    for byte in &mut v4 {
        if slot == 8 {
            slot += 1;
        }
        *byte = bytes[slot];
        slot += 1;
    }
    Ipv4Addr::from(v4)
}

/// Parses an RFC6052-compliant IPv6 translation prefix from a string
pub fn parse_translation_prefix(string: &str) -> Result<Ipv6Net, String> {
    let net = Ipv6Net::from_str(string).map_err(|error| error.to_string())?;

    if !ALLOWED_PREFIX_LENS.contains(&net.prefix_len()) {
        return Err(format!(
            "Prefix length must be one of {:?}",
            ALLOWED_PREFIX_LENS
        ));
    }

    Ok(net)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr4(string: &str) -> Ipv4Addr {
        string.parse().unwrap()
    }

    fn addr6(string: &str) -> Ipv6Addr {
        string.parse().unwrap()
    }

    #[test]
    fn test_embed_at_every_allowed_length() {
        // The worked examples from RFC6052 Section 2.4
        let cases = [
            ("2001:db8::/32", "2001:db8:c000:221::"),
            ("2001:db8:100::/40", "2001:db8:1c0:2:21::"),
            ("2001:db8:122::/48", "2001:db8:122:c000:2:2100::"),
            ("2001:db8:122:300::/56", "2001:db8:122:3c0:0:221::"),
            ("2001:db8:122:344::/64", "2001:db8:122:344:c0:2:2100::"),
            ("2001:db8:122:344::/96", "2001:db8:122:344::c000:221"),
        ];

        for (prefix, expected) in cases {
            let pool = PrefixPool::with_prefixes(&[prefix.parse().unwrap()]).unwrap();
            let embedded = pool.embed(addr4("192.0.2.33")).unwrap();
            assert_eq!(embedded, addr6(expected), "embed into {}", prefix);
            assert_eq!(
                pool.extract(&embedded),
                Some(addr4("192.0.2.33")),
                "extract from {}",
                prefix
            );
        }
    }

    #[test]
    fn test_prefix_length_validation() {
        let mut pool = PrefixPool::new();
        assert_eq!(
            pool.add("64:ff9b::/95".parse().unwrap()),
            Err(PrefixError::InvalidPrefixLength(95))
        );
        assert!(pool.add("64:ff9b::/96".parse().unwrap()).is_ok());
    }

    #[test]
    fn test_pool_membership_operations() {
        let mut pool = PrefixPool::with_prefixes(&[
            "64:ff9b::/96".parse().unwrap(),
            "2001:db8:122::/48".parse().unwrap(),
        ])
        .unwrap();

        assert_eq!(pool.count(), 2);
        assert_eq!(pool.peek(), Some(&"64:ff9b::/96".parse().unwrap()));
        assert!(pool.contains(&addr6("64:ff9b::c000:221")));
        assert!(pool.contains(&addr6("2001:db8:122:c000:2:2100::")));
        assert!(!pool.contains(&addr6("2001:db8:9::1")));

        // Lookups resolve to the covering prefix
        assert_eq!(
            pool.get(&addr6("64:ff9b::1")),
            Some(&"64:ff9b::/96".parse().unwrap())
        );

        assert_eq!(
            pool.add("64:ff9b::/96".parse().unwrap()),
            Err(PrefixError::Duplicate("64:ff9b::/96".parse().unwrap()))
        );

        pool.remove(&"64:ff9b::/96".parse().unwrap()).unwrap();
        assert_eq!(pool.count(), 1);
        assert!(!pool.contains(&addr6("64:ff9b::1")));
        assert_eq!(
            pool.remove(&"64:ff9b::/96".parse().unwrap()),
            Err(PrefixError::NotFound("64:ff9b::/96".parse().unwrap()))
        );

        // The embed prefix follows the pool order
        assert_eq!(
            pool.embed(addr4("192.0.2.33")).unwrap(),
            addr6("2001:db8:122:c000:2:2100::")
        );
    }

    #[test]
    fn test_empty_pool_cannot_embed() {
        let pool = PrefixPool::new();
        assert_eq!(pool.embed(addr4("192.0.2.1")), Err(PrefixError::Empty));
        assert_eq!(pool.extract(&addr6("64:ff9b::1")), None);
    }
}
