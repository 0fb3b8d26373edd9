//! Static route administration
//!
//! Static routes are admin-created BIB entries: they let a chosen IPv6
//! endpoint keep a well-known IPv4 endpoint, and they survive their sessions
//! (the reaper never evicts them). Requests arrive from the control channel
//! and every failure maps to a stable numeric code.

use serde::{Deserialize, Serialize};

use rfc6146::{error::Error as TableError, Ipv4Endpoint, Ipv6Endpoint, L4Proto};

use super::pool4::PoolError;
use super::Nat64;

/// Which address family identifies the entry a request refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum L3Proto {
    Ipv4,
    Ipv6,
}

/// One route administration request, as carried over the control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRequest {
    pub l4_proto: L4Proto,
    pub l3_proto: L3Proto,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v4: Option<Ipv4Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v6: Option<Ipv6Endpoint>,
}

/// Errors surfaced verbatim to the administrator
///
/// Each variant owns one stable code; the codes are part of the control
/// protocol and must never be renumbered.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum AdminError {
    #[error("No entry matches the request")]
    NotFound,
    #[error("The endpoint is already mapped")]
    AlreadyExists,
    /// The pool reported the endpoint taken while the BIB has no record of
    /// it. The packet path lends endpoints under the pool lock a moment
    /// before the binding is published under the table lock, so this can be
    /// an in-flight insert rather than a leak. The contract is: retry, and
    /// report it if it persists.
    #[error("The IPv4 endpoint is lent out but not in the BIB; try again")]
    Reinsert,
    #[error("The IPv4 pool is exhausted")]
    Exhausted,
    #[error("An endpoint was returned to a full pool")]
    Overflow,
    #[error("Malformed request: {0}")]
    InvalidArg(String),
    #[error("Out of memory")]
    AllocFailed,
    #[error("Unexpected lower-level failure")]
    Unknown,
}

impl AdminError {
    /// The stable code carried on the wire
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::NotFound => -2,
            Self::AlreadyExists => -17,
            Self::Reinsert => -11,
            Self::Exhausted => -3,
            Self::Overflow => -75,
            Self::InvalidArg(_) => -22,
            Self::AllocFailed => -12,
            Self::Unknown => -5,
        }
    }
}

impl From<TableError> for AdminError {
    fn from(error: TableError) -> Self {
        match error {
            TableError::AlreadyExists => Self::AlreadyExists,
            _ => Self::Unknown,
        }
    }
}

impl From<PoolError> for AdminError {
    fn from(error: PoolError) -> Self {
        match error {
            PoolError::Taken(_) => Self::Reinsert,
            PoolError::Exhausted(_) => Self::Exhausted,
            PoolError::Overflow(_) => Self::Overflow,
            PoolError::AddressNotInPool(address) => {
                Self::InvalidArg(format!("address {} does not belong to the IPv4 pool", address))
            }
            PoolError::InvalidPortRange { .. } => Self::Unknown,
        }
    }
}

impl Nat64 {
    /// Install a static binding
    pub fn add_static_route(&self, request: &RouteRequest) -> Result<(), AdminError> {
        let (Some(v4), Some(v6)) = (request.v4, request.v6) else {
            return Err(AdminError::InvalidArg(
                "adding a route requires both endpoints".to_string(),
            ));
        };

        if !self.pool4().contains(v4.address) {
            log::error!("The address {} does not belong to the IPv4 pool", v4.address);
            return Err(AdminError::InvalidArg(format!(
                "address {} does not belong to the IPv4 pool",
                v4.address
            )));
        }

        let mut table = self.table();

        // Either side already mapped means the whole request is a re-insert
        if let Some(id) = table
            .bib_get_by_v6(&v6, request.l4_proto)
            .or_else(|| table.bib_get_by_v4(&v4, request.l4_proto))
        {
            if let Some(entry) = table.bib(id) {
                log::error!("{} is already mapped to {}", entry.v6, entry.v4);
            }
            return Err(AdminError::AlreadyExists);
        }

        // Borrow the exact endpoint. A failure here, with neither index
        // holding the binding, is the documented pool/table race; the
        // admin is told to retry rather than being handed a phantom
        // corruption report.
        if let Err(error) = self.pool4().get(request.l4_proto, &v4) {
            if matches!(error, PoolError::Taken(_)) {
                log::error!(
                    "Port {} of {} is lent out but has no BIB entry. Please try again; \
                     if the problem persists, please report it.",
                    v4.l4_id,
                    v4.address
                );
            }
            return Err(error.into());
        }

        match table.bib_add(v4, v6, request.l4_proto, true) {
            Ok(_) => {
                log::info!("Static {} route: {} <-> {}", request.l4_proto, v6, v4);
                Ok(())
            }
            Err(error) => {
                // Leak-free failure path: the borrow is undone before the
                // error surfaces
                if let Err(error) = self.pool4().ret(request.l4_proto, &v4) {
                    log::warn!("Could not undo an endpoint lend: {}", error);
                }
                Err(error.into())
            }
        }
    }

    /// Delete a binding and every session riding on it
    pub fn delete_static_route(&self, request: &RouteRequest) -> Result<(), AdminError> {
        let mut table = self.table();

        let bib_id = match request.l3_proto {
            L3Proto::Ipv6 => {
                let v6 = request.v6.ok_or_else(|| {
                    AdminError::InvalidArg("deleting by IPv6 requires the v6 endpoint".to_string())
                })?;
                table.bib_get_by_v6(&v6, request.l4_proto)
            }
            L3Proto::Ipv4 => {
                let v4 = request.v4.ok_or_else(|| {
                    AdminError::InvalidArg("deleting by IPv4 requires the v4 endpoint".to_string())
                })?;
                table.bib_get_by_v4(&v4, request.l4_proto)
            }
        }
        .ok_or(AdminError::NotFound)?;

        // Tear down the whole session chain before the binding itself
        for session in table.sessions_of_bib(bib_id) {
            if let Err(error) = table.session_remove(session) {
                log::error!("A session refused to die: {}", error);
                return Err(AdminError::Unknown);
            }
        }

        let entry = table.bib_remove(bib_id).map_err(|error| {
            log::error!("Binding removal failed despite validations: {}", error);
            AdminError::Unknown
        })?;
        drop(table);

        log::info!(
            "Deleted {} route: {} <-> {}",
            entry.proto,
            entry.v6,
            entry.v4
        );
        if let Err(error) = self.pool4().ret(entry.proto, &entry.v4) {
            log::warn!("Could not return {} to the pool: {}", entry.v4, error);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nat::pool6::PrefixPool;
    use crate::nat::{pool4::Ipv4Pool, Timeouts};
    use rfc6146::{Ipv4Pair, Ipv6Pair};
    use std::time::Duration;

    fn test_nat() -> Nat64 {
        let pool4 = Ipv4Pool::new(&["2.2.2.2/32".parse().unwrap()], 9000, 9999, 1).unwrap();
        let pool6 = PrefixPool::with_prefixes(&["64:ff9b::/96".parse().unwrap()]).unwrap();
        Nat64::new(pool4, pool6, Timeouts::default())
    }

    fn add_request(v4: &str, v6: &str) -> RouteRequest {
        RouteRequest {
            l4_proto: L4Proto::Tcp,
            l3_proto: L3Proto::Ipv6,
            v4: Some(v4.parse().unwrap()),
            v6: Some(v6.parse().unwrap()),
        }
    }

    #[test]
    fn test_add_and_delete_round_trip() {
        let nat = test_nat();
        let endpoint: Ipv4Endpoint = "2.2.2.2#9556".parse().unwrap();

        nat.add_static_route(&add_request("2.2.2.2#9556", "::3#9556"))
            .unwrap();

        let binding = nat
            .bib_get_by_v6(&"::3#9556".parse().unwrap(), L4Proto::Tcp)
            .unwrap();
        assert!(binding.is_static);
        assert_eq!(binding.v4, endpoint);

        // Same v6 endpoint again: rejected
        assert_eq!(
            nat.add_static_route(&add_request("2.2.2.2#9557", "::3#9556")),
            Err(AdminError::AlreadyExists)
        );

        // Delete by the v4 side
        nat.delete_static_route(&RouteRequest {
            l4_proto: L4Proto::Tcp,
            l3_proto: L3Proto::Ipv4,
            v4: Some(endpoint),
            v6: None,
        })
        .unwrap();
        assert_eq!(nat.bib_get_by_v4(&endpoint, L4Proto::Tcp), None);

        // The endpoint went back to the pool: it is borrowable again
        assert!(nat.pool4().contains(endpoint.address));
        nat.pool4().get(L4Proto::Tcp, &endpoint).unwrap();
    }

    #[test]
    fn test_delete_tears_down_sessions() {
        let nat = test_nat();
        nat.add_static_route(&add_request("2.2.2.2#9556", "::3#9556"))
            .unwrap();

        // Hang two flows off the static binding
        {
            let mut table = nat.table();
            let bib = table
                .bib_get_by_v6(&"::3#9556".parse().unwrap(), L4Proto::Tcp)
                .unwrap();
            for n in 0..2u16 {
                table
                    .session_add(
                        Ipv4Pair {
                            remote: format!("198.51.100.3#{}", 7000 + n).parse().unwrap(),
                            local: "2.2.2.2#9556".parse().unwrap(),
                        },
                        Ipv6Pair {
                            remote: format!("64:ff9b::c633:6403#{}", 7000 + n).parse().unwrap(),
                            local: "::3#9556".parse().unwrap(),
                        },
                        L4Proto::Tcp,
                        Some(bib),
                        std::time::Instant::now() + Duration::from_secs(60),
                    )
                    .unwrap();
            }
            assert_eq!(table.session_count(L4Proto::Tcp), 2);
        }

        nat.delete_static_route(&RouteRequest {
            l4_proto: L4Proto::Tcp,
            l3_proto: L3Proto::Ipv6,
            v4: None,
            v6: Some("::3#9556".parse().unwrap()),
        })
        .unwrap();

        let table = nat.table();
        assert_eq!(table.session_count(L4Proto::Tcp), 0);
        assert_eq!(table.bib_count(L4Proto::Tcp), 0);
    }

    #[test]
    fn test_add_validates_the_request() {
        let nat = test_nat();

        // Address outside the pool
        let result = nat.add_static_route(&add_request("9.9.9.9#80", "::3#80"));
        assert!(matches!(result, Err(AdminError::InvalidArg(_))));

        // Missing endpoint
        let result = nat.add_static_route(&RouteRequest {
            l4_proto: L4Proto::Tcp,
            l3_proto: L3Proto::Ipv6,
            v4: Some("2.2.2.2#80".parse().unwrap()),
            v6: None,
        });
        assert!(matches!(result, Err(AdminError::InvalidArg(_))));
    }

    #[test]
    fn test_delete_missing_entry_reports_not_found() {
        let nat = test_nat();
        assert_eq!(
            nat.delete_static_route(&RouteRequest {
                l4_proto: L4Proto::Udp,
                l3_proto: L3Proto::Ipv6,
                v4: None,
                v6: Some("::9#9".parse().unwrap()),
            }),
            Err(AdminError::NotFound)
        );
    }

    #[test]
    fn test_pool_race_reports_reinsert() {
        let nat = test_nat();

        // Simulate the packet path having lent the endpoint without the
        // binding being published yet
        nat.pool4()
            .get(L4Proto::Tcp, &"2.2.2.2#9556".parse().unwrap())
            .unwrap();

        assert_eq!(
            nat.add_static_route(&add_request("2.2.2.2#9556", "::3#9556")),
            Err(AdminError::Reinsert)
        );
        // And nothing was inserted
        assert_eq!(nat.table().bib_count(L4Proto::Tcp), 0);
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(AdminError::NotFound.code(), -2);
        assert_eq!(AdminError::AlreadyExists.code(), -17);
        assert_eq!(AdminError::Reinsert.code(), -11);
        assert_eq!(AdminError::Exhausted.code(), -3);
        assert_eq!(AdminError::Overflow.code(), -75);
        assert_eq!(AdminError::InvalidArg(String::new()).code(), -22);
        assert_eq!(AdminError::AllocFailed.code(), -12);
        assert_eq!(AdminError::Unknown.code(), -5);
    }
}
