//! The NAT64 engine: pools, tables and the lookups the packet path needs
//!
//! Lock discipline: `table` is the single lock over all binding and session
//! state; `pool4` has its own. The engine may take `pool4` while holding
//! `table`, never the other way around. Because the two are not taken
//! together atomically, an endpoint can be lent out a moment before its
//! binding is visible; the admin path reports that window as a retryable
//! error instead of treating it as corruption.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rfc6146::{
    Ipv4Endpoint, Ipv4Pair, Ipv6Endpoint, Ipv6Pair, L4Proto, StateTable, Tuple4,
};

use self::fragment::Fragment;
use self::icmp::{IcmpErrorKind, IcmpTransmitter, LogTransmitter};
use self::pool4::Ipv4Pool;
use self::pool6::PrefixPool;

pub mod fragment;
pub mod icmp;
pub mod pool4;
pub mod pool6;
pub mod routes;

/// Per-protocol session lifetimes
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub udp: Duration,
    pub tcp: Duration,
    pub icmp: Duration,
}

impl Timeouts {
    #[must_use]
    pub fn for_proto(&self, proto: L4Proto) -> Duration {
        match proto {
            L4Proto::Udp => self.udp,
            L4Proto::Tcp => self.tcp,
            L4Proto::Icmp => self.icmp,
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            udp: Duration::from_secs(300),
            tcp: Duration::from_secs(7200),
            icmp: Duration::from_secs(60),
        }
    }
}

/// Errors on the packet path. These never reach a remote host as anything
/// but a dropped packet or an ICMP error.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum DatapathError {
    #[error("Destination is not covered by any translation prefix")]
    NoTranslationPrefix,
    #[error("No free IPv4 endpoint for a new {0} binding")]
    PoolExhausted(L4Proto),
    #[error("No binding matches the inbound packet")]
    NoBinding,
    #[error("Inbound packet rejected by address-dependent filtering")]
    Filtered,
    #[error("Table refused the update: {0}")]
    Table(#[from] rfc6146::error::Error),
}

/// A point-in-time copy of one binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub v6: Ipv6Endpoint,
    pub v4: Ipv4Endpoint,
    pub is_static: bool,
}

/// A point-in-time copy of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flow {
    pub v6: Ipv6Pair,
    pub v4: Ipv4Pair,
    pub dying_time: Instant,
}

/// A stateful NAT64 instance
pub struct Nat64 {
    /// The one lock over all binding and session state
    table: Mutex<StateTable>,
    /// The IPv4 endpoint pool, independently locked
    pool4: Mutex<Ipv4Pool>,
    /// The IPv6 translation prefixes
    pool6: Mutex<PrefixPool>,
    timeouts: Timeouts,
    icmp: Box<dyn IcmpTransmitter + Send + Sync>,
}

impl Nat64 {
    /// Construct a new NAT64 instance over the given pools
    #[must_use]
    pub fn new(pool4: Ipv4Pool, pool6: PrefixPool, timeouts: Timeouts) -> Self {
        Self {
            table: Mutex::new(StateTable::new()),
            pool4: Mutex::new(pool4),
            pool6: Mutex::new(pool6),
            timeouts,
            icmp: Box::new(LogTransmitter),
        }
    }

    /// Replace the ICMP transmitter seam
    #[must_use]
    pub fn with_transmitter(
        mut self,
        transmitter: Box<dyn IcmpTransmitter + Send + Sync>,
    ) -> Self {
        self.icmp = transmitter;
        self
    }

    pub(crate) fn table(&self) -> MutexGuard<'_, StateTable> {
        self.table.lock().expect("BIB/session lock poisoned")
    }

    pub(crate) fn pool4(&self) -> MutexGuard<'_, Ipv4Pool> {
        self.pool4.lock().expect("IPv4 pool lock poisoned")
    }

    pub(crate) fn pool6(&self) -> MutexGuard<'_, PrefixPool> {
        self.pool6.lock().expect("prefix pool lock poisoned")
    }

    fn deadline(&self, proto: L4Proto) -> Instant {
        Instant::now() + self.timeouts.for_proto(proto)
    }

    /// Process an outbound (IPv6 to IPv4) flow
    ///
    /// First packet from a new IPv6 source endpoint mints a binding by
    /// borrowing an IPv4 endpoint from the pool; every packet creates or
    /// refreshes the flow's session. Returns the translated IPv4 pair.
    #[profiling::function]
    pub fn process_outbound(
        &self,
        src: Ipv6Endpoint,
        dst: Ipv6Endpoint,
        proto: L4Proto,
    ) -> Result<Ipv4Pair, DatapathError> {
        // The destination must carry an embedded IPv4 address
        let remote_v4 = self
            .pool6()
            .extract(&dst.address)
            .ok_or(DatapathError::NoTranslationPrefix)?;

        let mut table = self.table();
        let bib_id = match table.bib_get_by_v6(&src, proto) {
            Some(id) => id,
            None => {
                // Mint a binding for this source endpoint. The pool lend
                // happens before the table insert and under a different
                // lock; on insert failure the lend is undone before the
                // error surfaces.
                let v4 = self
                    .pool4()
                    .get_any(proto)
                    .map_err(|_| DatapathError::PoolExhausted(proto))?;
                match table.bib_add(v4, src, proto, false) {
                    Ok(id) => id,
                    Err(error) => {
                        if let Err(error) = self.pool4().ret(proto, &v4) {
                            log::warn!("Could not undo an endpoint lend: {}", error);
                        }
                        return Err(error.into());
                    }
                }
            }
        };

        let local_v4 = table
            .bib(bib_id)
            .map(|entry| entry.v4)
            .ok_or(rfc6146::error::Error::StaleHandle)?;
        let v4_pair = Ipv4Pair {
            remote: Ipv4Endpoint::new(remote_v4, dst.l4_id),
            local: local_v4,
        };
        let v6_pair = Ipv6Pair {
            remote: dst,
            local: src,
        };

        // Create the session on the first packet, refresh it afterwards
        let deadline = self.deadline(proto);
        match table.session_get_by_v6(&v6_pair, proto) {
            Some(session) => table.session_touch(session, deadline)?,
            None => {
                table.session_add(v4_pair, v6_pair, proto, Some(bib_id), deadline)?;
            }
        }

        Ok(v4_pair)
    }

    /// Process an inbound (IPv4 to IPv6) flow
    ///
    /// Inbound packets only ride existing bindings: no binding means an
    /// unsolicited flow and a rejection. Known peers pass address-dependent
    /// filtering even from a new source port; everyone else is answered
    /// with an ICMP error.
    #[profiling::function]
    pub fn process_inbound(
        &self,
        frag: &Fragment,
        tuple: &Tuple4,
    ) -> Result<Ipv6Pair, DatapathError> {
        // The IPv4 peer's image on the IPv6 side, per the first prefix
        let peer_image = self
            .pool6()
            .embed(tuple.src.address)
            .map_err(|_| DatapathError::NoTranslationPrefix)?;

        let mut table = self.table();
        let Some(bib_id) = table.bib_get_by_v4(&tuple.dst, tuple.proto) else {
            drop(table);
            icmp::send(self.icmp.as_ref(), frag, IcmpErrorKind::AddrUnreachable, 0);
            return Err(DatapathError::NoBinding);
        };
        let (bound_v6, is_static) = table
            .bib(bib_id)
            .map(|entry| (entry.v6, entry.is_static))
            .ok_or(rfc6146::error::Error::StaleHandle)?;

        // Admin-pinned bindings accept any peer; dynamic ones only peers an
        // outbound flow already talked to
        if !is_static && !table.session_allow(tuple) {
            drop(table);
            icmp::send(self.icmp.as_ref(), frag, IcmpErrorKind::Filter, 0);
            return Err(DatapathError::Filtered);
        }
        let v4_pair = Ipv4Pair {
            remote: tuple.src,
            local: tuple.dst,
        };
        let v6_pair = Ipv6Pair {
            remote: Ipv6Endpoint::new(peer_image, tuple.src.l4_id),
            local: bound_v6,
        };

        let deadline = self.deadline(tuple.proto);
        match table.session_get_by_v4(&v4_pair, tuple.proto) {
            Some(session) => table.session_touch(session, deadline)?,
            None => {
                table.session_add(v4_pair, v6_pair, tuple.proto, Some(bib_id), deadline)?;
            }
        }

        Ok(v6_pair)
    }

    /// Look up a binding by its IPv6 endpoint
    #[must_use]
    pub fn bib_get_by_v6(&self, endpoint: &Ipv6Endpoint, proto: L4Proto) -> Option<Binding> {
        let table = self.table();
        let id = table.bib_get_by_v6(endpoint, proto)?;
        table.bib(id).map(|entry| Binding {
            v6: entry.v6,
            v4: entry.v4,
            is_static: entry.is_static,
        })
    }

    /// Look up a binding by its IPv4 endpoint
    #[must_use]
    pub fn bib_get_by_v4(&self, endpoint: &Ipv4Endpoint, proto: L4Proto) -> Option<Binding> {
        let table = self.table();
        let id = table.bib_get_by_v4(endpoint, proto)?;
        table.bib(id).map(|entry| Binding {
            v6: entry.v6,
            v4: entry.v4,
            is_static: entry.is_static,
        })
    }

    /// Look up a session by its IPv4-side pair
    #[must_use]
    pub fn session_get_by_v4(&self, pair: &Ipv4Pair, proto: L4Proto) -> Option<Flow> {
        let table = self.table();
        let id = table.session_get_by_v4(pair, proto)?;
        table.session(id).map(|entry| Flow {
            v6: entry.v6,
            v4: entry.v4,
            dying_time: entry.dying_time,
        })
    }

    /// Look up a session by its IPv6-side pair
    #[must_use]
    pub fn session_get_by_v6(&self, pair: &Ipv6Pair, proto: L4Proto) -> Option<Flow> {
        let table = self.table();
        let id = table.session_get_by_v6(pair, proto)?;
        table.session(id).map(|entry| Flow {
            v6: entry.v6,
            v4: entry.v4,
            dying_time: entry.dying_time,
        })
    }

    /// Address-dependent filtering decision for an inbound tuple
    #[must_use]
    pub fn session_allow(&self, tuple: &Tuple4) -> bool {
        self.table().session_allow(tuple)
    }

    /// Emit an ICMP error on behalf of packet-processing code
    pub fn icmp_send(&self, frag: &Fragment, kind: IcmpErrorKind, info: u32) {
        icmp::send(self.icmp.as_ref(), frag, kind, info);
    }

    /// One reaper pass: collect expired sessions and give the endpoints of
    /// emptied dynamic bindings back to the pool
    #[profiling::function]
    pub fn purge_expired(&self) -> usize {
        let report = self.table().purge_expired(Instant::now());

        // The pool has its own lock; return the endpoints outside the
        // table lock
        if !report.freed_v4.is_empty() {
            let mut pool4 = self.pool4();
            for (proto, endpoint) in &report.freed_v4 {
                log::debug!("Binding expired, returning {} ({})", endpoint, proto);
                if let Err(error) = pool4.ret(*proto, endpoint) {
                    log::warn!("Could not return {} to the pool: {}", endpoint, error);
                }
            }
        }

        report.sessions_removed
    }
}
