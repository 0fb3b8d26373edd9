//! The Binding Information Base
//!
//! A binding pairs one IPv6 transport endpoint with one IPv4 transport
//! endpoint for as long as any flow between the two address families needs
//! it. Within a protocol's table both endpoints are unique, so the two
//! indices are two injective views over the same entry set.

use std::net::Ipv6Addr;

use crate::arena::Handle;
use crate::error::{Error, Result};
use crate::table::{Chain, StateTable};
use crate::types::{Ipv4Endpoint, Ipv6Endpoint, L4Proto};

/// A stable handle to a BIB entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BibId(pub(crate) Handle);

/// One BIB entry: an IPv6 endpoint bound to a borrowed IPv4 endpoint
#[derive(Debug, PartialEq, Eq)]
pub struct BibEntry {
    pub v4: Ipv4Endpoint,
    pub v6: Ipv6Endpoint,
    pub proto: L4Proto,
    /// Static entries come from the admin surface and are exempt from
    /// auto-eviction when their last session dies
    pub is_static: bool,
    /// Chain of sessions anchored on this binding
    pub(crate) sessions: Chain,
}

impl BibEntry {
    /// Number of sessions currently anchored on this binding
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len
    }

    /// Check if any session is still anchored on this binding
    #[must_use]
    pub fn has_sessions(&self) -> bool {
        self.sessions.len > 0
    }
}

impl StateTable {
    /// Insert a new binding into one protocol's table
    ///
    /// The entry lands in both indices or in neither: if either endpoint is
    /// already bound, nothing is modified.
    #[profiling::function]
    pub fn bib_add(
        &mut self,
        v4: Ipv4Endpoint,
        v6: Ipv6Endpoint,
        proto: L4Proto,
        is_static: bool,
    ) -> Result<BibId> {
        let table = self.table(proto);
        if table.bib_v6.contains_key(&v6) || table.bib_v4.contains_key(&v4) {
            return Err(Error::AlreadyExists);
        }

        let id = BibId(self.bibs.insert(BibEntry {
            v4,
            v6,
            proto,
            is_static,
            sessions: Chain::default(),
        }));
        let table = self.table_mut(proto);
        table.bib_v6.insert(v6, id);
        table.bib_v4.insert(v4, id);

        log::debug!("New {} binding: {} <-> {}", proto, v6, v4);
        Ok(id)
    }

    /// Look up a binding by its IPv4 endpoint
    #[must_use]
    #[profiling::function]
    pub fn bib_get_by_v4(&self, endpoint: &Ipv4Endpoint, proto: L4Proto) -> Option<BibId> {
        self.table(proto).bib_v4.get(endpoint).copied()
    }

    /// Look up a binding by its IPv6 endpoint
    #[must_use]
    #[profiling::function]
    pub fn bib_get_by_v6(&self, endpoint: &Ipv6Endpoint, proto: L4Proto) -> Option<BibId> {
        self.table(proto).bib_v6.get(endpoint).copied()
    }

    /// Remove a binding from both indices and return it
    ///
    /// Sessions are destroyed before their binding; callers must tear down
    /// the session chain first.
    #[profiling::function]
    pub fn bib_remove(&mut self, id: BibId) -> Result<BibEntry> {
        let entry = self.bibs.get(id.0).ok_or(Error::StaleHandle)?;
        if entry.has_sessions() {
            return Err(Error::SessionsAttached);
        }

        let entry = self.bibs.remove(id.0).ok_or(Error::StaleHandle)?;
        let table = self.table_mut(entry.proto);
        table.bib_v6.remove(&entry.v6);
        table.bib_v4.remove(&entry.v4);

        log::debug!("Removed {} binding: {} <-> {}", entry.proto, entry.v6, entry.v4);
        Ok(entry)
    }

    /// Iterate over every binding for one IPv6 address, in ascending
    /// l4-id order
    pub fn bib_entries_for_v6<'a>(
        &'a self,
        proto: L4Proto,
        address: &Ipv6Addr,
    ) -> impl Iterator<Item = (BibId, &'a BibEntry)> + 'a {
        let first = Ipv6Endpoint::new(*address, 0);
        let last = Ipv6Endpoint::new(*address, u16::MAX);
        self.table(proto)
            .bib_v6
            .range(first..=last)
            .filter_map(move |(_, id)| self.bibs.get(id.0).map(|entry| (*id, entry)))
    }
}
