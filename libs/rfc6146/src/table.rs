use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::arena::Arena;
use crate::bib::{BibEntry, BibId};
use crate::session::{SessionEntry, SessionId};
use crate::types::{Ipv4Endpoint, Ipv4Pair, Ipv6Endpoint, Ipv6Pair, L4Proto};

/// Head/tail bookkeeping for an intrusive chain of sessions
///
/// The links themselves live inside the session entries; this struct only
/// anchors the two ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Chain {
    pub head: Option<SessionId>,
    pub tail: Option<SessionId>,
    pub len: usize,
}

/// One protocol's slice of the state plane
#[derive(Debug, Default)]
pub(crate) struct ProtoTable {
    /// BIB index keyed on the IPv6 endpoint, in (address, l4-id) order
    pub bib_v6: BTreeMap<Ipv6Endpoint, BibId>,
    /// BIB index keyed on the borrowed IPv4 endpoint
    pub bib_v4: BTreeMap<Ipv4Endpoint, BibId>,
    /// Session index keyed on the IPv4-side endpoint pair
    pub sess_v4: FxHashMap<Ipv4Pair, SessionId>,
    /// Session index keyed on the IPv6-side endpoint pair
    pub sess_v6: FxHashMap<Ipv6Pair, SessionId>,
    /// Expiry chain, oldest deadline at the head
    pub expiry: Chain,
}

/// The full NAT64 state plane: BIB plus session table, all three protocols
///
/// This struct is not internally synchronized. Binding and session state are
/// tightly coupled (touching one usually mutates the other), so the caller
/// is expected to wrap the whole table in a single lock and keep every call
/// a bounded critical section.
#[derive(Debug, Default)]
pub struct StateTable {
    pub(crate) bibs: Arena<BibEntry>,
    pub(crate) sessions: Arena<SessionEntry>,
    pub(crate) tables: [ProtoTable; 3],
}

impl StateTable {
    /// Construct an empty state table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn table(&self, proto: L4Proto) -> &ProtoTable {
        &self.tables[proto.index()]
    }

    pub(crate) fn table_mut(&mut self, proto: L4Proto) -> &mut ProtoTable {
        &mut self.tables[proto.index()]
    }

    /// Resolve a binding handle
    #[must_use]
    pub fn bib(&self, id: BibId) -> Option<&BibEntry> {
        self.bibs.get(id.0)
    }

    /// Resolve a session handle
    #[must_use]
    pub fn session(&self, id: SessionId) -> Option<&SessionEntry> {
        self.sessions.get(id.0)
    }

    /// Number of bindings in one protocol's table
    #[must_use]
    pub fn bib_count(&self, proto: L4Proto) -> usize {
        self.table(proto).bib_v6.len()
    }

    /// Number of sessions in one protocol's table
    #[must_use]
    pub fn session_count(&self, proto: L4Proto) -> usize {
        self.table(proto).sess_v6.len()
    }
}
