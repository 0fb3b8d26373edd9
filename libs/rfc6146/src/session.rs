//! The session table
//!
//! A session is one bidirectional flow riding on a binding: the full pair of
//! endpoints on each address family, plus the deadline after which the flow
//! is considered dead. Sessions sit on two intrusive chains at once (their
//! binding's session chain and their protocol's expiry chain), and both
//! memberships are maintained by every insert, touch and remove.

use std::time::Instant;

use crate::arena::{Arena, Handle};
use crate::bib::BibId;
use crate::error::{Error, Result};
use crate::table::{Chain, StateTable};
use crate::types::{Ipv4Pair, Ipv6Pair, L4Proto, Tuple4};

/// A stable handle to a session entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub(crate) Handle);

/// One tracked flow
#[derive(Debug)]
pub struct SessionEntry {
    pub v4: Ipv4Pair,
    pub v6: Ipv6Pair,
    pub proto: L4Proto,
    /// Deadline after which the reaper may collect this session
    pub dying_time: Instant,
    /// The binding this flow rides on. Non-owning: the binding outlives its
    /// sessions, never the other way around.
    pub bib: Option<BibId>,
    links: Links,
}

/// Intrusive chain links. One pair per chain membership.
#[derive(Debug, Default, Clone, Copy)]
struct Links {
    bib_prev: Option<SessionId>,
    bib_next: Option<SessionId>,
    exp_prev: Option<SessionId>,
    exp_next: Option<SessionId>,
}

impl StateTable {
    /// Insert a new session into one protocol's table
    ///
    /// The session is indexed under both endpoint pairs, appended to the
    /// tail of the protocol's expiry chain, and (when `bib` is given)
    /// appended to the binding's session chain. A binding handle is only
    /// accepted if the session's local endpoints match the binding's.
    #[profiling::function]
    pub fn session_add(
        &mut self,
        v4: Ipv4Pair,
        v6: Ipv6Pair,
        proto: L4Proto,
        bib: Option<BibId>,
        dying_time: Instant,
    ) -> Result<SessionId> {
        let table = self.table(proto);
        if table.sess_v4.contains_key(&v4) || table.sess_v6.contains_key(&v6) {
            return Err(Error::AlreadyExists);
        }

        if let Some(bib_id) = bib {
            let bib_entry = self.bibs.get(bib_id.0).ok_or(Error::StaleHandle)?;
            if bib_entry.v4 != v4.local || bib_entry.v6 != v6.local {
                return Err(Error::BindingMismatch);
            }
        }

        let id = SessionId(self.sessions.insert(SessionEntry {
            v4,
            v6,
            proto,
            dying_time,
            bib,
            links: Links::default(),
        }));

        let table = &mut self.tables[proto.index()];
        table.sess_v4.insert(v4, id);
        table.sess_v6.insert(v6, id);
        link_expiry_tail(&mut self.sessions, &mut table.expiry, id);

        if let Some(bib_id) = bib {
            if let Some(bib_entry) = self.bibs.get_mut(bib_id.0) {
                link_bib_tail(&mut self.sessions, &mut bib_entry.sessions, id);
            }
        }

        log::trace!("New {} session: {} <-> {}", proto, v6.local, v4.remote);
        Ok(id)
    }

    /// Remove a session from its indices and both chains, and return it
    #[profiling::function]
    pub fn session_remove(&mut self, id: SessionId) -> Result<SessionEntry> {
        let entry = self.sessions.get(id.0).ok_or(Error::StaleHandle)?;
        let (proto, v4, v6, bib) = (entry.proto, entry.v4, entry.v6, entry.bib);

        let table = &mut self.tables[proto.index()];
        table.sess_v4.remove(&v4);
        table.sess_v6.remove(&v6);
        unlink_expiry(&mut self.sessions, &mut table.expiry, id);

        if let Some(bib_id) = bib {
            if let Some(bib_entry) = self.bibs.get_mut(bib_id.0) {
                unlink_bib(&mut self.sessions, &mut bib_entry.sessions, id);
            }
        }

        self.sessions.remove(id.0).ok_or(Error::StaleHandle)
    }

    /// Look up a session by its IPv4-side endpoint pair
    #[must_use]
    #[profiling::function]
    pub fn session_get_by_v4(&self, pair: &Ipv4Pair, proto: L4Proto) -> Option<SessionId> {
        self.table(proto).sess_v4.get(pair).copied()
    }

    /// Look up a session by its IPv6-side endpoint pair
    #[must_use]
    #[profiling::function]
    pub fn session_get_by_v6(&self, pair: &Ipv6Pair, proto: L4Proto) -> Option<SessionId> {
        self.table(proto).sess_v6.get(pair).copied()
    }

    /// Refresh a session's deadline and move it to the expiry-chain tail
    ///
    /// Deadlines within one protocol all use the same timeout, so appending
    /// at the tail keeps the chain sorted.
    #[profiling::function]
    pub fn session_touch(&mut self, id: SessionId, dying_time: Instant) -> Result<()> {
        let proto = self.sessions.get(id.0).ok_or(Error::StaleHandle)?.proto;

        let table = &mut self.tables[proto.index()];
        unlink_expiry(&mut self.sessions, &mut table.expiry, id);
        if let Some(entry) = self.sessions.get_mut(id.0) {
            entry.dying_time = dying_time;
        }
        let table = &mut self.tables[proto.index()];
        link_expiry_tail(&mut self.sessions, &mut table.expiry, id);
        Ok(())
    }

    /// Address-dependent filtering for an inbound IPv4 packet
    ///
    /// The packet passes if any session of its protocol targets the packet's
    /// destination endpoint and already talks to the packet's source
    /// *address*. The source port is deliberately not compared: a known peer
    /// reaching back from a new port must still match.
    #[must_use]
    #[profiling::function]
    pub fn session_allow(&self, tuple: &Tuple4) -> bool {
        self.table(tuple.proto)
            .sess_v4
            .keys()
            .any(|pair| pair.local == tuple.dst && pair.remote.address == tuple.src.address)
    }

    /// Collect the sessions anchored on a binding, oldest first
    #[must_use]
    pub fn sessions_of_bib(&self, id: BibId) -> Vec<SessionId> {
        let mut result = Vec::new();
        let Some(bib_entry) = self.bibs.get(id.0) else {
            return result;
        };

        let mut cursor = bib_entry.sessions.head;
        while let Some(session_id) = cursor {
            result.push(session_id);
            cursor = self
                .sessions
                .get(session_id.0)
                .and_then(|entry| entry.links.bib_next);
        }
        result
    }
}

// The chain helpers below keep the intrusive links and the anchor in sync.
// They borrow the session arena and the chain anchor separately because the
// anchor may itself live inside another arena (a binding's session chain).

fn link_expiry_tail(sessions: &mut Arena<SessionEntry>, chain: &mut Chain, id: SessionId) {
    if let Some(entry) = sessions.get_mut(id.0) {
        entry.links.exp_prev = chain.tail;
        entry.links.exp_next = None;
    }
    match chain.tail {
        Some(tail) => {
            if let Some(entry) = sessions.get_mut(tail.0) {
                entry.links.exp_next = Some(id);
            }
        }
        None => chain.head = Some(id),
    }
    chain.tail = Some(id);
    chain.len += 1;
}

fn unlink_expiry(sessions: &mut Arena<SessionEntry>, chain: &mut Chain, id: SessionId) {
    let Some(entry) = sessions.get_mut(id.0) else {
        return;
    };
    let Links { exp_prev, exp_next, .. } = entry.links;
    entry.links.exp_prev = None;
    entry.links.exp_next = None;

    match exp_prev {
        Some(prev) => {
            if let Some(entry) = sessions.get_mut(prev.0) {
                entry.links.exp_next = exp_next;
            }
        }
        None => chain.head = exp_next,
    }
    match exp_next {
        Some(next) => {
            if let Some(entry) = sessions.get_mut(next.0) {
                entry.links.exp_prev = exp_prev;
            }
        }
        None => chain.tail = exp_prev,
    }
    chain.len -= 1;
}

fn link_bib_tail(sessions: &mut Arena<SessionEntry>, chain: &mut Chain, id: SessionId) {
    if let Some(entry) = sessions.get_mut(id.0) {
        entry.links.bib_prev = chain.tail;
        entry.links.bib_next = None;
    }
    match chain.tail {
        Some(tail) => {
            if let Some(entry) = sessions.get_mut(tail.0) {
                entry.links.bib_next = Some(id);
            }
        }
        None => chain.head = Some(id),
    }
    chain.tail = Some(id);
    chain.len += 1;
}

fn unlink_bib(sessions: &mut Arena<SessionEntry>, chain: &mut Chain, id: SessionId) {
    let Some(entry) = sessions.get_mut(id.0) else {
        return;
    };
    let Links { bib_prev, bib_next, .. } = entry.links;
    entry.links.bib_prev = None;
    entry.links.bib_next = None;

    match bib_prev {
        Some(prev) => {
            if let Some(entry) = sessions.get_mut(prev.0) {
                entry.links.bib_next = bib_next;
            }
        }
        None => chain.head = bib_next,
    }
    match bib_next {
        Some(next) => {
            if let Some(entry) = sessions.get_mut(next.0) {
                entry.links.bib_prev = bib_prev;
            }
        }
        None => chain.tail = bib_prev,
    }
    chain.len -= 1;
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::types::{Ipv4Endpoint, Ipv6Endpoint};

    fn v4(string: &str) -> Ipv4Endpoint {
        string.parse().unwrap()
    }

    fn v6(string: &str) -> Ipv6Endpoint {
        string.parse().unwrap()
    }

    fn pair4(remote: &str, local: &str) -> Ipv4Pair {
        Ipv4Pair {
            remote: v4(remote),
            local: v4(local),
        }
    }

    fn pair6(remote: &str, local: &str) -> Ipv6Pair {
        Ipv6Pair {
            remote: v6(remote),
            local: v6(local),
        }
    }

    /// Walk a protocol's expiry chain from the head
    fn expiry_order(table: &StateTable, proto: L4Proto) -> Vec<SessionId> {
        let mut result = Vec::new();
        let mut cursor = table.table(proto).expiry.head;
        while let Some(id) = cursor {
            result.push(id);
            cursor = table.sessions.get(id.0).and_then(|entry| entry.links.exp_next);
        }
        result
    }

    #[test]
    fn test_single_session_lifecycle() {
        let mut table = StateTable::new();
        let four = pair4("1.1.1.1#456", "0.0.0.0#0");
        let six = pair6("::1#334", "::2#0");
        let deadline = Instant::now() + Duration::from_secs(60);

        let id = table
            .session_add(four, six, L4Proto::Tcp, None, deadline)
            .unwrap();

        // Only the TCP table knows the session, under both pair keys
        for proto in L4Proto::ALL {
            let expected = (proto == L4Proto::Tcp).then_some(id);
            assert_eq!(table.session_get_by_v4(&four, proto), expected, "{}", proto);
            assert_eq!(table.session_get_by_v6(&six, proto), expected, "{}", proto);
        }
        assert_eq!(table.session(id).unwrap().dying_time, deadline);
        assert_eq!(expiry_order(&table, L4Proto::Tcp), vec![id]);

        table.session_remove(id).unwrap();
        for proto in L4Proto::ALL {
            assert_eq!(table.session_get_by_v4(&four, proto), None);
            assert_eq!(table.session_get_by_v6(&six, proto), None);
        }
        assert!(expiry_order(&table, L4Proto::Tcp).is_empty());
        assert!(table.session(id).is_none());
    }

    #[test]
    fn test_duplicate_pairs_are_rejected() {
        let mut table = StateTable::new();
        let four = pair4("1.1.1.1#456", "0.0.0.0#0");
        let six = pair6("::1#334", "::2#0");
        let deadline = Instant::now();

        table
            .session_add(four, six, L4Proto::Udp, None, deadline)
            .unwrap();
        assert_eq!(
            table.session_add(four, six, L4Proto::Udp, None, deadline),
            Err(Error::AlreadyExists)
        );
        assert_eq!(table.session_count(L4Proto::Udp), 1);
    }

    #[test]
    fn test_binding_endpoints_are_enforced() {
        let mut table = StateTable::new();
        let bib = table
            .bib_add(v4("1.1.1.1#80"), v6("::1#80"), L4Proto::Udp, false)
            .unwrap();

        // Local v4 endpoint disagrees with the binding
        assert_eq!(
            table.session_add(
                pair4("9.9.9.9#443", "1.1.1.1#81"),
                pair6("::aa#443", "::1#80"),
                L4Proto::Udp,
                Some(bib),
                Instant::now(),
            ),
            Err(Error::BindingMismatch)
        );
        assert_eq!(table.session_count(L4Proto::Udp), 0);
    }

    #[test]
    fn test_address_dependent_filtering() {
        let mut table = StateTable::new();
        let bib = table
            .bib_add(v4("0.0.0.0#0"), v6("::1#334"), L4Proto::Udp, false)
            .unwrap();
        table
            .session_add(
                pair4("0.0.0.0#0", "0.0.0.0#0"),
                pair6("::1#334", "::1#334"),
                L4Proto::Udp,
                Some(bib),
                Instant::now() + Duration::from_secs(300),
            )
            .unwrap();

        let allow = |table: &StateTable, src: &str, dst: &str| {
            table.session_allow(&Tuple4 {
                src: v4(src),
                dst: v4(dst),
                proto: L4Proto::Udp,
            })
        };

        // Perfect match
        assert!(allow(&table, "0.0.0.0#0", "0.0.0.0#0"));
        // Complete mismatch
        assert!(!allow(&table, "1.1.1.1#456", "1.1.1.1#456"));
        // Destination port mismatch
        assert!(!allow(&table, "0.0.0.0#0", "0.0.0.0#456"));
        // Destination address mismatch
        assert!(!allow(&table, "0.0.0.0#0", "1.1.1.1#0"));
        // The source port is the one thing allowed to differ
        assert!(allow(&table, "0.0.0.0#456", "0.0.0.0#0"));
        // Source address mismatch
        assert!(!allow(&table, "1.1.1.1#0", "0.0.0.0#0"));

        // Another protocol's sessions do not count
        assert!(!table.session_allow(&Tuple4 {
            src: v4("0.0.0.0#0"),
            dst: v4("0.0.0.0#0"),
            proto: L4Proto::Tcp,
        }));

        // Inserting more sessions never turns an allowed tuple away
        table
            .session_add(
                pair4("3.3.3.3#9", "0.0.0.0#0"),
                pair6("::9#9", "::1#334"),
                L4Proto::Udp,
                Some(bib),
                Instant::now() + Duration::from_secs(300),
            )
            .unwrap();
        assert!(allow(&table, "0.0.0.0#456", "0.0.0.0#0"));
        assert!(allow(&table, "0.0.0.0#0", "0.0.0.0#0"));
    }

    #[test]
    fn test_touch_moves_session_to_the_tail() {
        let mut table = StateTable::new();
        let now = Instant::now();

        let mut ids = Vec::new();
        for n in 0..3u16 {
            ids.push(
                table
                    .session_add(
                        Ipv4Pair {
                            remote: Ipv4Endpoint::new(Ipv4Addr::new(198, 51, 100, 1), 1000 + n),
                            local: Ipv4Endpoint::new(Ipv4Addr::new(192, 0, 2, 1), 2000 + n),
                        },
                        pair6(&format!("::b#{}", 3000 + n), &format!("::a#{}", 4000 + n)),
                        L4Proto::Udp,
                        None,
                        now + Duration::from_secs(u64::from(n)),
                    )
                    .unwrap(),
            );
        }
        assert_eq!(expiry_order(&table, L4Proto::Udp), ids);

        // Refreshing the head re-anchors it at the tail
        table
            .session_touch(ids[0], now + Duration::from_secs(60))
            .unwrap();
        assert_eq!(
            expiry_order(&table, L4Proto::Udp),
            vec![ids[1], ids[2], ids[0]]
        );
        assert_eq!(
            table.session(ids[0]).unwrap().dying_time,
            now + Duration::from_secs(60)
        );

        // Touching a middle entry keeps the rest in order
        table
            .session_touch(ids[2], now + Duration::from_secs(61))
            .unwrap();
        assert_eq!(
            expiry_order(&table, L4Proto::Udp),
            vec![ids[1], ids[0], ids[2]]
        );
    }

    #[test]
    fn test_bib_chain_tracks_membership() {
        let mut table = StateTable::new();
        let bib = table
            .bib_add(v4("1.1.1.1#80"), v6("::1#80"), L4Proto::Udp, false)
            .unwrap();

        let first = table
            .session_add(
                pair4("9.9.9.9#1", "1.1.1.1#80"),
                pair6("::aa#1", "::1#80"),
                L4Proto::Udp,
                Some(bib),
                Instant::now(),
            )
            .unwrap();
        let second = table
            .session_add(
                pair4("9.9.9.9#2", "1.1.1.1#80"),
                pair6("::aa#2", "::1#80"),
                L4Proto::Udp,
                Some(bib),
                Instant::now(),
            )
            .unwrap();

        assert_eq!(table.sessions_of_bib(bib), vec![first, second]);
        assert_eq!(table.bib(bib).unwrap().session_count(), 2);

        table.session_remove(first).unwrap();
        assert_eq!(table.sessions_of_bib(bib), vec![second]);

        table.session_remove(second).unwrap();
        assert!(!table.bib(bib).unwrap().has_sessions());
    }
}
