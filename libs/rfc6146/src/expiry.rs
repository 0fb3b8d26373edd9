//! Timeout-driven session expiry
//!
//! Each protocol's expiry chain is FIFO by deadline: sessions are appended
//! at the tail on every insert or touch, and all deadlines within one chain
//! use the same timeout, so the head always carries the oldest deadline.
//! The reaper therefore only ever needs to look at chain heads.

use std::time::Instant;

use crate::table::StateTable;
use crate::types::{Ipv4Endpoint, L4Proto};

/// What one reaper pass collected
#[derive(Debug, Default)]
pub struct PurgeReport {
    /// Number of sessions deleted
    pub sessions_removed: usize,
    /// IPv4 endpoints whose bindings died with their last session. The
    /// caller owns returning these to the IPv4 pool; this crate does not
    /// hold that lock.
    pub freed_v4: Vec<(L4Proto, Ipv4Endpoint)>,
}

impl StateTable {
    /// Delete every session whose deadline has passed
    ///
    /// Walks each protocol's expiry chain from the head and halts at the
    /// first live session. A binding left with no sessions is removed too,
    /// unless it is static.
    #[profiling::function]
    pub fn purge_expired(&mut self, now: Instant) -> PurgeReport {
        let mut report = PurgeReport::default();

        for proto in L4Proto::ALL {
            loop {
                let Some(head) = self.table(proto).expiry.head else {
                    break;
                };
                let Some(entry) = self.session(head) else {
                    break;
                };
                if entry.dying_time > now {
                    break;
                }

                let bib = entry.bib;
                if self.session_remove(head).is_err() {
                    break;
                }
                report.sessions_removed += 1;

                // A binding with no remaining flows gives its IPv4 endpoint
                // back, unless the admin pinned it
                if let Some(bib_id) = bib {
                    let evict = self
                        .bib(bib_id)
                        .is_some_and(|entry| !entry.is_static && !entry.has_sessions());
                    if evict {
                        if let Ok(entry) = self.bib_remove(bib_id) {
                            report.freed_v4.push((entry.proto, entry.v4));
                        }
                    }
                }
            }
        }

        report
    }
}
