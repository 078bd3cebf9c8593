/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Tracks how far every peer's application has got, and from that, which instances may be forgotten.
//!
//! Each peer's application calls [`Done`](crate::paxos::Paxos::done) with the highest sequence number it has
//! finished with. The local value is updated directly; other peers' values arrive piggybacked on Learn
//! requests and responses. `Min` is one more than the lowest Done value over *all* peers, where a peer that
//! has never called Done counts as −1. A single peer that is never heard from therefore freezes `Min` for
//! everyone: when it comes back, it may need to catch up on any instance it has not declared done.

use crate::types::{PeerIndex, SequenceNumber};

pub(crate) struct PeerDoneTable {
    me: PeerIndex,
    /// Highest Done value heard of, per peer. `None` means "never done".
    done: Vec<Option<SequenceNumber>>,
}

impl PeerDoneTable {
    pub(crate) fn new(me: PeerIndex, num_peers: usize) -> Self {
        Self {
            me,
            done: vec![None; num_peers],
        }
    }

    /// This peer's own Done watermark.
    pub(crate) fn local(&self) -> Option<SequenceNumber> {
        self.done.get(self.me.usize()).copied().flatten()
    }

    /// Record a Done value for `peer`. Values never decrease: an older (smaller) value is ignored. Returns
    /// whether the table changed.
    pub(crate) fn observe(&mut self, peer: PeerIndex, done: Option<SequenceNumber>) -> bool {
        let Some(entry) = self.done.get_mut(peer.usize()) else {
            return false;
        };
        match (*entry, done) {
            (_, None) => false,
            (Some(current), Some(new)) if new <= current => false,
            (_, new) => {
                *entry = new;
                true
            }
        }
    }

    /// One more than the minimum Done value over all peers.
    pub(crate) fn min(&self) -> SequenceNumber {
        self.done
            .iter()
            .map(|done| done.map_or(SequenceNumber::new(0), |seq| seq.next()))
            .min()
            .unwrap_or(SequenceNumber::new(0))
    }
}
