/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Per-instance acceptor and learner state, kept in an ordered table keyed by sequence number.
//!
//! Instances are created lazily, the first time a Prepare, Accept, or Learn touches their sequence number.
//! The table is truncated as a whole: [`InstanceTable::truncate_below`] drops every instance below a
//! watermark and remembers the watermark, so a truncated instance can never be recreated.

use std::collections::BTreeMap;

use crate::types::{ProposalNumber, SequenceNumber};

/// Everything a peer remembers about one instance.
#[derive(Clone, Debug)]
pub(crate) struct Instance<V> {
    /// Highest proposal promised in a Prepare (or accepted in an Accept).
    pub(crate) promised: Option<ProposalNumber>,

    /// Highest proposal accepted, and the value that came with it.
    pub(crate) accepted: Option<(ProposalNumber, V)>,

    /// The decided value. Immutable once set.
    pub(crate) decided: Option<V>,
}

impl<V> Default for Instance<V> {
    fn default() -> Self {
        Self {
            promised: None,
            accepted: None,
            decided: None,
        }
    }
}

pub(crate) struct InstanceTable<V> {
    instances: BTreeMap<SequenceNumber, Instance<V>>,
    /// Every instance below this has been forgotten.
    truncated_below: SequenceNumber,
    /// Highest sequence number ever touched. Survives truncation.
    max_seen: Option<SequenceNumber>,
}

impl<V> InstanceTable<V> {
    pub(crate) fn new() -> Self {
        Self {
            instances: BTreeMap::new(),
            truncated_below: SequenceNumber::new(0),
            max_seen: None,
        }
    }

    pub(crate) fn is_forgotten(&self, seq: SequenceNumber) -> bool {
        seq < self.truncated_below
    }

    /// Get the instance for `seq`, creating it if this is the first time it is touched. Returns `None` if the
    /// instance has been forgotten.
    pub(crate) fn get_or_create(&mut self, seq: SequenceNumber) -> Option<&mut Instance<V>> {
        if self.is_forgotten(seq) {
            return None;
        }
        self.observe(seq);
        Some(self.instances.entry(seq).or_default())
    }

    /// Record that `seq` is known to exist, without creating any state for it.
    pub(crate) fn observe(&mut self, seq: SequenceNumber) {
        if self.max_seen.map_or(true, |max| seq > max) {
            self.max_seen = Some(seq);
        }
    }

    pub(crate) fn decided(&self, seq: SequenceNumber) -> Option<&V> {
        self.instances
            .get(&seq)
            .and_then(|instance| instance.decided.as_ref())
    }

    /// Highest sequence number this table has ever seen.
    pub(crate) fn max(&self) -> Option<SequenceNumber> {
        self.max_seen
    }

    /// Number of instances currently held in memory.
    pub(crate) fn len(&self) -> usize {
        self.instances.len()
    }

    /// Forget every instance below `min`. Returns how many instances were dropped. Truncating to a lower
    /// watermark than before is a no-op.
    pub(crate) fn truncate_below(&mut self, min: SequenceNumber) -> usize {
        if min <= self.truncated_below {
            return 0;
        }
        let before = self.instances.len();
        self.instances = self.instances.split_off(&min);
        self.truncated_below = min;
        before - self.instances.len()
    }
}
