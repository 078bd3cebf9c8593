/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types shared by every component of a Paxos peer.
//!
//! Most of these follow the newtype pattern: they are "inert" values that are sent around and compared,
//! and the API for using them is defined in this module.

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};
use std::{
    fmt::{self, Display, Formatter},
    ops::Add,
};

/// Values that peers can agree on.
///
/// Values are moved between peers inside [messages](crate::messages), so they must be borsh-encodable.
/// The crate never looks inside a value: deciding whether two values represent "the same operation" is
/// the application's job (see [`App::equals`](crate::rsm::App::equals)).
pub trait Value: Clone + Send + Sync + BorshSerialize + BorshDeserialize + 'static {}

impl<T> Value for T where T: Clone + Send + Sync + BorshSerialize + BorshDeserialize + 'static {}

/// SHA-256 digest of the borsh encoding of a value. Used to identify values in events and logs.
pub(crate) fn value_digest<V: Value>(value: &V) -> [u8; 32] {
    let bytes = value.try_to_vec().unwrap_or_default();
    Sha256::digest(&bytes).into()
}

/// Position of a peer in the (fixed) list of peers, starting from 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize)]
pub struct PeerIndex(u32);

impl PeerIndex {
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u32 {
        self.0
    }

    pub const fn usize(&self) -> usize {
        self.0 as usize
    }
}

impl Display for PeerIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Identifies one independent instance of consensus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }

    /// The sequence number immediately after this one.
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl Add<u64> for SequenceNumber {
    type Output = SequenceNumber;
    fn add(self, rhs: u64) -> Self::Output {
        SequenceNumber(self.0 + rhs)
    }
}

impl Display for SequenceNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// A `(round, proposer)` pair. Proposal numbers are totally ordered by round first, then by proposer.
///
/// ## Same-round contention
///
/// The total order alone would let a proposer with a larger index "win" a round that another proposer has
/// already been promised. Acceptors are stricter than the order: once a promise at some round is recorded,
/// only the *same* proposer may be admitted at that round again (see [`ProposalNumber::can_supersede`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize)]
pub struct ProposalNumber {
    pub round: u64,
    pub proposer: PeerIndex,
}

impl ProposalNumber {
    pub const fn new(round: u64, proposer: PeerIndex) -> Self {
        Self { round, proposer }
    }

    /// Whether an acceptor that has promised `promised` may promise or accept `self`: either `self` is from
    /// a strictly higher round, or it is exactly the promised proposal (a resend by the same proposer).
    pub fn can_supersede(&self, promised: &ProposalNumber) -> bool {
        self.round > promised.round || self == promised
    }
}

impl Display for ProposalNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.round, self.proposer)
    }
}

/// What a peer knows about an instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fate<V> {
    /// Not decided yet, as far as this peer knows.
    Pending,

    /// Decided. The value can never change.
    Decided(V),

    /// Below [`Min`](crate::paxos::Paxos::min): this peer no longer keeps any state about the instance.
    Forgotten,
}

impl<V> Fate<V> {
    pub fn is_decided(&self) -> bool {
        matches!(self, Fate::Decided(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proposal_numbers_order_by_round_then_proposer() {
        let a = ProposalNumber::new(3, PeerIndex::new(2));
        let b = ProposalNumber::new(4, PeerIndex::new(0));
        let c = ProposalNumber::new(4, PeerIndex::new(1));
        assert!(a < b);
        assert!(b < c);
        assert_eq!(vec![c, a, b].into_iter().max(), Some(c));
    }

    #[test]
    fn same_round_only_admits_the_same_proposer() {
        let promised = ProposalNumber::new(3, PeerIndex::new(0));

        assert!(promised.can_supersede(&promised));
        assert!(!ProposalNumber::new(3, PeerIndex::new(1)).can_supersede(&promised));
        assert!(!ProposalNumber::new(2, PeerIndex::new(2)).can_supersede(&promised));
        assert!(ProposalNumber::new(4, PeerIndex::new(0)).can_supersede(&promised));
    }
}
