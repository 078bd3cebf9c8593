/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The proposer role: drives a single instance to a decision.
//!
//! A [`Proposer`] runs on its own thread, spawned by [`Paxos::start`](crate::paxos::Paxos::start). Each
//! attempt goes through three phases:
//! 1. **Prepare**: pick a round strictly higher than any round seen so far, and ask every peer (including this
//!    one) to promise it. Stop collecting replies as soon as a majority has promised, or as soon as enough
//!    peers have refused (or failed to answer) that a majority is no longer possible.
//! 2. **Accept**: propose the value carried by the promise with the highest accepted proposal number, or this
//!    proposer's own value if no promiser had accepted anything. Succeeds once a majority accepts.
//! 3. **Learn**: tell every peer the decided value. Every reply carries the replier's Done watermark.
//!
//! If either of the first two phases fails, the proposer sleeps for a backoff that grows with its own peer
//! index (plus random jitter), then starts over with a higher round.
//!
//! The Accept phase is skipped only when a majority of promisers reported the *identical* accepted proposal
//! number. Since a proposal number belongs to exactly one proposer, which proposes exactly one value with
//! it, this means a majority already accepted the same (proposal, value) pair: the value is chosen. Promisers
//! that agree on the value but not on the proposal number never enable the fast path.
//!
//! The proposer stops when the instance is decided (by anyone), when the instance is forgotten, or when the
//! peer is being torn down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use rand::{thread_rng, Rng};

use crate::acceptor::Acceptor;
use crate::events::*;
use crate::messages::*;
use crate::networking::{broadcast_call, Network};
use crate::types::*;

pub(crate) struct Proposer<V: Value, N: Network<V>> {
    seq: SequenceNumber,
    value: V,
    me: PeerIndex,
    num_peers: u32,
    acceptor: Arc<Acceptor<V>>,
    network: N,
    alive: Arc<AtomicBool>,
    backoff: Duration,
    event_publisher: Option<Sender<Event>>,
    highest_round_seen: u64,
}

impl<V: Value, N: Network<V>> Proposer<V, N> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        seq: SequenceNumber,
        value: V,
        me: PeerIndex,
        num_peers: u32,
        acceptor: Arc<Acceptor<V>>,
        network: N,
        alive: Arc<AtomicBool>,
        backoff: Duration,
        event_publisher: Option<Sender<Event>>,
    ) -> Proposer<V, N> {
        Proposer {
            seq,
            value,
            me,
            num_peers,
            acceptor,
            network,
            alive,
            backoff,
            event_publisher,
            highest_round_seen: 0,
        }
    }

    pub(crate) fn run(mut self) {
        while self.should_continue() {
            let proposal = ProposalNumber::new(self.highest_round_seen + 1, self.me);
            self.highest_round_seen = proposal.round;

            let (proposal, value) = match self.prepare_phase(proposal) {
                PrepareOutcome::Chosen { proposal, value } => (proposal, value),
                PrepareOutcome::Promised(value) => {
                    if !self.alive.load(Ordering::Acquire) {
                        return;
                    }
                    match self.accept_phase(proposal, value.clone()) {
                        AcceptOutcome::Accepted => (proposal, value),
                        AcceptOutcome::Rejected { blocking } => {
                            self.back_off(proposal, blocking);
                            continue;
                        }
                        AcceptOutcome::Forgotten => return,
                    }
                }
                PrepareOutcome::Rejected { blocking } => {
                    self.back_off(proposal, blocking);
                    continue;
                }
                PrepareOutcome::Forgotten => return,
            };

            self.learn_phase(proposal, value);
            return;
        }
    }

    fn should_continue(&self) -> bool {
        self.alive.load(Ordering::Acquire) && matches!(self.acceptor.status(self.seq), Fate::Pending)
    }

    fn prepare_phase(&mut self, proposal: ProposalNumber) -> PrepareOutcome<V> {
        Event::Prepare(PrepareEvent {
            timestamp: SystemTime::now(),
            seq: self.seq,
            proposal,
        })
        .publish(&self.event_publisher);

        let request = PrepareRequest {
            seq: self.seq,
            proposal,
        };
        let mut collector = PromiseCollector::new(self.num_peers);
        collector.record(Some(self.acceptor.prepare(request.clone())));

        if !collector.is_settled() {
            let responses = broadcast_call::<V, N>(&self.network, self.me, self.num_peers, request.into());
            for (peer, response) in responses.iter() {
                let response = response.and_then(Response::into_prepare);
                if let Some(PrepareResponse::Forgotten { done }) = &response {
                    self.acceptor.observe_done(peer, *done);
                }
                collector.record(response);
                if collector.is_settled() {
                    break;
                }
            }
        }

        self.highest_round_seen = self.highest_round_seen.max(collector.highest_round_seen());
        collector.outcome(self.value.clone())
    }

    fn accept_phase(&mut self, proposal: ProposalNumber, value: V) -> AcceptOutcome {
        Event::Accept(AcceptEvent {
            timestamp: SystemTime::now(),
            seq: self.seq,
            proposal,
            value: value_digest(&value),
        })
        .publish(&self.event_publisher);

        let request = AcceptRequest {
            seq: self.seq,
            proposal,
            value,
        };
        let mut collector = AcceptCollector::new(self.num_peers);
        collector.record(Some(self.acceptor.accept(request.clone())));

        if !collector.is_settled() {
            let responses = broadcast_call::<V, N>(&self.network, self.me, self.num_peers, request.into());
            for (peer, response) in responses.iter() {
                let response = response.and_then(Response::into_accept);
                if let Some(AcceptResponse::Forgotten { done }) = &response {
                    self.acceptor.observe_done(peer, *done);
                }
                collector.record(response);
                if collector.is_settled() {
                    break;
                }
            }
        }

        self.highest_round_seen = self.highest_round_seen.max(collector.highest_round_seen());
        collector.outcome()
    }

    /// Announce the decision to every peer, and merge their Done watermarks from the replies.
    fn learn_phase(&self, proposal: ProposalNumber, value: V) {
        let request = LearnRequest {
            seq: self.seq,
            proposal,
            value,
            sender: self.me,
            sender_done: self.acceptor.local_done(),
        };
        self.acceptor.learn(request.clone());

        let responses = broadcast_call::<V, N>(&self.network, self.me, self.num_peers, request.into());
        for (peer, response) in responses.iter() {
            if let Some(response) = response.and_then(Response::into_learn) {
                self.acceptor.observe_done(peer, response.done());
            }
        }

        self.acceptor.forget();
    }

    fn back_off(&self, proposal: ProposalNumber, blocking: Option<ProposalNumber>) {
        Event::Contention(ContentionEvent {
            timestamp: SystemTime::now(),
            seq: self.seq,
            proposal,
            blocking,
        })
        .publish(&self.event_publisher);

        let base = self.backoff * (self.me.int() + 1);
        let jitter_ceiling = self.backoff.as_millis() as u64 + 1;
        let jitter = Duration::from_millis(thread_rng().gen_range(0, jitter_ceiling));
        thread::sleep(base + jitter);
    }
}

fn quorum(num_peers: usize) -> usize {
    num_peers / 2 + 1
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PrepareOutcome<V> {
    /// A majority already accepted the same proposal: its value is chosen and only needs to be learned.
    Chosen { proposal: ProposalNumber, value: V },

    /// A majority promised. Carries the value the Accept phase must propose.
    Promised(V),

    /// A majority could not be gathered. `blocking` is the highest promise among the refusals, if any.
    Rejected { blocking: Option<ProposalNumber> },

    Forgotten,
}

/// Tallies Prepare replies.
pub(crate) struct PromiseCollector<V> {
    quorum: usize,
    num_peers: usize,
    promises: usize,
    refusals: usize,
    highest_accepted: Option<(ProposalNumber, V)>,
    /// How many promisers reported exactly `highest_accepted`'s proposal number.
    highest_accepted_count: usize,
    blocking: Option<ProposalNumber>,
    highest_round_seen: u64,
    forgotten: bool,
}

impl<V> PromiseCollector<V> {
    pub(crate) fn new(num_peers: u32) -> Self {
        let num_peers = num_peers as usize;
        Self {
            quorum: quorum(num_peers),
            num_peers,
            promises: 0,
            refusals: 0,
            highest_accepted: None,
            highest_accepted_count: 0,
            blocking: None,
            highest_round_seen: 0,
            forgotten: false,
        }
    }

    /// Record the reply of one peer. `None` is a failed exchange, and counts as a refusal.
    pub(crate) fn record(&mut self, response: Option<PrepareResponse<V>>) {
        match response {
            Some(PrepareResponse::PromiseEmpty { promised }) => {
                self.see_round(promised);
                self.promises += 1;
            }
            Some(PrepareResponse::PromiseWithValue { promised, accepted, value }) => {
                self.see_round(promised);
                self.see_round(accepted);
                self.promises += 1;
                match &self.highest_accepted {
                    Some((highest, _)) if accepted < *highest => (),
                    Some((highest, _)) if accepted == *highest => self.highest_accepted_count += 1,
                    _ => {
                        self.highest_accepted = Some((accepted, value));
                        self.highest_accepted_count = 1;
                    }
                }
            }
            Some(PrepareResponse::Reject { promised }) => {
                self.see_round(promised);
                self.refusals += 1;
                if self.blocking.map_or(true, |blocking| promised > blocking) {
                    self.blocking = Some(promised);
                }
            }
            Some(PrepareResponse::Forgotten { .. }) => self.forgotten = true,
            None => self.refusals += 1,
        }
    }

    /// Whether the outcome of the phase is known, whatever the remaining peers reply.
    pub(crate) fn is_settled(&self) -> bool {
        self.forgotten
            || self.promises >= self.quorum
            || self.refusals > self.num_peers - self.quorum
    }

    pub(crate) fn highest_round_seen(&self) -> u64 {
        self.highest_round_seen
    }

    /// The result of the phase, given the replies recorded so far. `own` is the value to propose if no
    /// promiser had accepted anything.
    pub(crate) fn outcome(self, own: V) -> PrepareOutcome<V> {
        if self.forgotten {
            return PrepareOutcome::Forgotten;
        }
        if self.promises < self.quorum {
            return PrepareOutcome::Rejected {
                blocking: self.blocking,
            };
        }
        match self.highest_accepted {
            Some((proposal, value)) if self.highest_accepted_count >= self.quorum => {
                PrepareOutcome::Chosen { proposal, value }
            }
            Some((_, value)) => PrepareOutcome::Promised(value),
            None => PrepareOutcome::Promised(own),
        }
    }

    fn see_round(&mut self, proposal: ProposalNumber) {
        self.highest_round_seen = self.highest_round_seen.max(proposal.round);
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum AcceptOutcome {
    Accepted,
    Rejected { blocking: Option<ProposalNumber> },
    Forgotten,
}

/// Tallies Accept replies.
pub(crate) struct AcceptCollector {
    quorum: usize,
    num_peers: usize,
    accepts: usize,
    refusals: usize,
    blocking: Option<ProposalNumber>,
    highest_round_seen: u64,
    forgotten: bool,
}

impl AcceptCollector {
    pub(crate) fn new(num_peers: u32) -> Self {
        let num_peers = num_peers as usize;
        Self {
            quorum: quorum(num_peers),
            num_peers,
            accepts: 0,
            refusals: 0,
            blocking: None,
            highest_round_seen: 0,
            forgotten: false,
        }
    }

    pub(crate) fn record(&mut self, response: Option<AcceptResponse>) {
        match response {
            Some(AcceptResponse::Ok { .. }) => self.accepts += 1,
            Some(AcceptResponse::Reject { promised }) => {
                self.highest_round_seen = self.highest_round_seen.max(promised.round);
                self.refusals += 1;
                if self.blocking.map_or(true, |blocking| promised > blocking) {
                    self.blocking = Some(promised);
                }
            }
            Some(AcceptResponse::Forgotten { .. }) => self.forgotten = true,
            None => self.refusals += 1,
        }
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.forgotten
            || self.accepts >= self.quorum
            || self.refusals > self.num_peers - self.quorum
    }

    pub(crate) fn highest_round_seen(&self) -> u64 {
        self.highest_round_seen
    }

    pub(crate) fn outcome(self) -> AcceptOutcome {
        if self.forgotten {
            AcceptOutcome::Forgotten
        } else if self.accepts >= self.quorum {
            AcceptOutcome::Accepted
        } else {
            AcceptOutcome::Rejected {
                blocking: self.blocking,
            }
        }
    }
}
