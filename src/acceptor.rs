/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The acceptor and learner roles of a Paxos peer, and the single lock that guards all of a peer's state.
//!
//! [`Acceptor`] owns the [instance table](crate::instances) and the [peer Done table](crate::done_tracker).
//! Every read or write of either happens with the acceptor's lock held, and the lock is only ever held for
//! an in-memory update: never across a network call.
//!
//! ## Prepare
//!
//! A Prepare for proposal `n` is promised if nothing has been promised for the instance yet, or if `n`
//! [can supersede](crate::types::ProposalNumber::can_supersede) the current promise. That is, `n` is from a
//! strictly higher round, or it is a resend of the very proposal already promised. In particular, once
//! proposer A has been promised round 3, proposer B's round 3 is rejected, even though B's proposal number
//! is larger in the total order. Promising records `n` as the new promise, so promises never decrease.
//!
//! ## Accept
//!
//! An Accept for `(n, v)` is accepted under the same condition, and records both `n` as the promise and
//! `(n, v)` as the accepted pair. An acceptor therefore never accepts a strictly older round, and never
//! accepts two different proposers at the same round.
//!
//! ## Learn
//!
//! A Learn records the decided value, unless the instance has been forgotten. A decided value is never
//! overwritten. Learn requests and responses both carry a Done watermark, which feeds the peer Done table.
//!
//! ## Forgotten instances
//!
//! Requests for an instance below `Min` are answered with `Forgotten` (Prepare, Accept) or `Reject` (Learn),
//! never with state that predates truncation.

use std::sync::mpsc::Sender;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use borsh::BorshSerialize;

use crate::done_tracker::PeerDoneTable;
use crate::events::*;
use crate::instances::InstanceTable;
use crate::messages::*;
use crate::types::*;

pub struct Acceptor<V: Value> {
    me: PeerIndex,
    state: Mutex<AcceptorState<V>>,
    event_publisher: Option<Sender<Event>>,
}

struct AcceptorState<V> {
    instances: InstanceTable<V>,
    done: PeerDoneTable,
}

impl<V: Value> Acceptor<V> {
    pub(crate) fn new(
        me: PeerIndex,
        num_peers: usize,
        event_publisher: Option<Sender<Event>>,
    ) -> Acceptor<V> {
        Acceptor {
            me,
            state: Mutex::new(AcceptorState {
                instances: InstanceTable::new(),
                done: PeerDoneTable::new(me, num_peers),
            }),
            event_publisher,
        }
    }

    pub fn me(&self) -> PeerIndex {
        self.me
    }

    /// Answer a request from another peer. This is the entry point that [`Network`](crate::networking::Network)
    /// implementations dispatch incoming requests to.
    pub fn handle(&self, request: Request<V>) -> Response<V> {
        match request {
            Request::Prepare(request) => Response::Prepare(self.prepare(request)),
            Request::Accept(request) => Response::Accept(self.accept(request)),
            Request::Learn(request) => Response::Learn(self.learn(request)),
            Request::Max => Response::Max(MaxResponse { max: self.max() }),
        }
    }

    pub(crate) fn prepare(&self, request: PrepareRequest) -> PrepareResponse<V> {
        let PrepareRequest { seq, proposal } = request;
        let mut state = self.state();
        let done = state.done.local();

        let Some(instance) = state.instances.get_or_create(seq) else {
            return PrepareResponse::Forgotten { done };
        };

        match instance.promised {
            Some(promised) if !proposal.can_supersede(&promised) => {
                log::trace!("Peer {} rejected Prepare {} for instance {}: promised {}", self.me, proposal, seq, promised);
                PrepareResponse::Reject { promised }
            }
            _ => {
                instance.promised = Some(proposal);
                match &instance.accepted {
                    None => PrepareResponse::PromiseEmpty { promised: proposal },
                    Some((accepted, value)) => PrepareResponse::PromiseWithValue {
                        promised: proposal,
                        accepted: *accepted,
                        value: value.clone(),
                    },
                }
            }
        }
    }

    pub(crate) fn accept(&self, request: AcceptRequest<V>) -> AcceptResponse {
        let AcceptRequest { seq, proposal, value } = request;
        let mut state = self.state();
        let done = state.done.local();

        let Some(instance) = state.instances.get_or_create(seq) else {
            return AcceptResponse::Forgotten { done };
        };

        match instance.promised {
            Some(promised) if !proposal.can_supersede(&promised) => {
                log::trace!("Peer {} rejected Accept {} for instance {}: promised {}", self.me, proposal, seq, promised);
                AcceptResponse::Reject { promised }
            }
            _ => {
                if let Some((accepted, accepted_value)) = &instance.accepted {
                    if *accepted == proposal && !same_encoding(accepted_value, &value) {
                        log::error!(
                            "Peer {} was asked to accept a second value for {} at instance {}",
                            self.me,
                            proposal,
                            seq
                        );
                        return AcceptResponse::Reject { promised: proposal };
                    }
                }
                instance.promised = Some(proposal);
                instance.accepted = Some((proposal, value));
                AcceptResponse::Ok { proposal }
            }
        }
    }

    pub(crate) fn learn(&self, request: LearnRequest<V>) -> LearnResponse {
        let LearnRequest {
            seq,
            value,
            sender,
            sender_done,
            ..
        } = request;

        self.observe_done(sender, sender_done);
        let recorded = self.record_decided(seq, value);
        self.forget();

        let done = self.state().done.local();
        if recorded {
            LearnResponse::Ok { done }
        } else {
            LearnResponse::Reject { done }
        }
    }

    /// Record `value` as the decided value of `seq`. Returns false if the instance is forgotten, or if another
    /// value was already recorded for it.
    pub(crate) fn record_decided(&self, seq: SequenceNumber, value: V) -> bool {
        let mut state = self.state();
        let Some(instance) = state.instances.get_or_create(seq) else {
            return false;
        };

        if let Some(decided) = &instance.decided {
            if same_encoding(decided, &value) {
                return true;
            }
            log::error!(
                "Peer {} was told instance {} decided a different value than the one it already learned",
                self.me,
                seq
            );
            return false;
        }

        let digest = value_digest(&value);
        instance.decided = Some(value);
        drop(state);

        Event::Decide(DecideEvent {
            timestamp: SystemTime::now(),
            seq,
            value: digest,
        })
        .publish(&self.event_publisher);
        true
    }

    /// Merge a Done watermark heard from `peer` into the peer Done table.
    pub(crate) fn observe_done(&self, peer: PeerIndex, done: Option<SequenceNumber>) {
        let advanced = self.state().done.observe(peer, done);
        if let (true, Some(done)) = (advanced, done) {
            Event::UpdatePeerDone(UpdatePeerDoneEvent {
                timestamp: SystemTime::now(),
                peer,
                done,
            })
            .publish(&self.event_publisher);
        }
    }

    /// Declare that this peer's application is done with every instance up to and including `seq`.
    pub(crate) fn done(&self, seq: SequenceNumber) {
        self.observe_seq(seq);
        self.observe_done(self.me, Some(seq));
        self.forget();
    }

    /// This peer's own Done watermark.
    pub(crate) fn local_done(&self) -> Option<SequenceNumber> {
        self.state().done.local()
    }

    pub(crate) fn min(&self) -> SequenceNumber {
        self.state().done.min()
    }

    pub(crate) fn max(&self) -> Option<SequenceNumber> {
        self.state().instances.max()
    }

    /// Note that the application started an instance, so that [`max`](Self::max) accounts for it.
    pub(crate) fn observe_seq(&self, seq: SequenceNumber) {
        self.state().instances.observe(seq);
    }

    pub(crate) fn status(&self, seq: SequenceNumber) -> Fate<V> {
        let state = self.state();
        if seq < state.done.min() || state.instances.is_forgotten(seq) {
            return Fate::Forgotten;
        }
        match state.instances.decided(seq) {
            Some(value) => Fate::Decided(value.clone()),
            None => Fate::Pending,
        }
    }

    /// Drop every instance below `Min`. Safe to call at any time.
    pub(crate) fn forget(&self) {
        let mut state = self.state();
        let min = state.done.min();
        let forgotten = state.instances.truncate_below(min);
        drop(state);

        if forgotten > 0 {
            Event::Forget(ForgetEvent {
                timestamp: SystemTime::now(),
                min,
                forgotten,
            })
            .publish(&self.event_publisher);
        }
    }

    /// Number of instances this peer currently keeps in memory.
    pub fn instances_in_memory(&self) -> usize {
        self.state().instances.len()
    }

    fn state(&self) -> MutexGuard<'_, AcceptorState<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn same_encoding<V: BorshSerialize>(a: &V, b: &V) -> bool {
    match (a.try_to_vec(), b.try_to_vec()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
