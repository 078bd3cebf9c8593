/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events a Paxos peer emits, for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed. Events that concern a value
//! carry the value's digest (SHA-256 of its borsh encoding) rather than the value itself, so that handlers do
//! not depend on the value type.
//!
//! Handlers are registered on [`PaxosSpec`](crate::paxos::PaxosSpec) and run on the peer's event bus
//! thread, never on the threads that emit the events.

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::types::{PeerIndex, ProposalNumber, SequenceNumber};

pub enum Event {
    // Proposer events.
    Start(StartEvent),
    Prepare(PrepareEvent),
    Accept(AcceptEvent),
    Contention(ContentionEvent),
    // Learner and bookkeeping events.
    Decide(DecideEvent),
    UpdatePeerDone(UpdatePeerDoneEvent),
    Forget(ForgetEvent),
}

impl Event {
    /// Send the event to the event bus, if there is one. Events emitted while the peer is being torn down are
    /// dropped.
    pub(crate) fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            let _ = event_publisher.send(self);
        }
    }
}

/// The application asked this peer to drive an instance, and a proposer was started for it.
pub struct StartEvent {
    pub timestamp: SystemTime,
    pub seq: SequenceNumber,
    pub value: [u8; 32],
}

/// A proposer sent Prepare requests for a new proposal number.
pub struct PrepareEvent {
    pub timestamp: SystemTime,
    pub seq: SequenceNumber,
    pub proposal: ProposalNumber,
}

/// A proposer gathered a majority of promises and sent Accept requests.
pub struct AcceptEvent {
    pub timestamp: SystemTime,
    pub seq: SequenceNumber,
    pub proposal: ProposalNumber,
    pub value: [u8; 32],
}

/// A proposer failed to gather a majority and will retry with a higher round. `blocking` is the highest
/// proposal number among the rejections, or `None` if the proposer only failed to reach enough peers.
pub struct ContentionEvent {
    pub timestamp: SystemTime,
    pub seq: SequenceNumber,
    pub proposal: ProposalNumber,
    pub blocking: Option<ProposalNumber>,
}

/// This peer learned the decided value of an instance.
pub struct DecideEvent {
    pub timestamp: SystemTime,
    pub seq: SequenceNumber,
    pub value: [u8; 32],
}

/// This peer's view of some peer's Done watermark advanced.
pub struct UpdatePeerDoneEvent {
    pub timestamp: SystemTime,
    pub peer: PeerIndex,
    pub done: SequenceNumber,
}

/// `Min` advanced, and every instance below it was dropped.
pub struct ForgetEvent {
    pub timestamp: SystemTime,
    pub min: SequenceNumber,
    pub forgotten: usize,
}
