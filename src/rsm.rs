/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A replicated state machine on top of a [Paxos] peer.
//!
//! [`PaxosRsm`] turns the instances decided by a peer into an ordered log of operations, and applies that
//! log to an [`App`]: every decided operation is applied exactly once, in sequence order, with no gaps,
//! whether or not this replica proposed it.
//!
//! [`PaxosRsm::add_op`] proposes an operation at the first sequence number this replica has not yet applied.
//! If another operation wins that slot, the winner is applied and the operation is proposed again at the
//! next slot, until it is the one chosen.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::networking::Network;
use crate::paxos::Paxos;
use crate::types::{Fate, SequenceNumber, Value};

/// Methods that a type needs to implement to be replicated by a [`PaxosRsm`].
///
/// Besides implementing the functions specified in the trait, implementors of App are expected to be
/// *deterministic*: every replica applies the same operations in the same order, and must end up in the same
/// state. An operation may be decided more than once (at different sequence numbers) if a client resubmits
/// it, so operations that must take effect once should carry an identifier the app can deduplicate on.
pub trait App<V>: Send + 'static {
    /// Apply the operation decided at `seq`. Called exactly once per sequence number, in increasing order.
    fn apply(&mut self, seq: SequenceNumber, value: &V);

    /// Whether `a` and `b` are the same logical operation. Used to tell whether a decided operation is the
    /// one this replica proposed.
    fn equals(&self, a: &V, b: &V) -> bool;
}

/// How [`PaxosRsm::add_op`] polls for the decision of an instance: starting at `initial_poll_interval`, doubling
/// after every poll, up to `max_poll_interval`.
#[derive(Clone, Debug, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building an [RsmConfiguration].

    Optional:
    - `.initial_poll_interval(...)`
    - `.max_poll_interval(...)`
"))]
pub struct RsmConfiguration {
    #[builder(default = Duration::from_millis(10), setter(doc = "Set the first polling interval. Optional, defaults to 10ms."))]
    pub initial_poll_interval: Duration,
    #[builder(default = Duration::from_secs(10), setter(doc = "Set the largest polling interval. Optional, defaults to 10s."))]
    pub max_poll_interval: Duration,
}

/// Internal invariant violations of the replicated state machine. These are fatal: [`PaxosRsm`] panics with
/// them rather than returning them.
#[derive(Debug)]
pub enum RsmError {
    /// An instance this replica had not applied yet fell below `Min`. Continuing would leave a gap in the log.
    InstanceForgotten {
        seq: SequenceNumber,
        min: SequenceNumber,
    },
}

pub struct PaxosRsm<V: Value, N: Network<V>, A: App<V>> {
    paxos: Paxos<V, N>,
    configuration: RsmConfiguration,
    state: Mutex<RsmState<A>>,
}

struct RsmState<A> {
    /// The first sequence number not yet applied.
    cursor: SequenceNumber,
    app: A,
}

impl<V: Value, N: Network<V>, A: App<V>> PaxosRsm<V, N, A> {
    pub fn new(paxos: Paxos<V, N>, app: A, configuration: RsmConfiguration) -> Self {
        Self {
            paxos,
            configuration,
            state: Mutex::new(RsmState {
                cursor: SequenceNumber::new(0),
                app,
            }),
        }
    }

    /// Get `value` into the replicated log and apply it, along with every operation decided before it.
    ///
    /// Blocks until `value` is applied on this replica. Concurrent calls on the same replica are serialized.
    /// Never fails: while no majority is reachable, this blocks.
    ///
    /// # Panics
    ///
    /// Panics with [`RsmError::InstanceForgotten`] if an instance this replica has not applied is forgotten.
    pub fn add_op(&self, value: V) {
        let mut state = self.state();
        loop {
            let seq = state.cursor;
            let decided = match self.paxos.status(seq) {
                Fate::Decided(decided) => decided,
                Fate::Pending => {
                    self.paxos.start(seq, value.clone());
                    self.wait_decided(seq)
                }
                Fate::Forgotten => self.fatal(seq),
            };

            state.app.apply(seq, &decided);
            log::debug!("Peer {} applied instance {}", self.paxos.me(), seq);
            self.paxos.done(seq);
            state.cursor = seq.next();

            if state.app.equals(&decided, &value) {
                return;
            }
        }
    }

    /// Read the application state.
    pub fn with_app<R>(&self, f: impl FnOnce(&A) -> R) -> R {
        f(&self.state().app)
    }

    /// The first sequence number this replica has not applied yet.
    pub fn cursor(&self) -> SequenceNumber {
        self.state().cursor
    }

    pub fn paxos(&self) -> &Paxos<V, N> {
        &self.paxos
    }

    fn wait_decided(&self, seq: SequenceNumber) -> V {
        let mut poll_interval = self.configuration.initial_poll_interval;
        loop {
            match self.paxos.status(seq) {
                Fate::Decided(decided) => return decided,
                Fate::Pending => {
                    thread::sleep(poll_interval);
                    poll_interval = (poll_interval * 2).min(self.configuration.max_poll_interval);
                }
                Fate::Forgotten => self.fatal(seq),
            }
        }
    }

    fn fatal(&self, seq: SequenceNumber) -> ! {
        let error = RsmError::InstanceForgotten {
            seq,
            min: self.paxos.min(),
        };
        log::error!("Peer {}: {:?}", self.paxos.me(), error);
        panic!("{:?}", error)
    }

    fn state(&self) -> MutexGuard<'_, RsmState<A>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
