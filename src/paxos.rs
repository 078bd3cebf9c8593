/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build and run a Paxos peer.
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the peer](PaxosSpec),
//! - The function to [start](PaxosSpec::start) a [Paxos] peer given its specification,
//! - [The type](Paxos) which keeps the peer alive, and through which the application drives instances.
//!
//! ## Starting a peer
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .me(PeerIndex::new(0))
//!     .num_peers(3)
//!     .log_events(true)
//!     .build();
//!
//! let paxos =
//!     PaxosSpec::builder()
//!     .network(network)
//!     .configuration(configuration)
//!     .on_decide(decide_handler)
//!     .build()
//!     .start();
//! ```
//!
//! Once started, the peer's networking provider must dispatch incoming requests to
//! [`paxos.acceptor().handle(request)`](crate::acceptor::Acceptor::handle).
//!
//! ### Required setters
//! - `.network(...)`
//! - `.configuration(...)`
//!
//! ### Optional setters
//!
//! The optional setters are for registering user-defined event handlers for events from [crate::events]:
//! - `.on_start(...)`
//! - `.on_prepare(...)`
//! - `.on_accept(...)`
//! - `.on_contention(...)`
//! - `.on_decide(...)`
//! - `.on_update_peer_done(...)`
//! - `.on_forget(...)`

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use typed_builder::TypedBuilder;

use crate::acceptor::Acceptor;
use crate::event_bus::*;
use crate::events::*;
use crate::messages::{MaxResponse, Request, Response};
use crate::networking::{broadcast_call, Network};
use crate::proposer::Proposer;
use crate::types::*;

/// Stores the user-defined parameters required to start a peer, that is:
/// 1. The peer's own index in the list of peers.
/// 2. The total number of peers. Majorities are computed over this number.
/// 3. The proposer backoff: how long a proposer waits after a failed round, before scaling by the peer's index
///    and adding random jitter.
/// 4. The "Log Events" flag. If set to "true", the default logging handlers of [crate::logging] are
///    registered for every event.
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.me(...)`
    - `.num_peers(...)`

    Optional:
    - `.proposer_backoff(...)`
    - `.log_events(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the index of this peer among all peers. Required."))]
    pub me: PeerIndex,
    #[builder(setter(doc = "Set the total number of peers. Required."))]
    pub num_peers: u32,
    #[builder(default = Duration::from_millis(10), setter(doc = "Set the base proposer backoff. Optional, defaults to 10ms."))]
    pub proposer_backoff: Duration,
    #[builder(default = false, setter(doc = "Enable logging? Optional, defaults to false."))]
    pub log_events: bool,
}

/// Stores all necessary parameters and trait implementations required to run a [Paxos] peer.
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [PaxosSpec]. On the builder call the following methods to construct a valid [PaxosSpec].

    Required:
    - `.network(...)`
    - `.configuration(...)`

    Optional:
    - `.on_start(...)`
    - `.on_prepare(...)`
    - `.on_accept(...)`
    - `.on_contention(...)`
    - `.on_decide(...)`
    - `.on_update_peer_done(...)`
    - `.on_forget(...)`
"))]
pub struct PaxosSpec<V: Value, N: Network<V>> {
    // Required parameters
    #[builder(setter(doc = "Set the implementation of peer-to-peer networking. The argument must implement the [Network](crate::networking::Network) trait. Required."))]
    network: N,
    #[builder(setter(doc = "Set the [configuration](Configuration), which contains the necessary parameters to run a peer. Required."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&StartEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartEvent>),
    doc = "Register a handler closure to be invoked after the peer starts a proposer for an instance. Optional."))]
    on_start: Option<HandlerPtr<StartEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PrepareEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PrepareEvent>),
    doc = "Register a handler closure to be invoked after a proposer sends Prepare requests. Optional."))]
    on_prepare: Option<HandlerPtr<PrepareEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&AcceptEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<AcceptEvent>),
    doc = "Register a handler closure to be invoked after a proposer sends Accept requests. Optional."))]
    on_accept: Option<HandlerPtr<AcceptEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ContentionEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ContentionEvent>),
    doc = "Register a handler closure to be invoked after a proposer fails to gather a majority and backs off. Optional."))]
    on_contention: Option<HandlerPtr<ContentionEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&DecideEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<DecideEvent>),
    doc = "Register a handler closure to be invoked after the peer learns a decided value. Optional."))]
    on_decide: Option<HandlerPtr<DecideEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UpdatePeerDoneEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<UpdatePeerDoneEvent>),
    doc = "Register a handler closure to be invoked after the peer hears of a higher Done watermark. Optional."))]
    on_update_peer_done: Option<HandlerPtr<UpdatePeerDoneEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ForgetEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ForgetEvent>),
    doc = "Register a handler closure to be invoked after the peer forgets the instances below Min. Optional."))]
    on_forget: Option<HandlerPtr<ForgetEvent>>,
    #[builder(default, setter(skip))]
    _value: PhantomData<V>,
}

impl<V: Value, N: Network<V>> PaxosSpec<V, N> {
    /// Starts the event bus (if any handlers are registered) and returns the running [Paxos] peer.
    ///
    /// # Panics
    ///
    /// Panics if the configuration names no peers, or if `me` is not one of them.
    pub fn start(self) -> Paxos<V, N> {
        assert!(self.configuration.num_peers > 0, "a Paxos group needs at least one peer");
        assert!(
            self.configuration.me.int() < self.configuration.num_peers,
            "peer index {} is out of range for {} peers",
            self.configuration.me,
            self.configuration.num_peers
        );

        let event_handlers = EventHandlers::new(
            self.configuration.log_events,
            self.on_start,
            self.on_prepare,
            self.on_accept,
            self.on_contention,
            self.on_decide,
            self.on_update_peer_done,
            self.on_forget,
        );

        let (event_publisher, event_bus, event_bus_shutdown) = if event_handlers.is_empty() {
            (None, None, None)
        } else {
            let (event_publisher, event_subscriber) = mpsc::channel();
            let (event_bus_shutdown, event_bus_shutdown_receiver) = mpsc::channel();
            let event_bus = start_event_bus(event_handlers, event_subscriber, event_bus_shutdown_receiver);
            (Some(event_publisher), Some(event_bus), Some(event_bus_shutdown))
        };

        let Configuration {
            me,
            num_peers,
            proposer_backoff,
            ..
        } = self.configuration;

        Paxos {
            me,
            num_peers,
            acceptor: Arc::new(Acceptor::new(me, num_peers as usize, event_publisher.clone())),
            network: Mutex::new(self.network),
            alive: Arc::new(AtomicBool::new(true)),
            proposer_backoff,
            proposers: Mutex::new(BTreeMap::new()),
            event_publisher,
            event_bus,
            event_bus_shutdown,
        }
    }
}

/// A handle to a running Paxos peer. When this value is dropped, every proposer thread and the event bus thread
/// are shut down.
pub struct Paxos<V: Value, N: Network<V>> {
    me: PeerIndex,
    num_peers: u32,
    acceptor: Arc<Acceptor<V>>,
    network: Mutex<N>,
    alive: Arc<AtomicBool>,
    proposer_backoff: Duration,
    proposers: Mutex<BTreeMap<SequenceNumber, JoinHandle<()>>>,
    event_publisher: Option<Sender<Event>>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<V: Value, N: Network<V>> Paxos<V, N> {
    /// Begin driving agreement on instance `seq`, proposing `value`. Returns immediately.
    ///
    /// Does nothing if the instance is already decided or forgotten, or if this peer is already running a
    /// proposer for it.
    pub fn start(&self, seq: SequenceNumber, value: V) {
        if !matches!(self.acceptor.status(seq), Fate::Pending) {
            return;
        }

        let mut proposers = self.proposers.lock().unwrap_or_else(PoisonError::into_inner);
        proposers.retain(|_, proposer| !proposer.is_finished());
        if proposers.contains_key(&seq) {
            return;
        }

        self.acceptor.observe_seq(seq);
        Event::Start(StartEvent {
            timestamp: SystemTime::now(),
            seq,
            value: value_digest(&value),
        })
        .publish(&self.event_publisher);

        let proposer = Proposer::new(
            seq,
            value,
            self.me,
            self.num_peers,
            self.acceptor.clone(),
            self.network().clone(),
            self.alive.clone(),
            self.proposer_backoff,
            self.event_publisher.clone(),
        );
        proposers.insert(seq, thread::spawn(move || proposer.run()));
    }

    /// What this peer knows about instance `seq`. Purely local.
    pub fn status(&self, seq: SequenceNumber) -> Fate<V> {
        self.acceptor.status(seq)
    }

    /// Declare that this peer's application no longer needs any instance up to and including `seq`.
    pub fn done(&self, seq: SequenceNumber) {
        self.acceptor.done(seq)
    }

    /// Highest sequence number this peer has seen, or `None` if it has not seen any.
    pub fn max(&self) -> Option<SequenceNumber> {
        self.acceptor.max()
    }

    /// Every instance below the returned sequence number has been (or may be) forgotten.
    pub fn min(&self) -> SequenceNumber {
        self.acceptor.min()
    }

    /// The first sequence number above every instance this peer has seen.
    pub fn next_seq(&self) -> SequenceNumber {
        self.max().map_or(SequenceNumber::new(0), |max| max.next())
    }

    /// Like [`next_seq`](Self::next_seq), but also asks every reachable peer for its Max. Blocks until every
    /// peer has answered or failed to.
    pub fn global_next_seq(&self) -> SequenceNumber {
        let responses = broadcast_call::<V, N>(&self.network(), self.me, self.num_peers, Request::Max);
        responses
            .iter()
            .filter_map(|(_, response)| response.and_then(Response::into_max))
            .filter_map(|MaxResponse { max }| max)
            .map(|max| max.next())
            .fold(self.next_seq(), SequenceNumber::max)
    }

    /// The endpoint this peer's networking provider dispatches incoming requests to.
    pub fn acceptor(&self) -> Arc<Acceptor<V>> {
        self.acceptor.clone()
    }

    pub fn me(&self) -> PeerIndex {
        self.me
    }

    pub fn num_peers(&self) -> u32 {
        self.num_peers
    }

    fn network(&self) -> MutexGuard<'_, N> {
        self.network.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V: Value, N: Network<V>> Drop for Paxos<V, N> {
    fn drop(&mut self) {
        // Proposers may still publish events while they wind down, so the event bus goes last.
        self.alive.store(false, Ordering::Release);
        let proposers = std::mem::take(self.proposers.get_mut().unwrap_or_else(PoisonError::into_inner));
        for (seq, proposer) in proposers {
            if proposer.join().is_err() {
                log::error!("Proposer for instance {} of peer {} panicked", seq, self.me);
            }
        }

        if let Some(event_bus_shutdown) = self.event_bus_shutdown.take() {
            let _ = event_bus_shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            let _ = event_bus.join();
        }
    }
}
