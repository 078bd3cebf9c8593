/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A Rust implementation of Paxos, run as an unbounded sequence of independent single-decree instances, and of
//! a replicated state machine built on top of it.
//!
//! A [Paxos peer](paxos::Paxos) plays the proposer, acceptor, and learner roles for every instance. The
//! application starts instances, polls their status, and declares which instances it is done with so that
//! every peer can eventually forget them. A [replicated state machine](rsm::PaxosRsm) uses a peer to apply
//! operations to an [application](rsm::App) exactly once, in the same order on every replica.
//!
//! Peer-to-peer networking is pluggable: see [networking::Network].

pub mod acceptor;

pub(crate) mod done_tracker;

pub(crate) mod event_bus;

pub mod events;

pub(crate) mod instances;

pub mod logging;

pub mod messages;

pub mod networking;

pub mod paxos;

pub(crate) mod proposer;

pub mod rsm;

pub mod types;
