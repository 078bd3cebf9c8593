/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [Trait definition](Network) for pluggable peer-to-peer networking, as well as the internal functions that
//! proposers use to talk to the other peers.
//!
//! Peers are addressed by their [`PeerIndex`]. A networking provider delivers a [`Request`] to the target
//! peer's [`Acceptor::handle`](crate::acceptor::Acceptor::handle) and carries the [`Response`] back. The
//! provider may lose, delay, or reorder exchanges; it must never corrupt or forge them.

use std::sync::mpsc::{self, Receiver};
use std::thread;

use crate::messages::*;
use crate::types::{PeerIndex, Value};

pub trait Network<V: Value>: Clone + Send + 'static {
    /// Send `request` to `peer` and block until its response arrives. Returns `None` if the exchange failed:
    /// the request or the response was lost, or the peer is unreachable.
    ///
    /// Implementations should bound how long this blocks.
    fn call(&mut self, peer: PeerIndex, request: Request<V>) -> Option<Response<V>>;
}

/// Send `request` to every peer except `me`, concurrently. The responses (or `None`, for failed exchanges)
/// arrive on the returned receiver in the order they complete. The receiver disconnects after every peer has
/// been heard from.
pub(crate) fn broadcast_call<V: Value, N: Network<V>>(
    network: &N,
    me: PeerIndex,
    num_peers: u32,
    request: Request<V>,
) -> Receiver<(PeerIndex, Option<Response<V>>)> {
    let (to_caller, responses) = mpsc::channel();
    for peer in (0..num_peers).map(PeerIndex::new).filter(|peer| *peer != me) {
        let mut network = network.clone();
        let request = request.clone();
        let to_caller = to_caller.clone();
        thread::spawn(move || {
            let response = network.call(peer, request);
            let _ = to_caller.send((peer, response));
        });
    }
    responses
}
