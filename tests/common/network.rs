//! An in-process network that connects the peers of a test cluster, with labrpc-style fault injection.
//!
//! Every call is dispatched to the target peer's acceptor on the calling thread. Requests and responses are
//! borsh-encoded and decoded on the way, as a real transport would. The [`Switchboard`] decides whether a call
//! goes through:
//! - Calls from or to a disconnected peer fail.
//! - In unreliable mode, calls are delayed by a few milliseconds, and about 10% of requests and 10% of replies
//!   are dropped.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use borsh::{BorshDeserialize, BorshSerialize};
use paxos_rsm::{
    acceptor::Acceptor,
    messages::{Request, Response},
    networking::Network,
    types::{PeerIndex, Value},
};
use rand::{thread_rng, Rng};

pub(crate) struct Switchboard<V: Value> {
    acceptors: Mutex<Vec<Option<Arc<Acceptor<V>>>>>,
    connected: Vec<AtomicBool>,
    reliable: AtomicBool,
}

impl<V: Value> Switchboard<V> {
    /// Make `acceptor` reachable as `peer`.
    pub(crate) fn register(&self, peer: PeerIndex, acceptor: Arc<Acceptor<V>>) {
        self.acceptors.lock().unwrap()[peer.usize()] = Some(acceptor);
    }

    pub(crate) fn disconnect(&self, peer: PeerIndex) {
        self.connected[peer.usize()].store(false, Ordering::Release);
    }

    pub(crate) fn connect(&self, peer: PeerIndex) {
        self.connected[peer.usize()].store(true, Ordering::Release);
    }

    /// Leave only `peers` connected.
    pub(crate) fn partition(&self, peers: &[u32]) {
        for (index, connected) in self.connected.iter().enumerate() {
            connected.store(peers.contains(&(index as u32)), Ordering::Release);
        }
    }

    pub(crate) fn set_reliable(&self, yes: bool) {
        self.reliable.store(yes, Ordering::Release);
    }

    fn call(&self, from: PeerIndex, to: PeerIndex, request: Request<V>) -> Option<Response<V>> {
        if !self.is_connected(from) || !self.is_connected(to) {
            // Behave like a timeout, but a short one.
            thread::sleep(Duration::from_millis(5));
            return None;
        }

        let reliable = self.reliable.load(Ordering::Acquire);
        if !reliable {
            let short_delay = thread_rng().gen_range(0, 27);
            thread::sleep(Duration::from_millis(short_delay));
            if thread_rng().gen::<u64>() % 1000 < 100 {
                return None;
            }
        }

        let acceptor = self.acceptors.lock().unwrap().get(to.usize()).cloned().flatten()?;

        let request = Request::<V>::try_from_slice(&request.try_to_vec().unwrap()).unwrap();
        let response = acceptor.handle(request);
        let response = Response::<V>::try_from_slice(&response.try_to_vec().unwrap()).unwrap();

        if !reliable && thread_rng().gen::<u64>() % 1000 < 100 {
            // The acceptor has handled the request, but the reply is lost.
            return None;
        }
        Some(response)
    }

    fn is_connected(&self, peer: PeerIndex) -> bool {
        self.connected
            .get(peer.usize())
            .map_or(false, |connected| connected.load(Ordering::Acquire))
    }
}

/// A mock network stub that calls into other peers through a shared [`Switchboard`].
#[derive(Clone)]
pub(crate) struct NetworkStub<V: Value> {
    me: PeerIndex,
    switchboard: Arc<Switchboard<V>>,
}

impl<V: Value> Network<V> for NetworkStub<V> {
    fn call(&mut self, peer: PeerIndex, request: Request<V>) -> Option<Response<V>> {
        self.switchboard.call(self.me, peer, request)
    }
}

pub(crate) fn mock_network<V: Value>(num_peers: u32) -> (Arc<Switchboard<V>>, Vec<NetworkStub<V>>) {
    let switchboard = Arc::new(Switchboard {
        acceptors: Mutex::new((0..num_peers).map(|_| None).collect()),
        connected: (0..num_peers).map(|_| AtomicBool::new(true)).collect(),
        reliable: AtomicBool::new(true),
    });

    let network_stubs = (0..num_peers)
        .map(|peer| NetworkStub {
            me: PeerIndex::new(peer),
            switchboard: switchboard.clone(),
        })
        .collect();

    (switchboard, network_stubs)
}
