use std::{
    fmt::Debug,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use paxos_rsm::{
    paxos::{Configuration, Paxos, PaxosSpec},
    types::{Fate, PeerIndex, SequenceNumber, Value},
};

use crate::common::network::{mock_network, NetworkStub, Switchboard};

pub(crate) type TestPeer<V> = Paxos<V, NetworkStub<V>>;

/// Start `num_peers` peers connected by a fresh [`Switchboard`].
pub(crate) fn start_peers<V: Value>(num_peers: u32) -> (Arc<Switchboard<V>>, Vec<TestPeer<V>>) {
    let (switchboard, network_stubs) = mock_network(num_peers);
    let peers = network_stubs
        .into_iter()
        .enumerate()
        .map(|(me, network)| {
            let me = PeerIndex::new(me as u32);
            let configuration = Configuration::builder()
                .me(me)
                .num_peers(num_peers)
                .log_events(true)
                .build();
            let peer = PaxosSpec::builder()
                .network(network)
                .configuration(configuration)
                .build()
                .start();
            switchboard.register(me, peer.acceptor());
            peer
        })
        .collect();

    (switchboard, peers)
}

/// Count the peers that have decided `seq`, asserting that they all decided the same value.
pub(crate) fn num_decided<V: Value + PartialEq + Debug>(peers: &[TestPeer<V>], seq: u64) -> usize {
    let mut decided_value: Option<V> = None;
    let mut count = 0;
    for peer in peers {
        if let Fate::Decided(value) = peer.status(SequenceNumber::new(seq)) {
            if let Some(decided_value) = &decided_value {
                assert_eq!(
                    decided_value, &value,
                    "peers decided different values for instance {}",
                    seq
                );
            }
            decided_value = Some(value);
            count += 1;
        }
    }
    count
}

/// Wait until at least `wanted` peers have decided `seq`. Panics if that takes too long.
pub(crate) fn wait_num_decided<V: Value + PartialEq + Debug>(peers: &[TestPeer<V>], seq: u64, wanted: usize) {
    let deadline = Instant::now() + Duration::from_secs(20);
    let mut sleep = Duration::from_millis(10);
    while Instant::now() < deadline {
        if num_decided(peers, seq) >= wanted {
            return;
        }
        thread::sleep(sleep);
        sleep = (sleep * 2).min(Duration::from_secs(1));
    }
    panic!(
        "too few peers decided instance {}: {} (wanted {})",
        seq,
        num_decided(peers, seq),
        wanted
    );
}

/// Poll `condition` until it holds. Panics after `timeout`.
pub(crate) fn wait_until(timeout: Duration, what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !condition() {
        if Instant::now() >= deadline {
            panic!("timed out waiting until {}", what);
        }
        thread::sleep(Duration::from_millis(20));
    }
}
