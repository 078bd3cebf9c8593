use std::{
    sync::{Arc, Mutex},
    thread,
};

use log::LevelFilter;
use paxos_rsm::{
    rsm::{PaxosRsm, RsmConfiguration},
    types::{PeerIndex, SequenceNumber, Value},
};

mod common;

use crate::common::{
    kv_app::{KvApp, KvOp, KvOpKind},
    log_app::LogApp,
    logging::setup_logger,
    network::{NetworkStub, Switchboard},
    peer::start_peers,
};

type Log = Arc<Mutex<Vec<(SequenceNumber, String)>>>;
type LogReplica = Arc<PaxosRsm<String, NetworkStub<String>, LogApp>>;

fn start_replicas<V: Value, A: paxos_rsm::rsm::App<V>>(
    num_replicas: u32,
    mut app: impl FnMut() -> A,
) -> (Arc<Switchboard<V>>, Vec<Arc<PaxosRsm<V, NetworkStub<V>, A>>>) {
    let (switchboard, peers) = start_peers::<V>(num_replicas);
    let replicas = peers
        .into_iter()
        .map(|peer| Arc::new(PaxosRsm::new(peer, app(), RsmConfiguration::builder().build())))
        .collect();
    (switchboard, replicas)
}

fn start_log_replicas(num_replicas: u32) -> (Arc<Switchboard<String>>, Vec<LogReplica>, Vec<Log>) {
    let mut logs = Vec::new();
    let (switchboard, replicas) = start_replicas(num_replicas, || {
        let (app, log) = LogApp::new();
        logs.push(log);
        app
    });
    (switchboard, replicas, logs)
}

/// Checks that `log` applies sequence numbers 0, 1, 2, ... in order, and returns the applied values.
fn assert_gap_free(log: &Log) -> Vec<String> {
    let log = log.lock().unwrap();
    for (index, (seq, _)) in log.iter().enumerate() {
        assert_eq!(seq.int(), index as u64, "log has a gap or a duplicate: {:?}", *log);
    }
    log.iter().map(|(_, value)| value.clone()).collect()
}

/// Every replica adds `ops_per_replica` operations of its own, concurrently with the others.
fn add_ops_concurrently(replicas: &[LogReplica], ops_per_replica: usize) {
    let clients: Vec<_> = replicas
        .iter()
        .enumerate()
        .map(|(r, replica)| {
            let replica = replica.clone();
            thread::spawn(move || {
                for k in 0..ops_per_replica {
                    replica.add_op(format!("r{}-{}", r, k));
                }
            })
        })
        .collect();
    for client in clients {
        client.join().unwrap();
    }
}

/// Checks that every log is a prefix of one global log in which each operation added by
/// [`add_ops_concurrently`] appears exactly once, in the order its replica added it.
fn assert_applied_once_in_order(logs: &[Log], ops_per_replica: usize) {
    let applied: Vec<Vec<String>> = logs.iter().map(assert_gap_free).collect();
    let longest = applied.iter().max_by_key(|values| values.len()).unwrap();
    for values in &applied {
        assert_eq!(values[..], longest[..values.len()]);
    }

    assert_eq!(longest.len(), logs.len() * ops_per_replica);
    for r in 0..logs.len() {
        for k in 0..ops_per_replica {
            let op = format!("r{}-{}", r, k);
            assert_eq!(longest.iter().filter(|value| **value == op).count(), 1, "{} not applied once", op);
        }

        let own: Vec<&String> = longest.iter().filter(|value| value.starts_with(&format!("r{}-", r))).collect();
        let expected: Vec<String> = (0..ops_per_replica).map(|k| format!("r{}-{}", r, k)).collect();
        assert_eq!(own, expected.iter().collect::<Vec<_>>());
    }
}

#[test]
fn concurrent_add_op_test() {
    setup_logger(LevelFilter::Info);
    let (_, replicas, logs) = start_log_replicas(3);

    add_ops_concurrently(&replicas, 5);
    assert_applied_once_in_order(&logs, 5);
}

#[test]
fn concurrent_add_op_unreliable_test() {
    setup_logger(LevelFilter::Info);
    let (switchboard, replicas, logs) = start_log_replicas(3);
    switchboard.set_reliable(false);

    add_ops_concurrently(&replicas, 3);
    assert_applied_once_in_order(&logs, 3);
}

#[test]
fn disconnected_replica_catches_up_test() {
    setup_logger(LevelFilter::Debug);
    let (switchboard, replicas, logs) = start_log_replicas(3);

    switchboard.disconnect(PeerIndex::new(2));
    for k in 0..4 {
        replicas[k % 2].add_op(format!("op{}", k));
    }
    assert!(logs[2].lock().unwrap().is_empty());

    // Back on the network, replica 2 applies everything it missed before its own operation.
    switchboard.connect(PeerIndex::new(2));
    replicas[2].add_op(String::from("back"));
    let caught_up = assert_gap_free(&logs[2]);
    assert_eq!(caught_up, ["op0", "op1", "op2", "op3", "back"]);

    replicas[0].add_op(String::from("after"));
    let applied_by_0 = assert_gap_free(&logs[0]);
    assert_eq!(applied_by_0[..5], caught_up[..]);
    assert_eq!(applied_by_0[5], "after");
}

#[test]
fn competing_first_operations_test() {
    setup_logger(LevelFilter::Debug);
    let (_, replicas, logs) = start_log_replicas(3);

    let x = {
        let replica = replicas[0].clone();
        thread::spawn(move || replica.add_op(String::from("X")))
    };
    let y = {
        let replica = replicas[1].clone();
        thread::spawn(move || replica.add_op(String::from("Y")))
    };
    x.join().unwrap();
    y.join().unwrap();

    // Exactly one of X and Y took instance 0; the other was retried at instance 1. Replica 2 proposed at
    // neither, but applies both before its own operation.
    replicas[2].add_op(String::from("Z"));
    let applied = assert_gap_free(&logs[2]);
    assert_eq!(applied.len(), 3);
    assert!(applied[..2] == ["X", "Y"] || applied[..2] == ["Y", "X"], "{:?}", applied);
    assert_eq!(applied[2], "Z");
    assert_eq!(replicas[2].cursor(), SequenceNumber::new(3));

    replicas[0].add_op(String::from("W"));
    let applied_by_0 = assert_gap_free(&logs[0]);
    assert_eq!(applied_by_0[..3], applied[..]);
    assert_eq!(applied_by_0[3], "W");
}

#[test]
fn kv_app_test() {
    setup_logger(LevelFilter::Debug);
    let (_, replicas): (_, Vec<Arc<PaxosRsm<KvOp, NetworkStub<KvOp>, KvApp>>>) = start_replicas(3, KvApp::default);

    let op = |client: u64, request: u64, kind: KvOpKind| KvOp { client, request, kind };
    let append = |key: &str, value: &str| KvOpKind::Append {
        key: key.to_string(),
        value: value.to_string(),
    };

    replicas[0].add_op(op(1, 1, KvOpKind::Put { key: String::from("a"), value: String::from("x") }));
    replicas[1].add_op(op(2, 1, append("a", "y")));

    // Client 1 never sees the reply to its append, and resends it. The resent operation is decided again, at
    // another instance, and the app skips it.
    replicas[2].add_op(op(1, 2, append("a", "z")));
    replicas[2].add_op(op(1, 2, append("a", "z")));
    assert_eq!(replicas[2].cursor(), SequenceNumber::new(4));

    replicas[1].add_op(op(3, 1, KvOpKind::Get { key: String::from("a") }));
    replicas[1].with_app(|app| {
        assert_eq!(app.reply(3, 1), Some(&String::from("xyz")));
        assert_eq!(app.get("a"), Some(&String::from("xyz")));
        let applied: Vec<u64> = app.applied().iter().map(|seq| seq.int()).collect();
        assert_eq!(applied, (0..applied.len() as u64).collect::<Vec<_>>());
    });

    // A replica that only catches up applies the same history.
    replicas[2].add_op(op(4, 1, KvOpKind::Get { key: String::from("a") }));
    replicas[2].with_app(|app| {
        assert_eq!(app.reply(4, 1), Some(&String::from("xyz")));
    });
}
