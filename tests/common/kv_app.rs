//! [`KvApp`], a key-value store replicated through a [`PaxosRsm`](paxos_rsm::rsm::PaxosRsm).
//!
//! Every operation carries the id of the client that sent it and a per-client request number. A client sends
//! its requests one at a time, so the app only needs to remember, per client, the highest request number it
//! has applied: an operation with a request number at or below it is a resubmission, and is skipped.

use std::collections::HashMap;

use borsh::{BorshDeserialize, BorshSerialize};
use paxos_rsm::{rsm::App, types::SequenceNumber};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub(crate) struct KvOp {
    pub(crate) client: u64,
    pub(crate) request: u64,
    pub(crate) kind: KvOpKind,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub(crate) enum KvOpKind {
    Put { key: String, value: String },
    Append { key: String, value: String },
    Get { key: String },
}

#[derive(Default)]
pub(crate) struct KvApp {
    store: HashMap<String, String>,
    handled: HashMap<u64, u64>,
    replies: HashMap<(u64, u64), String>,
    applied: Vec<SequenceNumber>,
}

impl KvApp {
    pub(crate) fn get(&self, key: &str) -> Option<&String> {
        self.store.get(key)
    }

    /// The result of a `Get` that has been applied.
    pub(crate) fn reply(&self, client: u64, request: u64) -> Option<&String> {
        self.replies.get(&(client, request))
    }

    /// Sequence numbers applied so far, in apply order.
    pub(crate) fn applied(&self) -> &[SequenceNumber] {
        &self.applied
    }
}

impl App<KvOp> for KvApp {
    fn apply(&mut self, seq: SequenceNumber, op: &KvOp) {
        self.applied.push(seq);

        if self.handled.get(&op.client).map_or(false, |handled| op.request <= *handled) {
            return;
        }
        self.handled.insert(op.client, op.request);

        match &op.kind {
            KvOpKind::Put { key, value } => {
                self.store.insert(key.clone(), value.clone());
            }
            KvOpKind::Append { key, value } => {
                self.store.entry(key.clone()).or_default().push_str(value);
            }
            KvOpKind::Get { key } => {
                let value = self.store.get(key).cloned().unwrap_or_default();
                self.replies.insert((op.client, op.request), value);
            }
        }
    }

    fn equals(&self, a: &KvOp, b: &KvOp) -> bool {
        a.client == b.client && a.request == b.request
    }
}
