/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the structured messages that are exchanged between peers.
//!
//! Every exchange is a request answered by exactly one response. A [`Network`](crate::networking::Network)
//! implementation carries a [`Request`] to the target peer's [`Acceptor`](crate::acceptor::Acceptor) and
//! returns its [`Response`], or `None` if the exchange did not complete.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{PeerIndex, ProposalNumber, SequenceNumber};

#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub enum Request<V> {
    Prepare(PrepareRequest),
    Accept(AcceptRequest<V>),
    Learn(LearnRequest<V>),
    /// Asks for the highest sequence number the responder knows about.
    Max,
}

impl<V> Request<V> {
    /// Returns the sequence number of the instance this request is about, if any.
    pub fn seq(&self) -> Option<SequenceNumber> {
        match self {
            Request::Prepare(PrepareRequest { seq, .. }) => Some(*seq),
            Request::Accept(AcceptRequest { seq, .. }) => Some(*seq),
            Request::Learn(LearnRequest { seq, .. }) => Some(*seq),
            Request::Max => None,
        }
    }
}

#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub enum Response<V> {
    Prepare(PrepareResponse<V>),
    Accept(AcceptResponse),
    Learn(LearnResponse),
    Max(MaxResponse),
}

impl<V> Response<V> {
    pub fn into_prepare(self) -> Option<PrepareResponse<V>> {
        match self {
            Response::Prepare(response) => Some(response),
            _ => None,
        }
    }

    pub fn into_accept(self) -> Option<AcceptResponse> {
        match self {
            Response::Accept(response) => Some(response),
            _ => None,
        }
    }

    pub fn into_learn(self) -> Option<LearnResponse> {
        match self {
            Response::Learn(response) => Some(response),
            _ => None,
        }
    }

    pub fn into_max(self) -> Option<MaxResponse> {
        match self {
            Response::Max(response) => Some(response),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub struct PrepareRequest {
    pub seq: SequenceNumber,
    pub proposal: ProposalNumber,
}

impl<V> From<PrepareRequest> for Request<V> {
    fn from(request: PrepareRequest) -> Self {
        Request::Prepare(request)
    }
}

#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub enum PrepareResponse<V> {
    /// Promised, and nothing has been accepted for the instance yet.
    PromiseEmpty { promised: ProposalNumber },

    /// Promised. `value` was accepted under `accepted`, and the proposer must consider adopting it.
    PromiseWithValue {
        promised: ProposalNumber,
        accepted: ProposalNumber,
        value: V,
    },

    /// Not promised: `promised` blocks the proposal.
    Reject { promised: ProposalNumber },

    /// The instance is below the responder's `Min`. `done` is the responder's own Done watermark.
    Forgotten { done: Option<SequenceNumber> },
}

#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub struct AcceptRequest<V> {
    pub seq: SequenceNumber,
    pub proposal: ProposalNumber,
    pub value: V,
}

impl<V> From<AcceptRequest<V>> for Request<V> {
    fn from(request: AcceptRequest<V>) -> Self {
        Request::Accept(request)
    }
}

#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub enum AcceptResponse {
    Ok { proposal: ProposalNumber },
    Reject { promised: ProposalNumber },
    Forgotten { done: Option<SequenceNumber> },
}

/// Announces a decision. Also carries the sender's Done watermark, so that peers which never propose still
/// hear about the sender's progress.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub struct LearnRequest<V> {
    pub seq: SequenceNumber,
    pub proposal: ProposalNumber,
    pub value: V,
    pub sender: PeerIndex,
    pub sender_done: Option<SequenceNumber>,
}

impl<V> From<LearnRequest<V>> for Request<V> {
    fn from(request: LearnRequest<V>) -> Self {
        Request::Learn(request)
    }
}

/// Both variants carry the responder's Done watermark.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub enum LearnResponse {
    Ok { done: Option<SequenceNumber> },
    Reject { done: Option<SequenceNumber> },
}

impl LearnResponse {
    pub fn done(&self) -> Option<SequenceNumber> {
        match self {
            LearnResponse::Ok { done } | LearnResponse::Reject { done } => *done,
        }
    }
}

#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub struct MaxResponse {
    pub max: Option<SequenceNumber>,
}
