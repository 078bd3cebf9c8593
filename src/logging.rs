/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the peer's
//! [configuration](crate::paxos::Configuration).
//!
//! This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [Decide](crate::events::DecideEvent) is printed:
//!
//! ```text
//! Decide, 1701329264, 12, fNGCJyk
//! ```
//!
//! In the snippet:
//! - The third value is the sequence number of the decided instance.
//! - The fourth value is the first seven characters of the Base64 encoding of the digest of the decided
//!   value.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use std::time::SystemTime;

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const START: &str = "Start";
pub const PREPARE: &str = "Prepare";
pub const ACCEPT: &str = "Accept";
pub const CONTENTION: &str = "Contention";

pub const DECIDE: &str = "Decide";
pub const UPDATE_PEER_DONE: &str = "UpdatePeerDone";
pub const FORGET: &str = "Forget";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for StartEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_event: &StartEvent| {
            log::info!(
                "{}, {}, {}, {}",
                START,
                secs_since_unix_epoch(start_event.timestamp),
                start_event.seq,
                first_seven_base64_chars(&start_event.value)
            )
        };
        Box::new(logger)
    }
}

impl Logger for PrepareEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |prepare_event: &PrepareEvent| {
            log::debug!(
                "{}, {}, {}, {}",
                PREPARE,
                secs_since_unix_epoch(prepare_event.timestamp),
                prepare_event.seq,
                prepare_event.proposal
            )
        };
        Box::new(logger)
    }
}

impl Logger for AcceptEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |accept_event: &AcceptEvent| {
            log::debug!(
                "{}, {}, {}, {}, {}",
                ACCEPT,
                secs_since_unix_epoch(accept_event.timestamp),
                accept_event.seq,
                accept_event.proposal,
                first_seven_base64_chars(&accept_event.value)
            )
        };
        Box::new(logger)
    }
}

impl Logger for ContentionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |contention_event: &ContentionEvent| {
            log::debug!(
                "{}, {}, {}, {}, {}",
                CONTENTION,
                secs_since_unix_epoch(contention_event.timestamp),
                contention_event.seq,
                contention_event.proposal,
                contention_event
                    .blocking
                    .map_or(String::from("unreachable"), |blocking| blocking.to_string())
            )
        };
        Box::new(logger)
    }
}

impl Logger for DecideEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |decide_event: &DecideEvent| {
            log::info!(
                "{}, {}, {}, {}",
                DECIDE,
                secs_since_unix_epoch(decide_event.timestamp),
                decide_event.seq,
                first_seven_base64_chars(&decide_event.value)
            )
        };
        Box::new(logger)
    }
}

impl Logger for UpdatePeerDoneEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |update_peer_done_event: &UpdatePeerDoneEvent| {
            log::debug!(
                "{}, {}, {}, {}",
                UPDATE_PEER_DONE,
                secs_since_unix_epoch(update_peer_done_event.timestamp),
                update_peer_done_event.peer,
                update_peer_done_event.done
            )
        };
        Box::new(logger)
    }
}

impl Logger for ForgetEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |forget_event: &ForgetEvent| {
            log::info!(
                "{}, {}, {}, {}",
                FORGET,
                secs_since_unix_epoch(forget_event.timestamp),
                forget_event.min,
                forget_event.forgotten
            )
        };
        Box::new(logger)
    }
}

/// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
pub(crate) fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

pub(crate) fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}
