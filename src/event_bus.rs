/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The event bus thread, which receives [events](crate::events) from a peer's proposer and acceptor code
//! and fires the handlers registered for them.

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::events::*;
use crate::logging::Logger;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

/// How long the event bus waits for an event before checking its shutdown signal again.
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub(crate) struct EventHandlers {
    pub(crate) start_handlers: Vec<HandlerPtr<StartEvent>>,
    pub(crate) prepare_handlers: Vec<HandlerPtr<PrepareEvent>>,
    pub(crate) accept_handlers: Vec<HandlerPtr<AcceptEvent>>,
    pub(crate) contention_handlers: Vec<HandlerPtr<ContentionEvent>>,
    pub(crate) decide_handlers: Vec<HandlerPtr<DecideEvent>>,
    pub(crate) update_peer_done_handlers: Vec<HandlerPtr<UpdatePeerDoneEvent>>,
    pub(crate) forget_handlers: Vec<HandlerPtr<ForgetEvent>>,
}

impl EventHandlers {
    /// Collects the user-provided handlers, plus the default logging handlers if `log_events` is set.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log_events: bool,
        start_handler: Option<HandlerPtr<StartEvent>>,
        prepare_handler: Option<HandlerPtr<PrepareEvent>>,
        accept_handler: Option<HandlerPtr<AcceptEvent>>,
        contention_handler: Option<HandlerPtr<ContentionEvent>>,
        decide_handler: Option<HandlerPtr<DecideEvent>>,
        update_peer_done_handler: Option<HandlerPtr<UpdatePeerDoneEvent>>,
        forget_handler: Option<HandlerPtr<ForgetEvent>>,
    ) -> EventHandlers {
        EventHandlers {
            start_handlers: handlers(log_events, start_handler),
            prepare_handlers: handlers(log_events, prepare_handler),
            accept_handlers: handlers(log_events, accept_handler),
            contention_handlers: handlers(log_events, contention_handler),
            decide_handlers: handlers(log_events, decide_handler),
            update_peer_done_handlers: handlers(log_events, update_peer_done_handler),
            forget_handlers: handlers(log_events, forget_handler),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.start_handlers.is_empty()
            && self.prepare_handlers.is_empty()
            && self.accept_handlers.is_empty()
            && self.contention_handlers.is_empty()
            && self.decide_handlers.is_empty()
            && self.update_peer_done_handlers.is_empty()
            && self.forget_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::Start(start_event) =>
                self.start_handlers.iter().for_each(|handler| handler(&start_event)),

            Event::Prepare(prepare_event) =>
                self.prepare_handlers.iter().for_each(|handler| handler(&prepare_event)),

            Event::Accept(accept_event) =>
                self.accept_handlers.iter().for_each(|handler| handler(&accept_event)),

            Event::Contention(contention_event) =>
                self.contention_handlers.iter().for_each(|handler| handler(&contention_event)),

            Event::Decide(decide_event) =>
                self.decide_handlers.iter().for_each(|handler| handler(&decide_event)),

            Event::UpdatePeerDone(update_peer_done_event) =>
                self.update_peer_done_handlers.iter().for_each(|handler| handler(&update_peer_done_event)),

            Event::Forget(forget_event) =>
                self.forget_handlers.iter().for_each(|handler| handler(&forget_event)),
        }
    }
}

fn handlers<T: Logger>(log_events: bool, user_handler: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
    let mut handlers = Vec::new();
    if log_events {
        handlers.push(T::get_logger());
    }
    if let Some(handler) = user_handler {
        handlers.push(handler);
    }
    handlers
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("event_bus thread disconnected from main thread")
            }
        }

        match event_subscriber.recv_timeout(EVENT_POLL_INTERVAL) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            // Every publisher is gone: nothing more will arrive, but keep waiting for the shutdown signal.
            Err(RecvTimeoutError::Disconnected) => thread::sleep(EVENT_POLL_INTERVAL),
        }
    })
}
