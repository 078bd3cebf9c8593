//! [`LogApp`], an [`App`] that records every operation it applies, used to check ordering.

use std::sync::{Arc, Mutex};

use paxos_rsm::{rsm::App, types::SequenceNumber};

/// Records `(seq, value)` for every apply. The log is shared, so tests can read it while the replica runs.
pub(crate) struct LogApp {
    log: Arc<Mutex<Vec<(SequenceNumber, String)>>>,
}

impl LogApp {
    pub(crate) fn new() -> (LogApp, Arc<Mutex<Vec<(SequenceNumber, String)>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        (LogApp { log: log.clone() }, log)
    }
}

impl App<String> for LogApp {
    fn apply(&mut self, seq: SequenceNumber, value: &String) {
        self.log.lock().unwrap().push((seq, value.clone()));
    }

    fn equals(&self, a: &String, b: &String) -> bool {
        a == b
    }
}
