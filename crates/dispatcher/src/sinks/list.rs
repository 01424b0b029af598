//! ListSink - keeps delivered events in memory

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use contracts::{AccessSink, ContractError, SharedEvent};
use crossbeam_channel::{Receiver, Sender};

/// In-memory sink for tests and inspection.
///
/// Every delivered event is appended to a list and also published on a
/// notification channel, so a test thread can wait for the next event with
/// [`poll`](Self::poll) instead of sleeping.
pub struct ListSink {
    name: String,
    events: Mutex<Vec<SharedEvent>>,
    notify_tx: Sender<SharedEvent>,
    notify_rx: Receiver<SharedEvent>,
}

impl ListSink {
    pub fn new(name: impl Into<String>) -> Self {
        let (notify_tx, notify_rx) = crossbeam_channel::unbounded();
        Self {
            name: name.into(),
            events: Mutex::new(Vec::new()),
            notify_tx,
            notify_rx,
        }
    }

    /// All delivered events, in delivery order
    pub fn events(&self) -> Vec<SharedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait up to `timeout` for the next event not yet polled
    pub fn poll(&self, timeout: Duration) -> Option<SharedEvent> {
        self.notify_rx.recv_timeout(timeout).ok()
    }

    /// Forget every stored and unpolled event
    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        while self.notify_rx.try_recv().is_ok() {}
    }
}

impl AccessSink for ListSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&self, event: &SharedEvent) -> Result<(), ContractError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SharedEvent::clone(event));
        // Receiver lives in self, the channel cannot be disconnected
        let _ = self.notify_tx.send(SharedEvent::clone(event));
        Ok(())
    }
}
