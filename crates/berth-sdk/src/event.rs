//! Container lifecycle event streaming.
//!
//! An [`EventListener`] is obtained from
//! [`ProjectBuilder::event_listener`](crate::builder::ProjectBuilder::event_listener)
//! before loading and receives every event the project emits afterwards.

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;

pub use berth_runtime::event::ContainerEvent;

/// Receives lifecycle events from one project.
#[derive(Debug)]
pub struct EventListener {
    receiver: Receiver<ContainerEvent>,
}

impl EventListener {
    pub(crate) const fn new(receiver: Receiver<ContainerEvent>) -> Self {
        Self { receiver }
    }

    /// Returns the next pending event without blocking.
    #[must_use]
    pub fn try_next(&self) -> Option<ContainerEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Waits up to `timeout` for the next event.
    ///
    /// Returns `None` on timeout or once the project has been dropped and
    /// every event consumed.
    #[must_use]
    pub fn next_timeout(&self, timeout: Duration) -> Option<ContainerEvent> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Returns every event currently pending.
    #[must_use]
    pub fn drain(&self) -> Vec<ContainerEvent> {
        self.receiver.try_iter().collect()
    }
}
