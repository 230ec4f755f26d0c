//! Container lifecycle events.
//!
//! Events are delivered over a `std::sync::mpsc` channel. A dropped
//! receiver is not an error; events are then discarded.

use std::sync::mpsc::{self, Receiver, Sender};

use berth_common::types::LifecycleState;

/// A container lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerEvent {
    /// A container changed state.
    StateChanged {
        /// Container that changed.
        label: String,
        /// Previous state.
        from: LifecycleState,
        /// New state.
        to: LifecycleState,
    },
    /// A declared link named a service with no registered container.
    UnresolvedLink {
        /// Container declaring the link.
        label: String,
        /// Service that could not be found.
        service: String,
    },
    /// A lifecycle operation on a container failed.
    Failed {
        /// Container the operation targeted.
        label: String,
        /// Rendered error.
        error: String,
    },
}

/// Sending half of an event stream. Cloning shares the stream.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    sender: Option<Sender<ContainerEvent>>,
}

impl EventSink {
    /// A sink that discards every event.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { sender: None }
    }

    /// Creates a connected sink and its receiving end.
    #[must_use]
    pub fn channel() -> (Self, Receiver<ContainerEvent>) {
        let (sender, receiver) = mpsc::channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// Delivers `event` if a receiver is listening.
    pub fn emit(&self, event: ContainerEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }

    pub(crate) fn state_changed(&self, label: &str, from: LifecycleState, to: LifecycleState) {
        if from != to {
            self.emit(ContainerEvent::StateChanged {
                label: label.to_string(),
                from,
                to,
            });
        }
    }
}
