//! Domain primitive types used across the berth workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Engine-assigned identifier of a materialized container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a registered container.
///
/// ```text
/// Unmaterialized -> Created -> Running <-> Stopped
///        \______________\__________\________\____-> Deleted
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// No engine-level container exists yet.
    #[default]
    Unmaterialized,
    /// The engine has created the container but it has not been started.
    Created,
    /// The container is running.
    Running,
    /// The container was stopped or killed.
    Stopped,
    /// The container was removed. Terminal.
    Deleted,
}

impl LifecycleState {
    /// Returns whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Unmaterialized, Self::Created)
                | (Self::Created | Self::Stopped, Self::Running)
                | (Self::Running, Self::Stopped)
                | (
                    Self::Unmaterialized | Self::Created | Self::Running | Self::Stopped,
                    Self::Deleted
                )
        )
    }

    /// Returns whether an engine-level container backs this state.
    #[must_use]
    pub const fn is_materialized(self) -> bool {
        matches!(self, Self::Created | Self::Running | Self::Stopped)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unmaterialized => write!(f, "unmaterialized"),
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}
