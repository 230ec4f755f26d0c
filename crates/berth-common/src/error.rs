//! Unified error types for the berth workspace.
//!
//! Load-time variants (`ConfigNotFound`, `Parse`, `DuplicateContainer`,
//! `DependencyCycle`) abort a whole manifest load. Lifecycle-time variants
//! only affect the container they name and whatever depends on it.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::LifecycleState;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum BerthError {
    /// The manifest path does not exist.
    #[error("compose file not found: {}", path.display())]
    ConfigNotFound {
        /// Path that was requested.
        path: PathBuf,
    },

    /// An I/O operation failed.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A manifest value could not be understood.
    #[error("cannot parse {value:?}: {reason}")]
    Parse {
        /// The offending input.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Two containers normalized to the same label.
    #[error("a container already exists with label '{label}'")]
    DuplicateContainer {
        /// The conflicting label.
        label: String,
    },

    /// A container cannot be materialized with the attributes it has.
    #[error("invalid argument: {message}")]
    Argument {
        /// Description of the problem.
        message: String,
    },

    /// Declared links form a cycle.
    #[error("cyclic dependency detected involving container '{label}'")]
    DependencyCycle {
        /// A container that is part of the cycle.
        label: String,
    },

    /// A container was not started because one of its dependencies failed.
    #[error("container '{label}' not started: dependency '{dependency}' failed")]
    DependencyFailed {
        /// The container that was skipped.
        label: String,
        /// The dependency whose failure caused the skip.
        dependency: String,
    },

    /// A batch was cancelled before this container's turn.
    #[error("operation on container '{label}' cancelled")]
    Cancelled {
        /// The container that was skipped.
        label: String,
    },

    /// A state change the lifecycle state machine does not allow.
    #[error("container '{label}' cannot move from {from} to {to}")]
    InvalidTransition {
        /// The container whose state was to change.
        label: String,
        /// State the container is in.
        from: LifecycleState,
        /// State that was requested.
        to: LifecycleState,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// The container engine rejected or failed a call.
    #[error("engine {operation} failed: {message}")]
    Engine {
        /// Engine operation that failed.
        operation: &'static str,
        /// Message reported by the engine or transport.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl BerthError {
    /// Shorthand for a [`BerthError::Parse`] error.
    pub fn parse(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`BerthError::Engine`] error.
    pub fn engine(operation: &'static str, message: impl ToString) -> Self {
        Self::Engine {
            operation,
            message: message.to_string(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, BerthError>;
