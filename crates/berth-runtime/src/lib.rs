//! # berth-runtime
//!
//! Engine-facing half of the orchestration engine.
//!
//! Handles:
//! - **Engine**: the [`ContainerEngine`](engine::ContainerEngine) trait, a
//!   Docker REST client, and an in-memory engine.
//! - **Registry**: label-indexed container specs, handles, and states.
//! - **Linker**: dependency edges from declared links.
//! - **Lifecycle**: dependency-ordered start, stop, kill, and delete.
//! - **Recovery**: adopting live containers of a project.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod engine;
pub mod event;
pub mod lifecycle;
pub mod linker;
pub mod materialize;
pub mod recover;
pub mod registry;
