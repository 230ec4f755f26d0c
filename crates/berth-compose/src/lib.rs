//! # berth-compose
//!
//! Manifest-side half of the orchestration engine.
//!
//! Handles:
//! - **Manifest**: reading, variable interpolation, and version dispatch.
//! - **Parser**: small `nom` grammars for ports, links, volumes, and sizes.
//! - **Normalize**: turning raw service entries into [`spec::ContainerSpec`]s.
//! - **Naming**: generated `{project}_{service}_{index}` container names.
//! - **Graph**: dependency graph construction and cycle detection.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod graph;
pub mod manifest;
pub mod naming;
pub mod normalize;
pub mod parser;
pub mod service;
pub mod spec;
