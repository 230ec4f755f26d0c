//! # berth-sdk
//!
//! Public SDK for using berth as a Rust library.
//!
//! Provides three main entry points:
//! - [`ProjectBuilder`](builder::ProjectBuilder): Loads a compose manifest against an engine.
//! - [`Project`](project::Project): Dependency-ordered lifecycle operations over the loaded containers.
//! - [`EventListener`](event::EventListener): Receives container lifecycle events.
//!
//! # Example
//!
//! ```rust,no_run
//! use berth_common::config::BerthConfig;
//! use berth_sdk::builder::ProjectBuilder;
//!
//! # fn main() -> berth_common::error::Result<()> {
//! let project = ProjectBuilder::docker(BerthConfig::from_env())?
//!     .load_running(true)
//!     .load("docker-compose.yml")?;
//! project.start::<&str>(&[]).into_result()?;
//! project.down(&["web"])?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod builder;
pub mod event;
pub mod project;
