//! Runtime configuration for the orchestration layer.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_ENGINE_URL, DEFAULT_MAX_WORKERS, ENV_DOCKER_HOST, ENV_MAX_WORKERS};

/// Root configuration shared by the engine client and lifecycle controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BerthConfig {
    /// Base URL of the container engine REST API.
    pub engine_url: String,
    /// Upper bound on containers started concurrently in one batch.
    pub max_workers: usize,
    /// Directory relative volume paths are resolved against.
    /// `None` means the process working directory at materialization time.
    pub working_dir: Option<PathBuf>,
}

impl Default for BerthConfig {
    fn default() -> Self {
        Self {
            engine_url: DEFAULT_ENGINE_URL.to_string(),
            max_workers: DEFAULT_MAX_WORKERS,
            working_dir: None,
        }
    }
}

impl BerthConfig {
    /// Builds a configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Builds a configuration from an arbitrary variable source.
    ///
    /// `DOCKER_HOST` in `tcp://host:port` form is rewritten to `http://`;
    /// unparseable or zero worker counts fall back to the default.
    #[must_use]
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(host) = lookup(ENV_DOCKER_HOST).filter(|h| !h.is_empty()) {
            config.engine_url = engine_url_from_host(&host);
        }
        if let Some(workers) = lookup(ENV_MAX_WORKERS)
            .and_then(|w| w.trim().parse::<usize>().ok())
            .filter(|&w| w > 0)
        {
            config.max_workers = workers;
        }
        config
    }

    /// Sets the worker limit, clamped to at least one.
    #[must_use]
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }

    /// Sets the directory relative volume paths are resolved against.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

fn engine_url_from_host(host: &str) -> String {
    host.strip_prefix("tcp://").map_or_else(
        || host.trim_end_matches('/').to_string(),
        |rest| format!("http://{}", rest.trim_end_matches('/')),
    )
}
