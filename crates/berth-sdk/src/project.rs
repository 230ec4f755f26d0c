//! A loaded compose project.

use std::path::Path;
use std::sync::Arc;

use berth_common::config::BerthConfig;
use berth_common::error::Result;
use berth_common::types::LifecycleState;
use berth_compose::manifest::{NormalizedManifest, SchemaVersion};
use berth_compose::spec::ContainerSpec;
use berth_runtime::engine::ContainerEngine;
use berth_runtime::event::EventSink;
use berth_runtime::lifecycle::{BatchReport, CancelToken, Controller};
use berth_runtime::linker::LinkReport;
use berth_runtime::registry::Registry;
use serde_yaml::Value;

/// Containers of one manifest, registered, linked, and bound to an engine.
///
/// Created by [`ProjectBuilder`](crate::builder::ProjectBuilder). Batch
/// operations take container labels; an empty slice means every container.
pub struct Project {
    pub(crate) manifest: NormalizedManifest,
    pub(crate) registry: Registry,
    pub(crate) links: LinkReport,
    pub(crate) engine: Arc<dyn ContainerEngine>,
    pub(crate) config: BerthConfig,
    pub(crate) events: EventSink,
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("name", &self.manifest.project)
            .field("version", &self.manifest.version)
            .field("containers", &self.registry.labels())
            .finish_non_exhaustive()
    }
}

impl Project {
    /// Returns the project name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.manifest.project
    }

    /// Returns the directory containing the manifest.
    #[must_use]
    pub fn project_dir(&self) -> &Path {
        &self.manifest.project_dir
    }

    /// Returns the schema version the manifest was dispatched to.
    #[must_use]
    pub const fn version(&self) -> SchemaVersion {
        self.manifest.version
    }

    /// Top-level `volumes` section, unvalidated.
    #[must_use]
    pub const fn volumes(&self) -> Option<&Value> {
        self.manifest.volumes.as_ref()
    }

    /// Top-level `networks` section, unvalidated.
    #[must_use]
    pub const fn networks(&self) -> Option<&Value> {
        self.manifest.networks.as_ref()
    }

    /// Returns the container registry.
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Returns the outcome of linking at load time.
    #[must_use]
    pub const fn link_report(&self) -> &LinkReport {
        &self.links
    }

    /// Returns the effective runtime configuration.
    #[must_use]
    pub const fn config(&self) -> &BerthConfig {
        &self.config
    }

    /// Returns a lifecycle controller over this project's registry.
    ///
    /// The controller carries the project's configuration and event sink.
    /// Chain [`Controller::with_cancel_token`] to make a batch cancellable.
    #[must_use]
    pub fn controller(&self) -> Controller<'_> {
        Controller::new(&self.registry, self.engine.as_ref())
            .with_config(&self.config)
            .with_events(self.events.clone())
    }

    /// Starts `labels` and their dependencies in dependency order.
    pub fn start<S: AsRef<str>>(&self, labels: &[S]) -> BatchReport {
        self.controller().start_all(labels)
    }

    /// Like [`Project::start`], stopping new engine calls once `cancel` is
    /// set.
    pub fn start_with_cancel<S: AsRef<str>>(&self, labels: &[S], cancel: CancelToken) -> BatchReport {
        self.controller().with_cancel_token(cancel).start_all(labels)
    }

    /// Stops `labels`. Dependents are left running.
    pub fn stop<S: AsRef<str>>(&self, labels: &[S]) -> BatchReport {
        self.controller().stop_all(labels)
    }

    /// Kills `labels`. Dependents are left running.
    pub fn kill<S: AsRef<str>>(&self, labels: &[S]) -> BatchReport {
        self.controller().kill_all(labels)
    }

    /// Force-removes `labels` from the engine and the registry.
    pub fn delete<S: AsRef<str>>(&self, labels: &[S]) -> BatchReport {
        self.controller().delete_all(labels)
    }

    /// Starts one container and its dependencies.
    ///
    /// # Errors
    ///
    /// Returns the first error raised along the dependency chain.
    pub fn start_container(&self, label: &str) -> Result<()> {
        self.controller().start(label)
    }

    /// Starts the first container matching each name.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::NotFound`](berth_common::error::BerthError::NotFound)
    /// if a name matches nothing, or the first start error.
    pub fn up<S: AsRef<str>>(&self, names: &[S]) -> Result<()> {
        self.controller().up(names)
    }

    /// Stops the first container matching each name.
    ///
    /// # Errors
    ///
    /// Same as [`Project::up`].
    pub fn down<S: AsRef<str>>(&self, names: &[S]) -> Result<()> {
        self.controller().down(names)
    }

    /// Returns the specs satisfying `predicate`, in registration order.
    pub fn get_containers_by(
        &self,
        predicate: impl Fn(&ContainerSpec) -> bool,
    ) -> Vec<Arc<ContainerSpec>> {
        self.registry.select_by(predicate)
    }

    /// Returns the specs whose label is `pattern` or a generated name of
    /// service `pattern`.
    #[must_use]
    pub fn get_containers_by_name(&self, pattern: &str) -> Vec<Arc<ContainerSpec>> {
        self.registry.select_by_name(pattern)
    }

    /// Returns the last known state of `label`.
    #[must_use]
    pub fn state(&self, label: &str) -> Option<LifecycleState> {
        self.registry.state(label)
    }

    /// Re-reads the engine's view of `label`.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::NotFound`](berth_common::error::BerthError::NotFound)
    /// for an unknown label or the engine's error.
    pub fn refresh(&self, label: &str) -> Result<LifecycleState> {
        self.controller().refresh(label)
    }
}
