//! Label-indexed store of container specs, engine handles, and states.
//!
//! A [`Registry`] belongs to one loaded project. Specs are immutable once
//! added; only the lifecycle controller and the linker change the mutable
//! columns (state, handle, dependencies), through crate-private setters.
//! Every access goes through a single mutex that is never held across an
//! engine call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use berth_common::error::{BerthError, Result};
use berth_common::types::{ContainerId, LifecycleState};
use berth_compose::naming::parse_generated_name;
use berth_compose::spec::ContainerSpec;

/// A resolved link from a dependent container to a registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    /// Declared name of the linked service.
    pub service: String,
    /// Hostname the dependency is reachable under.
    pub alias: String,
    /// Label of the registry entry the link resolved to.
    pub label: String,
}

/// A point-in-time view of one registry entry.
#[derive(Debug, Clone)]
pub struct RegistryRow {
    /// The container's spec.
    pub spec: Arc<ContainerSpec>,
    /// Lifecycle state at snapshot time.
    pub state: LifecycleState,
    /// Engine id, once materialized.
    pub handle: Option<ContainerId>,
}

#[derive(Debug)]
struct Entry {
    spec: Arc<ContainerSpec>,
    state: LifecycleState,
    handle: Option<ContainerId>,
    dependencies: Vec<DependencyEdge>,
}

#[derive(Debug, Default)]
struct Inner {
    order: Vec<String>,
    entries: HashMap<String, Entry>,
}

impl Inner {
    fn entry_mut(&mut self, label: &str) -> Result<&mut Entry> {
        self.entries.get_mut(label).ok_or_else(|| BerthError::NotFound {
            kind: "container",
            id: label.to_string(),
        })
    }

    fn specs(&self) -> impl Iterator<Item = &Arc<ContainerSpec>> {
        self.order
            .iter()
            .filter_map(|label| self.entries.get(label))
            .map(|entry| &entry.spec)
    }
}

/// The containers of one project, in insertion order.
#[derive(Debug)]
pub struct Registry {
    project: String,
    inner: Mutex<Inner>,
}

impl Registry {
    /// Creates an empty registry for `project`.
    #[must_use]
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Returns the project this registry belongs to.
    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    // Each mutation completes under one lock acquisition, so the data is
    // consistent even if a panicking thread poisoned the mutex.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a spec in the [`Unmaterialized`](LifecycleState::Unmaterialized) state.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::DuplicateContainer`] if the label is taken;
    /// the registry is left unchanged.
    pub fn add(&self, spec: ContainerSpec) -> Result<()> {
        self.insert(spec, LifecycleState::Unmaterialized, None)
    }

    pub(crate) fn insert(
        &self,
        spec: ContainerSpec,
        state: LifecycleState,
        handle: Option<ContainerId>,
    ) -> Result<()> {
        let mut inner = self.lock();
        if inner.entries.contains_key(&spec.label) {
            return Err(BerthError::DuplicateContainer { label: spec.label });
        }
        let label = spec.label.clone();
        tracing::debug!(label = %label, service = %spec.service, "registered container");
        inner.order.push(label.clone());
        let _ = inner.entries.insert(
            label,
            Entry {
                spec: Arc::new(spec),
                state,
                handle,
                dependencies: Vec::new(),
            },
        );
        Ok(())
    }

    /// Removes an entry, returning its spec.
    pub fn remove(&self, label: &str) -> Option<Arc<ContainerSpec>> {
        let mut inner = self.lock();
        let entry = inner.entries.remove(label)?;
        inner.order.retain(|l| l != label);
        Some(entry.spec)
    }

    /// Returns the spec registered under `label`.
    #[must_use]
    pub fn get(&self, label: &str) -> Option<Arc<ContainerSpec>> {
        self.lock().entries.get(label).map(|e| Arc::clone(&e.spec))
    }

    /// Returns whether `label` is registered.
    #[must_use]
    pub fn contains(&self, label: &str) -> bool {
        self.lock().entries.contains_key(label)
    }

    /// Returns all labels in insertion order.
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.lock().order.clone()
    }

    /// Number of registered containers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().order.is_empty()
    }

    /// Returns the specs matching `predicate`, in insertion order.
    pub fn select_by(&self, predicate: impl Fn(&ContainerSpec) -> bool) -> Vec<Arc<ContainerSpec>> {
        self.lock()
            .specs()
            .filter(|spec| predicate(spec))
            .cloned()
            .collect()
    }

    /// Returns the specs of `service`, in insertion order.
    #[must_use]
    pub fn select_by_service(&self, service: &str) -> Vec<Arc<ContainerSpec>> {
        self.select_by(|spec| spec.service == service)
    }

    /// Returns the specs whose engine name is `{project}_{pattern}_{digits}`
    /// or exactly `pattern`.
    #[must_use]
    pub fn select_by_name(&self, pattern: &str) -> Vec<Arc<ContainerSpec>> {
        self.select_by(|spec| {
            let name = spec.full_name.trim_start_matches('/');
            name == pattern
                || parse_generated_name(&self.project, name)
                    .is_some_and(|(service, _)| service == pattern)
        })
    }

    /// Returns the lifecycle state of `label`.
    #[must_use]
    pub fn state(&self, label: &str) -> Option<LifecycleState> {
        self.lock().entries.get(label).map(|e| e.state)
    }

    /// Returns the engine id of `label`, if materialized.
    #[must_use]
    pub fn handle(&self, label: &str) -> Option<ContainerId> {
        self.lock().entries.get(label).and_then(|e| e.handle.clone())
    }

    /// Returns the resolved dependencies of `label`.
    #[must_use]
    pub fn dependencies(&self, label: &str) -> Vec<DependencyEdge> {
        self.lock()
            .entries
            .get(label)
            .map(|e| e.dependencies.clone())
            .unwrap_or_default()
    }

    /// Returns every entry in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RegistryRow> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .filter_map(|label| inner.entries.get(label))
            .map(|e| RegistryRow {
                spec: Arc::clone(&e.spec),
                state: e.state,
                handle: e.handle.clone(),
            })
            .collect()
    }

    /// Moves `label` to `state` along the lifecycle state machine and
    /// returns the previous state. Re-entering the current state is a no-op.
    pub(crate) fn set_state(&self, label: &str, state: LifecycleState) -> Result<LifecycleState> {
        self.replace_state(label, state, LifecycleState::can_transition_to)
    }

    /// Records a state observed on the engine. Any change between
    /// materialized states is accepted, since the container may have been
    /// driven outside this registry.
    pub(crate) fn observe_state(&self, label: &str, state: LifecycleState) -> Result<LifecycleState> {
        self.replace_state(label, state, |from, to| {
            from.is_materialized() && to.is_materialized()
        })
    }

    fn replace_state(
        &self,
        label: &str,
        state: LifecycleState,
        allowed: impl Fn(LifecycleState, LifecycleState) -> bool,
    ) -> Result<LifecycleState> {
        let mut inner = self.lock();
        let entry = inner.entry_mut(label)?;
        let from = entry.state;
        if from != state && !allowed(from, state) {
            return Err(BerthError::InvalidTransition {
                label: label.to_string(),
                from,
                to: state,
            });
        }
        entry.state = state;
        Ok(from)
    }

    pub(crate) fn set_handle(&self, label: &str, handle: Option<ContainerId>) -> Result<()> {
        self.lock().entry_mut(label)?.handle = handle;
        Ok(())
    }

    pub(crate) fn set_dependencies(&self, label: &str, edges: Vec<DependencyEdge>) -> Result<()> {
        self.lock().entry_mut(label)?.dependencies = edges;
        Ok(())
    }
}
