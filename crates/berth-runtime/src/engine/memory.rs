//! In-process container engine for tests and dry runs.
//!
//! [`MemoryEngine`] keeps containers in a map, records every call it
//! receives, and can be told to fail specific operations.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use berth_common::constants::LABEL_PROJECT;
use berth_common::error::{BerthError, Result};
use berth_common::types::ContainerId;

use super::{
    BuildOptions, ContainerEngine, ContainerInspect, ContainerSummary, CreateContainerRequest,
    InspectConfig, InspectNetworkSettings, InspectState,
};

/// Engine operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `pull_image`.
    Pull,
    /// `build_image`.
    Build,
    /// `create_container`.
    Create,
    /// `start_container`.
    Start,
    /// `stop_container`.
    Stop,
    /// `kill_container`.
    Kill,
    /// `delete_container`.
    Delete,
}

impl Operation {
    const fn name(self) -> &'static str {
        match self {
            Self::Pull => "pull",
            Self::Build => "build",
            Self::Create => "create",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Kill => "kill",
            Self::Delete => "delete",
        }
    }
}

/// A call received by a [`MemoryEngine`].
///
/// Container calls carry the container *name* rather than its id so tests
/// can assert on readable values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    /// `image_exists(image)`.
    ImageExists(String),
    /// `pull_image(image)`.
    Pull(String),
    /// `build_image(context)` tagged `tag`.
    Build {
        /// Context directory.
        context: PathBuf,
        /// Requested tag.
        tag: String,
    },
    /// `create_container` for the named container.
    Create(String),
    /// `start_container`.
    Start(String),
    /// `stop_container`.
    Stop(String),
    /// `kill_container`.
    Kill(String),
    /// `delete_container`.
    Delete {
        /// Container name.
        name: String,
        /// Whether removal was forced.
        force: bool,
    },
    /// `inspect_container`.
    Inspect(String),
    /// `list_containers` with the given project filter.
    List(Option<String>),
}

impl EngineCall {
    /// Returns the container, image, or build context this call targets.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::ImageExists(t)
            | Self::Pull(t)
            | Self::Create(t)
            | Self::Start(t)
            | Self::Stop(t)
            | Self::Kill(t)
            | Self::Inspect(t)
            | Self::Delete { name: t, .. } => Some(t),
            Self::Build { context, .. } => context.to_str(),
            Self::List(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
struct StoredContainer {
    name: String,
    request: CreateContainerRequest,
    running: bool,
    started_once: bool,
}

type CallHook = Box<dyn Fn(&EngineCall) + Send + Sync>;

#[derive(Default)]
struct EngineState {
    images: HashSet<String>,
    containers: BTreeMap<String, StoredContainer>,
    calls: Vec<EngineCall>,
    failures: HashSet<(Operation, String)>,
    next_id: u64,
    in_flight: usize,
    max_in_flight: usize,
}

/// A [`ContainerEngine`] that lives entirely in memory.
#[derive(Default)]
pub struct MemoryEngine {
    state: Mutex<EngineState>,
    start_latency: Option<Duration>,
    hook: Option<CallHook>,
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("start_latency", &self.start_latency)
            .field("hook", &self.hook.is_some())
            .finish_non_exhaustive()
    }
}

impl MemoryEngine {
    /// Creates an empty engine with no images or containers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `image` as present locally.
    #[must_use]
    pub fn with_image(self, image: impl Into<String>) -> Self {
        if let Ok(mut state) = self.lock() {
            let _ = state.images.insert(image.into());
        }
        self
    }

    /// Makes every `start_container` call take at least `latency`.
    #[must_use]
    pub const fn with_start_latency(mut self, latency: Duration) -> Self {
        self.start_latency = Some(latency);
        self
    }

    /// Invokes `hook` with each call before it is executed.
    #[must_use]
    pub fn with_hook(mut self, hook: impl Fn(&EngineCall) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    /// Makes `operation` fail when it targets `target` (an image or
    /// container name).
    #[must_use]
    pub fn failing(self, operation: Operation, target: impl Into<String>) -> Self {
        if let Ok(mut state) = self.lock() {
            let _ = state.failures.insert((operation, target.into()));
        }
        self
    }

    /// Adds a pre-existing container as if another process had created it.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn preload_container(
        &self,
        name: &str,
        image: &str,
        labels: BTreeMap<String, String>,
        running: bool,
    ) -> Result<ContainerId> {
        let mut state = self.lock()?;
        let id = Self::allocate_id(&mut state);
        let request = CreateContainerRequest {
            name: name.to_string(),
            image: image.to_string(),
            labels,
            ..CreateContainerRequest::default()
        };
        let _ = state.containers.insert(
            id.as_str().to_string(),
            StoredContainer {
                name: name.to_string(),
                request,
                running,
                started_once: running,
            },
        );
        Ok(id)
    }

    /// Returns every call received so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    /// Discards the recorded calls.
    pub fn clear_calls(&self) {
        if let Ok(mut state) = self.lock() {
            state.calls.clear();
        }
    }

    /// Returns the create request stored for the named container.
    #[must_use]
    pub fn request_for(&self, name: &str) -> Option<CreateContainerRequest> {
        self.lock().ok().and_then(|s| {
            s.containers
                .values()
                .find(|c| c.name == name)
                .map(|c| c.request.clone())
        })
    }

    /// Returns whether the named container exists and is running.
    #[must_use]
    pub fn is_running(&self, name: &str) -> bool {
        self.lock().is_ok_and(|s| {
            s.containers
                .values()
                .any(|c| c.name == name && c.running)
        })
    }

    /// Number of containers currently known to the engine.
    #[must_use]
    pub fn container_count(&self) -> usize {
        self.lock().map(|s| s.containers.len()).unwrap_or_default()
    }

    /// Highest number of `start_container` calls that overlapped.
    #[must_use]
    pub fn max_concurrent_starts(&self) -> usize {
        self.lock().map(|s| s.max_in_flight).unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, EngineState>> {
        self.state
            .lock()
            .map_err(|_| BerthError::engine("lock", "memory engine state lock poisoned"))
    }

    fn allocate_id(state: &mut EngineState) -> ContainerId {
        state.next_id += 1;
        ContainerId::new(format!("{:012x}", state.next_id))
    }

    /// Records `call`, runs the hook, and applies failure injection.
    fn record(&self, call: EngineCall, operation: Option<Operation>) -> Result<()> {
        if let Some(hook) = &self.hook {
            hook(&call);
        }
        let mut state = self.lock()?;
        let target = call.target().map(str::to_string);
        state.calls.push(call);
        if let (Some(operation), Some(target)) = (operation, target) {
            if state.failures.contains(&(operation, target.clone())) {
                return Err(BerthError::engine(
                    operation.name(),
                    format!("injected failure for {target}"),
                ));
            }
        }
        Ok(())
    }

    fn name_of(&self, id: &ContainerId) -> Result<String> {
        self.lock()?
            .containers
            .get(id.as_str())
            .map(|c| c.name.clone())
            .ok_or_else(|| BerthError::NotFound {
                kind: "container",
                id: id.to_string(),
            })
    }

    fn update(&self, id: &ContainerId, f: impl FnOnce(&mut StoredContainer)) -> Result<()> {
        let mut state = self.lock()?;
        let container = state
            .containers
            .get_mut(id.as_str())
            .ok_or_else(|| BerthError::NotFound {
                kind: "container",
                id: id.to_string(),
            })?;
        f(container);
        Ok(())
    }
}

impl ContainerEngine for MemoryEngine {
    fn image_exists(&self, image: &str) -> Result<bool> {
        self.record(EngineCall::ImageExists(image.to_string()), None)?;
        Ok(self.lock()?.images.contains(image))
    }

    fn pull_image(&self, image: &str) -> Result<()> {
        self.record(EngineCall::Pull(image.to_string()), Some(Operation::Pull))?;
        let _ = self.lock()?.images.insert(image.to_string());
        Ok(())
    }

    fn build_image(&self, context: &Path, options: &BuildOptions) -> Result<String> {
        self.record(
            EngineCall::Build {
                context: context.to_path_buf(),
                tag: options.tag.clone(),
            },
            Some(Operation::Build),
        )?;
        let _ = self.lock()?.images.insert(options.tag.clone());
        Ok(options.tag.clone())
    }

    fn create_container(&self, request: &CreateContainerRequest) -> Result<ContainerId> {
        self.record(EngineCall::Create(request.name.clone()), Some(Operation::Create))?;
        let mut state = self.lock()?;
        if !state.images.contains(&request.image) {
            return Err(BerthError::engine(
                "create",
                format!("no such image: {}", request.image),
            ));
        }
        if state.containers.values().any(|c| c.name == request.name) {
            return Err(BerthError::engine(
                "create",
                format!("container name {:?} is already in use", request.name),
            ));
        }
        let id = Self::allocate_id(&mut state);
        let _ = state.containers.insert(
            id.as_str().to_string(),
            StoredContainer {
                name: request.name.clone(),
                request: request.clone(),
                running: false,
                started_once: false,
            },
        );
        Ok(id)
    }

    fn start_container(&self, id: &ContainerId) -> Result<()> {
        let name = self.name_of(id)?;
        self.record(EngineCall::Start(name), Some(Operation::Start))?;
        {
            let mut state = self.lock()?;
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
        }
        if let Some(latency) = self.start_latency {
            std::thread::sleep(latency);
        }
        self.lock()?.in_flight -= 1;
        self.update(id, |c| {
            c.running = true;
            c.started_once = true;
        })
    }

    fn stop_container(&self, id: &ContainerId) -> Result<()> {
        let name = self.name_of(id)?;
        self.record(EngineCall::Stop(name), Some(Operation::Stop))?;
        self.update(id, |c| c.running = false)
    }

    fn kill_container(&self, id: &ContainerId) -> Result<()> {
        let name = self.name_of(id)?;
        self.record(EngineCall::Kill(name), Some(Operation::Kill))?;
        self.update(id, |c| c.running = false)
    }

    fn delete_container(&self, id: &ContainerId, force: bool) -> Result<()> {
        let name = self.name_of(id)?;
        self.record(EngineCall::Delete { name, force }, Some(Operation::Delete))?;
        let mut state = self.lock()?;
        let running = state.containers.get(id.as_str()).is_some_and(|c| c.running);
        if running && !force {
            return Err(BerthError::engine(
                "delete",
                "cannot remove a running container without force",
            ));
        }
        let _ = state.containers.remove(id.as_str());
        Ok(())
    }

    fn inspect_container(&self, id: &ContainerId) -> Result<ContainerInspect> {
        let name = self.name_of(id)?;
        self.record(EngineCall::Inspect(name), None)?;
        let state = self.lock()?;
        let stored = state
            .containers
            .get(id.as_str())
            .ok_or_else(|| BerthError::NotFound {
                kind: "container",
                id: id.to_string(),
            })?;
        Ok(inspect_document(id, stored))
    }

    fn list_containers(&self, project: Option<&str>) -> Result<Vec<ContainerSummary>> {
        self.record(EngineCall::List(project.map(str::to_string)), None)?;
        let state = self.lock()?;
        Ok(state
            .containers
            .iter()
            .filter(|(_, c)| {
                project.is_none_or(|p| {
                    c.request.labels.get(LABEL_PROJECT).map(String::as_str) == Some(p)
                })
            })
            .map(|(id, c)| ContainerSummary {
                id: id.clone(),
                names: vec![format!("/{}", c.name)],
                image: c.request.image.clone(),
                state: status(c).to_string(),
                labels: c.request.labels.clone(),
            })
            .collect())
    }
}

const fn status(container: &StoredContainer) -> &'static str {
    if container.running {
        "running"
    } else if container.started_once {
        "exited"
    } else {
        "created"
    }
}

fn inspect_document(id: &ContainerId, stored: &StoredContainer) -> ContainerInspect {
    let request = &stored.request;
    let ports = request.host_config.port_bindings.as_ref().map(|bindings| {
        let mut ports: BTreeMap<_, _> = request
            .exposed_ports
            .keys()
            .map(|key| (key.clone(), None))
            .collect();
        for (key, binding) in bindings {
            let _ = ports.insert(key.clone(), Some(binding.clone()));
        }
        ports
    });
    ContainerInspect {
        id: id.to_string(),
        name: format!("/{}", stored.name),
        image: request.image.clone(),
        state: InspectState {
            status: status(stored).to_string(),
            running: stored.running,
        },
        config: InspectConfig {
            image: request.image.clone(),
            cmd: request.cmd.clone(),
            entrypoint: request.entrypoint.clone(),
            env: request.env.clone(),
            labels: Some(request.labels.clone()),
            volumes: (!request.volumes.is_empty()).then(|| request.volumes.clone()),
        },
        host_config: request.host_config.clone(),
        network_settings: InspectNetworkSettings { ports },
    }
}
