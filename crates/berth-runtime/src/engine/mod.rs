//! Container engine abstraction and its wire types.
//!
//! The orchestration layer only talks to an engine through
//! [`ContainerEngine`]. Calls are blocking; the lifecycle controller runs
//! them on worker threads.

pub mod http;
pub mod memory;

use std::collections::BTreeMap;
use std::path::Path;

use berth_common::error::Result;
use berth_common::types::ContainerId;
use serde::{Deserialize, Serialize};

/// A JSON `{}` value, used where the engine expects a set encoded as a map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyObject {}

/// Options for building an image from a context directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Name the built image is tagged with.
    pub tag: String,
    /// Dockerfile path relative to the context.
    pub dockerfile: Option<String>,
    /// Build-time arguments.
    pub args: BTreeMap<String, String>,
    /// Multi-stage build target.
    pub target: Option<String>,
}

/// Container creation request.
///
/// The container name travels as a query parameter, not in the body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateContainerRequest {
    /// Engine-visible container name.
    #[serde(skip)]
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Command arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    /// Entrypoint arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    /// Environment in `KEY=VALUE` form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<String>>,
    /// Mount points inside the container.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, EmptyObject>,
    /// Exposed ports keyed as `port/proto`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub exposed_ports: BTreeMap<String, EmptyObject>,
    /// Container labels.
    pub labels: BTreeMap<String, String>,
    /// Host-side configuration.
    pub host_config: HostConfig,
}

/// Host-side container configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct HostConfig {
    /// Bind mounts as `source:target:mode`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binds: Option<Vec<String>>,
    /// Legacy links as `container:alias`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<String>>,
    /// Published ports keyed as `port/proto`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_bindings: Option<BTreeMap<String, Vec<PortBinding>>>,
    /// Added kernel capabilities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cap_add: Option<Vec<String>>,
    /// Security options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_opt: Option<Vec<String>>,
    /// Size of `/dev/shm` in bytes.
    pub shm_size: u64,
}

/// One host binding of a container port. Empty strings mean "any".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PortBinding {
    /// Host interface.
    #[serde(rename = "HostIp")]
    pub host_ip: String,
    /// Host port.
    pub host_port: String,
}

/// The subset of a container inspection document this crate reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContainerInspect {
    /// Engine id.
    pub id: String,
    /// Container name, usually with a leading `/`.
    pub name: String,
    /// Image id the container runs.
    pub image: String,
    /// Runtime state.
    pub state: InspectState,
    /// Creation-time configuration.
    pub config: InspectConfig,
    /// Host configuration.
    pub host_config: HostConfig,
    /// Network settings.
    pub network_settings: InspectNetworkSettings,
}

/// Runtime state reported by inspection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InspectState {
    /// Status string (`created`, `running`, `exited`, ...).
    pub status: String,
    /// Whether the container is running.
    pub running: bool,
}

/// Creation-time configuration reported by inspection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InspectConfig {
    /// Image reference as requested at creation.
    pub image: String,
    /// Command arguments.
    pub cmd: Option<Vec<String>>,
    /// Entrypoint arguments.
    pub entrypoint: Option<Vec<String>>,
    /// Environment in `KEY=VALUE` form.
    pub env: Option<Vec<String>>,
    /// Container labels.
    pub labels: Option<BTreeMap<String, String>>,
    /// Declared mount points.
    pub volumes: Option<BTreeMap<String, EmptyObject>>,
}

/// Network settings reported by inspection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InspectNetworkSettings {
    /// Port bindings keyed as `port/proto`; `None` for exposed-only ports.
    pub ports: Option<BTreeMap<String, Option<Vec<PortBinding>>>>,
}

/// A container as returned by the engine's list endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContainerSummary {
    /// Engine id.
    pub id: String,
    /// Names, each with a leading `/`.
    pub names: Vec<String>,
    /// Image reference.
    pub image: String,
    /// State string.
    pub state: String,
    /// Container labels.
    pub labels: BTreeMap<String, String>,
}

/// Blocking client for a container engine.
///
/// Errors are passed through uninterpreted; implementations do not retry.
pub trait ContainerEngine: Send + Sync {
    /// Returns whether `image` is present locally.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be queried.
    fn image_exists(&self, image: &str) -> Result<bool>;

    /// Pulls `image` from its registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the pull fails.
    fn pull_image(&self, image: &str) -> Result<()>;

    /// Builds an image from `context`, returning the image reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the context cannot be read or the build fails.
    fn build_image(&self, context: &Path, options: &BuildOptions) -> Result<String>;

    /// Creates a container, returning its engine id.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the request.
    fn create_container(&self, request: &CreateContainerRequest) -> Result<ContainerId>;

    /// Starts a created or stopped container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be started.
    fn start_container(&self, id: &ContainerId) -> Result<()>;

    /// Stops a running container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be stopped.
    fn stop_container(&self, id: &ContainerId) -> Result<()>;

    /// Kills a running container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be killed.
    fn kill_container(&self, id: &ContainerId) -> Result<()>;

    /// Removes a container, stopping it first when `force` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be removed.
    fn delete_container(&self, id: &ContainerId, force: bool) -> Result<()>;

    /// Returns the inspection document of a container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container does not exist.
    fn inspect_container(&self, id: &ContainerId) -> Result<ContainerInspect>;

    /// Lists all containers, optionally only those labelled with `project`.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be queried.
    fn list_containers(&self, project: Option<&str>) -> Result<Vec<ContainerSummary>>;
}
