//! Recovery of live engine containers into the registry.

use berth_common::constants::{DEFAULT_SHM_SIZE, LABEL_SERVICE};
use berth_common::error::{BerthError, Result};
use berth_common::types::{ContainerId, LifecycleState};
use berth_compose::naming::parse_generated_name;
use berth_compose::normalize::inject_orchestration_labels;
use berth_compose::spec::{ContainerSpec, Link, Port};

use crate::engine::{ContainerEngine, ContainerInspect};
use crate::registry::Registry;

/// Rebuilds a spec from an inspection document.
///
/// The result has `loaded_from_environment` set and never carries a build
/// section.
///
/// # Errors
///
/// Returns [`BerthError::Parse`] if a published port has a host IP but no
/// host port.
pub fn spec_from_inspect(project: &str, inspect: &ContainerInspect) -> Result<ContainerSpec> {
    let name = inspect.name.trim_start_matches('/').to_string();
    let mut labels = inspect.config.labels.clone().unwrap_or_default();
    let service = labels
        .get(LABEL_SERVICE)
        .cloned()
        .or_else(|| parse_generated_name(project, &name).map(|(s, _)| s.to_string()))
        .unwrap_or_else(|| name.clone());
    inject_orchestration_labels(&mut labels, project, &service);

    let image = if inspect.config.image.is_empty() {
        inspect.image.clone()
    } else {
        inspect.config.image.clone()
    };

    let binds = inspect.host_config.binds.clone().unwrap_or_default();
    let mut volumes = binds.clone();
    for target in inspect.config.volumes.iter().flat_map(|v| v.keys()) {
        let bound = binds
            .iter()
            .any(|b| b.split(':').nth(1) == Some(target.as_str()));
        if !bound {
            volumes.push(target.clone());
        }
    }

    Ok(ContainerSpec {
        service,
        label: name.clone(),
        full_name: name,
        image: (!image.is_empty()).then_some(image),
        build: None,
        links: inspect
            .host_config
            .links
            .iter()
            .flatten()
            .map(String::as_str)
            .filter_map(link_from_engine)
            .collect(),
        ports: ports_from_inspect(inspect)?,
        volumes,
        shm_size: match inspect.host_config.shm_size {
            0 => DEFAULT_SHM_SIZE,
            n => n,
        },
        command: inspect.config.cmd.clone().filter(|c| !c.is_empty()),
        entrypoint: inspect.config.entrypoint.clone().filter(|e| !e.is_empty()),
        environment: inspect.config.env.clone().unwrap_or_default(),
        labels,
        cap_add: inspect.host_config.cap_add.clone().unwrap_or_default(),
        security_opt: inspect.host_config.security_opt.clone().unwrap_or_default(),
        loaded_from_environment: true,
    })
}

/// Maps an inspection document to a lifecycle state.
#[must_use]
pub fn state_from_inspect(inspect: &ContainerInspect) -> LifecycleState {
    if inspect.state.running {
        LifecycleState::Running
    } else if inspect.state.status == "created" {
        LifecycleState::Created
    } else {
        LifecycleState::Stopped
    }
}

/// Engine links read `/source:/dependent/alias`.
fn link_from_engine(raw: &str) -> Option<Link> {
    let (source, target) = raw.split_once(':')?;
    let service = source.trim_start_matches('/');
    let alias = target.rsplit('/').next().unwrap_or(target);
    (!service.is_empty()).then(|| Link {
        service: service.to_string(),
        alias: if alias.is_empty() { service } else { alias }.to_string(),
    })
}

fn ports_from_inspect(inspect: &ContainerInspect) -> Result<Vec<Port>> {
    let Some(ports) = &inspect.network_settings.ports else {
        return Ok(Vec::new());
    };
    ports
        .iter()
        .map(|(key, bindings)| {
            let container_port = key.strip_suffix("/tcp").unwrap_or(key).to_string();
            let first = bindings.as_ref().and_then(|b| b.first());
            let host_ip = first.map(|b| b.host_ip.clone()).filter(|s| !s.is_empty());
            let host_port = first.map(|b| b.host_port.clone()).filter(|s| !s.is_empty());
            if host_ip.is_some() && host_port.is_none() {
                return Err(BerthError::parse(
                    key.clone(),
                    "cannot specify a host IP address without a host port",
                ));
            }
            Ok(Port {
                container_port,
                host_port,
                host_ip,
            })
        })
        .collect()
}

/// Adds every engine container labelled with the registry's project.
///
/// Returns the labels added, in engine listing order.
///
/// # Errors
///
/// Returns [`BerthError::DuplicateContainer`] if a live container shares a
/// label with a manifest container, or the engine's error.
pub fn recover_containers(engine: &dyn ContainerEngine, registry: &Registry) -> Result<Vec<String>> {
    let mut recovered = Vec::new();
    for summary in engine.list_containers(Some(registry.project()))? {
        let id = ContainerId::new(summary.id);
        let inspect = engine.inspect_container(&id)?;
        let spec = spec_from_inspect(registry.project(), &inspect)?;
        let state = state_from_inspect(&inspect);
        let label = spec.label.clone();
        registry.insert(spec, state, Some(id))?;
        tracing::info!(label = %label, state = %state, "recovered running container");
        recovered.push(label);
    }
    Ok(recovered)
}
