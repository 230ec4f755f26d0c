//! Translation of a [`ContainerSpec`] into engine requests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use berth_common::error::{BerthError, Result};
use berth_common::types::ContainerId;
use berth_compose::parser::{join_relative, parse_volume};
use berth_compose::spec::ContainerSpec;

use crate::engine::{
    BuildOptions, ContainerEngine, CreateContainerRequest, EmptyObject, HostConfig, PortBinding,
};

/// Makes the spec's image available locally and returns its reference.
///
/// A declared image is pulled unless already present. Otherwise the build
/// context is built under a freshly generated name.
///
/// # Errors
///
/// Returns [`BerthError::Argument`] if the spec has neither an image nor a
/// build context, or the engine's error if the pull or build fails.
pub fn resolve_image(
    engine: &dyn ContainerEngine,
    spec: &ContainerSpec,
    working_dir: &Path,
) -> Result<String> {
    if let Some(image) = &spec.image {
        if !engine.image_exists(image)? {
            engine.pull_image(image)?;
        }
        return Ok(image.clone());
    }

    let Some(build) = &spec.build else {
        return Err(BerthError::Argument {
            message: format!("no image or build context provided for '{}'", spec.label),
        });
    };
    let options = BuildOptions {
        tag: uuid::Uuid::new_v4().simple().to_string(),
        dockerfile: build.dockerfile.clone(),
        args: build.args.clone(),
        target: build.target.clone(),
    };
    engine.build_image(&join_relative(working_dir, &build.context), &options)
}

/// Builds the engine create request for `spec`.
///
/// `links` pairs each resolved dependency's engine id with the alias it is
/// linked under. Relative host paths in volumes are resolved against
/// `working_dir` and `~` against `$HOME`.
///
/// # Errors
///
/// Returns [`BerthError::Parse`] for a malformed volume declaration or a
/// `~` source that cannot be expanded.
pub fn create_request(
    spec: &ContainerSpec,
    image: String,
    links: &[(ContainerId, String)],
    working_dir: &Path,
) -> Result<CreateContainerRequest> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut volumes = BTreeMap::new();
    let mut binds = Vec::new();
    for raw in &spec.volumes {
        let volume = parse_volume(raw)?;
        if let Some(bind) = volume.to_bind(working_dir, home.as_deref())? {
            binds.push(bind);
        }
        let _ = volumes.insert(volume.target, EmptyObject {});
    }

    let mut exposed_ports = BTreeMap::new();
    let mut port_bindings: BTreeMap<String, Vec<PortBinding>> = BTreeMap::new();
    for port in &spec.ports {
        let key = port.binding_key();
        let _ = exposed_ports.insert(key.clone(), EmptyObject {});
        port_bindings.entry(key).or_default().push(PortBinding {
            host_ip: port.host_ip.clone().unwrap_or_default(),
            host_port: port.host_port.clone().unwrap_or_default(),
        });
    }

    let links: Vec<String> = links
        .iter()
        .map(|(id, alias)| format!("{id}:{alias}"))
        .collect();

    Ok(CreateContainerRequest {
        name: spec.full_name.trim_start_matches('/').to_string(),
        image,
        cmd: spec.command.clone(),
        entrypoint: spec.entrypoint.clone(),
        env: non_empty(spec.environment.clone()),
        volumes,
        exposed_ports,
        labels: spec.labels.clone(),
        host_config: HostConfig {
            binds: non_empty(binds),
            links: non_empty(links),
            port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
            cap_add: non_empty(spec.cap_add.clone()),
            security_opt: non_empty(spec.security_opt.clone()),
            shm_size: spec.shm_size,
        },
    })
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    (!items.is_empty()).then_some(items)
}

#[cfg(test)]
mod tests {
    use berth_compose::spec::{BuildSpec, Port};

    use super::*;
    use crate::engine::memory::{EngineCall, MemoryEngine};

    fn web() -> ContainerSpec {
        ContainerSpec {
            service: "web".into(),
            label: "shop_web_1".into(),
            full_name: "shop_web_1".into(),
            image: Some("nginx:latest".into()),
            shm_size: 67_108_864,
            ..ContainerSpec::default()
        }
    }

    #[test]
    fn missing_image_is_pulled_once() {
        let engine = MemoryEngine::new();
        let image = resolve_image(&engine, &web(), Path::new("/srv")).expect("image");
        assert_eq!(image, "nginx:latest");
        assert_eq!(
            engine.calls(),
            vec![
                EngineCall::ImageExists("nginx:latest".into()),
                EngineCall::Pull("nginx:latest".into()),
            ]
        );
    }

    #[test]
    fn present_image_is_not_pulled() {
        let engine = MemoryEngine::new().with_image("nginx:latest");
        let _ = resolve_image(&engine, &web(), Path::new("/srv")).expect("image");
        assert_eq!(engine.calls().len(), 1);
    }

    #[test]
    fn build_context_gets_generated_tag() {
        let engine = MemoryEngine::new();
        let spec = ContainerSpec {
            image: None,
            build: Some(BuildSpec {
                context: "./app".into(),
                ..BuildSpec::default()
            }),
            ..web()
        };
        let tag = resolve_image(&engine, &spec, Path::new("/srv")).expect("build");
        assert_eq!(tag.len(), 32);
        assert_eq!(
            engine.calls(),
            vec![EngineCall::Build {
                context: "/srv/app".into(),
                tag,
            }]
        );
    }

    #[test]
    fn neither_image_nor_build_is_argument_error() {
        let spec = ContainerSpec {
            image: None,
            ..web()
        };
        let err = resolve_image(&MemoryEngine::new(), &spec, Path::new("/srv")).unwrap_err();
        assert!(matches!(err, BerthError::Argument { .. }));
    }

    #[test]
    fn request_carries_full_configuration() {
        let spec = ContainerSpec {
            ports: vec![
                Port {
                    container_port: "80".into(),
                    host_port: Some("8080".into()),
                    host_ip: Some("127.0.0.1".into()),
                },
                Port::container("443"),
            ],
            volumes: vec![
                "./html:/usr/share/nginx/html:ro".into(),
                "cache:/var/cache".into(),
                "/tmp/scratch".into(),
            ],
            environment: vec!["A=1".into()],
            command: Some(vec!["nginx".into(), "-g".into()]),
            cap_add: vec!["NET_ADMIN".into()],
            ..web()
        };
        let links = [(ContainerId::new("abc123"), "db".to_string())];

        let request =
            create_request(&spec, "nginx:latest".into(), &links, Path::new("/srv/shop"))
                .expect("request");

        assert_eq!(request.name, "shop_web_1");
        assert_eq!(request.env, Some(vec!["A=1".to_string()]));
        assert_eq!(request.cmd.as_deref().map(<[String]>::len), Some(2));
        assert!(request.exposed_ports.contains_key("80/tcp"));
        assert!(request.exposed_ports.contains_key("443/tcp"));
        assert_eq!(request.volumes.len(), 3);

        let host = &request.host_config;
        assert_eq!(
            host.binds,
            Some(vec![
                "/srv/shop/html:/usr/share/nginx/html:ro".to_string(),
                "cache:/var/cache:rw".to_string(),
            ])
        );
        assert_eq!(host.links, Some(vec!["abc123:db".to_string()]));
        let bindings = host.port_bindings.as_ref().expect("bindings");
        assert_eq!(bindings["80/tcp"][0].host_ip, "127.0.0.1");
        assert_eq!(bindings["80/tcp"][0].host_port, "8080");
        assert_eq!(bindings["443/tcp"][0].host_port, "");
        assert_eq!(host.cap_add, Some(vec!["NET_ADMIN".to_string()]));
        assert!(host.security_opt.is_none());
        assert_eq!(host.shm_size, 67_108_864);
    }

    #[test]
    fn malformed_volume_is_parse_error() {
        let spec = ContainerSpec {
            volumes: vec!["a:b:c:d".into()],
            ..web()
        };
        let err = create_request(&spec, "nginx:latest".into(), &[], Path::new("/")).unwrap_err();
        assert!(matches!(err, BerthError::Parse { .. }));
    }
}
