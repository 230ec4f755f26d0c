//! Attribute normalization: raw service entries to [`ContainerSpec`]s.
//!
//! Each rule is independent. Attributes that normalize to nothing are
//! left out of the spec instead of being stored empty. A missing image
//! *and* build is not an error here; it is only checked when the container
//! is materialized.

use std::collections::BTreeMap;

use berth_common::constants::{
    DEFAULT_IMAGE_TAG, DEFAULT_SHM_SIZE, LABEL_ONEOFF, LABEL_PROJECT, LABEL_SERVICE, ONEOFF_FALSE,
};
use berth_common::error::Result;
use serde_yaml::Mapping;

use crate::manifest::NormalizedManifest;
use crate::naming::NameAllocator;
use crate::parser::{parse_link, parse_port, parse_size};
use crate::service::{
    BuildEntry, CommandEntry, KeyValueEntry, Scalar, ServiceEntry, scalar_to_string,
};
use crate::spec::{BuildSpec, ContainerSpec, Link, Port};

/// Converts raw service entries of one project into container specs.
#[derive(Debug, Clone)]
pub struct Normalizer {
    names: NameAllocator,
}

impl Normalizer {
    /// Creates a normalizer that names containers with `names`.
    #[must_use]
    pub const fn new(names: NameAllocator) -> Self {
        Self { names }
    }

    /// Returns the project name injected into every spec.
    #[must_use]
    pub fn project(&self) -> &str {
        self.names.project()
    }

    /// Normalizes one service declaration.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::Parse`](berth_common::error::BerthError::Parse)
    /// for a malformed link, port, or shared-memory size.
    pub fn normalize(&mut self, service: &str, entry: &ServiceEntry) -> Result<ContainerSpec> {
        let explicit_name = entry.container_name.clone().filter(|n| !n.is_empty());
        let full_name = explicit_name
            .clone()
            .unwrap_or_else(|| self.names.next_name(service));
        let label = explicit_name.unwrap_or_else(|| full_name.clone());

        let mut labels = entry.labels.as_ref().map(labels_to_map).unwrap_or_default();
        inject_orchestration_labels(&mut labels, self.project(), service);

        let spec = ContainerSpec {
            service: service.to_string(),
            label,
            full_name,
            image: entry
                .image
                .as_deref()
                .filter(|i| !i.is_empty())
                .map(normalize_image),
            build: entry.build.as_ref().map(normalize_build),
            links: normalize_links(entry.links.as_deref().unwrap_or_default())?,
            ports: normalize_ports(entry.ports.as_deref().unwrap_or_default())?,
            volumes: entry.volumes.clone().unwrap_or_default(),
            shm_size: normalize_shm_size(entry.shm_size.as_ref())?,
            command: entry.command.as_ref().and_then(tokenize),
            entrypoint: entry.entrypoint.as_ref().and_then(tokenize),
            environment: entry
                .environment
                .as_ref()
                .map(environment_to_list)
                .unwrap_or_default(),
            labels,
            cap_add: entry.cap_add.clone().unwrap_or_default(),
            security_opt: entry.security_opt.clone().unwrap_or_default(),
            loaded_from_environment: false,
        };

        tracing::debug!(
            service,
            label = %spec.label,
            name = %spec.full_name,
            "normalized service"
        );
        Ok(spec)
    }
}

/// Normalizes every service of `manifest` in document order.
///
/// # Errors
///
/// Returns the first normalization error encountered.
pub fn normalize_manifest(
    manifest: &NormalizedManifest,
    names: NameAllocator,
) -> Result<Vec<ContainerSpec>> {
    let mut normalizer = Normalizer::new(names);
    manifest
        .services
        .iter()
        .map(|(service, entry)| normalizer.normalize(service, entry))
        .collect()
}

/// Appends the default tag to an image reference that has none.
///
/// A `:` inside a registry host (`host:5000/app`) is not a tag, and
/// digest references are returned unchanged.
#[must_use]
pub fn normalize_image(image: &str) -> String {
    if image.contains('@') {
        return image.to_string();
    }
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    if last_segment.contains(':') {
        image.to_string()
    } else {
        format!("{image}:{DEFAULT_IMAGE_TAG}")
    }
}

/// Adds the project, service, and one-off labels, overriding user values.
pub fn inject_orchestration_labels(
    labels: &mut BTreeMap<String, String>,
    project: &str,
    service: &str,
) {
    let _ = labels.insert(LABEL_PROJECT.to_string(), project.to_string());
    let _ = labels.insert(LABEL_SERVICE.to_string(), service.to_string());
    let _ = labels.insert(LABEL_ONEOFF.to_string(), ONEOFF_FALSE.to_string());
}

fn normalize_build(build: &BuildEntry) -> BuildSpec {
    match build {
        BuildEntry::Context(context) => BuildSpec {
            context: context.clone(),
            ..BuildSpec::default()
        },
        BuildEntry::Detailed(section) => BuildSpec {
            context: section.context.clone().unwrap_or_else(|| ".".to_string()),
            dockerfile: section.dockerfile.clone(),
            args: section.args.as_ref().map(labels_to_map).unwrap_or_default(),
            target: section.target.clone(),
        },
    }
}

fn normalize_links(declared: &[String]) -> Result<Vec<Link>> {
    let mut links: Vec<Link> = Vec::with_capacity(declared.len());
    for raw in declared {
        let link = parse_link(raw)?;
        if let Some(existing) = links.iter_mut().find(|l| l.service == link.service) {
            existing.alias = link.alias;
        } else {
            links.push(link);
        }
    }
    Ok(links)
}

fn normalize_ports(declared: &[Scalar]) -> Result<Vec<Port>> {
    declared
        .iter()
        .map(|p| parse_port(&p.to_string()).map_err(Into::into))
        .collect()
}

/// Resolves a declared shared-memory size to bytes.
///
/// # Errors
///
/// Returns [`BerthError::Parse`](berth_common::error::BerthError::Parse)
/// for a malformed size string.
pub fn normalize_shm_size(declared: Option<&Scalar>) -> Result<u64> {
    match declared {
        None => Ok(DEFAULT_SHM_SIZE),
        Some(Scalar::Integer(bytes)) => Ok(*bytes),
        Some(Scalar::Text(text)) => Ok(parse_size(text)?),
    }
}

fn tokenize(command: &CommandEntry) -> Option<Vec<String>> {
    let args: Vec<String> = match command {
        CommandEntry::Line(line) => line.split_whitespace().map(str::to_string).collect(),
        CommandEntry::Args(args) => args.clone(),
    };
    (!args.is_empty()).then_some(args)
}

fn environment_to_list(env: &KeyValueEntry) -> Vec<String> {
    match env {
        KeyValueEntry::List(items) => items.clone(),
        KeyValueEntry::Map(map) => map
            .iter()
            .map(|(k, v)| format!("{}={}", scalar_to_string(k), scalar_to_string(v)))
            .collect(),
    }
}

fn labels_to_map(labels: &KeyValueEntry) -> BTreeMap<String, String> {
    match labels {
        KeyValueEntry::List(items) => items
            .iter()
            .map(|item| {
                let (k, v) = item.split_once('=').unwrap_or((item.as_str(), ""));
                (k.to_string(), v.to_string())
            })
            .collect(),
        KeyValueEntry::Map(map) => mapping_to_map(map),
    }
}

fn mapping_to_map(map: &Mapping) -> BTreeMap<String, String> {
    map.iter()
        .map(|(k, v)| (scalar_to_string(k), scalar_to_string(v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use berth_common::error::BerthError;

    use super::*;

    fn entry(yaml: &str) -> ServiceEntry {
        ServiceEntry::from_value(serde_yaml::from_str(yaml).expect("yaml")).expect("entry")
    }

    fn normalizer() -> Normalizer {
        Normalizer::new(NameAllocator::new("myproject"))
    }

    #[test]
    fn generated_name_doubles_as_label() {
        let spec = normalizer().normalize("web", &entry("image: nginx")).expect("spec");
        assert_eq!(spec.full_name, "myproject_web_1");
        assert_eq!(spec.label, "myproject_web_1");
        assert_eq!(spec.service, "web");
    }

    #[test]
    fn explicit_container_name_wins() {
        let spec = normalizer()
            .normalize("web", &entry("image: nginx\ncontainer_name: frontend"))
            .expect("spec");
        assert_eq!(spec.full_name, "frontend");
        assert_eq!(spec.label, "frontend");
    }

    #[test]
    fn image_gets_latest_tag() {
        assert_eq!(normalize_image("nginx"), "nginx:latest");
        assert_eq!(normalize_image("nginx:1.25"), "nginx:1.25");
        assert_eq!(normalize_image("registry:5000/app"), "registry:5000/app:latest");
        assert_eq!(normalize_image("app@sha256:abcd"), "app@sha256:abcd");
    }

    #[test]
    fn no_image_means_no_image() {
        let spec = normalizer().normalize("app", &entry("build: ./app")).expect("spec");
        assert!(spec.image.is_none());
        assert_eq!(spec.build.expect("build").context, "./app");
    }

    #[test]
    fn links_default_alias_and_keep_order() {
        let spec = normalizer()
            .normalize("web", &entry("links: [db, 'cache:redis']"))
            .expect("spec");
        let pairs: Vec<_> = spec
            .links
            .iter()
            .map(|l| (l.service.as_str(), l.alias.as_str()))
            .collect();
        assert_eq!(pairs, vec![("db", "db"), ("cache", "redis")]);
    }

    #[test]
    fn ports_are_parsed() {
        let spec = normalizer()
            .normalize("web", &entry("ports: ['8080:80', 443, '127.0.0.1:9000:9000']"))
            .expect("spec");
        assert_eq!(spec.ports.len(), 3);
        assert_eq!(spec.ports[0].host_port.as_deref(), Some("8080"));
        assert_eq!(spec.ports[1].container_port, "443");
        assert_eq!(spec.ports[2].host_ip.as_deref(), Some("127.0.0.1"));
    }

    #[test]
    fn bad_port_is_parse_error() {
        let err = normalizer()
            .normalize("web", &entry("ports: ['127.0.0.1::80']"))
            .unwrap_err();
        assert!(matches!(err, BerthError::Parse { ref value, .. } if value == "127.0.0.1::80"));
    }

    #[test]
    fn shm_size_resolution() {
        let shm = |yaml: &str| normalizer().normalize("s", &entry(yaml)).expect("spec").shm_size;
        assert_eq!(shm("shm_size: 1g"), 1_073_741_824);
        assert_eq!(shm("shm_size: 512m"), 536_870_912);
        assert_eq!(shm("shm_size: 2k"), 2048);
        assert_eq!(shm("shm_size: 4096"), 4096);
        assert_eq!(shm("image: x"), 67_108_864);
    }

    #[test]
    fn command_is_tokenized() {
        let spec = normalizer()
            .normalize("s", &entry("command: bundle exec  rails s\nentrypoint: [/bin/sh, -c]"))
            .expect("spec");
        assert_eq!(
            spec.command,
            Some(vec!["bundle".into(), "exec".into(), "rails".into(), "s".into()])
        );
        assert_eq!(spec.entrypoint, Some(vec!["/bin/sh".into(), "-c".into()]));
    }

    #[test]
    fn empty_command_is_omitted() {
        let spec = normalizer().normalize("s", &entry("command: '  '")).expect("spec");
        assert!(spec.command.is_none());
    }

    #[test]
    fn environment_mapping_flattens_in_declared_order() {
        let spec = normalizer()
            .normalize("s", &entry("environment:\n  B: 2\n  A: '1'\n  EMPTY:\n"))
            .expect("spec");
        assert_eq!(spec.environment, vec!["B=2", "A=1", "EMPTY="]);
    }

    #[test]
    fn environment_list_passes_through() {
        let spec = normalizer()
            .normalize("s", &entry("environment: ['A=1', 'B=2']"))
            .expect("spec");
        assert_eq!(spec.environment, vec!["A=1", "B=2"]);
    }

    #[test]
    fn labels_list_becomes_mapping_with_injected_keys() {
        let spec = normalizer()
            .normalize("web", &entry("labels: ['tier=front', 'flag']"))
            .expect("spec");
        assert_eq!(spec.labels.get("tier").map(String::as_str), Some("front"));
        assert_eq!(spec.labels.get("flag").map(String::as_str), Some(""));
        assert_eq!(
            spec.labels.get(LABEL_PROJECT).map(String::as_str),
            Some("myproject")
        );
        assert_eq!(spec.labels.get(LABEL_SERVICE).map(String::as_str), Some("web"));
        assert_eq!(spec.labels.get(LABEL_ONEOFF).map(String::as_str), Some("False"));
    }

    #[test]
    fn orchestration_labels_are_always_present() {
        let spec = normalizer().normalize("db", &entry("image: postgres")).expect("spec");
        assert_eq!(spec.labels.len(), 3);
    }

    #[test]
    fn detailed_build_section() {
        let spec = normalizer()
            .normalize(
                "app",
                &entry("build:\n  context: ./svc\n  dockerfile: Dockerfile.prod\n  args:\n    VERSION: 2\n"),
            )
            .expect("spec");
        let build = spec.build.expect("build");
        assert_eq!(build.context, "./svc");
        assert_eq!(build.dockerfile.as_deref(), Some("Dockerfile.prod"));
        assert_eq!(build.args.get("VERSION").map(String::as_str), Some("2"));
    }

    #[test]
    fn whole_manifest_in_document_order() {
        let manifest = crate::manifest::parse_manifest(
            "version: '3'\nservices:\n  db:\n    image: postgres\n  web:\n    image: nginx\n    links: [db]\n",
            std::path::Path::new("/srv/myproject"),
            |_| None,
        )
        .expect("manifest");
        let specs = normalize_manifest(
            &manifest,
            NameAllocator::with_existing("myproject", ["/myproject_web_2"]),
        )
        .expect("specs");
        let labels: Vec<_> = specs.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["myproject_db_1", "myproject_web_3"]);
    }

    #[test]
    fn capabilities_and_security_options() {
        let spec = normalizer()
            .normalize(
                "busybox",
                &entry("image: busybox\ncap_add: [SYS_ADMIN]\nsecurity_opt: ['apparmor:unconfined']"),
            )
            .expect("spec");
        assert_eq!(spec.cap_add, vec!["SYS_ADMIN"]);
        assert_eq!(spec.security_opt, vec!["apparmor:unconfined"]);
    }
}
