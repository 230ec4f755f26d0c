//! Canonical container specification produced by normalization.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Canonical, immutable description of one service instance.
///
/// Built either from a manifest entry by the
/// [`Normalizer`](crate::normalize::Normalizer) or from a live engine
/// inspection, in which case `loaded_from_environment` is set and `build`
/// is always `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContainerSpec {
    /// Declared service name.
    pub service: String,
    /// Identity key within a registry.
    pub label: String,
    /// Engine-visible container name.
    pub full_name: String,
    /// Image reference in `name:tag` form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Build context and options, used when no image is declared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildSpec>,
    /// Declared links, in declaration order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,
    /// Published and exposed ports, in declaration order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<Port>,
    /// Raw volume specifications.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    /// Shared memory size in bytes.
    pub shm_size: u64,
    /// Command arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    /// Entrypoint arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    /// Environment in `KEY=VALUE` form, in declaration order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub environment: Vec<String>,
    /// Engine labels, always including the orchestration keys.
    pub labels: BTreeMap<String, String>,
    /// Added kernel capabilities.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cap_add: Vec<String>,
    /// Security options.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub security_opt: Vec<String>,
    /// Whether this spec was recovered from a live container.
    pub loaded_from_environment: bool,
}

/// A `service[:alias]` link declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    /// Name of the service depended upon.
    pub service: String,
    /// Hostname the dependency is reachable under.
    pub alias: String,
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service, self.alias)
    }
}

/// A port mapping.
///
/// A host IP is only meaningful together with a host port; the parser
/// rejects the combination without one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Port {
    /// Port inside the container, optionally with a `/tcp` or `/udp` suffix.
    pub container_port: String,
    /// Port published on the host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_port: Option<String>,
    /// Host interface the port is bound to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,
}

impl Port {
    /// Creates a container-only port.
    #[must_use]
    pub fn container(port: impl Into<String>) -> Self {
        Self {
            container_port: port.into(),
            host_port: None,
            host_ip: None,
        }
    }

    /// Returns the engine's port key, e.g. `80/tcp`.
    #[must_use]
    pub fn binding_key(&self) -> String {
        if self.container_port.contains('/') {
            self.container_port.clone()
        } else {
            format!("{}/tcp", self.container_port)
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.host_ip, &self.host_port) {
            (Some(ip), Some(host)) => write!(f, "{ip}:{host}:{}", self.container_port),
            (_, Some(host)) => write!(f, "{host}:{}", self.container_port),
            _ => write!(f, "{}", self.container_port),
        }
    }
}

/// Build instructions for services without an image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildSpec {
    /// Build context directory.
    pub context: String,
    /// Dockerfile path relative to the context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
    /// Build-time arguments.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, String>,
    /// Multi-stage build target.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_key_defaults_to_tcp() {
        assert_eq!(Port::container("80").binding_key(), "80/tcp");
        assert_eq!(Port::container("53/udp").binding_key(), "53/udp");
    }

    #[test]
    fn port_display_round_trips_declared_form() {
        let port = Port {
            container_port: "80".into(),
            host_port: Some("8080".into()),
            host_ip: Some("127.0.0.1".into()),
        };
        assert_eq!(port.to_string(), "127.0.0.1:8080:80");
    }

    #[test]
    fn empty_attributes_are_not_serialized() {
        let spec = ContainerSpec {
            service: "web".into(),
            label: "web".into(),
            full_name: "proj_web_1".into(),
            image: Some("nginx:latest".into()),
            shm_size: 64,
            ..ContainerSpec::default()
        };
        let json = serde_json::to_value(&spec).expect("serialize");
        let obj = json.as_object().expect("object");
        assert!(!obj.contains_key("build"));
        assert!(!obj.contains_key("ports"));
        assert!(!obj.contains_key("environment"));
        assert_eq!(obj["image"], "nginx:latest");
    }
}
