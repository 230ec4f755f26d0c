//! Raw service declarations as they appear in a manifest.
//!
//! These types accept every shape a compose file allows for a key (string
//! or list, list or mapping) and leave canonicalization to the
//! [`Normalizer`](crate::normalize::Normalizer).

use serde::Deserialize;
use serde_yaml::{Mapping, Value};

/// One entry of the `services` mapping. Unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceEntry {
    /// Explicit engine-visible container name.
    pub container_name: Option<String>,
    /// Image reference.
    pub image: Option<String>,
    /// Build context path or detailed build section.
    pub build: Option<BuildEntry>,
    /// `service[:alias]` links.
    pub links: Option<Vec<String>>,
    /// Port mappings; numbers are accepted.
    pub ports: Option<Vec<Scalar>>,
    /// Volume declarations.
    pub volumes: Option<Vec<String>>,
    /// Shared memory size, either a byte count or a unit-suffixed string.
    pub shm_size: Option<Scalar>,
    /// Command as a shell-like string or an argument list.
    pub command: Option<CommandEntry>,
    /// Entrypoint as a shell-like string or an argument list.
    pub entrypoint: Option<CommandEntry>,
    /// Environment as `KEY=VALUE` list or mapping.
    pub environment: Option<KeyValueEntry>,
    /// Labels as `KEY=VALUE` list or mapping.
    pub labels: Option<KeyValueEntry>,
    /// Security options.
    pub security_opt: Option<Vec<String>>,
    /// Capabilities to add.
    pub cap_add: Option<Vec<String>>,
}

impl ServiceEntry {
    /// Deserializes a service entry from a YAML value.
    ///
    /// # Errors
    ///
    /// Returns the `serde_yaml` error if the value is not a mapping or a
    /// key has an unsupported shape.
    pub fn from_value(value: Value) -> Result<Self, serde_yaml::Error> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_yaml::from_value(value)
    }
}

/// A YAML scalar that may be written as a string or a number.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// An integer value.
    Integer(u64),
    /// A string value.
    Text(String),
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

/// `build:` as a context path or a detailed section.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BuildEntry {
    /// Context directory only.
    Context(String),
    /// Detailed build section.
    Detailed(BuildSection),
}

/// Detailed `build:` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BuildSection {
    /// Build context directory.
    pub context: Option<String>,
    /// Dockerfile path relative to the context.
    pub dockerfile: Option<String>,
    /// Build arguments as list or mapping.
    pub args: Option<KeyValueEntry>,
    /// Multi-stage target.
    pub target: Option<String>,
}

/// A command written as one string or as an argument list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CommandEntry {
    /// Whitespace-separated command line.
    Line(String),
    /// Pre-tokenized arguments.
    Args(Vec<String>),
}

/// A key/value collection written as `KEY=VALUE` strings or a mapping.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum KeyValueEntry {
    /// `KEY=VALUE` strings.
    List(Vec<String>),
    /// A mapping; insertion order is preserved.
    Map(Mapping),
}

/// Renders a scalar YAML value the way it was written.
///
/// `null` renders as the empty string; floats keep their fractional
/// part (`3.0` stays `3.0`).
#[must_use]
pub fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if let Some(f) = n.as_f64().filter(|_| n.is_f64()) {
                format!("{f:?}")
            } else {
                n.to_string()
            }
        }
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}
