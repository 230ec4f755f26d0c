//! Manifest loading with variable interpolation and version dispatch.
//!
//! | declared `version`  | normalized      | services source   |
//! |---------------------|-----------------|-------------------|
//! | `3.<minor>`         | float of string | `services` key    |
//! | `3`                 | 3               | `services` key    |
//! | `2`                 | 2               | `services` key    |
//! | anything else       | 1               | whole document    |

use std::fmt;
use std::path::{Path, PathBuf};

use berth_common::constants::MANIFEST_FILE_NAMES;
use berth_common::error::{BerthError, Result};
use nom::{
    IResult, Parser, bytes::complete::tag, character::complete::digit1,
    combinator::all_consuming, sequence::pair,
};
use serde_yaml::{Mapping, Value};

use crate::parser::interpolate;
use crate::service::{ServiceEntry, scalar_to_string};

/// Schema version a manifest was dispatched to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SchemaVersion {
    /// Legacy format: the whole document is the services map.
    V1,
    /// Version 2.
    V2,
    /// Version 3 without a minor part.
    V3,
    /// Version `3.<minor>`, carrying the float value of the declaration.
    V3Minor(f64),
}

impl SchemaVersion {
    /// Returns the normalized numeric version.
    #[must_use]
    pub const fn as_f64(self) -> f64 {
        match self {
            Self::V1 => 1.0,
            Self::V2 => 2.0,
            Self::V3 => 3.0,
            Self::V3Minor(v) => v,
        }
    }

    /// Returns whether top-level `volumes` and `networks` are recognized.
    #[must_use]
    pub const fn has_top_level_sections(self) -> bool {
        !matches!(self, Self::V1)
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V1 => write!(f, "1"),
            Self::V2 => write!(f, "2"),
            Self::V3 => write!(f, "3"),
            Self::V3Minor(v) => write!(f, "{v}"),
        }
    }
}

/// A manifest reduced to its version-independent shape.
#[derive(Debug, Clone)]
pub struct NormalizedManifest {
    /// Version the document was dispatched to.
    pub version: SchemaVersion,
    /// Project name derived from the manifest directory.
    pub project: String,
    /// Directory containing the manifest.
    pub project_dir: PathBuf,
    /// Service declarations in document order.
    pub services: Vec<(String, ServiceEntry)>,
    /// Top-level `volumes` section, passed through unvalidated.
    pub volumes: Option<Value>,
    /// Top-level `networks` section, passed through unvalidated.
    pub networks: Option<Value>,
}

impl NormalizedManifest {
    /// Returns the declared service names in document order.
    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.services.iter().map(|(name, _)| name.as_str())
    }
}

/// Loads a manifest, interpolating variables from the process environment.
///
/// # Errors
///
/// Returns [`BerthError::ConfigNotFound`] if `path` does not exist and
/// [`BerthError::Parse`] if the document cannot be understood.
pub fn load(path: &Path) -> Result<NormalizedManifest> {
    load_with(path, |name| std::env::var(name).ok())
}

/// Loads a manifest, interpolating variables from `lookup`.
///
/// # Errors
///
/// Same as [`load`].
pub fn load_with(
    path: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<NormalizedManifest> {
    if !path.exists() {
        return Err(BerthError::ConfigNotFound {
            path: path.to_path_buf(),
        });
    }
    tracing::info!(path = %path.display(), "loading compose file");

    let text = std::fs::read_to_string(path).map_err(|e| BerthError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let absolute = std::path::absolute(path).map_err(|e| BerthError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let project_dir = absolute
        .parent()
        .map_or_else(|| PathBuf::from("/"), Path::to_path_buf);

    parse_manifest(&text, &project_dir, lookup)
}

/// Parses manifest text that belongs to `project_dir`.
///
/// # Errors
///
/// Returns [`BerthError::Parse`] for malformed YAML, a non-mapping
/// document or `services` section, or a malformed service entry.
pub fn parse_manifest(
    text: &str,
    project_dir: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<NormalizedManifest> {
    let text = interpolate(text, lookup);
    let document: Value = serde_yaml::from_str(&text)
        .map_err(|e| BerthError::parse(truncate(&text), format!("invalid YAML: {e}")))?;

    let mut document = match document {
        Value::Null => Mapping::new(),
        Value::Mapping(map) => map,
        other => {
            return Err(BerthError::parse(
                scalar_to_string(&other),
                "compose file must be a mapping",
            ));
        }
    };

    let version = dispatch_version(document.get("version"));
    tracing::debug!(%version, "dispatched compose schema version");

    let (services, volumes, networks) = if version.has_top_level_sections() {
        let services = document.remove("services").unwrap_or(Value::Null);
        (
            services,
            document.remove("volumes"),
            document.remove("networks"),
        )
    } else {
        let _ = document.remove("version");
        (Value::Mapping(document), None, None)
    };

    Ok(NormalizedManifest {
        version,
        project: project_name(project_dir),
        project_dir: project_dir.to_path_buf(),
        services: collect_services(services)?,
        volumes,
        networks,
    })
}

/// Maps a declared `version` value to a schema version.
#[must_use]
pub fn dispatch_version(declared: Option<&Value>) -> SchemaVersion {
    let Some(declared) = declared else {
        return SchemaVersion::V1;
    };
    let text = scalar_to_string(declared);
    if minor_version(&text).is_ok() {
        if let Ok(value) = text.parse::<f64>() {
            return SchemaVersion::V3Minor(value);
        }
    }
    match text.as_str() {
        "3" => SchemaVersion::V3,
        "2" => SchemaVersion::V2,
        _ => SchemaVersion::V1,
    }
}

fn minor_version(input: &str) -> IResult<&str, (&str, &str)> {
    all_consuming(pair(tag("3."), digit1)).parse(input)
}

fn collect_services(services: Value) -> Result<Vec<(String, ServiceEntry)>> {
    let map = match services {
        Value::Null => return Ok(Vec::new()),
        Value::Mapping(map) => map,
        other => {
            return Err(BerthError::parse(
                scalar_to_string(&other),
                "services must be a mapping of name to declaration",
            ));
        }
    };

    map.into_iter()
        .map(|(key, value)| {
            let name = match key {
                Value::String(name) => name,
                other => {
                    return Err(BerthError::parse(
                        scalar_to_string(&other),
                        "service names must be strings",
                    ));
                }
            };
            let entry = ServiceEntry::from_value(value).map_err(|e| {
                BerthError::parse(name.clone(), format!("invalid service declaration: {e}"))
            })?;
            Ok((name, entry))
        })
        .collect()
}

/// Derives the project name from the manifest directory.
///
/// The directory name is lowercased and stripped to ASCII alphanumerics;
/// an empty result falls back to `default`.
#[must_use]
pub fn project_name(project_dir: &Path) -> String {
    let name: String = project_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect();
    if name.is_empty() {
        "default".to_string()
    } else {
        name
    }
}

/// Locates a manifest in `dir`, trying the conventional file names in order.
#[must_use]
pub fn find_manifest(dir: &Path) -> Option<PathBuf> {
    MANIFEST_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

fn truncate(text: &str) -> String {
    const MAX: usize = 80;
    match text.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
