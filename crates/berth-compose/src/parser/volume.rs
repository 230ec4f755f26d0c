//! Volume grammar: `target`, `source:target`, or `source:target:mode`.

use std::path::{Path, PathBuf};

use super::{GrammarError, colon_fields};

const KIND: &str = "volume";

/// A parsed volume declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    /// Host path or named volume. `None` for an anonymous volume.
    pub source: Option<String>,
    /// Mount point inside the container.
    pub target: String,
    /// Access mode such as `rw` or `ro`.
    pub mode: Option<String>,
}

impl VolumeSpec {
    /// Returns whether the source names a host path rather than a volume.
    #[must_use]
    pub fn is_host_path(&self) -> bool {
        self.source
            .as_deref()
            .is_some_and(|s| s.starts_with('/') || s.starts_with('.') || s.starts_with('~'))
    }

    /// Renders the engine bind string. Relative host paths resolve against
    /// `base` and a leading `~` against `home`. Returns `None` for
    /// anonymous volumes.
    ///
    /// # Errors
    ///
    /// Returns a [`GrammarError`] for a `~user` source, or a `~` source
    /// when `home` is `None`.
    pub fn to_bind(&self, base: &Path, home: Option<&Path>) -> Result<Option<String>, GrammarError> {
        let Some(source) = self.source.as_deref() else {
            return Ok(None);
        };
        let source = if let Some(rest) = source.strip_prefix('~') {
            expand_home(source, rest, home)?
        } else if self.is_host_path() {
            join_relative(base, source).to_string_lossy().into_owned()
        } else {
            source.to_string()
        };
        let mode = self.mode.as_deref().unwrap_or("rw");
        Ok(Some(format!("{source}:{}:{mode}", self.target)))
    }
}

/// Joins `path` onto `base` unless it is absolute, dropping a leading `./`.
#[must_use]
pub fn join_relative(base: &Path, path: &str) -> PathBuf {
    match path.strip_prefix("./").unwrap_or(path) {
        "" | "." => base.to_path_buf(),
        relative => base.join(relative),
    }
}

fn expand_home(source: &str, rest: &str, home: Option<&Path>) -> Result<String, GrammarError> {
    if !(rest.is_empty() || rest.starts_with('/')) {
        return Err(GrammarError::new(KIND, source, "only ~ and ~/ can be expanded"));
    }
    let home = home.ok_or_else(|| GrammarError::new(KIND, source, "HOME is not set"))?;
    Ok(format!("{}{rest}", home.display()))
}

/// Parses a volume declaration.
///
/// # Errors
///
/// Returns a [`GrammarError`] if a field is empty or more than three
/// fields are present.
pub fn parse_volume(input: &str) -> Result<VolumeSpec, GrammarError> {
    let trimmed = input.trim();
    let fields = colon_fields(trimmed)
        .map(|(_, fields)| fields)
        .map_err(|_| GrammarError::new(KIND, input, "unreadable volume"))?;

    if fields.iter().any(|f| f.is_empty()) {
        return Err(GrammarError::new(KIND, input, "empty field"));
    }

    match fields.as_slice() {
        [target] => Ok(VolumeSpec {
            source: None,
            target: (*target).to_string(),
            mode: None,
        }),
        [source, target] => Ok(VolumeSpec {
            source: Some((*source).to_string()),
            target: (*target).to_string(),
            mode: None,
        }),
        [source, target, mode] => Ok(VolumeSpec {
            source: Some((*source).to_string()),
            target: (*target).to_string(),
            mode: Some((*mode).to_string()),
        }),
        _ => Err(GrammarError::new(
            KIND,
            input,
            "expected [source:]target[:mode]",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_volume() {
        let vol = parse_volume("/var/lib/data").expect("should parse");
        assert!(vol.source.is_none());
        assert_eq!(vol.target, "/var/lib/data");
        assert_eq!(vol.to_bind(Path::new("/work"), None), Ok(None));
    }

    #[test]
    fn relative_host_path_resolves_against_base() {
        let vol = parse_volume("./src:/app:ro").expect("should parse");
        assert!(vol.is_host_path());
        assert_eq!(
            vol.to_bind(Path::new("/work"), None),
            Ok(Some("/work/src:/app:ro".to_string()))
        );
    }

    #[test]
    fn absolute_host_path_defaults_to_rw() {
        let vol = parse_volume("/data:/data").expect("should parse");
        assert_eq!(
            vol.to_bind(Path::new("/work"), None),
            Ok(Some("/data:/data:rw".to_string()))
        );
    }

    #[test]
    fn named_volume_is_left_alone() {
        let vol = parse_volume("pgdata:/var/lib/postgresql").expect("should parse");
        assert!(!vol.is_host_path());
        assert_eq!(
            vol.to_bind(Path::new("/work"), None),
            Ok(Some("pgdata:/var/lib/postgresql:rw".to_string()))
        );
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = Some(Path::new("/home/dev"));
        let vol = parse_volume("~/.cache:/cache").expect("should parse");
        assert_eq!(
            vol.to_bind(Path::new("/work"), home),
            Ok(Some("/home/dev/.cache:/cache:rw".to_string()))
        );
        let bare = parse_volume("~:/root:ro").expect("should parse");
        assert_eq!(
            bare.to_bind(Path::new("/work"), home),
            Ok(Some("/home/dev:/root:ro".to_string()))
        );
    }

    #[test]
    fn unexpandable_tilde_is_rejected() {
        let vol = parse_volume("~/.cache:/cache").expect("should parse");
        assert!(vol.to_bind(Path::new("/work"), None).is_err());
        let other = parse_volume("~alice/data:/data").expect("should parse");
        assert!(other.to_bind(Path::new("/work"), Some(Path::new("/home/dev"))).is_err());
    }

    #[test]
    fn join_relative_normalizes_dot_prefix() {
        let base = Path::new("/srv/shop");
        assert_eq!(join_relative(base, "./api"), Path::new("/srv/shop/api"));
        assert_eq!(join_relative(base, "."), Path::new("/srv/shop"));
        assert_eq!(join_relative(base, "api"), Path::new("/srv/shop/api"));
        assert_eq!(join_relative(base, "/opt/api"), Path::new("/opt/api"));
    }

    #[test]
    fn malformed_volumes_fail() {
        assert!(parse_volume("a::b").is_err());
        assert!(parse_volume("a:b:c:d").is_err());
        assert!(parse_volume("").is_err());
    }
}
