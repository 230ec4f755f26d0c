//! Generated container names of the form `{project}_{service}_{index}`.

use std::collections::HashMap;

/// Splits a generated container name into its service and index parts.
///
/// Accepts an optional leading `/` as reported by the engine. Returns
/// `None` when the name does not belong to `project` or has no numeric
/// suffix.
#[must_use]
pub fn parse_generated_name<'a>(project: &str, name: &'a str) -> Option<(&'a str, u32)> {
    let name = name.strip_prefix('/').unwrap_or(name);
    let rest = name.strip_prefix(project)?.strip_prefix('_')?;
    let (service, index) = rest.rsplit_once('_')?;
    if service.is_empty() || index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((service, index.parse().ok()?))
}

/// Hands out the next free index per service.
///
/// Seeded once from the names of every container the engine already knows,
/// then counts upward for the rest of the load.
#[derive(Debug, Clone)]
pub struct NameAllocator {
    project: String,
    highest: HashMap<String, u32>,
}

impl NameAllocator {
    /// Creates an allocator for a project with no existing containers.
    #[must_use]
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            highest: HashMap::new(),
        }
    }

    /// Creates an allocator seeded with existing engine container names.
    #[must_use]
    pub fn with_existing<I, S>(project: impl Into<String>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut allocator = Self::new(project);
        for name in names {
            if let Some((service, index)) = parse_generated_name(&allocator.project, name.as_ref()) {
                let highest = allocator.highest.entry(service.to_string()).or_insert(0);
                *highest = (*highest).max(index);
            }
        }
        allocator
    }

    /// Returns the project this allocator names containers for.
    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Allocates the next name for `service`.
    pub fn next_name(&mut self, service: &str) -> String {
        let highest = self.highest.entry(service.to_string()).or_insert(0);
        *highest += 1;
        format!("{}_{service}_{highest}", self.project)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_generated_names() {
        assert_eq!(parse_generated_name("shop", "shop_web_3"), Some(("web", 3)));
        assert_eq!(parse_generated_name("shop", "/shop_web_12"), Some(("web", 12)));
        assert_eq!(
            parse_generated_name("shop", "shop_web_admin_1"),
            Some(("web_admin", 1))
        );
    }

    #[test]
    fn rejects_foreign_names() {
        assert_eq!(parse_generated_name("shop", "other_web_1"), None);
        assert_eq!(parse_generated_name("shop", "shop_web"), None);
        assert_eq!(parse_generated_name("shop", "shop_web_x"), None);
        assert_eq!(parse_generated_name("shop", "shopping_web_1"), None);
    }

    #[test]
    fn fresh_allocator_starts_at_one() {
        let mut names = NameAllocator::new("shop");
        assert_eq!(names.next_name("web"), "shop_web_1");
        assert_eq!(names.next_name("web"), "shop_web_2");
        assert_eq!(names.next_name("db"), "shop_db_1");
    }

    #[test]
    fn existing_names_are_skipped_per_service() {
        let mut names = NameAllocator::with_existing(
            "shop",
            ["/shop_web_1", "/shop_web_4", "/shop_db_2", "/unrelated"],
        );
        assert_eq!(names.next_name("web"), "shop_web_5");
        assert_eq!(names.next_name("db"), "shop_db_3");
        assert_eq!(names.next_name("cache"), "shop_cache_1");
    }
}
