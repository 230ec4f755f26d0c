//! Turns declared links into dependency edges between registry entries.

use berth_common::error::{BerthError, Result};
use berth_compose::graph::DependencyGraph;

use crate::event::{ContainerEvent, EventSink};
use crate::registry::{DependencyEdge, Registry};

/// A declared link whose target service has no registered container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedLink {
    /// Container declaring the link.
    pub label: String,
    /// Service that could not be found.
    pub service: String,
}

/// Outcome of [`link`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkReport {
    /// Number of dependency edges recorded.
    pub edges: usize,
    /// Links that resolved to nothing and were skipped.
    pub unresolved: Vec<UnresolvedLink>,
}

/// Resolves the links of every manifest-sourced container.
///
/// Each link resolves to the first registered container of the linked
/// service. Containers recovered from the engine are never linked.
/// Relinking replaces previously recorded edges.
///
/// # Errors
///
/// Returns [`BerthError::DependencyCycle`] if the resulting edges form a
/// cycle.
pub fn link(registry: &Registry, events: &EventSink) -> Result<LinkReport> {
    let rows = registry.snapshot();
    let mut report = LinkReport::default();
    let mut graph = DependencyGraph::new();

    for row in &rows {
        let spec = &row.spec;
        let _ = graph.add_container(&spec.label);
        if spec.loaded_from_environment {
            continue;
        }

        let mut edges = Vec::with_capacity(spec.links.len());
        for link in &spec.links {
            let Some(target) = rows.iter().find(|r| r.spec.service == link.service) else {
                tracing::warn!(
                    label = %spec.label,
                    service = %link.service,
                    "linked service has no container; link ignored"
                );
                events.emit(ContainerEvent::UnresolvedLink {
                    label: spec.label.clone(),
                    service: link.service.clone(),
                });
                report.unresolved.push(UnresolvedLink {
                    label: spec.label.clone(),
                    service: link.service.clone(),
                });
                continue;
            };
            graph.add_dependency(&spec.label, &target.spec.label);
            edges.push(DependencyEdge {
                service: link.service.clone(),
                alias: link.alias.clone(),
                label: target.spec.label.clone(),
            });
        }
        report.edges += edges.len();
        registry.set_dependencies(&spec.label, edges)?;
    }

    if let Some(label) = graph.find_cycle() {
        return Err(BerthError::DependencyCycle { label });
    }
    tracing::debug!(
        edges = report.edges,
        unresolved = report.unresolved.len(),
        "linked containers"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use berth_compose::spec::{ContainerSpec, Link};

    use super::*;

    fn spec(service: &str, links: &[&str]) -> ContainerSpec {
        ContainerSpec {
            service: service.into(),
            label: format!("p_{service}_1"),
            full_name: format!("p_{service}_1"),
            links: links
                .iter()
                .map(|s| Link {
                    service: (*s).into(),
                    alias: (*s).into(),
                })
                .collect(),
            ..ContainerSpec::default()
        }
    }

    #[test]
    fn links_resolve_to_first_container_of_service() {
        let registry = Registry::new("p");
        registry.add(spec("db", &[])).expect("add");
        registry.add(spec("web", &["db"])).expect("add");

        let report = link(&registry, &EventSink::disabled()).expect("link");
        assert_eq!(report.edges, 1);
        let deps = registry.dependencies("p_web_1");
        assert_eq!(
            deps,
            vec![DependencyEdge {
                service: "db".into(),
                alias: "db".into(),
                label: "p_db_1".into(),
            }]
        );
    }

    #[test]
    fn unresolved_link_is_reported_not_fatal() {
        let registry = Registry::new("p");
        registry.add(spec("web", &["db"])).expect("add");
        let (sink, events) = EventSink::channel();

        let report = link(&registry, &sink).expect("link");
        assert_eq!(report.edges, 0);
        assert_eq!(report.unresolved[0].service, "db");
        assert!(registry.dependencies("p_web_1").is_empty());
        assert!(matches!(
            events.try_recv(),
            Ok(ContainerEvent::UnresolvedLink { ref service, .. }) if service == "db"
        ));
    }

    #[test]
    fn environment_sourced_containers_are_not_linked() {
        let registry = Registry::new("p");
        registry.add(spec("db", &[])).expect("add");
        let mut recovered = spec("web", &["db"]);
        recovered.loaded_from_environment = true;
        registry.add(recovered).expect("add");

        let report = link(&registry, &EventSink::disabled()).expect("link");
        assert_eq!(report.edges, 0);
        assert!(registry.dependencies("p_web_1").is_empty());
    }

    #[test]
    fn cycle_fails_the_link() {
        let registry = Registry::new("p");
        registry.add(spec("a", &["b"])).expect("add");
        registry.add(spec("b", &["a"])).expect("add");

        let err = link(&registry, &EventSink::disabled()).unwrap_err();
        assert!(matches!(err, BerthError::DependencyCycle { .. }));
    }

    #[test]
    fn relinking_does_not_duplicate_edges() {
        let registry = Registry::new("p");
        registry.add(spec("db", &[])).expect("add");
        registry.add(spec("web", &["db"])).expect("add");
        let _ = link(&registry, &EventSink::disabled()).expect("link");
        let _ = link(&registry, &EventSink::disabled()).expect("link");
        assert_eq!(registry.dependencies("p_web_1").len(), 1);
    }
}
