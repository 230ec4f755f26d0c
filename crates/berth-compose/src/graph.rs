//! Dependency graph over container labels using `petgraph`.
//!
//! Edges point from a dependency to its dependent; a failed topological
//! sort names a container on a cycle.

use std::collections::HashMap;

use petgraph::graph::{Graph, NodeIndex};

/// A dependency graph of containers keyed by label.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: Graph<String, ()>,
    nodes: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Creates an empty dependency graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a container node, returning the existing node for a known label.
    pub fn add_container(&mut self, label: &str) -> NodeIndex {
        if let Some(&idx) = self.nodes.get(label) {
            return idx;
        }
        let idx = self.graph.add_node(label.to_string());
        let _ = self.nodes.insert(label.to_string(), idx);
        idx
    }

    /// Records that `dependent` depends on `dependency`.
    ///
    /// Unknown labels are added as nodes.
    pub fn add_dependency(&mut self, dependent: &str, dependency: &str) {
        let dependent = self.add_container(dependent);
        let dependency = self.add_container(dependency);
        let _ = self.graph.add_edge(dependency, dependent, ());
    }

    /// Number of containers in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns `true` if the graph has no containers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Returns the label of one container on a cycle, if any.
    #[must_use]
    pub fn find_cycle(&self) -> Option<String> {
        petgraph::algo::toposort(&self.graph, None)
            .err()
            .and_then(|cycle| self.graph.node_weight(cycle.node_id()).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_graph_has_no_cycle() {
        let graph = DependencyGraph::new();
        assert!(graph.is_empty());
        assert!(graph.find_cycle().is_none());
    }

    #[test]
    fn repeated_labels_share_a_node() {
        let mut graph = DependencyGraph::new();
        let first = graph.add_container("web");
        let second = graph.add_container("web");
        assert_eq!(first, second);
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn diamond_is_acyclic() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("web", "api");
        graph.add_dependency("web", "cache");
        graph.add_dependency("api", "db");
        graph.add_dependency("cache", "db");

        assert_eq!(graph.len(), 4);
        assert!(graph.find_cycle().is_none());
    }

    #[test]
    fn two_node_cycle_names_a_member() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("a", "b");
        graph.add_dependency("b", "a");

        let label = graph.find_cycle().expect("cycle");
        assert!(label == "a" || label == "b", "got {label}");
    }

    #[test]
    fn self_link_is_a_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("loop", "loop");
        assert_eq!(graph.find_cycle().as_deref(), Some("loop"));
    }
}
