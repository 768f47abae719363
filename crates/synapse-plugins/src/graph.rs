//! Plugin dependency graph and load ordering.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{error, warn};

use crate::descriptor::PluginDescriptor;
use crate::id::PluginId;

/// Plugin id to the ids it depends on.
///
/// Edges exist only for dependencies that were discovered; the rest are kept
/// aside as unsatisfied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    edges: BTreeMap<PluginId, BTreeSet<PluginId>>,
    unsatisfied: BTreeMap<PluginId, BTreeSet<PluginId>>,
}

/// Result of a depth-first ordering pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOrder {
    /// Every node, dependencies before dependents.
    pub order: Vec<PluginId>,
    /// Nodes reached again while still on the DFS stack.
    pub cycles: Vec<PluginId>,
}

impl DependencyGraph {
    /// Build the graph from discovered descriptors.
    pub fn build<'a>(descriptors: impl IntoIterator<Item = &'a PluginDescriptor>) -> Self {
        let descriptors: Vec<&PluginDescriptor> = descriptors.into_iter().collect();
        let known: BTreeSet<&PluginId> = descriptors.iter().map(|d| &d.id).collect();
        let mut graph = Self::default();
        for descriptor in descriptors {
            let deps = graph.edges.entry(descriptor.id.clone()).or_default();
            for dependency in descriptor.dependencies.keys() {
                if known.contains(dependency) {
                    deps.insert(dependency.clone());
                } else {
                    warn!(
                        plugin_id = %descriptor.id,
                        dependency = %dependency,
                        "Unsatisfiable dependency: plugin not discovered"
                    );
                    graph
                        .unsatisfied
                        .entry(descriptor.id.clone())
                        .or_default()
                        .insert(dependency.clone());
                }
            }
        }
        graph
    }

    /// Known dependencies of `id`.
    pub fn dependencies(&self, id: &PluginId) -> impl Iterator<Item = &PluginId> {
        self.edges.get(id).into_iter().flatten()
    }

    /// Plugins depending directly on `id`.
    #[must_use]
    pub fn dependents(&self, id: &PluginId) -> Vec<PluginId> {
        self.edges
            .iter()
            .filter(|(_, deps)| deps.contains(id))
            .map(|(node, _)| node.clone())
            .collect()
    }

    /// Dependencies of `id` that were never discovered.
    pub fn unsatisfied(&self, id: &PluginId) -> impl Iterator<Item = &PluginId> {
        self.unsatisfied.get(id).into_iter().flatten()
    }

    /// Whether `id` is a node.
    #[must_use]
    pub fn contains(&self, id: &PluginId) -> bool {
        self.edges.contains_key(id)
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Whether the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Depth-first topological sort, dependencies first.
    ///
    /// A cycle is logged and the re-entered node treated as visited, so the
    /// sort always terminates and still lists every node once.
    #[must_use]
    pub fn load_order(&self) -> LoadOrder {
        let mut walk = Walk {
            graph: self,
            visited: BTreeSet::new(),
            on_stack: BTreeSet::new(),
            result: LoadOrder::default(),
        };
        for node in self.edges.keys() {
            walk.visit(node);
        }
        walk.result
    }
}

struct Walk<'a> {
    graph: &'a DependencyGraph,
    visited: BTreeSet<&'a PluginId>,
    on_stack: BTreeSet<&'a PluginId>,
    result: LoadOrder,
}

impl<'a> Walk<'a> {
    fn visit(&mut self, node: &'a PluginId) {
        if self.on_stack.contains(node) {
            error!(plugin_id = %node, "Circular plugin dependency detected");
            self.result.cycles.push(node.clone());
            return;
        }
        if self.visited.contains(node) {
            return;
        }
        self.on_stack.insert(node);
        let graph = self.graph;
        for dependency in graph.dependencies(node) {
            self.visit(dependency);
        }
        self.on_stack.remove(node);
        self.visited.insert(node);
        self.result.order.push(node.clone());
    }
}
