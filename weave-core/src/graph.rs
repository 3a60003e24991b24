//! Dependency graph of workspace nodes.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::command_validator::CommandValidator;
use crate::error::{Error, Result};
use crate::node::{Node, NodeKind};
use crate::observer::StateObserver;
use crate::workspace::{WorkspaceMember, WorkspaceProvider};

/// Directed acyclic graph of workspace nodes.
///
/// Nodes are shared: a node reachable from several dependents is the same
/// [`Node`] instance everywhere. Edges are fixed at construction.
#[derive(Debug)]
pub struct DependencyGraph {
    nodes: FxHashMap<String, Arc<Node>>,
    /// Edges point from a node to its dependencies.
    graph: DiGraph<String, ()>,
    indices: FxHashMap<String, NodeIndex>,
    topological_order: Vec<String>,
    dependency_levels: Vec<Vec<String>>,
}

impl DependencyGraph {
    /// Builds the graph from workspace members.
    ///
    /// # Errors
    ///
    /// Returns an error if a name is invalid or declared twice, if a
    /// dependency names an unknown node, or if the dependencies form a cycle.
    pub fn new(mut members: Vec<WorkspaceMember>) -> Result<Self> {
        members.sort_by(|a, b| a.name.cmp(&b.name));

        let mut graph: DiGraph<String, ()> = DiGraph::with_capacity(members.len(), 0);
        let mut indices: FxHashMap<String, NodeIndex> = FxHashMap::default();
        let mut positions: FxHashMap<String, usize> = FxHashMap::default();

        for (position, member) in members.iter().enumerate() {
            CommandValidator::validate_node_name(&member.name)?;
            if let Some(&first) = positions.get(&member.name) {
                return Err(Error::DuplicateNode {
                    name: member.name.clone(),
                    first: members[first].path.clone(),
                    second: member.path.clone(),
                });
            }
            indices.insert(member.name.clone(), graph.add_node(member.name.clone()));
            positions.insert(member.name.clone(), position);
        }

        for member in &members {
            let from = indices[&member.name];
            for dep in &member.deps {
                let to = indices.get(dep).ok_or_else(|| Error::NodeNotFound {
                    name: dep.clone(),
                    available: format!("{} (required by {})", available(&indices), member.name),
                })?;
                graph.add_edge(from, *to, ());
            }
        }

        let sorted = toposort(&graph, None)
            .map_err(|cycle| Error::CircularDependency(describe_cycle(&graph, cycle.node_id())))?;

        // Edges point at dependencies, so the reversed sort lists them first.
        let topological_order: Vec<String> =
            sorted.into_iter().rev().map(|idx| graph[idx].clone()).collect();

        let mut nodes: FxHashMap<String, Arc<Node>> =
            FxHashMap::with_capacity_and_hasher(topological_order.len(), Default::default());
        for name in &topological_order {
            let member = &members[positions[name]];
            let dependencies = member
                .deps
                .iter()
                .filter_map(|dep| nodes.get(dep).cloned())
                .collect();
            nodes.insert(name.clone(), Arc::new(Node::new(member, dependencies)));
        }

        let dependency_levels = compute_dependency_levels(&graph, &indices, &topological_order);

        debug!(
            nodes = nodes.len(),
            levels = dependency_levels.len(),
            "built dependency graph"
        );

        Ok(Self {
            nodes,
            graph,
            indices,
            topological_order,
            dependency_levels,
        })
    }

    pub fn from_provider(provider: &dyn WorkspaceProvider) -> Result<Self> {
        Self::new(provider.members()?)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<&Arc<Node>> {
        self.nodes.get(name)
    }

    /// Like [`get`](Self::get) but fails with the list of known names.
    pub fn node(&self, name: &str) -> Result<&Arc<Node>> {
        self.nodes.get(name).ok_or_else(|| Error::NodeNotFound {
            name: name.to_string(),
            available: self.topological_order.join(", "),
        })
    }

    /// Node names with dependencies before dependents.
    #[inline]
    pub fn topological_order(&self) -> &[String] {
        &self.topological_order
    }

    /// Layers of nodes whose members only depend on earlier layers.
    #[inline]
    pub fn dependency_levels(&self) -> &[Vec<String>] {
        &self.dependency_levels
    }

    /// All nodes in topological order.
    pub fn nodes(&self) -> impl Iterator<Item = &Arc<Node>> + '_ {
        self.topological_order
            .iter()
            .filter_map(|name| self.nodes.get(name))
    }

    pub fn packages(&self) -> Vec<Arc<Node>> {
        self.of_kind(NodeKind::Package)
    }

    pub fn services(&self) -> Vec<Arc<Node>> {
        self.of_kind(NodeKind::Service)
    }

    fn of_kind(&self, kind: NodeKind) -> Vec<Arc<Node>> {
        self.nodes().filter(|n| n.kind() == kind).cloned().collect()
    }

    /// Transitive dependencies of `name`, in topological order.
    pub fn dependencies(&self, name: &str) -> Result<Vec<Arc<Node>>> {
        let node = self.node(name)?;
        let reachable: HashSet<String> = node
            .transitive_dependencies()
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        Ok(self
            .nodes()
            .filter(|n| reachable.contains(n.name()))
            .cloned()
            .collect())
    }

    /// Transitive dependents of `name`, in topological order.
    pub fn dependents(&self, name: &str) -> Result<Vec<Arc<Node>>> {
        self.node(name)?;
        let reachable = self.dependents_of([name]);
        Ok(self
            .nodes()
            .filter(|n| reachable.contains(n.name()))
            .cloned()
            .collect())
    }

    /// Names of every node that reaches one of `starts` through its
    /// dependencies. Each node is visited once.
    pub(crate) fn dependents_of<'a>(&self, starts: impl IntoIterator<Item = &'a str>) -> HashSet<&str> {
        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut stack: Vec<NodeIndex> = starts
            .into_iter()
            .filter_map(|name| self.indices.get(name).copied())
            .collect();

        while let Some(index) = stack.pop() {
            for parent in self.graph.neighbors_directed(index, Direction::Incoming) {
                if visited.insert(parent) {
                    stack.push(parent);
                }
            }
        }

        visited.into_iter().map(|index| self.graph[index].as_str()).collect()
    }

    /// Nodes that list `name` as a direct dependency.
    pub fn parents(&self, name: &str) -> Result<Vec<Arc<Node>>> {
        self.node(name)?;
        Ok(self
            .nodes()
            .filter(|n| n.dependencies().iter().any(|d| d.name() == name))
            .cloned()
            .collect())
    }

    /// Changed nodes plus all of their transitive dependents, in
    /// topological order.
    ///
    /// # Errors
    ///
    /// Returns an error if any changed node is unknown.
    pub fn affected(&self, changed: &[String]) -> Result<Vec<String>> {
        for name in changed {
            self.node(name)?;
        }
        let changed: BTreeSet<&str> = changed.iter().map(String::as_str).collect();
        let dependents = self.dependents_of(changed.iter().copied());
        Ok(self
            .nodes()
            .filter(|n| changed.contains(n.name()) || dependents.contains(n.name()))
            .map(|n| n.name().to_string())
            .collect())
    }

    /// Roots plus, unless `only_self`, everything they depend on, in
    /// topological order.
    pub fn closure(&self, roots: &[Arc<Node>], only_self: bool) -> Vec<Arc<Node>> {
        let deps: Vec<Arc<Node>> = if only_self {
            Vec::new()
        } else {
            roots.iter().flat_map(|n| n.transitive_dependencies()).collect()
        };
        let wanted: HashSet<&str> = roots
            .iter()
            .chain(deps.iter())
            .map(|n| n.name())
            .collect();
        self.nodes()
            .filter(|n| wanted.contains(n.name()))
            .cloned()
            .collect()
    }

    pub fn enable_all(&self) {
        for node in self.nodes.values() {
            node.set_enabled(true);
        }
    }

    pub fn disable_all(&self) {
        for node in self.nodes.values() {
            node.set_enabled(false);
        }
    }

    /// Enables exactly the named nodes and disables the rest.
    ///
    /// # Errors
    ///
    /// Returns an error, leaving every flag untouched, if a name is unknown.
    pub fn enable<S: AsRef<str>>(&self, names: &[S]) -> Result<()> {
        let mut selected = HashSet::with_capacity(names.len());
        for name in names {
            selected.insert(self.node(name.as_ref())?.name());
        }
        for node in self.nodes.values() {
            node.set_enabled(selected.contains(node.name()));
        }
        Ok(())
    }

    /// Enabled nodes in topological order.
    pub fn enabled_nodes(&self) -> Vec<Arc<Node>> {
        self.nodes().filter(|n| n.is_enabled()).cloned().collect()
    }

    /// Registers (or clears) the state observer on every node.
    pub fn set_observer(&self, observer: Option<Arc<dyn StateObserver>>) {
        for node in self.nodes.values() {
            node.set_observer(observer.clone());
        }
    }
}

fn available(indices: &FxHashMap<String, NodeIndex>) -> String {
    let mut names: Vec<&str> = indices.keys().map(String::as_str).collect();
    names.sort_unstable();
    names.join(", ")
}

/// Renders one dependency cycle as `a -> b -> a`, preferring the cycle
/// that contains `reported`.
fn describe_cycle(graph: &DiGraph<String, ()>, reported: NodeIndex) -> String {
    let components = tarjan_scc(graph);
    let is_cycle =
        |scc: &&Vec<NodeIndex>| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]);
    let component = components
        .iter()
        .filter(is_cycle)
        .find(|scc| scc.contains(&reported))
        .or_else(|| components.iter().find(is_cycle))
        .cloned()
        .unwrap_or_else(|| vec![reported]);

    let start = component
        .iter()
        .copied()
        .min_by(|a, b| graph[*a].cmp(&graph[*b]))
        .unwrap_or(reported);
    let members: HashSet<NodeIndex> = component.into_iter().collect();

    let mut path = vec![start];
    let mut visited = HashSet::from([start]);
    if find_path_back(graph, start, &members, &mut visited, &mut path) {
        path.push(start);
    }

    path.iter()
        .map(|idx| graph[*idx].as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn find_path_back(
    graph: &DiGraph<String, ()>,
    start: NodeIndex,
    members: &HashSet<NodeIndex>,
    visited: &mut HashSet<NodeIndex>,
    path: &mut Vec<NodeIndex>,
) -> bool {
    let current = path[path.len() - 1];
    for next in graph.neighbors_directed(current, Direction::Outgoing) {
        if next == start {
            return true;
        }
        if members.contains(&next) && visited.insert(next) {
            path.push(next);
            if find_path_back(graph, start, members, visited, path) {
                return true;
            }
            path.pop();
        }
    }
    false
}

fn compute_dependency_levels(
    graph: &DiGraph<String, ()>,
    indices: &FxHashMap<String, NodeIndex>,
    order: &[String],
) -> Vec<Vec<String>> {
    let mut levels: Vec<Vec<String>> = Vec::new();
    let mut level_of: FxHashMap<NodeIndex, usize> = FxHashMap::default();

    for name in order {
        let index = indices[name];
        let level = graph
            .neighbors_directed(index, Direction::Outgoing)
            .filter_map(|dep| level_of.get(&dep))
            .max()
            .map_or(0, |l| l + 1);

        level_of.insert(index, level);
        while levels.len() <= level {
            levels.push(Vec::new());
        }
        levels[level].push(name.clone());
    }

    levels
}
