use petgraph::{
    algo::is_cyclic_directed,
    graph::NodeIndex,
    visit::{DfsPostOrder, EdgeRef},
    Direction, Graph,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use crate::{
    error::MapperError,
    nodekey::NodeKey,
    properties::{EntityId, Level, LevelId},
};

use super::{Node, NodeState};

/// Stable index of a node inside one [MappingGraph]. Nodes are never removed, so an id stays
/// valid for the lifetime of the graph it came from.
pub type NodeId = NodeIndex<u32>;

/// Arena of resolution nodes connected parent → child.
///
/// The graph is a forest: every node has at most one parent, and parents always sit at a
/// strictly lower level rank than their children. Both properties are enforced by
/// [MappingGraph::add_edge], so any graph that exists satisfies them.
#[derive(Debug, Clone, Default)]
pub struct MappingGraph {
    graph: Graph<Node, ()>,
    index: BTreeMap<NodeKey, NodeId>,
    levels: Vec<Level>,
}

/// Per-state node counts, as surfaced to the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingStats {
    pub total: usize,
    pub auto_matched: usize,
    pub manually_matched: usize,
    pub ambiguous: usize,
    /// Subset of `ambiguous` with no candidates at all.
    pub ambiguous_empty: usize,
    pub unresolved: usize,
}

impl MappingStats {
    pub fn matched(&self) -> usize {
        self.auto_matched + self.manually_matched
    }
}

impl fmt::Display for MappingStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}/{} matched ({} auto, {} manual), \
             {} ambiguous ({} without candidates), {} unresolved",
            self.matched(),
            self.total,
            self.auto_matched,
            self.manually_matched,
            self.ambiguous,
            self.ambiguous_empty,
            self.unresolved
        )
    }
}

impl MappingGraph {
    /// An empty graph over the given hierarchy levels.
    pub fn new(mut levels: Vec<Level>) -> Self {
        levels.sort();
        levels.dedup();
        MappingGraph {
            graph: Graph::new(),
            index: BTreeMap::new(),
            levels,
        }
    }

    /// Levels of the hierarchy this graph was built for, in rank order.
    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.graph.node_weight(id)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.graph.node_weight_mut(id)
    }

    pub(crate) fn require(&self, id: NodeId) -> Result<&Node, MapperError> {
        self.node(id)
            .ok_or_else(|| MapperError::NotFound(format!("node index {}", id.index())))
    }

    pub(crate) fn require_mut(&mut self, id: NodeId) -> Result<&mut Node, MapperError> {
        self.node_mut(id)
            .ok_or_else(|| MapperError::NotFound(format!("node index {}", id.index())))
    }

    pub fn lookup(&self, key: &NodeKey) -> Option<NodeId> {
        self.index.get(key).copied()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> + '_ {
        self.graph
            .node_indices()
            .map(move |idx| (idx, &self.graph[idx]))
    }

    /// Parent → child pairs in edge insertion order.
    pub fn edges(&self) -> Vec<(NodeId, NodeId)> {
        self.graph
            .edge_references()
            .map(|e| (e.source(), e.target()))
            .collect()
    }

    /// Return the node for `key`, inserting it when absent. An existing node keeps its title.
    pub fn get_or_insert(&mut self, key: NodeKey, title: &str, level: &Level) -> NodeId {
        if let Some(idx) = self.index.get(&key) {
            return *idx;
        }
        let idx = self.graph.add_node(Node::new(key.clone(), title, level.clone()));
        self.index.insert(key, idx);
        if !self.levels.contains(level) {
            self.levels.push(level.clone());
            self.levels.sort();
        }
        idx
    }

    /// Insert a fully formed node, e.g. one restored from a snapshot. Fails if its key exists.
    pub(crate) fn insert_node(&mut self, node: Node) -> Result<NodeId, MapperError> {
        if self.index.contains_key(&node.key) {
            return Err(MapperError::InvariantViolation(format!(
                "duplicate node key '{}'",
                node.key
            )));
        }
        if !self.levels.contains(&node.level) {
            self.levels.push(node.level.clone());
            self.levels.sort();
        }
        let key = node.key.clone();
        let idx = self.graph.add_node(node);
        self.index.insert(key, idx);
        Ok(idx)
    }

    /// Connect `parent` → `child`. Re-adding an existing edge is a no-op.
    ///
    /// Fails with [MapperError::InvalidHierarchy] when `child` already has a different parent,
    /// when the edge would not descend in level rank, or when it would close a cycle.
    pub fn add_edge(&mut self, parent: NodeId, child: NodeId) -> Result<(), MapperError> {
        let parent_node = self.require(parent)?;
        let child_node = self.require(child)?;
        if parent_node.level.rank >= child_node.level.rank {
            return Err(MapperError::InvalidHierarchy(format!(
                "'{}' ({}) cannot be the parent of '{}' ({}): levels must descend in rank",
                parent_node.title, parent_node.level, child_node.title, child_node.level
            )));
        }
        match self.parent(child) {
            Some(existing) if existing == parent => Ok(()),
            Some(existing) => {
                let existing_title = self
                    .node(existing)
                    .map(|n| n.title.clone())
                    .unwrap_or_default();
                Err(MapperError::InvalidHierarchy(format!(
                    "'{}' [{}] has conflicting parents '{}' and '{}'",
                    child_node.title, child_node.key, existing_title, parent_node.title
                )))
            }
            None => {
                if parent == child || self.ancestors(parent).contains(&child) {
                    return Err(MapperError::InvalidHierarchy(format!(
                        "edge '{}' -> '{}' would create a cycle",
                        parent_node.title, child_node.title
                    )));
                }
                self.graph.add_edge(parent, child, ());
                Ok(())
            }
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.graph.neighbors_directed(id, Direction::Incoming).next()
    }

    /// Direct children in insertion order.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        let mut children = self
            .graph
            .neighbors_directed(id, Direction::Outgoing)
            .collect::<Vec<_>>();
        children.sort();
        children
    }

    /// Ancestor chain, immediate parent first.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut seen = BTreeSet::new();
        let mut cursor = self.parent(id);
        while let Some(parent) = cursor {
            if !seen.insert(parent) {
                tracing::warn!("[MappingGraph.ancestors] cycle detected above {:?}", id);
                break;
            }
            chain.push(parent);
            cursor = self.parent(parent);
        }
        chain
    }

    pub fn roots(&self) -> Vec<NodeId> {
        self.graph
            .node_indices()
            .filter(|idx| self.parent(*idx).is_none())
            .collect()
    }

    /// Nodes at `level_id` that have never been sent through the matcher.
    pub fn pending_nodes(&self, level_id: LevelId) -> Vec<NodeId> {
        self.nodes()
            .filter(|(_, n)| n.level.id == level_id && n.is_pending())
            .map(|(idx, _)| idx)
            .collect()
    }

    pub fn nodes_of_level(&self, level_id: LevelId) -> Vec<NodeId> {
        self.nodes()
            .filter(|(_, n)| n.level.id == level_id)
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Entity to scope matching of `id` by: the confirmed match of its direct parent.
    pub fn parent_scope(&self, id: NodeId) -> Option<EntityId> {
        self.parent(id)
            .and_then(|p| self.node(p))
            .and_then(|p| p.confirmed.as_ref())
            .map(|m| m.entity.id)
    }

    /// Shift the unmatched-descendant count of every ancestor of `id` by `delta`.
    pub(crate) fn adjust_ancestor_counts(&mut self, id: NodeId, delta: isize) {
        for ancestor in self.ancestors(id) {
            if let Some(node) = self.node_mut(ancestor) {
                node.unmatched_count = node.unmatched_count.saturating_add_signed(delta);
            }
        }
    }

    /// Recount unmatched descendants for every node, children before parents.
    pub fn recompute_unmatched_counts(&mut self) {
        let mut counts = BTreeMap::<NodeId, usize>::new();
        for root in self.roots() {
            let mut dfs = DfsPostOrder::new(&self.graph, root);
            while let Some(idx) = dfs.next(&self.graph) {
                let count = self
                    .children(idx)
                    .into_iter()
                    .map(|child| {
                        let unmatched = usize::from(!self.graph[child].is_matched());
                        counts.get(&child).copied().unwrap_or_default() + unmatched
                    })
                    .sum();
                counts.insert(idx, count);
            }
        }
        for (idx, count) in counts {
            self.graph[idx].unmatched_count = count;
        }
    }

    pub fn stats(&self) -> MappingStats {
        let mut stats = MappingStats {
            total: self.len(),
            ..Default::default()
        };
        for (_, node) in self.nodes() {
            match node.state {
                NodeState::AutoMatched => stats.auto_matched += 1,
                NodeState::ManuallyMatched => stats.manually_matched += 1,
                NodeState::Ambiguous => {
                    stats.ambiguous += 1;
                    if node.is_unmatched_empty() {
                        stats.ambiguous_empty += 1;
                    }
                }
                NodeState::Unresolved => stats.unresolved += 1,
            }
        }
        stats
    }

    /// Verify every structural and aggregate invariant of the forest.
    pub fn check_invariants(&self) -> Result<(), MapperError> {
        if is_cyclic_directed(&self.graph) {
            return Err(MapperError::InvariantViolation(
                "graph contains a cycle".to_string(),
            ));
        }
        for (idx, node) in self.nodes() {
            let in_degree = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .count();
            if in_degree > 1 {
                return Err(MapperError::InvariantViolation(format!(
                    "'{}' has {in_degree} parents",
                    node.key
                )));
            }
            if node.key.level_id() != node.level.id {
                return Err(MapperError::InvariantViolation(format!(
                    "'{}' is keyed at level {} but sits at level {}",
                    node.key,
                    node.key.level_id(),
                    node.level.id
                )));
            }
            if node.is_pending() != (node.state == NodeState::Unresolved) {
                return Err(MapperError::InvariantViolation(format!(
                    "'{}' is in state {:?} with {} candidate list",
                    node.key,
                    node.state,
                    if node.is_pending() { "no" } else { "a" }
                )));
            }
            if let Some(confirmed) = &node.confirmed {
                if confirmed.entity.level_id != node.level.id {
                    return Err(MapperError::InvariantViolation(format!(
                        "'{}' at level {} is confirmed to '{}' at level {}",
                        node.key, node.level.id, confirmed.entity.name, confirmed.entity.level_id
                    )));
                }
            }
            if node.state.is_matched() != node.is_matched() {
                return Err(MapperError::InvariantViolation(format!(
                    "'{}' is in state {:?} but confirmed is {:?}",
                    node.key,
                    node.state,
                    node.confirmed.as_ref().map(|m| m.entity.id)
                )));
            }
            let expected: usize = self
                .children(idx)
                .into_iter()
                .map(|c| {
                    let child = &self.graph[c];
                    child.unmatched_count + usize::from(!child.is_matched())
                })
                .sum();
            if node.unmatched_count != expected {
                return Err(MapperError::InvariantViolation(format!(
                    "'{}' reports {} unmatched descendants, expected {expected}",
                    node.key, node.unmatched_count
                )));
            }
        }
        Ok(())
    }

    pub fn display_contents(&self) -> String {
        let mut lines = Vec::new();
        let mut stack = self
            .roots()
            .into_iter()
            .rev()
            .map(|r| (r, 0usize))
            .collect::<Vec<_>>();
        while let Some((idx, depth)) = stack.pop() {
            let node = &self.graph[idx];
            lines.push(format!(
                "{:indent$}- {} [{} unmatched below]",
                "",
                node,
                node.unmatched_count,
                indent = depth * 2
            ));
            for child in self.children(idx).into_iter().rev() {
                stack.push((child, depth + 1));
            }
        }
        lines.join("\n")
    }
}

/// Two graphs are equal when they hold the same nodes (by key and attributes) connected by the
/// same key-to-key edges. Node indices are not compared.
impl PartialEq for MappingGraph {
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() || self.edge_count() != other.edge_count() {
            return false;
        }
        let nodes_match = self.nodes().all(|(_, node)| {
            other
                .lookup(&node.key)
                .and_then(|idx| other.node(idx))
                .is_some_and(|theirs| theirs == node)
        });
        if !nodes_match {
            return false;
        }
        let key_edges = |g: &MappingGraph| {
            g.edges()
                .into_iter()
                .map(|(p, c)| (g.graph[p].key.clone(), g.graph[c].key.clone()))
                .collect::<BTreeSet<_>>()
        };
        key_edges(self) == key_edges(other)
    }
}

impl fmt::Display for MappingGraph {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.display_contents())
    }
}
