//! Lossless JSON snapshots of a mapping session.
//!
//! A snapshot carries the graph (levels, nodes with their candidates and confirmations, and
//! parent → child edges by node key) plus the [StateMetadata] a front end needs to resume.
//! Entity ids and codes beyond the IEEE-754 safe integer range are written as decimal strings,
//! and either form is accepted on import.

use serde::{Deserialize, Serialize};

use crate::{
    error::MapperError,
    graph::{MappingGraph, Node},
    nodekey::{KeyStrategy, NodeKey},
    properties::{Hierarchy, Level},
};

pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateMetadata {
    /// Column names of the user's table, in display order.
    pub columns: Vec<String>,
    pub hierarchy: Hierarchy,
    pub key_strategy: KeyStrategy,
    /// The node the user was working on.
    pub active_node: Option<NodeKey>,
    /// Fraction of nodes processed by the last mapping run.
    pub mapping_progress: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StateDocument {
    version: u32,
    metadata: StateMetadata,
    graph: GraphSnapshot,
}

#[derive(Debug, Serialize, Deserialize)]
struct GraphSnapshot {
    levels: Vec<Level>,
    nodes: Vec<Node>,
    edges: Vec<(NodeKey, NodeKey)>,
}

/// Serialize `graph` and `metadata` to pretty-printed JSON.
pub fn export_state(graph: &MappingGraph, metadata: &StateMetadata) -> Result<String, MapperError> {
    let nodes = graph.nodes().map(|(_, node)| node.clone()).collect();
    let edges = graph
        .edges()
        .into_iter()
        .filter_map(|(p, c)| Some((graph.node(p)?.key.clone(), graph.node(c)?.key.clone())))
        .collect();
    let document = StateDocument {
        version: STATE_VERSION,
        metadata: metadata.clone(),
        graph: GraphSnapshot {
            levels: graph.levels().to_vec(),
            nodes,
            edges,
        },
    };
    Ok(serde_json::to_string_pretty(&document)?)
}

/// Rebuild a graph and its metadata from [export_state] output.
///
/// The restored graph is re-validated (single parents, rank order, confirmation levels) and
/// its unmatched counts are recomputed rather than trusted. Any failure is reported as
/// [MapperError::MalformedImportedState]; nothing is returned partially.
pub fn import_state(json: &str) -> Result<(MappingGraph, StateMetadata), MapperError> {
    let document: StateDocument = serde_json::from_str(json).map_err(malformed)?;
    if document.version != STATE_VERSION {
        return Err(MapperError::MalformedImportedState(format!(
            "unsupported state version {} (expected {STATE_VERSION})",
            document.version
        )));
    }

    let mut graph = MappingGraph::new(document.graph.levels);
    for node in document.graph.nodes {
        graph.insert_node(node).map_err(malformed)?;
    }
    for (parent, child) in document.graph.edges {
        let parent_id = graph.lookup(&parent).ok_or_else(|| {
            MapperError::MalformedImportedState(format!("edge references unknown node '{parent}'"))
        })?;
        let child_id = graph.lookup(&child).ok_or_else(|| {
            MapperError::MalformedImportedState(format!("edge references unknown node '{child}'"))
        })?;
        graph.add_edge(parent_id, child_id).map_err(malformed)?;
    }
    check_keys(&graph, document.metadata.key_strategy)?;
    graph.recompute_unmatched_counts();
    graph.check_invariants().map_err(malformed)?;

    if let Some(active) = &document.metadata.active_node {
        if graph.lookup(active).is_none() {
            tracing::warn!(
                "[import_state] active node '{active}' is not in the graph, dropping it"
            );
        }
    }
    let mut metadata = document.metadata;
    metadata.active_node = metadata
        .active_node
        .filter(|key| graph.lookup(key).is_some());

    tracing::info!(
        "[import_state] restored {} nodes, {} edges",
        graph.len(),
        graph.edge_count()
    );
    Ok((graph, metadata))
}

/// Every key must agree with where its node sits: under [KeyStrategy::AncestorPath] a key
/// extends its parent's key, under [KeyStrategy::NameOnly] it is a single segment.
fn check_keys(graph: &MappingGraph, strategy: KeyStrategy) -> Result<(), MapperError> {
    for (id, node) in graph.nodes() {
        let consistent = match strategy {
            KeyStrategy::AncestorPath => {
                let parent_key = graph.parent(id).and_then(|p| graph.node(p)).map(|p| &p.key);
                node.key.parent().as_ref() == parent_key
            }
            KeyStrategy::NameOnly => node.key.segments().len() == 1,
        };
        if !consistent {
            return Err(MapperError::MalformedImportedState(format!(
                "key '{}' does not fit its position under {strategy:?}",
                node.key
            )));
        }
    }
    Ok(())
}

fn malformed(e: impl std::fmt::Display) -> MapperError {
    MapperError::MalformedImportedState(e.to_string())
}
