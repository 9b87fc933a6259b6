/// [crate::builder] turns the user's tabular rows into the [MappingGraph] forest the
/// orchestrator resolves, one node per distinct place name and level.
use std::collections::BTreeSet;

use crate::{
    error::MapperError,
    graph::{MappingGraph, NodeId},
    nodekey::{KeyStrategy, NodeKey},
    properties::{Hierarchy, Level, Row},
};

/// Builds a [MappingGraph] from rows and a column → level mapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphBuilder {
    strategy: KeyStrategy,
}

impl GraphBuilder {
    pub fn new(strategy: KeyStrategy) -> Self {
        GraphBuilder { strategy }
    }

    pub fn strategy(&self) -> KeyStrategy {
        self.strategy
    }

    /// Build the forest. Each row is walked from the lowest-ranked column down; the first empty
    /// cell ends the walk for that row.
    ///
    /// The whole build fails with [MapperError::InvalidHierarchy] when the hierarchy is empty,
    /// when two columns share a rank, or when any node would end up with two different parents.
    #[tracing::instrument(skip_all, fields(rows = rows.len(), columns = hierarchy.len()))]
    pub fn build(&self, rows: &[Row], hierarchy: &Hierarchy) -> Result<MappingGraph, MapperError> {
        let columns = ordered_columns(hierarchy)?;
        let unique = dedup_rows(rows, &columns);
        let mut graph =
            MappingGraph::new(columns.iter().map(|(_, level)| level.clone()).collect());

        for values in &unique {
            let mut parent: Option<(NodeId, NodeKey)> = None;
            for ((_, level), value) in columns.iter().zip(values) {
                let Some(title) = value else {
                    break;
                };
                let key = NodeKey::for_strategy(
                    self.strategy,
                    parent.as_ref().map(|(_, key)| key),
                    level.id,
                    title,
                );
                let id = graph.get_or_insert(key.clone(), title, level);
                if let Some((parent_id, _)) = parent {
                    graph.add_edge(parent_id, id)?;
                }
                parent = Some((id, key));
            }
        }

        graph.recompute_unmatched_counts();
        graph.check_invariants()?;
        tracing::info!(
            "[GraphBuilder] {} rows ({} distinct) -> {} nodes, {} edges",
            rows.len(),
            unique.len(),
            graph.len(),
            graph.edge_count()
        );
        Ok(graph)
    }
}

/// Hierarchy columns sorted by level rank.
pub(crate) fn ordered_columns(hierarchy: &Hierarchy) -> Result<Vec<(String, Level)>, MapperError> {
    if hierarchy.is_empty() {
        return Err(MapperError::InvalidHierarchy(
            "no columns are mapped to a level".to_string(),
        ));
    }
    let mut columns = hierarchy
        .iter()
        .map(|(column, level)| (column.clone(), level.clone()))
        .collect::<Vec<_>>();
    columns.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    for pair in columns.windows(2) {
        if pair[0].1.rank == pair[1].1.rank {
            return Err(MapperError::InvalidHierarchy(format!(
                "columns '{}' and '{}' are both mapped to rank {}",
                pair[0].0, pair[1].0, pair[0].1.rank
            )));
        }
    }
    Ok(columns)
}

/// The trimmed cell of `column`, or `None` when missing or blank.
pub(crate) fn cell(row: &Row, column: &str) -> Option<String> {
    row.get(column)
        .and_then(|v| v.as_deref())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Distinct hierarchy tuples in first-occurrence order.
pub(crate) fn dedup_rows(rows: &[Row], columns: &[(String, Level)]) -> Vec<Vec<Option<String>>> {
    let mut seen = BTreeSet::new();
    rows.iter()
        .map(|row| {
            columns
                .iter()
                .map(|(column, _)| cell(row, column))
                .collect::<Vec<_>>()
        })
        .filter(|values| seen.insert(values.clone()))
        .collect()
}

/// `(column, key)` for every node `row` reaches, walking the same way [GraphBuilder::build] does.
pub(crate) fn row_path(
    row: &Row,
    columns: &[(String, Level)],
    strategy: KeyStrategy,
) -> Vec<(String, NodeKey)> {
    let mut path: Vec<(String, NodeKey)> = Vec::new();
    for (column, level) in columns {
        let Some(title) = cell(row, column) else {
            break;
        };
        let key = NodeKey::for_strategy(
            strategy,
            path.last().map(|(_, key)| key),
            level.id,
            &title,
        );
        path.push((column.clone(), key));
    }
    path
}
