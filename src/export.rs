/// [crate::export] joins a resolved [MappingGraph] back onto the rows it was built from, so the
/// user gets their own table with directory codes and names alongside each place column.
use serde::{Deserialize, Serialize};

use crate::{
    builder::{ordered_columns, row_path},
    error::MapperError,
    graph::MappingGraph,
    nodekey::KeyStrategy,
    properties::{Hierarchy, Row},
};

pub const CODE_SUFFIX: &str = "_lgd_code";
pub const NAME_SUFFIX: &str = "_lgd_name";

/// Input rows split by whether every place value in them resolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedRows {
    pub mapped: Vec<Row>,
    pub unmapped: Vec<Row>,
}

/// Annotate each row with `<column>_lgd_code` and `<column>_lgd_name` for every hierarchy
/// column whose node has a confirmed match. A row is mapped when it has at least one place
/// value and every node along its path is confirmed. Row order is preserved within each half.
///
/// `strategy` must be the key strategy the graph was built with; a row whose path is absent
/// from the graph yields [MapperError::NotFound].
pub fn annotate_rows(
    rows: &[Row],
    hierarchy: &Hierarchy,
    graph: &MappingGraph,
    strategy: KeyStrategy,
) -> Result<AnnotatedRows, MapperError> {
    let columns = ordered_columns(hierarchy)?;
    let mut annotated = AnnotatedRows::default();
    for row in rows {
        let path = row_path(row, &columns, strategy);
        let mut out = row.clone();
        let mut complete = !path.is_empty();
        for (column, key) in &path {
            let node = graph
                .lookup(key)
                .and_then(|id| graph.node(id))
                .ok_or_else(|| MapperError::NotFound(format!("no graph node for '{key}'")))?;
            let confirmed = node.confirmed.as_ref();
            complete &= confirmed.is_some();
            out.insert(
                format!("{column}{CODE_SUFFIX}"),
                confirmed.map(|m| m.entity.code.to_string()),
            );
            out.insert(
                format!("{column}{NAME_SUFFIX}"),
                confirmed.map(|m| m.entity.name.clone()),
            );
        }
        if complete {
            annotated.mapped.push(out);
        } else {
            annotated.unmapped.push(out);
        }
    }
    tracing::debug!(
        "[annotate_rows] {} mapped, {} unmapped",
        annotated.mapped.len(),
        annotated.unmapped.len()
    );
    Ok(annotated)
}
