/// [crate::feedback] forwards user-suggested spellings to the reference store, where they
/// become community variations for later matching.
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    error::MapperError,
    graph::{MappingGraph, NodeId},
    properties::{normalize_name, Ack, EntityCode},
    store::ReferenceStore,
};

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static regex"));

/// A variation the user could submit for a confirmed node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariationProposal {
    pub name: String,
    pub entity_code: EntityCode,
    pub canonical_name: String,
}

/// The node's own spelling, proposed for its confirmed entity when the two differ.
pub fn suggest_variation(graph: &MappingGraph, node: NodeId) -> Option<VariationProposal> {
    let node = graph.node(node)?;
    let confirmed = node.confirmed.as_ref()?;
    if normalize_name(&node.title) == normalize_name(&confirmed.entity.name) {
        return None;
    }
    Some(VariationProposal {
        name: node.title.clone(),
        entity_code: confirmed.entity.code,
        canonical_name: confirmed.entity.name.clone(),
    })
}

/// Validate and forward a suggested variation.
pub async fn submit_variation<S: ReferenceStore>(
    store: &S,
    name: &str,
    entity_code: EntityCode,
    proposer_email: &str,
) -> Result<Ack, MapperError> {
    let name = name.trim();
    let proposer_email = proposer_email.trim();
    if proposer_email.is_empty() {
        return Err(MapperError::InvalidFeedback(
            "an email address is required".to_string(),
        ));
    }
    if !EMAIL.is_match(proposer_email) {
        return Err(MapperError::InvalidFeedback(format!(
            "'{proposer_email}' is not an email address"
        )));
    }
    if name.is_empty() {
        return Err(MapperError::InvalidFeedback(
            "variation name cannot be empty".to_string(),
        ));
    }
    let ack = store
        .submit_variation(name, entity_code, proposer_email)
        .await?;
    if ack.accepted {
        tracing::info!("[feedback] variation '{name}' submitted for code {entity_code}");
    } else {
        tracing::warn!(
            "[feedback] variation '{name}' for code {entity_code} was declined: {}",
            ack.message
        );
    }
    Ok(ack)
}
