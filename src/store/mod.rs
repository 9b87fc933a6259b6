//! The reference store: the read-only canonical directory every name is resolved against.
//!
//! # Module Organization
//!
//! - [`ReferenceStore`]: async query surface consumed by the [crate::matcher::Matcher]
//! - [`memory`]: [`MemoryStore`], an in-process implementation over a [`ReferenceDataset`]
//! - `crate::db::SqliteStore` (feature `service`): the SQLite-backed implementation
//!
//! Every query is filtered the same way across implementations: names compare after
//! [crate::properties::normalize_name], `level_id` restricts the entity level, and
//! `parent_id` restricts results to direct children of that entity.

use serde::{Deserialize, Serialize};
use std::future::Future;

use crate::{
    error::MapperError,
    properties::{
        Ack, Entity, EntityCode, EntityId, HierarchyEdge, Level, LevelId, Variation,
        VariationSource,
    },
};

mod memory;

pub use memory::{MemoryStore, Submission};

pub trait ReferenceStore: Sync {
    /// All hierarchy levels except the synthetic root level, in rank order.
    fn list_levels(&self) -> impl Future<Output = Result<Vec<Level>, MapperError>> + Send;

    /// Entities whose canonical name equals `name`.
    fn exact_match(
        &self,
        name: &str,
        level_id: Option<LevelId>,
        parent_id: Option<EntityId>,
    ) -> impl Future<Output = Result<Vec<Entity>, MapperError>> + Send;

    /// Distinct entities that carry a `source` variation equal to `name`.
    fn variation_match(
        &self,
        name: &str,
        level_id: Option<LevelId>,
        parent_id: Option<EntityId>,
        source: VariationSource,
    ) -> impl Future<Output = Result<Vec<Entity>, MapperError>> + Send;

    /// Direct children of `entity_id`.
    fn children_of(
        &self,
        entity_id: EntityId,
    ) -> impl Future<Output = Result<Vec<Entity>, MapperError>> + Send;

    /// Ancestor chain of `entity_id`, root first and immediate parent last.
    fn parents_of(
        &self,
        entity_id: EntityId,
    ) -> impl Future<Output = Result<Vec<Entity>, MapperError>> + Send;

    /// Record a user-proposed alternate spelling as a community variation.
    fn submit_variation(
        &self,
        name: &str,
        entity_code: EntityCode,
        proposer_email: &str,
    ) -> impl Future<Output = Result<Ack, MapperError>> + Send;
}

/// Serializable bulk contents of a reference store, used to seed either implementation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceDataset {
    pub levels: Vec<Level>,
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub edges: Vec<HierarchyEdge>,
    #[serde(default)]
    pub variations: Vec<Variation>,
}

impl ReferenceDataset {
    /// Parse a dataset from JSON. Ids and codes may be numbers or decimal strings.
    pub fn from_json(json: &str) -> Result<ReferenceDataset, MapperError> {
        Ok(serde_json::from_str(json)?)
    }
}
