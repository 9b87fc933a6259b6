use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use crate::{
    error::MapperError,
    properties::{
        normalize_name, Ack, Entity, EntityCode, EntityId, Level, LevelId, Variation,
        VariationSource,
    },
};

use super::{ReferenceDataset, ReferenceStore};

/// A variation proposed through [ReferenceStore::submit_variation].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub entity_id: EntityId,
    pub name: String,
    pub proposer_email: String,
}

/// In-process [ReferenceStore] over a validated [ReferenceDataset].
///
/// Clones share the submission log, so a store handed to a matcher and one kept by the caller
/// observe the same community variations.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    levels: Vec<Level>,
    entities: BTreeMap<EntityId, Entity>,
    parent: BTreeMap<EntityId, EntityId>,
    children: BTreeMap<EntityId, Vec<EntityId>>,
    /// normalized name -> entity ids, per source
    variations: BTreeMap<(VariationSource, String), BTreeSet<EntityId>>,
    submissions: Arc<RwLock<Vec<Submission>>>,
}

impl MemoryStore {
    /// Index `dataset`, rejecting edges that name unknown entities or give an entity a second
    /// parent.
    pub fn from_dataset(dataset: ReferenceDataset) -> Result<MemoryStore, MapperError> {
        let mut levels = dataset.levels;
        levels.sort();
        let entities = dataset
            .entities
            .into_iter()
            .map(|e| (e.id, e))
            .collect::<BTreeMap<_, _>>();

        let mut parent = BTreeMap::new();
        let mut children = BTreeMap::<EntityId, Vec<EntityId>>::new();
        for edge in dataset.edges {
            for id in [edge.parent, edge.child] {
                if !entities.contains_key(&id) {
                    return Err(MapperError::InvalidHierarchy(format!(
                        "hierarchy edge {} -> {} references unknown entity {id}",
                        edge.parent, edge.child
                    )));
                }
            }
            match parent.insert(edge.child, edge.parent) {
                Some(existing) if existing != edge.parent => {
                    return Err(MapperError::InvalidHierarchy(format!(
                        "entity {} has two parents: {existing} and {}",
                        edge.child, edge.parent
                    )));
                }
                Some(_) => continue,
                None => children.entry(edge.parent).or_default().push(edge.child),
            }
        }

        let mut variations = BTreeMap::<(VariationSource, String), BTreeSet<EntityId>>::new();
        for variation in dataset.variations {
            if !entities.contains_key(&variation.entity_id) {
                tracing::warn!(
                    "[MemoryStore] skipping variation '{}' of unknown entity {}",
                    variation.name,
                    variation.entity_id
                );
                continue;
            }
            variations
                .entry((variation.source, normalize_name(&variation.name)))
                .or_default()
                .insert(variation.entity_id);
        }

        Ok(MemoryStore {
            levels,
            entities,
            parent,
            children,
            variations,
            submissions: Arc::new(RwLock::new(Vec::new())),
        })
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn entity_by_code(&self, code: EntityCode) -> Option<&Entity> {
        self.entities.values().find(|e| e.code == code)
    }

    /// Everything accepted by [ReferenceStore::submit_variation] so far.
    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.read().clone()
    }

    fn passes_filters(
        &self,
        entity: &Entity,
        level_id: Option<LevelId>,
        parent_id: Option<EntityId>,
    ) -> bool {
        level_id.is_none_or(|level| entity.level_id == level)
            && parent_id.is_none_or(|p| self.parent.get(&entity.id) == Some(&p))
    }

    fn collect(&self, ids: impl IntoIterator<Item = EntityId>) -> Vec<Entity> {
        ids.into_iter()
            .filter_map(|id| self.entities.get(&id).cloned())
            .collect()
    }
}

impl ReferenceStore for MemoryStore {
    async fn list_levels(&self) -> Result<Vec<Level>, MapperError> {
        Ok(self
            .levels
            .iter()
            .filter(|l| !l.is_root())
            .cloned()
            .collect())
    }

    async fn exact_match(
        &self,
        name: &str,
        level_id: Option<LevelId>,
        parent_id: Option<EntityId>,
    ) -> Result<Vec<Entity>, MapperError> {
        let needle = normalize_name(name);
        Ok(self
            .entities
            .values()
            .filter(|e| normalize_name(&e.name) == needle)
            .filter(|e| self.passes_filters(e, level_id, parent_id))
            .cloned()
            .collect())
    }

    async fn variation_match(
        &self,
        name: &str,
        level_id: Option<LevelId>,
        parent_id: Option<EntityId>,
        source: VariationSource,
    ) -> Result<Vec<Entity>, MapperError> {
        let needle = normalize_name(name);
        let mut ids = self
            .variations
            .get(&(source, needle.clone()))
            .cloned()
            .unwrap_or_default();
        if source == VariationSource::Community {
            ids.extend(
                self.submissions
                    .read()
                    .iter()
                    .filter(|s| normalize_name(&s.name) == needle)
                    .map(|s| s.entity_id),
            );
        }
        Ok(self
            .collect(ids)
            .into_iter()
            .filter(|e| self.passes_filters(e, level_id, parent_id))
            .collect())
    }

    async fn children_of(&self, entity_id: EntityId) -> Result<Vec<Entity>, MapperError> {
        Ok(self.collect(
            self.children
                .get(&entity_id)
                .cloned()
                .unwrap_or_default(),
        ))
    }

    async fn parents_of(&self, entity_id: EntityId) -> Result<Vec<Entity>, MapperError> {
        let mut chain = Vec::new();
        let mut seen = BTreeSet::from([entity_id]);
        let mut cursor = self.parent.get(&entity_id).copied();
        while let Some(parent) = cursor {
            if !seen.insert(parent) {
                return Err(MapperError::InvalidHierarchy(format!(
                    "reference hierarchy cycles through entity {parent}"
                )));
            }
            chain.push(parent);
            cursor = self.parent.get(&parent).copied();
        }
        chain.reverse();
        Ok(self.collect(chain))
    }

    async fn submit_variation(
        &self,
        name: &str,
        entity_code: EntityCode,
        proposer_email: &str,
    ) -> Result<Ack, MapperError> {
        let Some(entity) = self.entity_by_code(entity_code) else {
            return Ok(Ack {
                accepted: false,
                message: format!("no entity with code {entity_code}"),
            });
        };
        let submission = Submission {
            entity_id: entity.id,
            name: name.trim().to_string(),
            proposer_email: proposer_email.trim().to_string(),
        };
        tracing::info!(
            "[MemoryStore] recorded variation '{}' for {}",
            submission.name,
            entity
        );
        self.submissions.write().push(submission);
        Ok(Ack {
            accepted: true,
            message: format!("variation '{}' recorded for {}", name.trim(), entity),
        })
    }
}

impl TryFrom<ReferenceDataset> for MemoryStore {
    type Error = MapperError;

    fn try_from(dataset: ReferenceDataset) -> Result<Self, Self::Error> {
        MemoryStore::from_dataset(dataset)
    }
}
