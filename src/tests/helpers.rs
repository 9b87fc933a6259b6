//! Shared test utilities: a small slice of the directory (two states, their districts and a
//! handful of blocks) plus store wrappers that count, fail or pause reference queries.

use crate::{
    error::MapperError,
    properties::{
        Ack, Entity, EntityCode, EntityId, Hierarchy, HierarchyEdge, Level, LevelId, Row,
        Variation, VariationSource,
    },
    store::{MemoryStore, ReferenceDataset, ReferenceStore},
};
use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::sync::{Notify, Semaphore};

/// Initialize logging for tests
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

pub const STATE: LevelId = 1;
pub const DISTRICT: LevelId = 2;
pub const BLOCK: LevelId = 4;

pub fn level(id: LevelId) -> Level {
    fixture_levels()
        .into_iter()
        .find(|l| l.id == id)
        .unwrap_or_else(|| panic!("no fixture level {id}"))
}

pub fn fixture_levels() -> Vec<Level> {
    vec![
        Level::new(0, "india", 0),
        Level::new(1, "state", 1),
        Level::new(2, "district", 2),
        Level::new(3, "sub_district", 3),
        Level::new(4, "block", 4),
        Level::new(5, "panchayat", 5),
    ]
}

pub fn entity(id: EntityId, code: EntityCode, name: &str, level_id: LevelId) -> Entity {
    Entity {
        id,
        code,
        name: name.to_string(),
        level_id,
    }
}

/// India (100) → Kerala (1), Karnataka (2).
/// Kerala → Ernakulam (10), Kottayam (11), Central (14).
/// Karnataka → Bengaluru (12), Central (15).
/// Ernakulam → blocks Central (22), Vypin (24).
/// Bengaluru → blocks Anekal (20), Hoskote (21), Central (23).
pub fn fixture_dataset() -> ReferenceDataset {
    let entities = vec![
        entity(100, 1, "India", 0),
        entity(1, 32, "Kerala", STATE),
        entity(2, 29, "Karnataka", STATE),
        entity(10, 537, "Ernakulam", DISTRICT),
        entity(11, 538, "Kottayam", DISTRICT),
        entity(12, 572, "Bengaluru", DISTRICT),
        entity(14, 5901, "Central", DISTRICT),
        entity(15, 5902, "Central", DISTRICT),
        entity(20, 6001, "Anekal", BLOCK),
        entity(21, 6002, "Hoskote", BLOCK),
        entity(22, 6003, "Central", BLOCK),
        entity(23, 6004, "Central", BLOCK),
        entity(24, 6005, "Vypin", BLOCK),
    ];
    let edges = [
        (100, 1),
        (100, 2),
        (1, 10),
        (1, 11),
        (1, 14),
        (2, 12),
        (2, 15),
        (10, 22),
        (10, 24),
        (12, 20),
        (12, 21),
        (12, 23),
    ]
    .into_iter()
    .map(|(parent, child)| HierarchyEdge { parent, child })
    .collect();
    let variations = vec![
        Variation {
            entity_id: 12,
            name: "bangalore".to_string(),
            source: VariationSource::Curated,
        },
        Variation {
            entity_id: 12,
            name: "Bangalore Urban".to_string(),
            source: VariationSource::Curated,
        },
        Variation {
            entity_id: 10,
            name: "kochi".to_string(),
            source: VariationSource::Community,
        },
    ];
    ReferenceDataset {
        levels: fixture_levels(),
        entities,
        edges,
        variations,
    }
}

pub fn fixture_store() -> MemoryStore {
    init_logging();
    MemoryStore::from_dataset(fixture_dataset()).expect("fixture dataset is valid")
}

pub fn hierarchy(columns: &[(&str, LevelId)]) -> Hierarchy {
    columns
        .iter()
        .map(|(column, id)| (column.to_string(), level(*id)))
        .collect()
}

pub fn row(cells: &[(&str, &str)]) -> Row {
    cells
        .iter()
        .map(|(k, v)| {
            let value = if v.is_empty() {
                None
            } else {
                Some(v.to_string())
            };
            (k.to_string(), value)
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct CallCounts {
    pub exact: AtomicUsize,
    pub curated: AtomicUsize,
    pub community: AtomicUsize,
    pub children: AtomicUsize,
    pub parents: AtomicUsize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        [
            &self.exact,
            &self.curated,
            &self.community,
            &self.children,
            &self.parents,
        ]
        .iter()
        .map(|c| c.load(Ordering::SeqCst))
        .sum()
    }

    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Counts every query forwarded to the wrapped store.
pub struct CountingStore<S> {
    inner: S,
    pub counts: Arc<CallCounts>,
}

impl<S: ReferenceStore> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        CountingStore {
            inner,
            counts: Arc::new(CallCounts::default()),
        }
    }
}

impl<S: ReferenceStore> ReferenceStore for CountingStore<S> {
    async fn list_levels(&self) -> Result<Vec<Level>, MapperError> {
        self.inner.list_levels().await
    }

    async fn exact_match(
        &self,
        name: &str,
        level_id: Option<LevelId>,
        parent_id: Option<EntityId>,
    ) -> Result<Vec<Entity>, MapperError> {
        self.counts.exact.fetch_add(1, Ordering::SeqCst);
        self.inner.exact_match(name, level_id, parent_id).await
    }

    async fn variation_match(
        &self,
        name: &str,
        level_id: Option<LevelId>,
        parent_id: Option<EntityId>,
        source: VariationSource,
    ) -> Result<Vec<Entity>, MapperError> {
        match source {
            VariationSource::Curated => self.counts.curated.fetch_add(1, Ordering::SeqCst),
            VariationSource::Community => self.counts.community.fetch_add(1, Ordering::SeqCst),
        };
        self.inner
            .variation_match(name, level_id, parent_id, source)
            .await
    }

    async fn children_of(&self, entity_id: EntityId) -> Result<Vec<Entity>, MapperError> {
        self.counts.children.fetch_add(1, Ordering::SeqCst);
        self.inner.children_of(entity_id).await
    }

    async fn parents_of(&self, entity_id: EntityId) -> Result<Vec<Entity>, MapperError> {
        self.counts.parents.fetch_add(1, Ordering::SeqCst);
        self.inner.parents_of(entity_id).await
    }

    async fn submit_variation(
        &self,
        name: &str,
        entity_code: EntityCode,
        proposer_email: &str,
    ) -> Result<Ack, MapperError> {
        self.inner
            .submit_variation(name, entity_code, proposer_email)
            .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Op {
    Exact,
    Curated,
    Community,
    Children,
    Parents,
    Submit,
}

/// Fails the selected operations with [MapperError::ReferenceStoreUnavailable].
pub struct FlakyStore<S> {
    inner: S,
    failing: BTreeSet<Op>,
}

impl<S: ReferenceStore> FlakyStore<S> {
    pub fn new(inner: S, failing: &[Op]) -> Self {
        FlakyStore {
            inner,
            failing: failing.iter().copied().collect(),
        }
    }

    fn check(&self, op: Op) -> Result<(), MapperError> {
        if self.failing.contains(&op) {
            Err(MapperError::ReferenceStoreUnavailable(format!(
                "{op:?} is down"
            )))
        } else {
            Ok(())
        }
    }
}

impl<S: ReferenceStore> ReferenceStore for FlakyStore<S> {
    async fn list_levels(&self) -> Result<Vec<Level>, MapperError> {
        self.inner.list_levels().await
    }

    async fn exact_match(
        &self,
        name: &str,
        level_id: Option<LevelId>,
        parent_id: Option<EntityId>,
    ) -> Result<Vec<Entity>, MapperError> {
        self.check(Op::Exact)?;
        self.inner.exact_match(name, level_id, parent_id).await
    }

    async fn variation_match(
        &self,
        name: &str,
        level_id: Option<LevelId>,
        parent_id: Option<EntityId>,
        source: VariationSource,
    ) -> Result<Vec<Entity>, MapperError> {
        self.check(match source {
            VariationSource::Curated => Op::Curated,
            VariationSource::Community => Op::Community,
        })?;
        self.inner
            .variation_match(name, level_id, parent_id, source)
            .await
    }

    async fn children_of(&self, entity_id: EntityId) -> Result<Vec<Entity>, MapperError> {
        self.check(Op::Children)?;
        self.inner.children_of(entity_id).await
    }

    async fn parents_of(&self, entity_id: EntityId) -> Result<Vec<Entity>, MapperError> {
        self.check(Op::Parents)?;
        self.inner.parents_of(entity_id).await
    }

    async fn submit_variation(
        &self,
        name: &str,
        entity_code: EntityCode,
        proposer_email: &str,
    ) -> Result<Ack, MapperError> {
        self.check(Op::Submit)?;
        self.inner
            .submit_variation(name, entity_code, proposer_email)
            .await
    }
}

/// Holds every exact-match query until the test releases it, signalling `entered` first.
pub struct GatedStore<S> {
    inner: S,
    pub entered: Arc<Notify>,
    pub gate: Arc<Semaphore>,
}

impl<S: ReferenceStore> GatedStore<S> {
    pub fn new(inner: S) -> Self {
        GatedStore {
            inner,
            entered: Arc::new(Notify::new()),
            gate: Arc::new(Semaphore::new(0)),
        }
    }

    pub fn open(&self) {
        self.gate.add_permits(1024);
    }
}

impl<S: ReferenceStore> ReferenceStore for GatedStore<S> {
    async fn list_levels(&self) -> Result<Vec<Level>, MapperError> {
        self.inner.list_levels().await
    }

    async fn exact_match(
        &self,
        name: &str,
        level_id: Option<LevelId>,
        parent_id: Option<EntityId>,
    ) -> Result<Vec<Entity>, MapperError> {
        self.entered.notify_one();
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| MapperError::ReferenceStoreUnavailable(e.to_string()))?;
        self.inner.exact_match(name, level_id, parent_id).await
    }

    async fn variation_match(
        &self,
        name: &str,
        level_id: Option<LevelId>,
        parent_id: Option<EntityId>,
        source: VariationSource,
    ) -> Result<Vec<Entity>, MapperError> {
        self.inner
            .variation_match(name, level_id, parent_id, source)
            .await
    }

    async fn children_of(&self, entity_id: EntityId) -> Result<Vec<Entity>, MapperError> {
        self.inner.children_of(entity_id).await
    }

    async fn parents_of(&self, entity_id: EntityId) -> Result<Vec<Entity>, MapperError> {
        self.inner.parents_of(entity_id).await
    }

    async fn submit_variation(
        &self,
        name: &str,
        entity_code: EntityCode,
        proposer_email: &str,
    ) -> Result<Ack, MapperError> {
        self.inner
            .submit_variation(name, entity_code, proposer_email)
            .await
    }
}
