//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use lgd_resolve::{
    properties::{Hierarchy, Level, LevelId, Row},
    store::{MemoryStore, ReferenceDataset},
};

pub const STATE: LevelId = 1;
pub const DISTRICT: LevelId = 2;
pub const BLOCK: LevelId = 4;

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times; subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Two states, five districts (two named "Central") and five blocks (two named "Central"),
/// in the JSON shape a directory dump arrives in. Codes may be numbers or strings.
pub const DIRECTORY_JSON: &str = r#"{
  "levels": [
    {"id": 0, "name": "india", "rank": 0},
    {"id": 1, "name": "state", "rank": 1},
    {"id": 2, "name": "district", "rank": 2},
    {"id": 3, "name": "sub_district", "rank": 3},
    {"id": 4, "name": "block", "rank": 4}
  ],
  "entities": [
    {"id": 100, "code": 1, "name": "India", "level_id": 0},
    {"id": 1, "code": "32", "name": "Kerala", "level_id": 1},
    {"id": 2, "code": "29", "name": "Karnataka", "level_id": 1},
    {"id": 10, "code": 537, "name": "Ernakulam", "level_id": 2},
    {"id": 11, "code": 538, "name": "Kottayam", "level_id": 2},
    {"id": 12, "code": 572, "name": "Bengaluru", "level_id": 2},
    {"id": 14, "code": 5901, "name": "Central", "level_id": 2},
    {"id": 15, "code": 5902, "name": "Central", "level_id": 2},
    {"id": 20, "code": 6001, "name": "Anekal", "level_id": 4},
    {"id": 21, "code": 6002, "name": "Hoskote", "level_id": 4},
    {"id": 22, "code": 6003, "name": "Central", "level_id": 4},
    {"id": 23, "code": 6004, "name": "Central", "level_id": 4},
    {"id": 24, "code": 6005, "name": "Vypin", "level_id": 4}
  ],
  "edges": [
    {"parent": 100, "child": 1},
    {"parent": 100, "child": 2},
    {"parent": 1, "child": 10},
    {"parent": 1, "child": 11},
    {"parent": 1, "child": 14},
    {"parent": 2, "child": 12},
    {"parent": 2, "child": 15},
    {"parent": 10, "child": 22},
    {"parent": 10, "child": 24},
    {"parent": 12, "child": 20},
    {"parent": 12, "child": 21},
    {"parent": 12, "child": 23}
  ],
  "variations": [
    {"entity_id": 12, "name": "bangalore", "source": "curated"},
    {"entity_id": 12, "name": "Bangalore Urban", "source": "curated"},
    {"entity_id": 10, "name": "kochi", "source": "community"}
  ]
}"#;

pub fn directory() -> ReferenceDataset {
    ReferenceDataset::from_json(DIRECTORY_JSON).unwrap()
}

#[allow(dead_code)]
pub fn memory_store() -> MemoryStore {
    MemoryStore::from_dataset(directory()).unwrap()
}

#[allow(dead_code)]
pub fn hierarchy(columns: &[(&str, LevelId)]) -> Hierarchy {
    let levels = directory().levels;
    columns
        .iter()
        .map(|(column, id)| {
            let level = levels.iter().find(|l| l.id == *id).cloned().unwrap();
            (column.to_string(), level)
        })
        .collect()
}

#[allow(dead_code)]
pub fn level(id: LevelId) -> Level {
    directory().levels.into_iter().find(|l| l.id == id).unwrap()
}

/// A row; empty values become missing cells.
#[allow(dead_code)]
pub fn row(cells: &[(&str, &str)]) -> Row {
    cells
        .iter()
        .map(|(k, v)| {
            let value = (!v.is_empty()).then(|| v.to_string());
            (k.to_string(), value)
        })
        .collect()
}
