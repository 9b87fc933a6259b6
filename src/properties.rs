/// [crate::properties] contains the basic building blocks shared by the matcher, the graph
/// builder and the reference store: levels, canonical entities, variations and the single
/// canonical [Match] record every matcher tier produces.
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    collections::BTreeMap,
    fmt::{Display, Formatter},
};
use unicode_normalization::UnicodeNormalization;

#[cfg(feature = "service")]
use sqlx::{sqlite::SqliteRow, FromRow, Row as _};

#[cfg(feature = "service")]
use crate::error::MapperError;

pub type LevelId = u32;
pub type EntityId = u64;
pub type EntityCode = u64;

/// A user data row: column name to (possibly missing) cell value.
pub type Row = BTreeMap<String, Option<String>>;

/// User-declared mapping from a row column to the directory level it holds.
pub type Hierarchy = BTreeMap<String, Level>;

/// Name of the synthetic top-most level. It is never offered as a mapping target.
pub const ROOT_LEVEL_NAME: &str = "india";

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Canonical form used for every name comparison: NFKC, trimmed, inner whitespace collapsed,
/// lower-cased.
pub fn normalize_name(name: &str) -> String {
    let composed: String = name.nfkc().collect();
    WHITESPACE
        .replace_all(composed.trim(), " ")
        .to_lowercase()
}

/// Serde adapter for 64-bit identifiers.
///
/// Values above the IEEE-754 safe integer range are written as decimal strings so that
/// JSON consumers backed by doubles cannot silently round them. Both representations are
/// accepted on the way back in.
pub mod code_repr {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        if *value > MAX_SAFE_INTEGER {
            serializer.serialize_str(&value.to_string())
        } else {
            serializer.serialize_u64(*value)
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(u64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(n),
            Repr::Text(s) => s
                .trim()
                .parse::<u64>()
                .map_err(|e| de::Error::custom(format!("invalid integer code '{s}': {e}"))),
        }
    }
}

/// One fixed rank of the administrative hierarchy. Levels order by rank, then id; the name
/// only breaks ties so the ordering agrees with equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Level {
    pub id: LevelId,
    pub name: String,
    pub rank: u32,
}

impl Level {
    pub fn new(id: LevelId, name: &str, rank: u32) -> Self {
        Level {
            id,
            name: name.to_string(),
            rank,
        }
    }

    pub fn is_root(&self) -> bool {
        self.name.eq_ignore_ascii_case(ROOT_LEVEL_NAME)
    }
}

impl PartialOrd for Level {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Level {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank
            .cmp(&other.rank)
            .then_with(|| self.id.cmp(&other.id))
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl Display for Level {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}({})", self.name, self.rank)
    }
}

/// A canonical place owned by the reference store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    #[serde(with = "code_repr")]
    pub id: EntityId,
    #[serde(with = "code_repr")]
    pub code: EntityCode,
    pub name: String,
    pub level_id: LevelId,
}

impl Display for Entity {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{} [{}]", self.name, self.code)
    }
}

#[cfg(feature = "service")]
fn column_as_u64(row: &SqliteRow, column: &str) -> sqlx::Result<u64> {
    let raw: i64 = row.try_get(column)?;
    let value = u64::try_from(raw).map_err(|e| {
        MapperError::Serialization(format!("column '{column}' holds negative value {raw}: {e}"))
    })?;
    Ok(value)
}

#[cfg(feature = "service")]
impl FromRow<'_, SqliteRow> for Entity {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let level_raw: i64 = row.try_get("level_id")?;
        let level_id = LevelId::try_from(level_raw).map_err(|e| {
            MapperError::Serialization(format!("level_id {level_raw} out of range: {e}"))
        })?;
        Ok(Entity {
            id: column_as_u64(row, "id")?,
            code: column_as_u64(row, "code")?,
            name: row.try_get("name")?,
            level_id,
        })
    }
}

#[cfg(feature = "service")]
impl FromRow<'_, SqliteRow> for Level {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let id_raw: i64 = row.try_get("id")?;
        let rank_raw: i64 = row.try_get("rank")?;
        let id = LevelId::try_from(id_raw)
            .map_err(|e| MapperError::Serialization(format!("level id {id_raw}: {e}")))?;
        let rank = u32::try_from(rank_raw)
            .map_err(|e| MapperError::Serialization(format!("level rank {rank_raw}: {e}")))?;
        Ok(Level {
            id,
            name: row.try_get("name")?,
            rank,
        })
    }
}

/// Parent → child edge of the canonical hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyEdge {
    #[serde(with = "code_repr")]
    pub parent: EntityId,
    #[serde(with = "code_repr")]
    pub child: EntityId,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariationSource {
    /// Reviewed and trusted.
    #[default]
    Curated,
    /// Submitted by users, unverified.
    Community,
}

/// An accepted alternate spelling for an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variation {
    #[serde(with = "code_repr")]
    pub entity_id: EntityId,
    pub name: String,
    #[serde(default)]
    pub source: VariationSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Variation,
    Fuzzy,
}

impl Display for MatchType {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            MatchType::Exact => write!(f, "exact"),
            MatchType::Variation => write!(f, "variation"),
            MatchType::Fuzzy => write!(f, "fuzzy"),
        }
    }
}

/// The one match record shape shared by every matcher tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub entity: Entity,
    pub match_type: MatchType,
    /// Similarity in `[0, 1]`; only fuzzy candidates carry one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Ancestor chain, root first, when the caller asked for it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parents: Option<Vec<Entity>>,
}

impl Match {
    pub fn new(entity: Entity, match_type: MatchType) -> Self {
        Match {
            entity,
            match_type,
            score: None,
            parents: None,
        }
    }

    pub fn fuzzy(entity: Entity, score: f64) -> Self {
        Match {
            entity,
            match_type: MatchType::Fuzzy,
            score: Some(score),
            parents: None,
        }
    }

    pub fn is_fuzzy(&self) -> bool {
        self.match_type == MatchType::Fuzzy
    }
}

impl Display for Match {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self.score {
            Some(score) => write!(f, "{} ({}, {score:.3})", self.entity, self.match_type),
            None => write!(f, "{} ({})", self.entity, self.match_type),
        }
    }
}

/// Acknowledgement returned by the store for a submitted variation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub accepted: bool,
    pub message: String,
}
