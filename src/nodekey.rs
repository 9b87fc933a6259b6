/// [crate::nodekey] contains [NodeKey], the identity of a user-input node in the
/// [crate::graph::MappingGraph], and the [KeyStrategy] that decides how much ancestry goes into
/// it.
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use crate::{
    error::MapperError,
    properties::{normalize_name, LevelId},
};

/// How node identity is derived from a row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// Key on the full chain of (level, name) pairs from the top-most column down. Two
    /// "Central" blocks under different districts stay distinct nodes.
    #[default]
    AncestorPath,
    /// Key on (level, name) only. Same-named values under different parents collapse into a
    /// single node, which the graph builder then rejects as a multi-parent conflict.
    NameOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeySegment {
    pub level_id: LevelId,
    /// Normalized with [normalize_name].
    pub name: String,
}

/// Composite node key `{level, name, parent key}`, stored as the ordered list of segments
/// from the root down.
///
/// The string form is `level:name/level:name/...` with `%`, `/` and `:` percent-escaped
/// inside names, e.g. `1:kerala/2:ernakulam`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeKey {
    segments: Vec<KeySegment>,
}

impl NodeKey {
    pub fn root(level_id: LevelId, name: &str) -> NodeKey {
        NodeKey {
            segments: vec![KeySegment {
                level_id,
                name: normalize_name(name),
            }],
        }
    }

    pub fn child(&self, level_id: LevelId, name: &str) -> NodeKey {
        let mut segments = self.segments.clone();
        segments.push(KeySegment {
            level_id,
            name: normalize_name(name),
        });
        NodeKey { segments }
    }

    /// Key for `name` at `level_id` given the key of the node above it in the row.
    pub fn for_strategy(
        strategy: KeyStrategy,
        parent: Option<&NodeKey>,
        level_id: LevelId,
        name: &str,
    ) -> NodeKey {
        match (strategy, parent) {
            (KeyStrategy::AncestorPath, Some(parent)) => parent.child(level_id, name),
            _ => NodeKey::root(level_id, name),
        }
    }

    pub fn level_id(&self) -> LevelId {
        self.leaf().level_id
    }

    pub fn name(&self) -> &str {
        &self.leaf().name
    }

    pub fn segments(&self) -> &[KeySegment] {
        &self.segments
    }

    /// The key one level up, if this key carries ancestry.
    pub fn parent(&self) -> Option<NodeKey> {
        if self.segments.len() < 2 {
            return None;
        }
        Some(NodeKey {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    fn leaf(&self) -> &KeySegment {
        // Constructors and the parser never produce an empty segment list.
        &self.segments[self.segments.len() - 1]
    }
}

fn escape(name: &str) -> String {
    name.replace('%', "%25")
        .replace('/', "%2F")
        .replace(':', "%3A")
}

fn unescape(name: &str) -> String {
    name.replace("%2F", "/")
        .replace("%3A", ":")
        .replace("%25", "%")
}

impl Display for NodeKey {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let rendered = self
            .segments
            .iter()
            .map(|s| format!("{}:{}", s.level_id, escape(&s.name)))
            .collect::<Vec<String>>()
            .join("/");
        write!(f, "{rendered}")
    }
}

impl FromStr for NodeKey {
    type Err = MapperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(MapperError::Serialization(
                "[NodeKey] cannot parse a node key from an empty string".to_string(),
            ));
        }
        let segments = s
            .split('/')
            .map(|raw| {
                let Some((level, name)) = raw.split_once(':') else {
                    return Err(MapperError::Serialization(format!(
                        "[NodeKey] segment '{raw}' of '{s}' is missing a level prefix"
                    )));
                };
                let level_id = level.parse::<LevelId>().map_err(|e| {
                    MapperError::Serialization(format!(
                        "[NodeKey] segment '{raw}' of '{s}' has a non-numeric level: {e}"
                    ))
                })?;
                let name = unescape(name);
                if name.is_empty() {
                    return Err(MapperError::Serialization(format!(
                        "[NodeKey] segment '{raw}' of '{s}' has an empty name"
                    )));
                }
                Ok(KeySegment { level_id, name })
            })
            .collect::<Result<Vec<KeySegment>, MapperError>>()?;
        Ok(NodeKey { segments })
    }
}

impl TryFrom<String> for NodeKey {
    type Error = MapperError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        NodeKey::from_str(&value)
    }
}

impl From<NodeKey> for String {
    fn from(key: NodeKey) -> String {
        key.to_string()
    }
}
