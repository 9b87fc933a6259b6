//! Node payload stored in the [`super::MappingGraph`] arena.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::{
    nodekey::NodeKey,
    properties::{Level, Match},
};

/// Resolution state of a node.
///
/// ```text
/// Unresolved ──batch──▶ AutoMatched | Ambiguous
/// Unresolved | Ambiguous ──confirm──▶ ManuallyMatched
/// AutoMatched | ManuallyMatched ──clear──▶ Unresolved | Ambiguous
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    #[default]
    Unresolved,
    AutoMatched,
    /// Zero or several candidates; needs a user decision.
    Ambiguous,
    ManuallyMatched,
}

impl NodeState {
    pub fn is_matched(&self) -> bool {
        matches!(self, NodeState::AutoMatched | NodeState::ManuallyMatched)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub key: NodeKey,
    /// The value as the data owner wrote it (trimmed, first occurrence).
    pub title: String,
    pub level: Level,
    /// `None` until the matcher has run for this node. `Some(vec![])` means the matcher ran
    /// and found nothing.
    pub matches: Option<Vec<Match>>,
    pub confirmed: Option<Match>,
    pub state: NodeState,
    /// Set once a user confirms or clears this node; automatic passes leave it alone.
    pub manual: bool,
    /// Number of nodes below this one without a confirmed match.
    pub unmatched_count: usize,
}

impl Node {
    pub fn new(key: NodeKey, title: &str, level: Level) -> Self {
        Node {
            key,
            title: title.to_string(),
            level,
            matches: None,
            confirmed: None,
            state: NodeState::Unresolved,
            manual: false,
            unmatched_count: 0,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.confirmed.is_some()
    }

    /// Never sent through the matcher.
    pub fn is_pending(&self) -> bool {
        self.matches.is_none()
    }

    /// Ambiguous because the matcher found nothing at all, as opposed to too much.
    pub fn is_unmatched_empty(&self) -> bool {
        self.confirmed.is_none() && self.matches.as_ref().is_some_and(|m| m.is_empty())
    }

    pub fn candidate_count(&self) -> usize {
        self.matches.as_ref().map(|m| m.len()).unwrap_or_default()
    }

    /// Record a user decision. The confirmed match moves to the head of the candidate list.
    pub(crate) fn set_manual_match(&mut self, confirmed: Match) {
        let mut candidates = self.matches.take().unwrap_or_default();
        candidates.retain(|m| m.entity.id != confirmed.entity.id);
        candidates.insert(0, confirmed.clone());
        self.matches = Some(candidates);
        self.confirmed = Some(confirmed);
        self.state = NodeState::ManuallyMatched;
        self.manual = true;
    }

    /// Record a matcher result. A single non-fuzzy candidate is confirmed automatically.
    pub(crate) fn set_matcher_result(&mut self, candidates: Vec<Match>) -> NodeState {
        let confirmed = match candidates.as_slice() {
            [only] if !only.is_fuzzy() => Some(only.clone()),
            _ => None,
        };
        self.state = if confirmed.is_some() {
            NodeState::AutoMatched
        } else {
            NodeState::Ambiguous
        };
        self.confirmed = confirmed;
        self.matches = Some(candidates);
        self.state
    }

    /// Drop the confirmed match. Returns whether there was one; a node without a match is
    /// left untouched.
    pub(crate) fn clear_match(&mut self) -> bool {
        if self.confirmed.take().is_none() {
            return false;
        }
        self.state = if self.matches.is_some() {
            NodeState::Ambiguous
        } else {
            NodeState::Unresolved
        };
        self.manual = true;
        true
    }
}

impl Display for Node {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match &self.confirmed {
            Some(m) => write!(f, "{} '{}' => {}", self.level.name, self.title, m.entity),
            None => write!(
                f,
                "{} '{}' ({:?}, {} candidates)",
                self.level.name,
                self.title,
                self.state,
                self.candidate_count()
            ),
        }
    }
}
