use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::{
    graph::{MappingStats, NodeState},
    matcher::Tier,
    nodekey::NodeKey,
    properties::{Level, LevelId},
};

/// Progress and notice stream emitted while a mapping run or a manual remap mutates the graph.
///
/// Sent over an optional `tokio::sync::mpsc::UnboundedSender`; a dropped receiver never
/// interrupts mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MappingEvent {
    RunStarted {
        generation: u64,
        total: usize,
    },
    LevelStarted {
        level: Level,
        pending: usize,
    },
    BatchCompleted {
        level_id: LevelId,
        processed: usize,
        total: usize,
    },
    NodeResolved {
        key: NodeKey,
        state: NodeState,
    },
    NodeCleared {
        key: NodeKey,
    },
    /// A reference store query failed and its tier degraded to an empty result.
    StoreUnavailable {
        tier: Tier,
        name: String,
        message: String,
    },
    RunFinished {
        stats: MappingStats,
    },
}

impl Display for MappingEvent {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            MappingEvent::RunStarted { generation, total } => {
                write!(f, "RunStarted(gen {generation}, {total} nodes)")
            }
            MappingEvent::LevelStarted { level, pending } => {
                write!(f, "LevelStarted({level}, {pending} pending)")
            }
            MappingEvent::BatchCompleted {
                level_id,
                processed,
                total,
            } => write!(f, "BatchCompleted(level {level_id}, {processed}/{total})"),
            MappingEvent::NodeResolved { key, state } => {
                write!(f, "NodeResolved({key} -> {state:?})")
            }
            MappingEvent::NodeCleared { key } => write!(f, "NodeCleared({key})"),
            MappingEvent::StoreUnavailable { tier, name, .. } => {
                write!(f, "StoreUnavailable({tier:?} for '{name}')")
            }
            MappingEvent::RunFinished { stats } => write!(f, "RunFinished({stats})"),
        }
    }
}
