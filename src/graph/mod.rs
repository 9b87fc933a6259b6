//! Graph module: the resolution forest built from user rows.
//!
//! # Module Organization
//!
//! - [`node`]: Node payload and per-node state machine (`Node`, `NodeState`)
//! - [`base`]: `MappingGraph`, the arena of nodes addressed by stable indices
//!
//! ```rust
//! use lgd_resolve::graph::{MappingGraph, Node, NodeId, NodeState};
//! ```

mod base;
mod node;


pub use base::{MappingGraph, MappingStats, NodeId};
pub use node::{Node, NodeState};
