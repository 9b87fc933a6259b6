//! # lgd-resolve
//!
//! Hierarchical entity resolution of free-text place names against the Local Government
//! Directory (LGD), India's canonical registry of administrative units.
//!
//! ## Overview
//!
//! A data owner has a table whose columns hold place names at different administrative levels
//! (state, district, sub-district, block, ...), spelled however they were typed. lgd-resolve
//! turns the distinct values of those columns into a **mapping graph** that mirrors the
//! administrative hierarchy, then resolves every node to a canonical directory entity, top
//! level first, so each parent match narrows the search for its children.
//!
//! ### Key Features
//!
//! - **Tiered matching**: exact name, curated variations, community variations, then fuzzy
//!   similarity among the children of the resolved parent
//! - **Parent-scoped search**: a resolved parent restricts every lookup for its children
//! - **Batch orchestration**: bounded-size, bounded-concurrency batches with progress reporting
//! - **Interactive resolution**: confirm, clear and remap subtrees after the automatic pass
//! - **Lossless state**: export and resume sessions; 64-bit codes survive JSON round trips
//! - **Variation feedback**: user-confirmed spellings flow back as community variations
//!
//! ## Architecture
//!
//! - **[`store`]**: the [`store::ReferenceStore`] trait and the in-memory implementation
//! - **`db`** (feature `service`): the SQLite-backed reference store
//! - **[`matcher`]**: the tiered [`matcher::Matcher`]
//! - **[`builder`]** and **[`graph`]**: turning rows into a [`graph::MappingGraph`]
//! - **[`orchestrator`]**: batched resolution plus confirm/clear/remap
//! - **[`session`]**: a shareable, generation-checked wrapper around one graph
//! - **[`state`]**, **[`export`]**, **[`feedback`]**: persistence and the outer edges of a session
//! - **[`event`]**: the [`event::MappingEvent`] stream for front ends
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lgd_resolve::{
//!     builder::GraphBuilder,
//!     matcher::Matcher,
//!     orchestrator::Orchestrator,
//!     properties::{Hierarchy, Level, Row},
//!     store::{MemoryStore, ReferenceDataset},
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dataset = ReferenceDataset::from_json(&std::fs::read_to_string("lgd.json")?)?;
//!     let store = MemoryStore::from_dataset(dataset)?;
//!
//!     let rows: Vec<Row> = serde_json::from_str(&std::fs::read_to_string("rows.json")?)?;
//!     let mut hierarchy = Hierarchy::new();
//!     hierarchy.insert("state".to_string(), Level::new(1, "state", 1));
//!     hierarchy.insert("district".to_string(), Level::new(2, "district", 2));
//!
//!     let mut graph = GraphBuilder::default().build(&rows, &hierarchy)?;
//!     let orchestrator = Orchestrator::new(Matcher::new(store));
//!     orchestrator
//!         .map_in_batches(&mut graph, &[], |p| println!("{:.0}%", p * 100.0))
//!         .await?;
//!
//!     println!("{}", graph.stats());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `service`: the SQLite reference store (`db::SqliteStore`)
//! - `bin`: the `lgd-map` command-line tool (implies `service`)

pub mod builder;
pub mod config;
#[cfg(feature = "service")]
pub mod db;
pub mod error;
pub mod event;
pub mod export;
pub mod feedback;
pub mod graph;
pub mod matcher;
pub mod nodekey;
pub mod orchestrator;
pub mod properties;
pub mod session;
pub mod state;
pub mod store;
#[cfg(test)]
mod tests;

pub use error::*;
