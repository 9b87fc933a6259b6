//! [MappingSession] owns one mapping graph and serialises every mutation of it.
//!
//! The graph sits behind a FIFO-fair `tokio::sync::Mutex`. A batch run holds the lock only
//! while planning and while applying a batch, never across a store query, so manual confirm
//! and clear calls interleave with a long run. Each call to [MappingSession::start_run] bumps a
//! generation counter; a run that finds the generation moved on stops with
//! [MapperError::Superseded] instead of writing into the new graph.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, MutexGuard};

use crate::{
    error::MapperError,
    event::MappingEvent,
    graph::{MappingGraph, MappingStats, NodeId},
    nodekey::NodeKey,
    orchestrator::{progress, run_levels, Orchestrator},
    properties::{Level, Match},
    state::{export_state, import_state, StateMetadata},
    store::ReferenceStore,
};

#[derive(Debug, Default)]
struct SessionState {
    graph: MappingGraph,
    metadata: StateMetadata,
    generation: u64,
}

/// Clears the session's running flag however the run ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct MappingSession<S> {
    orchestrator: Orchestrator<S>,
    state: Mutex<SessionState>,
    running: AtomicBool,
}

impl<S: ReferenceStore> MappingSession<S> {
    pub fn new(orchestrator: Orchestrator<S>) -> Self {
        MappingSession {
            orchestrator,
            state: Mutex::new(SessionState::default()),
            running: AtomicBool::new(false),
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator<S> {
        &self.orchestrator
    }

    /// Replace the session graph, discarding the previous one. Returns the new generation.
    pub async fn start_run(&self, graph: MappingGraph, metadata: StateMetadata) -> u64 {
        let mut state = self.state.lock().await;
        state.generation += 1;
        state.graph = graph;
        state.metadata = metadata;
        tracing::info!(
            "[MappingSession] generation {} started with {} nodes",
            state.generation,
            state.graph.len()
        );
        state.generation
    }

    pub async fn generation(&self) -> u64 {
        self.state.lock().await.generation
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run the orchestrator over the session graph, one locked plan/apply step per batch.
    ///
    /// Fails with [MapperError::RunInProgress] when another run on this session has not
    /// finished, and with [MapperError::Superseded] when [MappingSession::start_run] replaced
    /// the graph mid-run. Batches applied before a supersession belong to the discarded graph.
    pub async fn map_in_batches(
        &self,
        levels: &[Level],
        mut on_progress: impl FnMut(f64),
    ) -> Result<MappingStats, MapperError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(MapperError::RunInProgress);
        }
        let _guard = RunGuard(&self.running);
        self.orchestrator.check_batch_size()?;

        let (generation, levels, total) = {
            let state = self.state.lock().await;
            (
                state.generation,
                run_levels(&state.graph, levels),
                state.graph.len(),
            )
        };
        self.orchestrator
            .emit(MappingEvent::RunStarted { generation, total });

        let mut processed = 0;
        for level in &levels {
            let mut announced = false;
            loop {
                let batch = {
                    let state = self.lock_generation(generation).await?;
                    if !announced {
                        let pending = self.orchestrator.pending_count(&state.graph, level.id);
                        if pending > 0 {
                            self.orchestrator.emit(MappingEvent::LevelStarted {
                                level: level.clone(),
                                pending,
                            });
                        }
                        announced = true;
                    }
                    self.orchestrator.plan_batch(&state.graph, level.id)
                };
                if batch.is_empty() {
                    break;
                }

                let results = self.orchestrator.run_batch(&batch).await;

                let fraction = {
                    let mut state = self.lock_generation(generation).await?;
                    self.orchestrator
                        .apply_batch(&mut state.graph, &batch, results);
                    processed += batch.len();
                    let fraction = progress(processed, total);
                    state.metadata.mapping_progress = Some(fraction);
                    fraction
                };
                on_progress(fraction);
                self.orchestrator.emit(MappingEvent::BatchCompleted {
                    level_id: level.id,
                    processed,
                    total,
                });
            }
        }

        let mut state = self.lock_generation(generation).await?;
        self.orchestrator.finish_run(&mut state.graph);
        Ok(state.graph.stats())
    }

    pub async fn confirm_match(
        &self,
        node: NodeId,
        confirmed: Match,
    ) -> Result<Vec<NodeId>, MapperError> {
        let mut state = self.state.lock().await;
        self.orchestrator
            .confirm_match(&mut state.graph, node, confirmed)
            .await
    }

    pub async fn clear_match(&self, node: NodeId) -> Result<bool, MapperError> {
        let mut state = self.state.lock().await;
        self.orchestrator.clear_match(&mut state.graph, node)
    }

    pub async fn remap_subtree(&self, node: NodeId) -> Result<Vec<NodeId>, MapperError> {
        let mut state = self.state.lock().await;
        self.orchestrator
            .remap_subtree(&mut state.graph, node)
            .await
    }

    pub async fn lookup(&self, key: &NodeKey) -> Option<NodeId> {
        self.state.lock().await.graph.lookup(key)
    }

    pub async fn set_active_node(&self, key: Option<NodeKey>) -> Result<(), MapperError> {
        let mut state = self.state.lock().await;
        if let Some(key) = &key {
            if state.graph.lookup(key).is_none() {
                return Err(MapperError::NotFound(format!("node '{key}'")));
            }
        }
        state.metadata.active_node = key;
        Ok(())
    }

    /// Run `f` against the current graph under the session lock.
    pub async fn read<R>(&self, f: impl FnOnce(&MappingGraph) -> R) -> R {
        let state = self.state.lock().await;
        f(&state.graph)
    }

    pub async fn snapshot(&self) -> (MappingGraph, StateMetadata) {
        let state = self.state.lock().await;
        (state.graph.clone(), state.metadata.clone())
    }

    pub async fn export_state(&self) -> Result<String, MapperError> {
        let state = self.state.lock().await;
        export_state(&state.graph, &state.metadata)
    }

    /// Replace the session contents with an exported snapshot, starting a new generation. On
    /// failure the session is left as it was.
    pub async fn import_state(&self, json: &str) -> Result<u64, MapperError> {
        let (graph, metadata) = import_state(json)?;
        Ok(self.start_run(graph, metadata).await)
    }

    async fn lock_generation(
        &self,
        generation: u64,
    ) -> Result<MutexGuard<'_, SessionState>, MapperError> {
        let state = self.state.lock().await;
        if state.generation != generation {
            tracing::info!(
                "[MappingSession] run for generation {generation} superseded by {}",
                state.generation
            );
            return Err(MapperError::Superseded {
                expected: generation,
                found: state.generation,
            });
        }
        Ok(state)
    }
}
