/// [crate::orchestrator] drives the [Matcher] over a [MappingGraph] level by level and keeps
/// the graph's derived state (node states, unmatched-descendant counts) consistent through
/// automatic passes and manual confirm/clear decisions.
use std::collections::VecDeque;
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    config::MapperConfig,
    error::MapperError,
    event::MappingEvent,
    graph::{MappingGraph, NodeId, NodeState},
    matcher::{MatchRequest, Matcher},
    properties::{Level, LevelId, Match},
    store::ReferenceStore,
};

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Nodes selected for one matcher call, with the request for each at the same index.
#[derive(Debug, Clone, Default)]
pub(crate) struct PlannedBatch {
    pub level_id: LevelId,
    pub nodes: Vec<NodeId>,
    pub requests: Vec<MatchRequest>,
}

impl PlannedBatch {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

pub struct Orchestrator<S> {
    matcher: Matcher<S>,
    batch_size: usize,
    tx: Option<UnboundedSender<MappingEvent>>,
}

impl<S: ReferenceStore> Orchestrator<S> {
    pub fn new(matcher: Matcher<S>) -> Self {
        Orchestrator {
            matcher,
            batch_size: DEFAULT_BATCH_SIZE,
            tx: None,
        }
    }

    pub fn from_config(store: S, config: &MapperConfig) -> Result<Self, MapperError> {
        Ok(Orchestrator::new(Matcher::from_config(store, config)?)
            .with_batch_size(config.batch_size))
    }

    /// A batch size of zero is accepted here and rejected when a run starts.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Route orchestrator and matcher events to `tx`.
    pub fn with_events(mut self, tx: UnboundedSender<MappingEvent>) -> Self {
        self.matcher.set_events(tx.clone());
        self.tx = Some(tx);
        self
    }

    pub fn matcher(&self) -> &Matcher<S> {
        &self.matcher
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Resolve every never-matched node, top level first.
    ///
    /// `levels` selects and orders the levels to process; when empty, the graph's own levels
    /// are used. `on_progress` receives the cumulative fraction of graph nodes processed after
    /// every batch. Nodes that already carry matcher output, or that a user has touched, are
    /// left alone, so a second run over a resolved graph issues no store queries.
    #[tracing::instrument(skip_all, fields(nodes = graph.len(), batch_size = self.batch_size))]
    pub async fn map_in_batches<'g>(
        &self,
        graph: &'g mut MappingGraph,
        levels: &[Level],
        mut on_progress: impl FnMut(f64),
    ) -> Result<&'g mut MappingGraph, MapperError> {
        self.check_batch_size()?;
        let levels = run_levels(graph, levels);
        let total = graph.len();
        let mut processed = 0;

        for level in &levels {
            let pending = self.pending_count(graph, level.id);
            if pending == 0 {
                continue;
            }
            tracing::info!("[Orchestrator] level {level}: {pending} nodes to match");
            self.emit(MappingEvent::LevelStarted {
                level: level.clone(),
                pending,
            });
            loop {
                let batch = self.plan_batch(graph, level.id);
                if batch.is_empty() {
                    break;
                }
                let results = self.matcher.match_batch(&batch.requests).await;
                self.apply_batch(graph, &batch, results);
                processed += batch.len();
                on_progress(progress(processed, total));
                self.emit(MappingEvent::BatchCompleted {
                    level_id: level.id,
                    processed,
                    total,
                });
            }
        }

        self.finish_run(graph);
        Ok(graph)
    }

    /// Record a user's choice for `node` and remap its unresolved children under it.
    ///
    /// Returns the descendants that became matched as a result.
    pub async fn confirm_match(
        &self,
        graph: &mut MappingGraph,
        node: NodeId,
        confirmed: Match,
    ) -> Result<Vec<NodeId>, MapperError> {
        let target = graph.node(node).ok_or_else(|| {
            MapperError::InvalidMatch(format!("no node with index {}", node.index()))
        })?;
        if confirmed.entity.level_id != target.level.id {
            return Err(MapperError::InvalidMatch(format!(
                "'{}' is a {} node but {} is at level {}",
                target.title, target.level, confirmed.entity, confirmed.entity.level_id
            )));
        }
        let was_matched = target.is_matched();

        let target = graph.require_mut(node)?;
        target.set_manual_match(confirmed);
        let key = target.key.clone();
        if !was_matched {
            graph.adjust_ancestor_counts(node, -1);
        }
        tracing::info!("[Orchestrator] confirmed {key}");
        self.emit(MappingEvent::NodeResolved {
            key,
            state: NodeState::ManuallyMatched,
        });

        Ok(self.remap(graph, node, false).await)
    }

    /// Drop the confirmed match of `node`. Children keep their state. Returns whether the node
    /// had a match; clearing an unmatched node is a no-op.
    pub fn clear_match(&self, graph: &mut MappingGraph, node: NodeId) -> Result<bool, MapperError> {
        let target = graph.require_mut(node)?;
        if !target.clear_match() {
            tracing::debug!("[Orchestrator] {} has no match to clear", target.key);
            return Ok(false);
        }
        let key = target.key.clone();
        graph.adjust_ancestor_counts(node, 1);
        tracing::info!("[Orchestrator] cleared {key}");
        self.emit(MappingEvent::NodeCleared { key });
        Ok(true)
    }

    /// Re-run matching for the unmatched children of `node`, including ones a user cleared,
    /// and recursively below any that become matched.
    pub async fn remap_subtree(
        &self,
        graph: &mut MappingGraph,
        node: NodeId,
    ) -> Result<Vec<NodeId>, MapperError> {
        let target = graph.require(node)?;
        if !target.is_matched() {
            tracing::debug!(
                "[Orchestrator] '{}' has no confirmed match to scope its children by",
                target.title
            );
            return Ok(Vec::new());
        }
        Ok(self.remap(graph, node, true).await)
    }

    async fn remap(
        &self,
        graph: &mut MappingGraph,
        start: NodeId,
        include_manual: bool,
    ) -> Vec<NodeId> {
        let mut newly_matched = Vec::new();
        let mut queue = VecDeque::from([start]);
        while let Some(parent) = queue.pop_front() {
            let Some(scope) = graph
                .node(parent)
                .and_then(|n| n.confirmed.as_ref())
                .map(|m| m.entity.id)
            else {
                continue;
            };
            let candidates = graph
                .children(parent)
                .into_iter()
                .filter(|child| {
                    graph.node(*child).is_some_and(|n| {
                        !n.is_matched() && (!n.manual || (include_manual && parent == start))
                    })
                })
                .collect::<Vec<_>>();

            for chunk in candidates.chunks(self.batch_size.max(1)) {
                let requests = chunk
                    .iter()
                    .filter_map(|id| graph.node(*id))
                    .map(|n| MatchRequest::new(&n.title, Some(n.level.id), Some(scope)))
                    .collect::<Vec<_>>();
                let results = self.matcher.match_batch(&requests).await;
                for (child, matches) in chunk.iter().zip(results) {
                    let Some(node) = graph.node_mut(*child) else {
                        continue;
                    };
                    node.manual = false;
                    let state = node.set_matcher_result(matches);
                    let key = node.key.clone();
                    if state == NodeState::AutoMatched {
                        graph.adjust_ancestor_counts(*child, -1);
                        newly_matched.push(*child);
                        queue.push_back(*child);
                    }
                    self.emit(MappingEvent::NodeResolved { key, state });
                }
            }
        }
        tracing::debug!(
            "[Orchestrator] remap below {:?} matched {} nodes",
            start,
            newly_matched.len()
        );
        newly_matched
    }

    pub(crate) fn check_batch_size(&self) -> Result<(), MapperError> {
        if self.batch_size == 0 {
            return Err(MapperError::InvalidConfig(
                "batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn pending_count(&self, graph: &MappingGraph, level_id: LevelId) -> usize {
        graph
            .pending_nodes(level_id)
            .into_iter()
            .filter(|id| graph.node(*id).is_some_and(|n| !n.manual))
            .count()
    }

    /// Select up to `batch_size` never-matched, untouched nodes of `level_id`.
    pub(crate) fn plan_batch(&self, graph: &MappingGraph, level_id: LevelId) -> PlannedBatch {
        let mut batch = PlannedBatch {
            level_id,
            ..Default::default()
        };
        for id in graph.pending_nodes(level_id) {
            if batch.len() == self.batch_size {
                break;
            }
            let Some(node) = graph.node(id) else {
                continue;
            };
            if node.manual {
                continue;
            }
            batch.requests.push(MatchRequest::new(
                &node.title,
                Some(node.level.id),
                graph.parent_scope(id),
            ));
            batch.nodes.push(id);
        }
        batch
    }

    pub(crate) async fn run_batch(&self, batch: &PlannedBatch) -> Vec<Vec<Match>> {
        self.matcher.match_batch(&batch.requests).await
    }

    /// Write matcher output back. Nodes matched or touched since the batch was planned are
    /// skipped. Returns how many nodes were updated.
    pub(crate) fn apply_batch(
        &self,
        graph: &mut MappingGraph,
        batch: &PlannedBatch,
        results: Vec<Vec<Match>>,
    ) -> usize {
        let mut applied = 0;
        for (id, matches) in batch.nodes.iter().zip(results) {
            let Some(node) = graph.node_mut(*id) else {
                continue;
            };
            if !node.is_pending() || node.manual {
                tracing::debug!("[Orchestrator] skipping stale result for {}", node.key);
                continue;
            }
            let state = node.set_matcher_result(matches);
            let key = node.key.clone();
            if state == NodeState::AutoMatched {
                graph.adjust_ancestor_counts(*id, -1);
            }
            applied += 1;
            self.emit(MappingEvent::NodeResolved { key, state });
        }
        tracing::debug!(
            "[Orchestrator] level {}: applied {applied}/{} results",
            batch.level_id,
            batch.len()
        );
        applied
    }

    pub(crate) fn finish_run(&self, graph: &mut MappingGraph) {
        graph.recompute_unmatched_counts();
        let stats = graph.stats();
        tracing::info!("[Orchestrator] run finished: {stats}");
        self.emit(MappingEvent::RunFinished { stats });
    }

    pub(crate) fn emit(&self, event: MappingEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                tracing::debug!("[Orchestrator] event receiver dropped");
            }
        }
    }
}

/// Levels to process, in rank order. Falls back to the graph's levels when none are given.
pub(crate) fn run_levels(graph: &MappingGraph, levels: &[Level]) -> Vec<Level> {
    let mut levels = if levels.is_empty() {
        graph.levels().to_vec()
    } else {
        levels.to_vec()
    };
    levels.sort();
    levels.dedup();
    levels
}

pub(crate) fn progress(processed: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        processed as f64 / total as f64
    }
}
