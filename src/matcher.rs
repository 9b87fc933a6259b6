//! Tiered name matching against a [ReferenceStore].
//!
//! A name is resolved by the first tier that produces anything:
//!
//! 1. **Exact**: canonical entity name equality.
//! 2. **Curated variation**: reviewed alternate spellings.
//! 3. **Community variation**: user-submitted spellings, only when enabled and the curated
//!    tier came back empty.
//! 4. **Fuzzy**: edit-distance similarity over the direct children of the parent scope. Skipped
//!    entirely when no parent scope is known, so fuzzy matching is never global.
//!
//! Every tier is filtered by level and, when given, by parent scope. A store failure in any tier
//! degrades that tier to an empty result, is logged, and is reported as
//! [MappingEvent::StoreUnavailable] when an event sender is attached. Matching itself never
//! fails.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    config::MapperConfig,
    error::MapperError,
    event::MappingEvent,
    properties::{normalize_name, Entity, EntityId, LevelId, Match, MatchType, VariationSource},
    store::ReferenceStore,
};

pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.5;
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// The store lookup a degraded result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Exact,
    CuratedVariation,
    CommunityVariation,
    Fuzzy,
    Parents,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchOptions {
    /// Attach each candidate's ancestor chain.
    pub include_parents: bool,
    /// Consult community variations when curated ones come back empty.
    pub include_community_variations: bool,
}

/// One entry of a batched match call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRequest {
    pub name: String,
    pub level_id: Option<LevelId>,
    pub parent_id: Option<EntityId>,
}

impl MatchRequest {
    pub fn new(name: &str, level_id: Option<LevelId>, parent_id: Option<EntityId>) -> Self {
        MatchRequest {
            name: name.to_string(),
            level_id,
            parent_id,
        }
    }
}

pub struct Matcher<S> {
    store: S,
    options: MatchOptions,
    fuzzy_threshold: f64,
    max_concurrency: usize,
    tx: Option<UnboundedSender<MappingEvent>>,
}

impl<S: ReferenceStore> Matcher<S> {
    pub fn new(store: S) -> Self {
        Matcher {
            store,
            options: MatchOptions::default(),
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            tx: None,
        }
    }

    pub fn from_config(store: S, config: &MapperConfig) -> Result<Self, MapperError> {
        config.validate()?;
        Ok(Matcher::new(store)
            .with_options(MatchOptions {
                include_parents: config.include_parents,
                include_community_variations: config.include_community_variations,
            })
            .with_fuzzy_threshold(config.fuzzy_threshold)
            .with_max_concurrency(config.max_concurrency))
    }

    pub fn with_options(mut self, options: MatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_fuzzy_threshold(mut self, threshold: f64) -> Self {
        self.fuzzy_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_events(mut self, tx: UnboundedSender<MappingEvent>) -> Self {
        self.tx = Some(tx);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn options(&self) -> MatchOptions {
        self.options
    }

    pub(crate) fn set_events(&mut self, tx: UnboundedSender<MappingEvent>) {
        self.tx = Some(tx);
    }

    /// Match with the matcher's default options.
    pub async fn match_name(
        &self,
        name: &str,
        level_id: Option<LevelId>,
        parent_id: Option<EntityId>,
    ) -> Vec<Match> {
        self.match_with(name, level_id, parent_id, self.options).await
    }

    pub async fn match_request(&self, request: &MatchRequest) -> Vec<Match> {
        self.match_name(&request.name, request.level_id, request.parent_id).await
    }

    /// Match every request, running up to `max_concurrency` at once. The result at index `i`
    /// answers `requests[i]`.
    pub async fn match_batch(&self, requests: &[MatchRequest]) -> Vec<Vec<Match>> {
        futures::stream::iter(requests.iter().map(|request| self.match_request(request)))
            .buffered(self.max_concurrency)
            .collect()
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn match_with(
        &self,
        name: &str,
        level_id: Option<LevelId>,
        parent_id: Option<EntityId>,
        options: MatchOptions,
    ) -> Vec<Match> {
        let name = normalize_name(name);
        if name.is_empty() {
            return Vec::new();
        }

        let exact = self.degrade(
            Tier::Exact,
            &name,
            self.store.exact_match(&name, level_id, parent_id).await,
        );
        if !exact.is_empty() {
            return self.prepare(exact, MatchType::Exact, options).await;
        }

        let curated = self.degrade(
            Tier::CuratedVariation,
            &name,
            self.store
                .variation_match(&name, level_id, parent_id, VariationSource::Curated)
                .await,
        );
        if !curated.is_empty() {
            return self.prepare(curated, MatchType::Variation, options).await;
        }

        if options.include_community_variations {
            let community = self.degrade(
                Tier::CommunityVariation,
                &name,
                self.store
                    .variation_match(&name, level_id, parent_id, VariationSource::Community)
                    .await,
            );
            if !community.is_empty() {
                return self.prepare(community, MatchType::Variation, options).await;
            }
        }

        let Some(parent_id) = parent_id else {
            return Vec::new();
        };
        let fuzzy = self.fuzzy(&name, level_id, parent_id).await;
        self.attach_parents(fuzzy, options).await
    }

    async fn fuzzy(
        &self,
        name: &str,
        level_id: Option<LevelId>,
        parent_id: EntityId,
    ) -> Vec<Match> {
        let children = self.degrade(Tier::Fuzzy, name, self.store.children_of(parent_id).await);
        let needle = fuzzy_form(name);
        let mut candidates = dedup_entities(children)
            .into_iter()
            .filter(|e| level_id.is_none_or(|level| e.level_id == level))
            .filter_map(|e| {
                let score = similarity(&needle, &fuzzy_form(&e.name));
                (score >= self.fuzzy_threshold).then(|| Match::fuzzy(e, score))
            })
            .collect::<Vec<_>>();
        candidates.sort_by(|a, b| {
            let a_score = a.score.unwrap_or_default();
            let b_score = b.score.unwrap_or_default();
            b_score
                .total_cmp(&a_score)
                .then_with(|| a.entity.name.cmp(&b.entity.name))
        });
        tracing::debug!(
            "[Matcher.fuzzy] '{name}' under {parent_id}: {} candidates",
            candidates.len()
        );
        candidates
    }

    async fn prepare(
        &self,
        entities: Vec<Entity>,
        match_type: MatchType,
        options: MatchOptions,
    ) -> Vec<Match> {
        let matches = dedup_entities(entities)
            .into_iter()
            .map(|e| Match::new(e, match_type))
            .collect();
        self.attach_parents(matches, options).await
    }

    async fn attach_parents(&self, mut matches: Vec<Match>, options: MatchOptions) -> Vec<Match> {
        if !options.include_parents {
            return matches;
        }
        for candidate in matches.iter_mut() {
            match self.store.parents_of(candidate.entity.id).await {
                Ok(parents) => candidate.parents = Some(parents),
                Err(e) => self.notify_degraded(Tier::Parents, &candidate.entity.name, &e),
            }
        }
        matches
    }

    fn degrade<T: Default>(&self, tier: Tier, name: &str, result: Result<T, MapperError>) -> T {
        result.unwrap_or_else(|e| {
            self.notify_degraded(tier, name, &e);
            T::default()
        })
    }

    fn notify_degraded(&self, tier: Tier, name: &str, error: &MapperError) {
        tracing::warn!(
            "[Matcher] {tier:?} lookup for '{name}' failed, continuing without it: {error}"
        );
        if let Some(tx) = &self.tx {
            let event = MappingEvent::StoreUnavailable {
                tier,
                name: name.to_string(),
                message: error.to_string(),
            };
            if tx.send(event).is_err() {
                tracing::debug!("[Matcher] event receiver dropped");
            }
        }
    }
}

fn dedup_entities(entities: Vec<Entity>) -> Vec<Entity> {
    let mut seen = BTreeSet::new();
    entities
        .into_iter()
        .filter(|e| seen.insert(e.id))
        .collect()
}

fn fuzzy_form(name: &str) -> String {
    normalize_name(name).replace('&', "and")
}

fn sort_tokens(name: &str) -> String {
    let mut tokens = name.split_whitespace().collect::<Vec<_>>();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Similarity of two names in `[0, 1]`: the better of normalized Levenshtein on the names as
/// written and on their whitespace tokens sorted, so word order does not count against a match.
pub fn similarity(a: &str, b: &str) -> f64 {
    let direct = strsim::normalized_levenshtein(a, b);
    let reordered = strsim::normalized_levenshtein(&sort_tokens(a), &sort_tokens(b));
    direct.max(reordered)
}
