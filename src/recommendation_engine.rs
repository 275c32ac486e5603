//! Top-K neighbor ranking and per-item poster enrichment.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::{Catalog, SimilarityMatrix};
use crate::config::RecommendationConfig;
use crate::poster_enrichment::EnrichmentClient;
use crate::protocol::{AssetLookup, AssetSource, RecommendError, RecommendedItem};

/// Knobs that shape one recommendation result.
#[derive(Debug, Clone, PartialEq)]
pub struct RecommendationSettings {
    pub top_k: usize,
    pub placeholder_asset_url: String,
    pub max_concurrent_lookups: usize,
}

impl RecommendationSettings {
    pub fn from_config(config: &RecommendationConfig, max_concurrent_lookups: usize) -> Self {
        Self {
            top_k: config.top_k,
            placeholder_asset_url: config.placeholder_asset_url.clone(),
            max_concurrent_lookups: max_concurrent_lookups.max(1),
        }
    }
}

/// Highest-scoring neighbors of `index`, self excluded, ties broken by lower index.
pub fn rank_neighbors(matrix: &SimilarityMatrix, index: usize, k: usize) -> Vec<(usize, f32)> {
    let mut candidates: Vec<(usize, f32)> = matrix
        .row_scores(index)
        .filter(|(neighbor, _)| *neighbor != index)
        .collect();
    candidates.sort_by(|left, right| match right.1.total_cmp(&left.1) {
        CmpOrdering::Equal => left.0.cmp(&right.0),
        ordering => ordering,
    });
    candidates.truncate(k);
    candidates
}

/// Trims, collapses inner whitespace, and title-cases a catalog title.
///
/// A letter is capitalized when it follows a non-letter; an apostrophe does not
/// start a new word, so "it's" becomes "It's".
pub fn display_title(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut out = String::with_capacity(collapsed.len());
    let mut previous_is_letter = false;
    for ch in collapsed.chars() {
        if ch.is_alphabetic() {
            if previous_is_letter {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            previous_is_letter = true;
        } else {
            out.push(ch);
            previous_is_letter = previous_is_letter && (ch == '\'' || ch == '\u{2019}');
        }
    }
    out
}

/// Stateless orchestration over the shared catalog, matrix, and enrichment client.
#[derive(Clone)]
pub struct RecommendationEngine {
    catalog: Arc<Catalog>,
    matrix: Arc<SimilarityMatrix>,
    enrichment: Arc<EnrichmentClient>,
    settings: RecommendationSettings,
}

struct RankedCandidate {
    title: String,
    score: f32,
}

impl RecommendationEngine {
    pub fn new(
        catalog: Arc<Catalog>,
        matrix: Arc<SimilarityMatrix>,
        enrichment: Arc<EnrichmentClient>,
        settings: RecommendationSettings,
    ) -> Self {
        Self {
            catalog,
            matrix,
            enrichment,
            settings,
        }
    }

    /// Returns up to `top_k` neighbors of `selected_title` in rank order.
    ///
    /// Only an unknown title fails the request; enrichment problems degrade the
    /// affected entry to the placeholder poster.
    pub fn recommend(&self, selected_title: &str) -> Result<Vec<RecommendedItem>, RecommendError> {
        let request_id = Uuid::new_v4().simple().to_string();
        let request_label = &request_id[..8];

        let Some(index) = self.catalog.index_of(selected_title) else {
            warn!(
                "Recommend[{}]: selected title '{}' is not in the catalog",
                request_label, selected_title
            );
            return Err(RecommendError::ItemNotFound {
                title: selected_title.to_string(),
            });
        };

        let candidates: Vec<RankedCandidate> =
            rank_neighbors(&self.matrix, index, self.settings.top_k)
                .into_iter()
                .filter_map(|(neighbor, score)| {
                    self.catalog.title_of(neighbor).map(|title| RankedCandidate {
                        title: display_title(title),
                        score,
                    })
                })
                .collect();
        info!(
            "Recommend[{}]: '{}' (row {}) -> {} candidates",
            request_label,
            selected_title,
            index,
            candidates.len()
        );

        let lookups = self.enrich_candidates(request_label, &candidates);
        let found = lookups.iter().filter(|lookup| lookup.is_found()).count();
        debug!(
            "Recommend[{}]: {} of {} posters resolved",
            request_label,
            found,
            lookups.len()
        );
        let items = candidates
            .into_iter()
            .zip(lookups)
            .map(|(candidate, lookup)| self.assemble_item(candidate, &lookup))
            .collect();
        Ok(items)
    }

    fn assemble_item(&self, candidate: RankedCandidate, lookup: &AssetLookup) -> RecommendedItem {
        let asset_url = lookup
            .url()
            .map(str::to_string)
            .unwrap_or_else(|| self.settings.placeholder_asset_url.clone());
        RecommendedItem {
            title: candidate.title,
            asset_url,
            score: candidate.score,
            source: AssetSource::from_lookup(lookup),
        }
    }

    /// Runs the lookups on at most `max_concurrent_lookups` scoped workers,
    /// returning outcomes in candidate order.
    fn enrich_candidates(&self, request_label: &str, candidates: &[RankedCandidate]) -> Vec<AssetLookup> {
        let worker_count = self
            .settings
            .max_concurrent_lookups
            .min(candidates.len())
            .max(1);
        if worker_count == 1 {
            return candidates
                .iter()
                .map(|candidate| self.enrichment.fetch_asset(&candidate.title))
                .collect();
        }

        debug!(
            "Recommend[{}]: enriching {} titles on {} workers",
            request_label,
            candidates.len(),
            worker_count
        );
        let next_candidate = AtomicUsize::new(0);
        let slots: Mutex<Vec<Option<AssetLookup>>> = Mutex::new(vec![None; candidates.len()]);
        std::thread::scope(|scope| {
            for _ in 0..worker_count {
                scope.spawn(|| loop {
                    let position = next_candidate.fetch_add(1, Ordering::SeqCst);
                    let Some(candidate) = candidates.get(position) else {
                        break;
                    };
                    let lookup = self.enrichment.fetch_asset(&candidate.title);
                    let mut slots = slots
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    slots[position] = Some(lookup);
                });
            }
        });

        slots
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .into_iter()
            .map(|slot| {
                slot.unwrap_or(AssetLookup::Unavailable {
                    reason: "lookup worker exited early".to_string(),
                })
            })
            .collect()
    }
}
