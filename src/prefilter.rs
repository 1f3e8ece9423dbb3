//! Coarse pass: rank reference entries by histogram correlation and keep the
//! top K.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::brain::ReferenceIndex;
use crate::config::PrefilterConfig;
use crate::features::correlation;
use crate::scope::ActiveScope;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: u32,
    pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PrefilterOutcome {
    /// Most similar first.
    Candidates(Vec<Candidate>),
    /// Even the best entry is too far off to be worth verifying.
    Rejected { best_similarity: f32 },
}

/// Higher similarity first, lower id first on ties.
fn by_rank(a: &Candidate, b: &Candidate) -> Ordering {
    b.similarity
        .total_cmp(&a.similarity)
        .then_with(|| a.id.cmp(&b.id))
}

/// Exact top-K over `ids`: one scan, a partial selection, then a sort of
/// the K survivors only.
pub fn rank_top_k(
    index: &ReferenceIndex,
    histogram: &[f32],
    ids: impl Iterator<Item = u32>,
    k: usize,
) -> Vec<Candidate> {
    let mut scored: Vec<Candidate> = ids
        .filter_map(|id| index.entry(id))
        .map(|entry| Candidate {
            id: entry.id,
            similarity: correlation(histogram, &entry.histogram),
        })
        .collect();

    if k == 0 {
        return Vec::new();
    }
    if scored.len() > k {
        scored.select_nth_unstable_by(k - 1, by_rank);
        scored.truncate(k);
    }
    scored.sort_unstable_by(by_rank);
    scored
}

pub fn select_candidates(
    index: &ReferenceIndex,
    histogram: &[f32],
    scope: Option<&ActiveScope>,
    config: &PrefilterConfig,
) -> PrefilterOutcome {
    let all = || rank_top_k(index, histogram, 0..index.len() as u32, config.top_k);

    let ranked = match scope.filter(|s| !s.is_empty()) {
        Some(scope) => {
            let within = rank_top_k(index, histogram, scope.ids().iter().copied(), config.top_k);
            if within.is_empty() {
                tracing::debug!(scope = scope.len(), "scope matched no index entries, ranking everything");
                all()
            } else {
                within
            }
        }
        None => all(),
    };

    let best_similarity = ranked.first().map(|c| c.similarity).unwrap_or(0.0);
    if ranked.is_empty() || best_similarity < config.min_correlation {
        tracing::debug!(best_similarity, threshold = config.min_correlation, "histogram veto");
        return PrefilterOutcome::Rejected { best_similarity };
    }
    PrefilterOutcome::Candidates(ranked)
}
