//! Fine pass: 2-NN descriptor matching with a distance-ratio test, one vote
//! per good match, then the vote and shape vetoes.

use std::collections::HashMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::brain::ReferenceIndex;
use crate::config::{MatchStrategy, MatcherConfig, ResultConfig};
use crate::features::{correlation, hamming_distance, Descriptor, QuerySignals};
use crate::prefilter::Candidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    Low,
    Medium,
    High,
}

impl ConfidenceTier {
    pub fn from_votes(votes: usize, config: &ResultConfig) -> Self {
        if votes >= config.high_votes {
            ConfidenceTier::High
        } else if votes >= config.medium_votes {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }

    pub fn lowered(self) -> Self {
        match self {
            ConfidenceTier::High => ConfidenceTier::Medium,
            _ => ConfidenceTier::Low,
        }
    }
}

/// Vote counts, most votes first and ascending id among equals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoteTally {
    ranked: Vec<(u32, usize)>,
}

impl VoteTally {
    pub fn from_counts(counts: impl IntoIterator<Item = (u32, usize)>) -> Self {
        let mut ranked: Vec<(u32, usize)> = counts.into_iter().filter(|&(_, v)| v > 0).collect();
        ranked.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        Self { ranked }
    }

    pub fn winner(&self) -> Option<(u32, usize)> {
        self.ranked.first().copied()
    }

    pub fn ranked(&self) -> &[(u32, usize)] {
        &self.ranked
    }

    pub fn votes_for(&self, id: u32) -> usize {
        self.ranked
            .iter()
            .find(|(i, _)| *i == id)
            .map(|&(_, v)| v)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Match { id: u32, votes: usize },
    BelowVoteThreshold { best_votes: usize },
    ShapeVeto { id: u32, hash_distance: u32 },
    ColorVeto { id: u32, correlation: f32 },
}

#[derive(Debug, Clone)]
pub struct Verification {
    pub tally: VoteTally,
    pub verdict: Verdict,
}

pub struct VerificationMatcher<'a> {
    index: &'a ReferenceIndex,
    config: &'a MatcherConfig,
}

impl<'a> VerificationMatcher<'a> {
    pub fn new(index: &'a ReferenceIndex, config: &'a MatcherConfig) -> Self {
        Self { index, config }
    }

    pub fn tally(&self, query: &[Descriptor], candidates: &[Candidate]) -> VoteTally {
        match self.config.strategy {
            MatchStrategy::PerCandidate => self.per_candidate_votes(query, candidates),
            MatchStrategy::Pooled => self.pooled_votes(query, candidates),
        }
    }

    pub fn verify(&self, query: &QuerySignals, candidates: &[Candidate]) -> Verification {
        let tally = self.tally(&query.descriptors, candidates);
        let verdict = self.judge(query, &tally);
        Verification { tally, verdict }
    }

    fn judge(&self, query: &QuerySignals, tally: &VoteTally) -> Verdict {
        let (id, votes) = match tally.winner() {
            Some(w) if w.1 >= self.config.min_good_matches => w,
            other => {
                let best_votes = other.map(|w| w.1).unwrap_or(0);
                tracing::debug!(best_votes, min = self.config.min_good_matches, "below vote threshold");
                return Verdict::BelowVoteThreshold { best_votes };
            }
        };
        let Some(entry) = self.index.entry(id) else {
            return Verdict::BelowVoteThreshold { best_votes: 0 };
        };

        if let Some(max) = self.config.max_hash_distance {
            let hash_distance = query.phash.distance(entry.phash);
            if hash_distance > max {
                tracing::debug!(id, votes, hash_distance, max, "shape veto");
                return Verdict::ShapeVeto { id, hash_distance };
            }
        }
        if let Some(min) = self.config.min_winner_correlation {
            let corr = correlation(&query.histogram, &entry.histogram);
            if corr < min {
                tracing::debug!(id, votes, correlation = corr, min, "colour veto");
                return Verdict::ColorVeto { id, correlation: corr };
            }
        }
        Verdict::Match { id, votes }
    }

    /// Brute-force 2-NN inside each candidate's own descriptors, candidates
    /// in parallel.
    fn per_candidate_votes(&self, query: &[Descriptor], candidates: &[Candidate]) -> VoteTally {
        let counts: Vec<(u32, usize)> = candidates
            .par_iter()
            .map(|c| (c.id, self.good_matches(query, self.index.descriptors_of(c.id))))
            .collect();
        VoteTally::from_counts(counts)
    }

    fn good_matches(&self, query: &[Descriptor], reference: &[Descriptor]) -> usize {
        if reference.is_empty() {
            return 0;
        }
        query
            .iter()
            .filter(|q| {
                let (best, second) = two_nearest(q, reference);
                self.accept(best.1, second)
            })
            .count()
    }

    /// 2-NN over the whole pool; a good match votes only when its owner is
    /// one of the candidates.
    fn pooled_votes(&self, query: &[Descriptor], candidates: &[Candidate]) -> VoteTally {
        let pool = self.index.descriptor_pool();
        if pool.is_empty() {
            return VoteTally::default();
        }
        let mut allowed = vec![false; self.index.len()];
        for c in candidates {
            if let Some(slot) = allowed.get_mut(c.id as usize) {
                *slot = true;
            }
        }

        let owners: Vec<u32> = query
            .par_iter()
            .filter_map(|q| {
                let (best, second) = two_nearest(q, pool);
                if !self.accept(best.1, second) {
                    return None;
                }
                let owner = self.index.owner_of(best.0);
                allowed[owner as usize].then_some(owner)
            })
            .collect();

        let mut counts: HashMap<u32, usize> = HashMap::new();
        for owner in owners {
            *counts.entry(owner).or_insert(0) += 1;
        }
        VoteTally::from_counts(counts)
    }

    /// Ratio test. With a single reference descriptor there is no second
    /// neighbour, so the match stands on its absolute distance.
    fn accept(&self, best: u32, second: Option<u32>) -> bool {
        match second {
            Some(second) => (best as f32) < self.config.ratio * second as f32,
            None => best < self.config.lone_match_max_distance,
        }
    }
}

/// Nearest `(position, distance)` and the second-nearest distance.
fn two_nearest(query: &Descriptor, reference: &[Descriptor]) -> ((usize, u32), Option<u32>) {
    let mut best = (0usize, u32::MAX);
    let mut second: Option<u32> = None;
    for (i, r) in reference.iter().enumerate() {
        let d = hamming_distance(query, r);
        if d < best.1 {
            if i > 0 {
                second = Some(best.1);
            }
            best = (i, d);
        } else if second.map_or(true, |s| d < s) {
            second = Some(d);
        }
    }
    (best, second)
}
