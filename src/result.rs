use serde::{Deserialize, Serialize};

use crate::brain::{CardMetadata, ReferenceIndex};
use crate::config::ResultConfig;
use crate::features::DegenerateCause;
use crate::geometry::Rectification;
use crate::matcher::{ConfidenceTier, VoteTally};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerUp {
    pub id: u32,
    pub name: String,
    pub set_code: String,
    pub vote_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoMatchReason {
    /// Histogram veto: nothing in the index looks remotely like the query.
    NoPlausibleCandidate { best_similarity: f32 },
    NoDescriptors,
    BelowVoteThreshold { best_votes: usize },
    ShapeVeto { id: u32, hash_distance: u32 },
    ColorVeto { id: u32, correlation: f32 },
}

/// Outcome of one identification request. Negative outcomes are values,
/// not errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MatchResult {
    Matched {
        id: u32,
        name: String,
        set_code: String,
        metadata: CardMetadata,
        vote_count: usize,
        confidence_tier: ConfidenceTier,
        rectification: Rectification,
        runner_ups: Vec<RunnerUp>,
    },
    NoMatch {
        reason: NoMatchReason,
        rectification: Rectification,
        runner_ups: Vec<RunnerUp>,
    },
    DegenerateInput {
        cause: DegenerateCause,
    },
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchResult::Matched { .. })
    }

    pub fn matched_id(&self) -> Option<u32> {
        match self {
            MatchResult::Matched { id, .. } => Some(*id),
            _ => None,
        }
    }

    pub fn vote_count(&self) -> usize {
        match self {
            MatchResult::Matched { vote_count, .. } => *vote_count,
            _ => 0,
        }
    }

    pub fn runner_ups(&self) -> &[RunnerUp] {
        match self {
            MatchResult::Matched { runner_ups, .. } | MatchResult::NoMatch { runner_ups, .. } => runner_ups,
            MatchResult::DegenerateInput { .. } => &[],
        }
    }
}

pub struct ResultAssembler<'a> {
    index: &'a ReferenceIndex,
    config: &'a ResultConfig,
}

impl<'a> ResultAssembler<'a> {
    pub fn new(index: &'a ReferenceIndex, config: &'a ResultConfig) -> Self {
        Self { index, config }
    }

    pub fn matched(&self, id: u32, votes: usize, tally: &VoteTally, rectification: Rectification) -> MatchResult {
        let mut tier = ConfidenceTier::from_votes(votes, self.config);
        if self.config.discount_unrectified && rectification != Rectification::Contour {
            tier = tier.lowered();
        }
        let (name, set_code, metadata) = match self.index.entry(id) {
            Some(e) => (e.name.clone(), e.set_code.clone(), e.metadata.clone()),
            None => (String::new(), String::new(), CardMetadata::default()),
        };
        MatchResult::Matched {
            id,
            name,
            set_code,
            metadata,
            vote_count: votes,
            confidence_tier: tier,
            rectification,
            runner_ups: self.runner_ups(tally, Some(id)),
        }
    }

    pub fn no_match(&self, reason: NoMatchReason, tally: Option<&VoteTally>, rectification: Rectification) -> MatchResult {
        MatchResult::NoMatch {
            reason,
            rectification,
            runner_ups: tally.map(|t| self.runner_ups(t, None)).unwrap_or_default(),
        }
    }

    /// Top entries by votes, descending, without the winner.
    fn runner_ups(&self, tally: &VoteTally, winner: Option<u32>) -> Vec<RunnerUp> {
        tally
            .ranked()
            .iter()
            .filter(|(id, _)| Some(*id) != winner)
            .filter_map(|&(id, votes)| {
                self.index.entry(id).map(|e| RunnerUp {
                    id,
                    name: e.name.clone(),
                    set_code: e.set_code.clone(),
                    vote_count: votes,
                })
            })
            .take(self.config.runner_up_count)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{index_builder, random_descriptors, signals_with};

    fn index_of(n: u32) -> ReferenceIndex {
        let mut builder = index_builder(1);
        for i in 0..n {
            builder.push(format!("card {}", i), "tst", signals_with(vec![1.0], random_descriptors(1, i as u64)), CardMetadata::default());
        }
        builder.finish().unwrap()
    }

    #[test]
    fn runner_ups_are_sorted_truncated_and_exclude_winner() {
        let index = index_of(8);
        let config = ResultConfig {
            runner_up_count: 3,
            ..ResultConfig::default()
        };
        let tally = VoteTally::from_counts((0..8).map(|i| (i, 10 + i as usize)));
        let result = ResultAssembler::new(&index, &config).matched(7, 17, &tally, Rectification::Contour);
        let votes: Vec<usize> = result.runner_ups().iter().map(|r| r.vote_count).collect();
        assert_eq!(votes, vec![16, 15, 14]);
        assert!(result.runner_ups().iter().all(|r| r.id != 7));
        assert!(result.is_match());
        assert_eq!(result.matched_id(), Some(7));
    }

    #[test]
    fn unrectified_discount_is_opt_in() {
        let index = index_of(1);
        let tally = VoteTally::from_counts(vec![(0, 45)]);

        let plain = ResultConfig::default();
        let r = ResultAssembler::new(&index, &plain).matched(0, 45, &tally, Rectification::Passthrough);
        assert!(matches!(r, MatchResult::Matched { confidence_tier: ConfidenceTier::High, .. }));

        let discounting = ResultConfig {
            discount_unrectified: true,
            ..ResultConfig::default()
        };
        let r = ResultAssembler::new(&index, &discounting).matched(0, 45, &tally, Rectification::Passthrough);
        assert!(matches!(r, MatchResult::Matched { confidence_tier: ConfidenceTier::Medium, .. }));
        let r = ResultAssembler::new(&index, &discounting).matched(0, 45, &tally, Rectification::Contour);
        assert!(matches!(r, MatchResult::Matched { confidence_tier: ConfidenceTier::High, .. }));
    }

    #[test]
    fn serializes_as_tagged_record() {
        let index = index_of(2);
        let config = ResultConfig::default();
        let tally = VoteTally::from_counts(vec![(1, 4)]);
        let r = ResultAssembler::new(&index, &config).no_match(
            NoMatchReason::BelowVoteThreshold { best_votes: 4 },
            Some(&tally),
            Rectification::PointBox,
        );
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["outcome"], "no_match");
        assert_eq!(json["reason"]["kind"], "below_vote_threshold");
        assert_eq!(json["rectification"], "point_box");
        assert_eq!(json["runner_ups"][0]["name"], "card 1");

        let degenerate = MatchResult::DegenerateInput { cause: DegenerateCause::TooDark };
        assert_eq!(serde_json::to_value(&degenerate).unwrap()["cause"], "too_dark");
        assert!(!degenerate.is_match());
    }
}
