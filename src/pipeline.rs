//! The identification pipeline: normalize, extract, prefilter, verify,
//! assemble. Every decodable image produces a [`MatchResult`].

use std::sync::Arc;
use std::time::Instant;

use image::RgbImage;

use crate::brain::ReferenceIndex;
use crate::config::SightConfig;
use crate::error::{Result, SightError};
use crate::features::{FeatureExtractor, QuerySignals};
use crate::geometry::{FocusPoint, NormalizeMode, NormalizedImage, Normalizer, Rectification};
use crate::matcher::{Verdict, VerificationMatcher};
use crate::prefilter::{select_candidates, Candidate, PrefilterOutcome};
use crate::result::{MatchResult, NoMatchReason, ResultAssembler};
use crate::scope::{parse_scope_list, ActiveScope, ScopeHandle};
use crate::telemetry::{MatchObserver, NullObserver};

#[derive(Debug, Clone)]
pub struct AnalyzeRequest {
    pub image: RgbImage,
    pub focus: Option<FocusPoint>,
    pub box_scale: Option<f32>,
    pub mode: NormalizeMode,
    /// Scope for this request only; overrides the session scope.
    pub scope_names: Option<Vec<String>>,
}

impl AnalyzeRequest {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            focus: None,
            box_scale: None,
            mode: NormalizeMode::default(),
            scope_names: None,
        }
    }

    pub fn with_mode(mut self, mode: NormalizeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_focus(mut self, focus: FocusPoint, box_scale: Option<f32>) -> Self {
        self.focus = Some(focus);
        self.box_scale = box_scale;
        self
    }

    pub fn with_scope(mut self, names: Vec<String>) -> Self {
        self.scope_names = Some(names);
        self
    }
}

/// Decodes transport bytes. Failure is a client fault and never reaches
/// the pipeline.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgb8())
        .map_err(|e| SightError::MalformedImage(e.to_string()))
}

pub struct CardIdentifier {
    index: Arc<ReferenceIndex>,
    config: SightConfig,
    normalizer: Normalizer,
    extractor: FeatureExtractor,
}

impl CardIdentifier {
    /// Fails when the config is invalid or its extractor settings do not
    /// match the ones the index was compiled with.
    pub fn new(index: Arc<ReferenceIndex>, config: SightConfig) -> Result<Self> {
        config.validate()?;
        index.check_extractor(&config.extractor)?;
        let normalizer = Normalizer::new(config.normalizer.clone());
        let extractor = FeatureExtractor::new(config.extractor.clone());
        Ok(Self {
            index,
            config,
            normalizer,
            extractor,
        })
    }

    pub fn index(&self) -> &ReferenceIndex {
        &self.index
    }

    pub fn config(&self) -> &SightConfig {
        &self.config
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    pub fn identify(&self, request: &AnalyzeRequest, scope: Option<&ActiveScope>) -> MatchResult {
        let request_scope = request
            .scope_names
            .as_ref()
            .filter(|names| !names.is_empty())
            .map(|names| ActiveScope::resolve(&self.index, names));
        let scope = request_scope.as_ref().or(scope);

        let t = Instant::now();
        let normalized = self
            .normalizer
            .normalize(&request.image, request.mode, request.focus, request.box_scale);
        tracing::debug!(
            elapsed_us = t.elapsed().as_micros() as u64,
            rectification = ?normalized.rectification,
            "normalize"
        );
        self.identify_normalized(&normalized, scope)
    }

    /// Runs on an already normalized card. The histogram veto is checked
    /// before descriptors are extracted, so clearly wrong input never pays
    /// for keypoint detection.
    pub fn identify_normalized(&self, normalized: &NormalizedImage, scope: Option<&ActiveScope>) -> MatchResult {
        let rectification = normalized.rectification;
        let assembler = ResultAssembler::new(&self.index, &self.config.result);

        if let Some(cause) = self.extractor.check_degenerate(&normalized.image) {
            tracing::debug!(?cause, "degenerate input");
            return MatchResult::DegenerateInput { cause };
        }

        let t = Instant::now();
        let region = self.extractor.canonical_region(&normalized.image);
        let histogram = self.extractor.histogram(&region);
        let candidates = match select_candidates(&self.index, &histogram, scope, &self.config.prefilter) {
            PrefilterOutcome::Candidates(c) => c,
            PrefilterOutcome::Rejected { best_similarity } => {
                return assembler.no_match(
                    NoMatchReason::NoPlausibleCandidate { best_similarity },
                    None,
                    rectification,
                );
            }
        };
        tracing::debug!(
            elapsed_us = t.elapsed().as_micros() as u64,
            candidates = candidates.len(),
            "prefilter"
        );

        let t = Instant::now();
        let descriptors = self.extractor.descriptors(&region);
        if descriptors.is_empty() {
            return assembler.no_match(NoMatchReason::NoDescriptors, None, rectification);
        }
        let signals = QuerySignals {
            histogram,
            descriptors,
            phash: self.extractor.phash(&region),
        };
        tracing::debug!(
            elapsed_us = t.elapsed().as_micros() as u64,
            descriptors = signals.descriptors.len(),
            "extract"
        );

        self.verify(&signals, &candidates, rectification)
    }

    /// Prefilter and verification on signals extracted elsewhere.
    pub fn identify_signals(
        &self,
        signals: &QuerySignals,
        rectification: Rectification,
        scope: Option<&ActiveScope>,
    ) -> MatchResult {
        let assembler = ResultAssembler::new(&self.index, &self.config.result);
        let candidates = match select_candidates(&self.index, &signals.histogram, scope, &self.config.prefilter) {
            PrefilterOutcome::Candidates(c) => c,
            PrefilterOutcome::Rejected { best_similarity } => {
                return assembler.no_match(
                    NoMatchReason::NoPlausibleCandidate { best_similarity },
                    None,
                    rectification,
                );
            }
        };
        if signals.descriptors.is_empty() {
            return assembler.no_match(NoMatchReason::NoDescriptors, None, rectification);
        }
        self.verify(signals, &candidates, rectification)
    }

    fn verify(&self, signals: &QuerySignals, candidates: &[Candidate], rectification: Rectification) -> MatchResult {
        let t = Instant::now();
        let matcher = VerificationMatcher::new(&self.index, &self.config.matcher);
        let verification = matcher.verify(signals, candidates);
        tracing::debug!(
            elapsed_us = t.elapsed().as_micros() as u64,
            verdict = ?verification.verdict,
            "verify"
        );

        let assembler = ResultAssembler::new(&self.index, &self.config.result);
        let tally = &verification.tally;
        match verification.verdict {
            Verdict::Match { id, votes } => assembler.matched(id, votes, tally, rectification),
            Verdict::BelowVoteThreshold { best_votes } => assembler.no_match(
                NoMatchReason::BelowVoteThreshold { best_votes },
                Some(tally),
                rectification,
            ),
            Verdict::ShapeVeto { id, hash_distance } => assembler.no_match(
                NoMatchReason::ShapeVeto { id, hash_distance },
                Some(tally),
                rectification,
            ),
            Verdict::ColorVeto { id, correlation } => assembler.no_match(
                NoMatchReason::ColorVeto { id, correlation },
                Some(tally),
                rectification,
            ),
        }
    }
}

/// A long-lived context: one identifier, the mutable session scope and an
/// outcome observer.
pub struct Session {
    identifier: CardIdentifier,
    scope: ScopeHandle,
    observer: Box<dyn MatchObserver>,
}

impl Session {
    pub fn new(identifier: CardIdentifier) -> Self {
        Self {
            identifier,
            scope: ScopeHandle::new(),
            observer: Box::new(NullObserver),
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn MatchObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn identifier(&self) -> &CardIdentifier {
        &self.identifier
    }

    pub fn analyze(&self, request: &AnalyzeRequest) -> MatchResult {
        let t = Instant::now();
        let scope = self.scope.snapshot();
        let result = self.identifier.identify(request, scope.as_deref());
        tracing::debug!(
            elapsed_ms = t.elapsed().as_millis() as u64,
            matched = result.is_match(),
            "analyze"
        );
        self.observer.record(&result);
        result
    }

    /// Replaces the session scope with the names in `text`; an empty list
    /// clears it. Returns the number of index entries now in scope.
    pub fn load_scope(&self, text: &str) -> usize {
        let names = parse_scope_list(text);
        if names.is_empty() {
            self.scope.clear();
            tracing::info!(scope_size = 0, "scope cleared");
            return 0;
        }
        let scope = ActiveScope::resolve(self.identifier.index(), &names);
        if !scope.unresolved().is_empty() {
            tracing::warn!(unresolved = ?scope.unresolved(), "scope names not in index");
        }
        let size = self.scope.replace(scope).len();
        tracing::info!(names = names.len(), scope_size = size, "scope loaded");
        size
    }

    pub fn clear_scope(&self) {
        self.scope.clear();
    }

    pub fn scope(&self) -> Option<Arc<ActiveScope>> {
        self.scope.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_bytes_are_a_client_fault() {
        let err = decode_image(b"definitely not a png").unwrap_err();
        assert!(err.is_client_fault());
    }

    #[test]
    fn png_bytes_decode() {
        let img = RgbImage::from_pixel(4, 3, image::Rgb([1, 2, 3]));
        let mut bytes = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        assert_eq!(decode_image(&bytes).unwrap().dimensions(), (4, 3));
    }
}
