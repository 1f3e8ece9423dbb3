//! Identifies a trading card in a photo by matching it against a
//! precompiled reference index of card artwork.
//!
//! The flow is coarse to fine: the frame is rectified, a colour histogram
//! picks the top candidates, and ORB descriptor votes decide among them.

pub mod bootstrap;
pub mod brain;
pub mod catalog;
pub mod config;
pub mod error;
pub mod features;
pub mod geometry;
pub mod matcher;
pub mod pipeline;
pub mod prefilter;
pub mod result;
pub mod scope;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod test_utils;

pub use brain::{CardMetadata, ExtractorSignature, IndexBuilder, ReferenceEntry, ReferenceIndex};
pub use config::SightConfig;
pub use error::{Result, SightError};
pub use features::{DegenerateCause, FeatureExtractor, QuerySignals};
pub use geometry::{FocusPoint, NormalizeMode, Rectification};
pub use matcher::ConfidenceTier;
pub use pipeline::{decode_image, AnalyzeRequest, CardIdentifier, Session};
pub use result::{MatchResult, NoMatchReason, RunnerUp};
pub use scope::{parse_scope_list, ActiveScope};
