use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SightError};

pub const ENV_BRAIN_PATH: &str = "AETHER_SIGHT_BRAIN";
pub const ENV_BRAIN_URL: &str = "AETHER_SIGHT_BRAIN_URL";
pub const ENV_TOP_K: &str = "AETHER_SIGHT_TOP_K";
pub const ENV_MIN_VOTES: &str = "AETHER_SIGHT_MIN_VOTES";
pub const ENV_RATIO: &str = "AETHER_SIGHT_RATIO";
pub const ENV_SCAN_LOG: &str = "AETHER_SIGHT_SCAN_LOG";

/// Every tunable threshold of the pipeline in one place.
///
/// All sections default, so an empty JSON object is a valid config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SightConfig {
    pub index: IndexConfig,
    pub normalizer: NormalizerConfig,
    pub extractor: ExtractorConfig,
    pub prefilter: PrefilterConfig,
    pub matcher: MatcherConfig,
    pub result: ResultConfig,
    /// JSON-lines file that receives successful identifications.
    pub scan_log: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub path: PathBuf,
    /// Where to fetch the artifact from when `path` does not exist.
    pub remote_url: Option<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("brain.bin"),
            remote_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Contour search runs on a copy no larger than this on its long side.
    pub detect_max_dim: u32,
    pub blur_sigma: f32,
    pub canny_low: f32,
    pub canny_high: f32,
    /// Quads smaller than this fraction of the frame are not cards.
    pub min_area_fraction: f64,
    /// Douglas-Peucker epsilon as a fraction of the contour perimeter.
    pub approx_epsilon: f64,
    pub default_box_scale: f32,
    /// Card height over width.
    pub card_aspect: f32,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            detect_max_dim: 800,
            blur_sigma: 1.1,
            canny_low: 75.0,
            canny_high: 200.0,
            min_area_fraction: 0.05,
            approx_epsilon: 0.02,
            default_box_scale: 0.3,
            card_aspect: 88.0 / 63.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub canonical_width: u32,
    pub canonical_height: u32,
    pub center_crop_ratio: f32,
    /// Hue, saturation and value bin counts of the joint histogram.
    pub hist_bins: [usize; 3],
    pub clahe_tiles: u32,
    pub clahe_clip: f32,
    pub max_keypoints: usize,
    pub pyramid_levels: u32,
    pub pyramid_scale: f32,
    pub fast_threshold: u8,
    pub nms_radius: u32,
    pub min_mean_intensity: f32,
    pub min_intensity_stddev: f32,
    pub min_region_side: u32,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            canonical_width: 336,
            canonical_height: 468,
            center_crop_ratio: 0.5,
            hist_bins: [8, 12, 3],
            clahe_tiles: 8,
            clahe_clip: 2.0,
            max_keypoints: 500,
            pyramid_levels: 3,
            pyramid_scale: 1.2,
            fast_threshold: 20,
            nms_radius: 3,
            min_mean_intensity: 12.0,
            min_intensity_stddev: 4.0,
            min_region_side: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefilterConfig {
    pub top_k: usize,
    /// Best histogram correlation below this rejects the request outright.
    pub min_correlation: f32,
}

impl Default for PrefilterConfig {
    fn default() -> Self {
        Self {
            top_k: 500,
            min_correlation: 0.15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Brute-force 2-NN inside each candidate's own descriptors.
    #[default]
    PerCandidate,
    /// 2-NN over the whole descriptor pool, votes kept for candidates only.
    Pooled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub strategy: MatchStrategy,
    pub ratio: f32,
    /// A candidate with a single descriptor has no second neighbour; its
    /// lone match counts when closer than this.
    pub lone_match_max_distance: u32,
    pub min_good_matches: usize,
    pub max_hash_distance: Option<u32>,
    pub min_winner_correlation: Option<f32>,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            strategy: MatchStrategy::PerCandidate,
            ratio: 0.75,
            lone_match_max_distance: 50,
            min_good_matches: 12,
            max_hash_distance: Some(22),
            min_winner_correlation: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultConfig {
    pub high_votes: usize,
    pub medium_votes: usize,
    pub runner_up_count: usize,
    /// Drop the tier one step when the card was not rectified from a contour.
    pub discount_unrectified: bool,
}

impl Default for ResultConfig {
    fn default() -> Self {
        Self {
            high_votes: 40,
            medium_votes: 20,
            runner_up_count: 5,
            discount_unrectified: false,
        }
    }
}

impl SightConfig {
    /// Reads `path` if given, applies environment overrides, then validates.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, |name| std::env::var(name).ok())
    }

    /// `load` with an explicit variable lookup in place of the process
    /// environment.
    pub fn load_with(path: Option<&Path>, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p).map_err(|e| SightError::io(p, e))?;
                serde_json::from_str::<SightConfig>(&raw).map_err(|e| {
                    SightError::InvalidConfig(format!("{}: {}", p.display(), e))
                })?
            }
            None => SightConfig::default(),
        };
        config.apply_overrides(lookup);
        config.validate()?;
        Ok(config)
    }

    /// Unset, empty and unusable values leave the current setting alone; an
    /// unusable value is logged.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = read_non_empty(&lookup, ENV_BRAIN_PATH) {
            self.index.path = PathBuf::from(path);
        }
        if let Some(url) = read_non_empty(&lookup, ENV_BRAIN_URL) {
            self.index.remote_url = Some(url);
        }
        self.prefilter.top_k = read_usize(&lookup, ENV_TOP_K, self.prefilter.top_k, 1);
        self.matcher.min_good_matches =
            read_usize(&lookup, ENV_MIN_VOTES, self.matcher.min_good_matches, 1);
        self.matcher.ratio = read_ratio(&lookup, ENV_RATIO, self.matcher.ratio);
        if let Some(path) = read_non_empty(&lookup, ENV_SCAN_LOG) {
            self.scan_log = Some(PathBuf::from(path));
        }
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(SightError::InvalidConfig(msg));

        if !(self.matcher.ratio > 0.0 && self.matcher.ratio < 1.0) {
            return fail(format!("matcher.ratio must be in (0, 1), got {}", self.matcher.ratio));
        }
        if self.matcher.min_good_matches == 0 {
            return fail("matcher.min_good_matches must be at least 1".into());
        }
        if self.prefilter.top_k == 0 {
            return fail("prefilter.top_k must be at least 1".into());
        }
        let crop = self.extractor.center_crop_ratio;
        if !(crop > 0.0 && crop <= 1.0) {
            return fail(format!("extractor.center_crop_ratio must be in (0, 1], got {}", crop));
        }
        if self.extractor.canonical_width < 64 || self.extractor.canonical_height < 64 {
            return fail("extractor canonical size must be at least 64x64".into());
        }
        if self.extractor.hist_bins.iter().any(|&b| b == 0) {
            return fail("extractor.hist_bins must all be non-zero".into());
        }
        if self.extractor.pyramid_levels == 0 || self.extractor.pyramid_scale <= 1.0 {
            return fail("extractor pyramid needs at least one level and a scale above 1".into());
        }
        if self.result.medium_votes > self.result.high_votes {
            return fail(format!(
                "result tiers out of order: medium {} > high {}",
                self.result.medium_votes, self.result.high_votes
            ));
        }
        if self.normalizer.card_aspect <= 0.0 || self.normalizer.default_box_scale <= 0.0 {
            return fail("normalizer card_aspect and default_box_scale must be positive".into());
        }
        Ok(())
    }
}

fn read_non_empty(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name)
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_usize(lookup: &impl Fn(&str) -> Option<String>, name: &str, current: usize, min_value: usize) -> usize {
    let Some(raw) = read_non_empty(lookup, name) else {
        return current;
    };
    match raw.parse::<usize>() {
        Ok(value) if value >= min_value => value,
        _ => {
            tracing::warn!(name, value = %raw, min_value, "ignoring override");
            current
        }
    }
}

fn read_ratio(lookup: &impl Fn(&str) -> Option<String>, name: &str, current: f32) -> f32 {
    let Some(raw) = read_non_empty(lookup, name) else {
        return current;
    };
    match raw.parse::<f32>() {
        Ok(value) if value > 0.0 && value < 1.0 => value,
        _ => {
            tracing::warn!(name, value = %raw, "ignoring override, ratio must be in (0, 1)");
            current
        }
    }
}
