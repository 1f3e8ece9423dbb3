//! Query and reference signals: colour histogram, ORB descriptors, pHash.
//!
//! Reference images and query crops go through exactly the same
//! canonicalization so their signals are comparable.

pub mod histogram;
pub mod orb;
pub mod phash;

use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::config::ExtractorConfig;

pub use histogram::correlation;
pub use orb::{hamming_distance, Descriptor, Keypoint, OrbExtractor};
pub use phash::PerceptualHash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegenerateCause {
    TooSmall,
    TooDark,
    Uniform,
}

/// Everything the matcher needs from one image.
#[derive(Debug, Clone)]
pub struct QuerySignals {
    pub histogram: Vec<f32>,
    pub descriptors: Vec<Descriptor>,
    pub phash: PerceptualHash,
}

pub struct FeatureExtractor {
    config: ExtractorConfig,
    orb: OrbExtractor,
}

impl FeatureExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        let orb = OrbExtractor::new(&config);
        Self { config, orb }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Cheap sanity check on the normalized card before any extraction.
    pub fn check_degenerate(&self, image: &RgbImage) -> Option<DegenerateCause> {
        let (w, h) = image.dimensions();
        if w.min(h) < self.config.min_region_side {
            return Some(DegenerateCause::TooSmall);
        }

        let n = (w as f64) * (h as f64);
        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        for p in image.pixels() {
            let luma = 0.299 * p[0] as f64 + 0.587 * p[1] as f64 + 0.114 * p[2] as f64;
            sum += luma;
            sum_sq += luma * luma;
        }
        let mean = sum / n;
        let stddev = (sum_sq / n - mean * mean).max(0.0).sqrt();

        if mean < self.config.min_mean_intensity as f64 {
            Some(DegenerateCause::TooDark)
        } else if stddev < self.config.min_intensity_stddev as f64 {
            Some(DegenerateCause::Uniform)
        } else {
            None
        }
    }

    /// Resize to the canonical card size, then keep the centred artwork
    /// region.
    pub fn canonical_region(&self, image: &RgbImage) -> RgbImage {
        let cw = self.config.canonical_width;
        let ch = self.config.canonical_height;
        let canonical = if image.dimensions() == (cw, ch) {
            image.clone()
        } else {
            imageops::resize(image, cw, ch, FilterType::Triangle)
        };

        let ratio = self.config.center_crop_ratio.clamp(0.05, 1.0);
        let rw = ((cw as f32 * ratio).round() as u32).max(1);
        let rh = ((ch as f32 * ratio).round() as u32).max(1);
        let x = (cw - rw) / 2;
        let y = (ch - rh) / 2;
        imageops::crop_imm(&canonical, x, y, rw, rh).to_image()
    }

    pub fn histogram(&self, region: &RgbImage) -> Vec<f32> {
        histogram::hsv_histogram(
            region,
            self.config.hist_bins,
            self.config.clahe_tiles,
            self.config.clahe_clip,
        )
    }

    pub fn descriptors(&self, region: &RgbImage) -> Vec<Descriptor> {
        let gray = imageops::grayscale(region);
        self.orb
            .detect_and_compute(&gray)
            .into_iter()
            .map(|(_, desc)| desc)
            .collect()
    }

    pub fn phash(&self, region: &RgbImage) -> PerceptualHash {
        PerceptualHash::compute(region)
    }

    /// All three signals of an already-normalized card image.
    pub fn extract(&self, image: &RgbImage) -> Result<QuerySignals, DegenerateCause> {
        if let Some(cause) = self.check_degenerate(image) {
            return Err(cause);
        }
        let region = self.canonical_region(image);
        Ok(QuerySignals {
            histogram: self.histogram(&region),
            descriptors: self.descriptors(&region),
            phash: self.phash(&region),
        })
    }

    pub fn histogram_len(&self) -> usize {
        self.config.hist_bins.iter().product()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatcherConfig;
    use crate::test_utils::{block_texture, tinted_card};
    use image::Rgb;

    fn extractor() -> FeatureExtractor {
        FeatureExtractor::new(ExtractorConfig::default())
    }

    #[test]
    fn small_gray_is_degenerate() {
        let img = RgbImage::from_pixel(10, 10, Rgb([128, 128, 128]));
        assert_eq!(extractor().check_degenerate(&img), Some(DegenerateCause::TooSmall));
    }

    #[test]
    fn black_and_flat_are_degenerate() {
        let black = RgbImage::from_pixel(200, 280, Rgb([0, 0, 0]));
        let flat = RgbImage::from_pixel(200, 280, Rgb([128, 128, 128]));
        assert_eq!(extractor().check_degenerate(&black), Some(DegenerateCause::TooDark));
        assert_eq!(extractor().check_degenerate(&flat), Some(DegenerateCause::Uniform));
        assert!(matches!(extractor().extract(&flat), Err(DegenerateCause::Uniform)));
    }

    #[test]
    fn canonical_region_is_centre_crop() {
        let region = extractor().canonical_region(&block_texture(100, 140, 1));
        assert_eq!(region.dimensions(), (168, 234));
    }

    #[test]
    fn extraction_is_deterministic() {
        let card = tinted_card(252, 351, 4, [200, 60, 40]);
        let ex = extractor();
        let a = ex.extract(&card).unwrap();
        let b = ex.extract(&card).unwrap();
        assert_eq!(a.histogram.len(), ex.histogram_len());
        assert!(!a.descriptors.is_empty());
        assert_eq!(a.descriptors, b.descriptors);
        assert_eq!(a.phash, b.phash);
    }

    /// Query descriptors whose nearest reference neighbour passes the ratio
    /// test.
    fn ratio_matches(query: &[Descriptor], reference: &[Descriptor], ratio: f32) -> usize {
        query
            .iter()
            .filter(|q| {
                let mut best = u32::MAX;
                let mut second = u32::MAX;
                for r in reference {
                    let d = hamming_distance(q, r);
                    if d < best {
                        second = best;
                        best = d;
                    } else if d < second {
                        second = d;
                    }
                }
                (best as f32) < ratio * second as f32
            })
            .count()
    }

    #[test]
    fn descriptors_survive_rotation() {
        let ex = extractor();
        let region = ex.canonical_region(&block_texture(336, 468, 11));
        let reference = ex.descriptors(&region);
        let matcher = MatcherConfig::default();

        for (label, rotated) in [
            ("rot180", imageops::rotate180(&region)),
            ("rot90", imageops::rotate90(&region)),
        ] {
            let query = ex.descriptors(&rotated);
            let good = ratio_matches(&query, &reference, matcher.ratio);
            assert!(
                good > matcher.min_good_matches,
                "{}: {} of {} passed the ratio test",
                label,
                good,
                query.len()
            );
        }
    }
}
