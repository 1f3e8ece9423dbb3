//! Oriented FAST keypoints with rotated BRIEF descriptors.

use image::imageops::{self, FilterType};
use image::GrayImage;
use imageproc::corners::{corners_fast9, Corner};
use imageproc::filter::gaussian_blur_f32;

use crate::config::ExtractorConfig;

/// 256-bit binary descriptor.
pub type Descriptor = [u8; 32];

/// Keypoints closer than this to the border of their pyramid level are
/// dropped, so every rotated test pair stays inside the image.
const EDGE: u32 = 16;
const HALF_PATCH: i32 = 15;
const PATTERN_RADIUS: i32 = 12;
const SMOOTH_SIGMA: f32 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    /// Position in level-0 pixel coordinates.
    pub x: f32,
    pub y: f32,
    /// Orientation in radians.
    pub angle: f32,
    pub response: f32,
    pub level: u32,
}

pub struct OrbExtractor {
    pattern: Vec<[(i32, i32); 2]>,
    max_keypoints: usize,
    levels: u32,
    scale: f32,
    threshold: u8,
    nms_radius: u32,
}

impl OrbExtractor {
    pub fn new(config: &ExtractorConfig) -> Self {
        Self {
            pattern: sampling_pattern(),
            max_keypoints: config.max_keypoints,
            levels: config.pyramid_levels.max(1),
            scale: config.pyramid_scale,
            threshold: config.fast_threshold,
            nms_radius: config.nms_radius,
        }
    }

    /// Keypoint budget for each pyramid level, shrinking geometrically with
    /// the level area.
    fn level_quotas(&self) -> Vec<usize> {
        let factor = 1.0 / self.scale as f64;
        let levels = self.levels as i32;
        let first = self.max_keypoints as f64 * (1.0 - factor) / (1.0 - factor.powi(levels));
        let mut quotas = Vec::with_capacity(self.levels as usize);
        let mut assigned = 0usize;
        for level in 0..levels - 1 {
            let q = (first * factor.powi(level)).round() as usize;
            quotas.push(q);
            assigned += q;
        }
        quotas.push(self.max_keypoints.saturating_sub(assigned));
        quotas
    }

    pub fn detect_and_compute(&self, gray: &GrayImage) -> Vec<(Keypoint, Descriptor)> {
        let (w0, h0) = gray.dimensions();
        let mut features = Vec::with_capacity(self.max_keypoints);

        for (level, quota) in self.level_quotas().into_iter().enumerate() {
            let level_scale = self.scale.powi(level as i32);
            let lw = (w0 as f32 / level_scale).round() as u32;
            let lh = (h0 as f32 / level_scale).round() as u32;
            if lw < 2 * EDGE + 1 || lh < 2 * EDGE + 1 || quota == 0 {
                continue;
            }
            let level_img = if level == 0 {
                gray.clone()
            } else {
                imageops::resize(gray, lw, lh, FilterType::Triangle)
            };

            let mut corners = corners_fast9(&level_img, self.threshold);
            corners.retain(|c| c.x >= EDGE && c.y >= EDGE && c.x < lw - EDGE && c.y < lh - EDGE);
            corners.sort_by(|a, b| b.score.total_cmp(&a.score).then((a.y, a.x).cmp(&(b.y, b.x))));
            let kept = suppress_non_maxima(&corners, lw, lh, self.nms_radius, quota);
            if kept.is_empty() {
                continue;
            }

            let smoothed = gaussian_blur_f32(&level_img, SMOOTH_SIGMA);
            for corner in kept {
                let angle = intensity_centroid_angle(&level_img, corner.x, corner.y);
                let desc = self.describe(&smoothed, corner.x, corner.y, angle);
                features.push((
                    Keypoint {
                        x: corner.x as f32 * level_scale,
                        y: corner.y as f32 * level_scale,
                        angle,
                        response: corner.score,
                        level: level as u32,
                    },
                    desc,
                ));
            }
        }
        features
    }

    /// Steered BRIEF: the sampling pattern is rotated to the keypoint angle
    /// before the intensity comparisons.
    fn describe(&self, smoothed: &GrayImage, x: u32, y: u32, angle: f32) -> Descriptor {
        let (sin, cos) = angle.sin_cos();
        let at = |(px, py): (i32, i32)| {
            let rx = (cos * px as f32 - sin * py as f32).round() as i32;
            let ry = (sin * px as f32 + cos * py as f32).round() as i32;
            smoothed.get_pixel((x as i32 + rx) as u32, (y as i32 + ry) as u32)[0]
        };

        let mut desc = [0u8; 32];
        for (i, [p, q]) in self.pattern.iter().enumerate() {
            if at(*p) < at(*q) {
                desc[i / 8] |= 1 << (i % 8);
            }
        }
        desc
    }
}

/// Greedy suppression over corners sorted by descending score; a corner is
/// kept only when no stronger kept corner lies within `radius`.
fn suppress_non_maxima(corners: &[Corner], w: u32, h: u32, radius: u32, limit: usize) -> Vec<Corner> {
    let mut taken = vec![false; (w * h) as usize];
    let mut kept = Vec::with_capacity(limit.min(corners.len()));
    for c in corners {
        if kept.len() >= limit {
            break;
        }
        if taken[(c.y * w + c.x) as usize] {
            continue;
        }
        let y0 = c.y.saturating_sub(radius);
        let y1 = (c.y + radius).min(h - 1);
        let x0 = c.x.saturating_sub(radius);
        let x1 = (c.x + radius).min(w - 1);
        for yy in y0..=y1 {
            for xx in x0..=x1 {
                taken[(yy * w + xx) as usize] = true;
            }
        }
        kept.push(*c);
    }
    kept
}

/// Angle from the patch centre to its intensity centroid.
fn intensity_centroid_angle(img: &GrayImage, x: u32, y: u32) -> f32 {
    let mut m01 = 0i64;
    let mut m10 = 0i64;
    for dy in -HALF_PATCH..=HALF_PATCH {
        let span = ((HALF_PATCH * HALF_PATCH - dy * dy) as f32).sqrt() as i32;
        for dx in -span..=span {
            let v = img.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)[0] as i64;
            m10 += dx as i64 * v;
            m01 += dy as i64 * v;
        }
    }
    (m01 as f32).atan2(m10 as f32)
}

/// Fixed pseudo-random test pairs inside a disc; the same seed on every run
/// keeps descriptors in old index files comparable with new queries.
fn sampling_pattern() -> Vec<[(i32, i32); 2]> {
    let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
    let mut next = move || {
        // splitmix64
        state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    };
    let span = (2 * PATTERN_RADIUS + 1) as u64;
    let mut point = move || loop {
        let px = (next() % span) as i32 - PATTERN_RADIUS;
        let py = (next() % span) as i32 - PATTERN_RADIUS;
        if px * px + py * py <= PATTERN_RADIUS * PATTERN_RADIUS {
            return (px, py);
        }
    };

    let mut pattern = Vec::with_capacity(256);
    while pattern.len() < 256 {
        let p = point();
        let q = point();
        if p != q {
            pattern.push([p, q]);
        }
    }
    pattern
}

pub fn hamming_distance(a: &Descriptor, b: &Descriptor) -> u32 {
    let mut dist = 0;
    for i in 0..32 {
        dist += (a[i] ^ b[i]).count_ones();
    }
    dist
}
