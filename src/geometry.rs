//! Geometric normalization: find the card in a raw frame and bring it to a
//! fronto-parallel rectangle.
//!
//! Nothing in here fails. When no card-shaped quad is found the frame is
//! passed through untouched and the [`Rectification`] tag says so.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::point::Point;
use serde::{Deserialize, Serialize};

use crate::config::NormalizerConfig;

pub type Corner = (f32, f32);

/// How the caller wants the frame normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizeMode {
    /// Contour search, falling back to the raw frame.
    #[default]
    Auto,
    /// Fixed-aspect box around a focus point.
    PointBox,
    /// The frame is already a card crop.
    Raw,
}

/// What actually happened to the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rectification {
    Contour,
    PointBox,
    Passthrough,
}

/// Click position in frame-relative coordinates, both axes in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FocusPoint {
    pub x: f32,
    pub y: f32,
}

impl FocusPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn center() -> Self {
        Self { x: 0.5, y: 0.5 }
    }
}

#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub image: RgbImage,
    pub rectification: Rectification,
}

#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    config: NormalizerConfig,
}

impl Normalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    pub fn normalize(
        &self,
        frame: &RgbImage,
        mode: NormalizeMode,
        focus: Option<FocusPoint>,
        box_scale: Option<f32>,
    ) -> NormalizedImage {
        let mode = match (mode, focus) {
            (NormalizeMode::Raw, _) => NormalizeMode::Raw,
            (_, Some(_)) => NormalizeMode::PointBox,
            (m, None) => m,
        };

        match mode {
            NormalizeMode::Raw => NormalizedImage {
                image: frame.clone(),
                rectification: Rectification::Passthrough,
            },
            NormalizeMode::PointBox => {
                let focus = focus.unwrap_or_else(FocusPoint::center);
                let scale = box_scale.unwrap_or(self.config.default_box_scale);
                NormalizedImage {
                    image: point_box_crop(frame, focus, scale, self.config.card_aspect),
                    rectification: Rectification::PointBox,
                }
            }
            NormalizeMode::Auto => {
                let warped = find_card_quad(frame, &self.config)
                    .and_then(|quad| four_point_transform(frame, quad));
                match warped {
                    Some(image) => NormalizedImage {
                        image: to_portrait(image),
                        rectification: Rectification::Contour,
                    },
                    None => {
                        tracing::debug!("no card quad found, passing frame through");
                        NormalizedImage {
                            image: frame.clone(),
                            rectification: Rectification::Passthrough,
                        }
                    }
                }
            }
        }
    }
}

/// Orders four corners as top-left, top-right, bottom-right, bottom-left.
///
/// TL has the smallest `x + y`, BR the largest; TR has the smallest `y - x`,
/// BL the largest. Ties are broken on the coordinates themselves so the
/// result does not depend on input order.
pub fn order_points(points: [Corner; 4]) -> [Corner; 4] {
    let sum = |p: &Corner| p.0 + p.1;
    let diff = |p: &Corner| p.1 - p.0;

    let tl = pick(&points, sum, false);
    let br = pick(&points, sum, true);
    let tr = pick(&points, diff, false);
    let bl = pick(&points, diff, true);
    [tl, tr, br, bl]
}

fn pick(points: &[Corner; 4], key: impl Fn(&Corner) -> f32, largest: bool) -> Corner {
    let cmp = |a: &&Corner, b: &&Corner| {
        key(a)
            .total_cmp(&key(b))
            .then(a.0.total_cmp(&b.0))
            .then(a.1.total_cmp(&b.1))
    };
    let chosen = if largest {
        points.iter().max_by(cmp)
    } else {
        points.iter().min_by(cmp)
    };
    // four points always yield a min and a max
    *chosen.unwrap_or(&points[0])
}

fn distance(a: Corner, b: Corner) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Warps the quad spanned by `corners` onto an upright rectangle sized by
/// its longest opposing edges. `None` for degenerate quads.
pub fn four_point_transform(image: &RgbImage, corners: [Corner; 4]) -> Option<RgbImage> {
    let [tl, tr, br, bl] = order_points(corners);

    let max_width = distance(br, bl).max(distance(tr, tl)) as u32;
    let max_height = distance(tr, br).max(distance(tl, bl)) as u32;
    if max_width < 2 || max_height < 2 {
        return None;
    }

    let w = (max_width - 1) as f32;
    let h = (max_height - 1) as f32;
    let projection =
        Projection::from_control_points([tl, tr, br, bl], [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)])?;

    let mut out = RgbImage::new(max_width, max_height);
    warp_into(image, &projection, Interpolation::Bilinear, Rgb([0, 0, 0]), &mut out);
    Some(out)
}

/// Finds the largest external contour that simplifies to four vertices.
///
/// Search runs on a downscaled copy; the returned corners are in the
/// coordinates of `frame`.
pub fn find_card_quad(frame: &RgbImage, config: &NormalizerConfig) -> Option<[Corner; 4]> {
    let (w, h) = frame.dimensions();
    if w < 8 || h < 8 {
        return None;
    }

    let scale = (config.detect_max_dim as f32 / w.max(h) as f32).min(1.0);
    let gray = if scale < 1.0 {
        let sw = ((w as f32 * scale).round() as u32).max(1);
        let sh = ((h as f32 * scale).round() as u32).max(1);
        imageops::grayscale(&imageops::resize(frame, sw, sh, FilterType::Triangle))
    } else {
        imageops::grayscale(frame)
    };

    let blurred = gaussian_blur_f32(&gray, config.blur_sigma);
    let edges = canny(&blurred, config.canny_low, config.canny_high);

    let min_area = config.min_area_fraction * (gray.width() as f64 * gray.height() as f64);
    let mut outer: Vec<(f64, Vec<Point<i32>>)> = find_contours::<i32>(&edges)
        .into_iter()
        .filter(|c| c.parent.is_none() && matches!(c.border_type, BorderType::Outer))
        .map(|c| (polygon_area(&c.points), c.points))
        .filter(|(area, _)| *area >= min_area)
        .collect();
    outer.sort_by(|a, b| b.0.total_cmp(&a.0));

    for (_, points) in &outer {
        let perimeter = arc_length(points, true);
        let mut approx = approximate_polygon_dp(points, config.approx_epsilon * perimeter, true);
        if approx.len() > 1 && approx.first() == approx.last() {
            approx.pop();
        }
        if approx.len() == 4 {
            let corner = |p: &Point<i32>| (p.x as f32 / scale, p.y as f32 / scale);
            return Some([
                corner(&approx[0]),
                corner(&approx[1]),
                corner(&approx[2]),
                corner(&approx[3]),
            ]);
        }
    }
    None
}

/// Shoelace area of a closed polygon.
pub fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut acc = 0.0f64;
    let mut j = points.len() - 1;
    for i in 0..points.len() {
        acc += (points[j].x as f64) * (points[i].y as f64) - (points[i].x as f64) * (points[j].y as f64);
        j = i;
    }
    acc.abs() / 2.0
}

/// Axis-aligned card-shaped crop around `focus`, `box_scale` of the frame
/// width wide. The box is shifted, not shrunk, to stay inside the frame.
pub fn point_box_crop(frame: &RgbImage, focus: FocusPoint, box_scale: f32, aspect: f32) -> RgbImage {
    let (w, h) = frame.dimensions();
    let (wf, hf) = (w as f32, h as f32);

    let box_w = (wf * box_scale).round().clamp(1.0, wf);
    let box_h = (box_w * aspect).round().clamp(1.0, hf);

    let cx = focus.x.clamp(0.0, 1.0) * wf;
    let cy = focus.y.clamp(0.0, 1.0) * hf;
    let x0 = (cx - box_w / 2.0).clamp(0.0, wf - box_w);
    let y0 = (cy - box_h / 2.0).clamp(0.0, hf - box_h);

    imageops::crop_imm(frame, x0 as u32, y0 as u32, box_w as u32, box_h as u32).to_image()
}

// cards are portrait; a landscape warp is turned upright
fn to_portrait(image: RgbImage) -> RgbImage {
    if image.width() > image.height() {
        imageops::rotate90(&image)
    } else {
        image
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imageproc::drawing::draw_polygon_mut;

    fn permutations(items: [Corner; 4]) -> Vec<[Corner; 4]> {
        let mut out = Vec::new();
        for a in 0..4 {
            for b in 0..4 {
                for c in 0..4 {
                    for d in 0..4 {
                        let idx = [a, b, c, d];
                        let mut seen = [false; 4];
                        if idx.iter().all(|&i| !std::mem::replace(&mut seen[i], true)) {
                            out.push([items[a], items[b], items[c], items[d]]);
                        }
                    }
                }
            }
        }
        out
    }

    #[test]
    fn orders_axis_aligned_rectangle() {
        let ordered = order_points([(100.0, 10.0), (10.0, 10.0), (10.0, 150.0), (100.0, 150.0)]);
        assert_eq!(
            ordered,
            [(10.0, 10.0), (100.0, 10.0), (100.0, 150.0), (10.0, 150.0)]
        );
    }

    #[test]
    fn ordering_is_invariant_under_permutation() {
        // slightly rotated card
        let quad = [(52.0, 40.0), (160.0, 47.0), (151.0, 198.0), (44.0, 190.0)];
        let expected = order_points(quad);
        let perms = permutations(quad);
        assert_eq!(perms.len(), 24);
        for p in perms {
            assert_eq!(order_points(p), expected);
        }
    }

    #[test]
    fn transform_uses_longest_edges() {
        let frame = RgbImage::from_pixel(200, 200, Rgb([90, 90, 90]));
        let quad = [(20.0, 20.0), (120.0, 25.0), (118.0, 170.0), (22.0, 160.0)];
        let warped = four_point_transform(&frame, quad).unwrap();
        assert_eq!(warped.width(), 100);
        assert_eq!(warped.height(), 145);
    }

    #[test]
    fn degenerate_quad_is_rejected() {
        let frame = RgbImage::new(50, 50);
        assert!(four_point_transform(&frame, [(5.0, 5.0); 4]).is_none());
    }

    #[test]
    fn point_box_is_clamped_inside_frame() {
        let frame = RgbImage::new(400, 300);
        let crop = point_box_crop(&frame, FocusPoint::new(0.99, 0.99), 0.3, 88.0 / 63.0);
        assert_eq!(crop.width(), 120);
        assert_eq!(crop.height(), 168);

        let huge = point_box_crop(&frame, FocusPoint::new(0.5, 0.5), 2.0, 88.0 / 63.0);
        assert_eq!(huge.width(), 400);
        assert_eq!(huge.height(), 300);
    }

    #[test]
    fn finds_bright_card_on_dark_table() {
        let mut frame = RgbImage::from_pixel(400, 320, Rgb([20, 20, 25]));
        let corners = [(120, 40), (270, 55), (255, 280), (105, 265)];
        let poly: Vec<Point<i32>> = corners.iter().map(|&(x, y)| Point::new(x, y)).collect();
        draw_polygon_mut(&mut frame, &poly, Rgb([230, 220, 200]));

        let quad = find_card_quad(&frame, &NormalizerConfig::default()).expect("card quad");
        let ordered = order_points(quad);
        let expected = order_points(corners.map(|(x, y)| (x as f32, y as f32)));
        for (got, want) in ordered.iter().zip(expected.iter()) {
            assert!(distance(*got, *want) < 8.0, "{:?} vs {:?}", got, want);
        }

        let normalized = Normalizer::default().normalize(&frame, NormalizeMode::Auto, None, None);
        assert_eq!(normalized.rectification, Rectification::Contour);
        assert!(normalized.image.height() >= normalized.image.width());
    }

    #[test]
    fn blank_frame_passes_through() {
        let frame = RgbImage::from_pixel(120, 90, Rgb([128, 128, 128]));
        let normalized = Normalizer::default().normalize(&frame, NormalizeMode::Auto, None, None);
        assert_eq!(normalized.rectification, Rectification::Passthrough);
        assert_eq!(normalized.image.dimensions(), (120, 90));
    }

    #[test]
    fn focus_point_selects_point_box() {
        let frame = RgbImage::new(400, 300);
        let normalized = Normalizer::default().normalize(
            &frame,
            NormalizeMode::Auto,
            Some(FocusPoint::new(0.25, 0.5)),
            Some(0.2),
        );
        assert_eq!(normalized.rectification, Rectification::PointBox);
        assert_eq!(normalized.image.width(), 80);
    }
}
