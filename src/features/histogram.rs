//! Colour signal: CLAHE on the value channel, then a joint HSV histogram.

use image::{GrayImage, Luma, RgbImage};
use palette::{FromColor, Hsv, Srgb};

/// 8-bit HSV in the usual OpenCV ranges: hue `[0, 180)`, saturation and
/// value `[0, 255]`.
#[inline]
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let hsv: Hsv = Hsv::from_color(Srgb::new(r, g, b).into_format::<f32>());
    let h = ((hsv.hue.into_positive_degrees() / 2.0).round() as u32 % 180) as u8;
    let s = (hsv.saturation * 255.0).round().clamp(0.0, 255.0) as u8;
    let v = (hsv.value * 255.0).round().clamp(0.0, 255.0) as u8;
    (h, s, v)
}

/// Contrast-limited adaptive histogram equalization.
///
/// Each tile gets its own clipped equalization table; pixels blend the
/// tables of the four nearest tile centres.
pub fn clahe(plane: &GrayImage, tiles: u32, clip_limit: f32) -> GrayImage {
    let (w, h) = plane.dimensions();
    if w == 0 || h == 0 {
        return plane.clone();
    }
    let tx = tiles.clamp(1, w);
    let ty = tiles.clamp(1, h);
    let tile_w = w.div_ceil(tx);
    let tile_h = h.div_ceil(ty);

    let mut luts = vec![[0u8; 256]; (tx * ty) as usize];
    for j in 0..ty {
        for i in 0..tx {
            let x0 = i * tile_w;
            let y0 = j * tile_h;
            let x1 = ((i + 1) * tile_w).min(w);
            let y1 = ((j + 1) * tile_h).min(h);
            if x0 >= x1 || y0 >= y1 {
                // ceil division can leave the last tile empty; identity table
                let lut = &mut luts[(j * tx + i) as usize];
                for (v, slot) in lut.iter_mut().enumerate() {
                    *slot = v as u8;
                }
                continue;
            }

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[plane.get_pixel(x, y)[0] as usize] += 1;
                }
            }
            let area = (x1 - x0) * (y1 - y0);
            clip_histogram(&mut hist, clip_limit, area);

            let lut = &mut luts[(j * tx + i) as usize];
            let scale = 255.0 / area as f32;
            let mut cdf = 0u32;
            for (v, slot) in lut.iter_mut().enumerate() {
                cdf += hist[v];
                *slot = (cdf as f32 * scale).round().min(255.0) as u8;
            }
        }
    }

    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        let fy = (y as f32 + 0.5) / tile_h as f32 - 0.5;
        let y0 = fy.floor().clamp(0.0, (ty - 1) as f32) as u32;
        let y1 = (y0 + 1).min(ty - 1);
        let wy = (fy - y0 as f32).clamp(0.0, 1.0);
        for x in 0..w {
            let fx = (x as f32 + 0.5) / tile_w as f32 - 0.5;
            let x0 = fx.floor().clamp(0.0, (tx - 1) as f32) as u32;
            let x1 = (x0 + 1).min(tx - 1);
            let wx = (fx - x0 as f32).clamp(0.0, 1.0);

            let v = plane.get_pixel(x, y)[0] as usize;
            let at = |i: u32, j: u32| luts[(j * tx + i) as usize][v] as f32;
            let top = at(x0, y0) * (1.0 - wx) + at(x1, y0) * wx;
            let bottom = at(x0, y1) * (1.0 - wx) + at(x1, y1) * wx;
            let value = top * (1.0 - wy) + bottom * wy;
            out.put_pixel(x, y, Luma([value.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

fn clip_histogram(hist: &mut [u32; 256], clip_limit: f32, area: u32) {
    if clip_limit <= 0.0 {
        return;
    }
    let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }
    let batch = excess / 256;
    let residual = (excess % 256) as usize;
    for bin in hist.iter_mut() {
        *bin += batch;
    }
    if residual > 0 {
        let step = (256 / residual).max(1);
        for bin in hist.iter_mut().step_by(step).take(residual) {
            *bin += 1;
        }
    }
}

/// Joint HSV histogram, flattened hue-major, L2 normalized.
///
/// The value channel goes through CLAHE first so glare and exposure shifts
/// move fewer pixels between value bins.
pub fn hsv_histogram(region: &RgbImage, bins: [usize; 3], clahe_tiles: u32, clahe_clip: f32) -> Vec<f32> {
    let (w, h) = region.dimensions();
    let [hb, sb, vb] = bins;
    let mut hist = vec![0f32; hb * sb * vb];
    if w == 0 || h == 0 {
        return hist;
    }

    let mut hue = Vec::with_capacity((w * h) as usize);
    let mut sat = Vec::with_capacity((w * h) as usize);
    let mut value = GrayImage::new(w, h);
    for (x, y, px) in region.enumerate_pixels() {
        let (hh, ss, vv) = rgb_to_hsv(px[0], px[1], px[2]);
        hue.push(hh);
        sat.push(ss);
        value.put_pixel(x, y, Luma([vv]));
    }
    let value = clahe(&value, clahe_tiles, clahe_clip);

    for (i, v) in value.pixels().enumerate() {
        let hi = (hue[i] as usize * hb / 180).min(hb - 1);
        let si = sat[i] as usize * sb / 256;
        let vi = v[0] as usize * vb / 256;
        hist[(hi * sb + si) * vb + vi] += 1.0;
    }

    let norm = hist.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in hist.iter_mut() {
            *v /= norm;
        }
    }
    hist
}

/// Pearson correlation of two histograms; 1.0 for identical shapes.
pub fn correlation(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let mean_a = a[..n].iter().map(|&v| v as f64).sum::<f64>() / n as f64;
    let mean_b = b[..n].iter().map(|&v| v as f64).sum::<f64>() / n as f64;

    let mut num = 0.0f64;
    let mut den_a = 0.0f64;
    let mut den_b = 0.0f64;
    for i in 0..n {
        let da = a[i] as f64 - mean_a;
        let db = b[i] as f64 - mean_b;
        num += da * db;
        den_a += da * da;
        den_b += db * db;
    }
    let den = (den_a * den_b).sqrt();
    if den <= f64::EPSILON {
        return if a[..n] == b[..n] { 1.0 } else { 0.0 };
    }
    (num / den) as f32
}
