use std::fmt;
use std::str::FromStr;

use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::{Deserialize, Serialize};

const HASH_INPUT: usize = 32;
const HASH_SIDE: usize = 8;

/// 64-bit DCT perceptual hash. Bit 63 is the top-left low-frequency
/// coefficient, bits run row-major from there.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PerceptualHash(pub u64);

impl PerceptualHash {
    pub fn compute(image: &RgbImage) -> Self {
        let gray = imageops::grayscale(image);
        let small = imageops::resize(&gray, HASH_INPUT as u32, HASH_INPUT as u32, FilterType::Lanczos3);
        let pixels: Vec<f64> = small.pixels().map(|p| p[0] as f64).collect();

        let low = low_frequency_dct(&pixels);
        let mut sorted = low;
        sorted.sort_by(f64::total_cmp);
        let median = (sorted[31] + sorted[32]) / 2.0;

        let mut bits = 0u64;
        for (i, v) in low.iter().enumerate() {
            if *v > median {
                bits |= 1 << (63 - i);
            }
        }
        PerceptualHash(bits)
    }

    pub fn distance(self, other: PerceptualHash) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

/// Top-left 8x8 block of the unnormalized 2D DCT-II of a 32x32 plane.
fn low_frequency_dct(pixels: &[f64]) -> [f64; HASH_SIDE * HASH_SIDE] {
    let n = HASH_INPUT;
    let mut cos = [[0f64; HASH_INPUT]; HASH_SIDE];
    for (k, row) in cos.iter_mut().enumerate() {
        for (i, c) in row.iter_mut().enumerate() {
            *c = (std::f64::consts::PI * k as f64 * (2 * i + 1) as f64 / (2 * n) as f64).cos();
        }
    }

    // rows first, keeping only the low columns
    let mut rows = vec![[0f64; HASH_SIDE]; n];
    for y in 0..n {
        for k in 0..HASH_SIDE {
            rows[y][k] = (0..n).map(|x| pixels[y * n + x] * cos[k][x]).sum::<f64>() * 2.0;
        }
    }

    let mut out = [0f64; HASH_SIDE * HASH_SIDE];
    for ky in 0..HASH_SIDE {
        for kx in 0..HASH_SIDE {
            out[ky * HASH_SIDE + kx] = (0..n).map(|y| rows[y][kx] * cos[ky][y]).sum::<f64>() * 2.0;
        }
    }
    out
}

impl fmt::Display for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for PerceptualHash {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str_radix(s.trim(), 16).map(PerceptualHash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::block_texture;
    use image::Rgb;

    #[test]
    fn identical_images_hash_equal() {
        let img = block_texture(120, 160, 3);
        assert_eq!(PerceptualHash::compute(&img), PerceptualHash::compute(&img));
    }

    #[test]
    fn resized_image_stays_close() {
        let img = block_texture(160, 224, 11);
        let smaller = imageops::resize(&img, 120, 168, FilterType::Triangle);
        let d = PerceptualHash::compute(&img).distance(PerceptualHash::compute(&smaller));
        assert!(d <= 10, "distance {}", d);
    }

    #[test]
    fn inverted_image_is_far() {
        let img = block_texture(96, 128, 5);
        let inv = RgbImage::from_fn(96, 128, |x, y| {
            let p = img.get_pixel(x, y);
            Rgb([255 - p[0], 255 - p[1], 255 - p[2]])
        });
        let d = PerceptualHash::compute(&img).distance(PerceptualHash::compute(&inv));
        assert!(d > 22, "distance {}", d);
    }

    #[test]
    fn hex_round_trip() {
        let h = PerceptualHash(0x00f0_1234_abcd_ef09);
        assert_eq!(h.to_string(), "00f01234abcdef09");
        assert_eq!("00f01234abcdef09".parse::<PerceptualHash>().unwrap(), h);
    }
}
