use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::brain::{ExtractorSignature, IndexBuilder};
use crate::config::ExtractorConfig;
use crate::features::{Descriptor, PerceptualHash, QuerySignals};

const BLOCK: u32 = 8;

/// Random 8x8 colour blocks: plenty of FAST corners, no structure.
pub fn block_texture(width: u32, height: u32, seed: u64) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let cols = width.div_ceil(BLOCK);
    let rows = height.div_ceil(BLOCK);
    let colours: Vec<[u8; 3]> = (0..cols * rows).map(|_| rng.gen()).collect();
    RgbImage::from_fn(width, height, |x, y| Rgb(colours[((y / BLOCK) * cols + x / BLOCK) as usize]))
}

/// Block texture whose every block is `tint` at a random brightness, so the
/// hue histogram is dominated by the tint.
pub fn tinted_card(width: u32, height: u32, seed: u64, tint: [u8; 3]) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let cols = width.div_ceil(BLOCK);
    let rows = height.div_ceil(BLOCK);
    let levels: Vec<f32> = (0..cols * rows).map(|_| rng.gen_range(0.1..1.0)).collect();
    RgbImage::from_fn(width, height, |x, y| {
        let k = levels[((y / BLOCK) * cols + x / BLOCK) as usize];
        Rgb(tint.map(|c| (c as f32 * k) as u8))
    })
}

pub fn random_descriptors(n: usize, seed: u64) -> Vec<Descriptor> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let mut d = [0u8; 32];
            rng.fill(&mut d[..]);
            d
        })
        .collect()
}

pub fn signals_with(histogram: Vec<f32>, descriptors: Vec<Descriptor>) -> QuerySignals {
    QuerySignals {
        histogram,
        descriptors,
        phash: PerceptualHash(0),
    }
}

/// Builder whose recorded histogram shape is `hist_len` bins.
pub fn index_builder(hist_len: usize) -> IndexBuilder {
    IndexBuilder::new(ExtractorSignature {
        hist_bins: [hist_len, 1, 1],
        ..ExtractorSignature::from_config(&ExtractorConfig::default())
    })
}
