#![allow(dead_code)]

use aether_sight::features::{Descriptor, PerceptualHash};
use aether_sight::{CardMetadata, FeatureExtractor, IndexBuilder, QuerySignals, ReferenceIndex, SightConfig};
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const CARD_W: u32 = 336;
pub const CARD_H: u32 = 468;

pub const RED: [u8; 3] = [255, 40, 30];
pub const BLUE: [u8; 3] = [30, 60, 255];
pub const GREEN: [u8; 3] = [40, 230, 50];

/// Canonical-size card made of 8x8 blocks of one tint at random brightness.
pub fn tinted_card(seed: u64, tint: [u8; 3]) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let cols = CARD_W.div_ceil(8);
    let rows = CARD_H.div_ceil(8);
    let levels: Vec<f32> = (0..cols * rows).map(|_| rng.gen_range(0.1..1.0)).collect();
    RgbImage::from_fn(CARD_W, CARD_H, |x, y| {
        let k = levels[((y / 8) * cols + x / 8) as usize];
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

/// Red, blue and green cards compiled through the real extractor.
pub fn image_index(config: &SightConfig) -> (ReferenceIndex, Vec<RgbImage>) {
    let extractor = FeatureExtractor::new(config.extractor.clone());
    let cards = vec![
        ("Alpha", tinted_card(1, RED)),
        ("Beta", tinted_card(2, BLUE)),
        ("Gamma", tinted_card(3, GREEN)),
    ];
    let mut builder = IndexBuilder::for_extractor(&config.extractor);
    for (name, img) in &cards {
        let signals = extractor.extract(img).expect("synthetic card is not degenerate");
        builder.push(*name, "tst", signals, CardMetadata::default());
    }
    (builder.finish().unwrap(), cards.into_iter().map(|(_, img)| img).collect())
}

/// A: red, 50 unique descriptors. B: blue, 45 of its own plus 5 of A's.
/// C: green, 50 unique.
pub struct Scenario {
    pub index: ReferenceIndex,
    pub a: QuerySignals,
    pub b: QuerySignals,
    pub c: QuerySignals,
}

pub fn scenario(config: &SightConfig) -> Scenario {
    let extractor = FeatureExtractor::new(config.extractor.clone());
    let hist = |seed, tint| extractor.histogram(&extractor.canonical_region(&tinted_card(seed, tint)));

    let a_desc = random_descriptors(50, 10);
    let mut b_desc = random_descriptors(45, 20);
    b_desc.extend_from_slice(&a_desc[..5]);
    let c_desc = random_descriptors(50, 30);

    let signals = |histogram, descriptors| QuerySignals {
        histogram,
        descriptors,
        phash: PerceptualHash(0x0f0f_0f0f_0f0f_0f0f),
    };
    let a = signals(hist(1, RED), a_desc);
    let b = signals(hist(2, BLUE), b_desc);
    let c = signals(hist(3, GREEN), c_desc);

    let mut builder = IndexBuilder::for_extractor(&config.extractor);
    builder.push("A", "tst", a.clone(), CardMetadata::default());
    builder.push("B", "tst", b.clone(), CardMetadata::default());
    builder.push("C", "tst", c.clone(), CardMetadata::default());
    Scenario {
        index: builder.finish().unwrap(),
        a,
        b,
        c,
    }
}
