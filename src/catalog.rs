//! Offline compile of a local card catalog into a reference index.

use std::path::{Path, PathBuf};
use std::time::Instant;

use rayon::prelude::*;
use serde::Deserialize;

use crate::brain::{CardMetadata, IndexBuilder, ReferenceIndex};
use crate::error::{Result, SightError};
use crate::features::{FeatureExtractor, QuerySignals};

/// One record of the catalog JSON array.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogCard {
    pub name: String,
    #[serde(alias = "set_code")]
    pub set: String,
    #[serde(default)]
    pub oracle_text: Option<String>,
    #[serde(default)]
    pub mana_cost: Option<String>,
    /// Artwork path, relative to the image directory.
    pub image: PathBuf,
    #[serde(default)]
    pub image_url: Option<String>,
}

pub fn read_catalog(path: &Path) -> Result<Vec<CatalogCard>> {
    let raw = std::fs::read_to_string(path).map_err(|e| SightError::io(path, e))?;
    serde_json::from_str(&raw).map_err(|e| SightError::Catalog(format!("{}: {}", path.display(), e)))
}

/// Extracts every card's signals in parallel and assembles the index in
/// catalog order. Cards whose artwork is missing, undecodable, degenerate or
/// textureless are skipped with a warning.
pub fn compile_catalog(
    cards: &[CatalogCard],
    image_dir: &Path,
    extractor: &FeatureExtractor,
) -> Result<ReferenceIndex> {
    let start = Instant::now();
    tracing::info!(cards = cards.len(), "extracting reference signals");

    let signals: Vec<Option<QuerySignals>> = cards
        .par_iter()
        .map(|card| card_signals(card, image_dir, extractor))
        .collect();

    let mut builder = IndexBuilder::for_extractor(extractor.config());
    for (card, signals) in cards.iter().zip(signals) {
        let Some(signals) = signals else { continue };
        builder.push(
            card.name.clone(),
            card.set.clone(),
            signals,
            CardMetadata {
                oracle_text: card.oracle_text.clone(),
                mana_cost: card.mana_cost.clone(),
                image_url: card.image_url.clone(),
            },
        );
    }

    let compiled = builder.len();
    let index = builder.finish()?;
    tracing::info!(
        compiled,
        skipped = cards.len() - compiled,
        descriptors = index.descriptor_pool().len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "reference index compiled"
    );
    Ok(index)
}

fn card_signals(card: &CatalogCard, image_dir: &Path, extractor: &FeatureExtractor) -> Option<QuerySignals> {
    let path = image_dir.join(&card.image);
    let img = match image::open(&path) {
        Ok(img) => img.to_rgb8(),
        Err(e) => {
            tracing::warn!(card = %card.name, path = %path.display(), error = %e, "skipping card: unreadable artwork");
            return None;
        }
    };
    match extractor.extract(&img) {
        Ok(signals) if signals.descriptors.is_empty() => {
            tracing::warn!(card = %card.name, "skipping card: no descriptors");
            None
        }
        Ok(signals) => Some(signals),
        Err(cause) => {
            tracing::warn!(card = %card.name, ?cause, "skipping card: degenerate artwork");
            None
        }
    }
}
