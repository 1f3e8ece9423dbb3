use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use aether_sight::catalog::{compile_catalog, read_catalog};
use aether_sight::{FeatureExtractor, SightConfig};

/// Compile a card catalog and its artwork into a reference index
#[derive(Parser, Debug)]
#[command(author, version, about = "Compile a reference index from a local card catalog", long_about = None)]
struct Args {
    /// Catalog JSON: array of {name, set, image, oracle_text?, mana_cost?, image_url?}
    #[arg(short, long)]
    catalog: PathBuf,

    /// Directory the catalog's image paths are relative to
    #[arg(short, long)]
    images: PathBuf,

    /// Output artifact path (default: index.path from config)
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Optional JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Only compile the first N catalog cards
    #[arg(long)]
    limit: Option<usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = SightConfig::load(args.config.as_deref()).context("loading config")?;

    let mut cards = read_catalog(&args.catalog)
        .with_context(|| format!("reading catalog {}", args.catalog.display()))?;
    if let Some(limit) = args.limit {
        cards.truncate(limit);
    }

    let extractor = FeatureExtractor::new(config.extractor.clone());
    let index = compile_catalog(&cards, &args.images, &extractor).context("compiling reference index")?;

    let out = args.out.unwrap_or_else(|| config.index.path.clone());
    index
        .save(&out)
        .with_context(|| format!("writing {}", out.display()))?;

    println!(
        "compiled {} of {} cards ({} descriptors) into {}",
        index.len(),
        cards.len(),
        index.descriptor_pool().len(),
        out.display()
    );
    Ok(())
}
