use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;

use aether_sight::bootstrap::load_index;
use aether_sight::telemetry::JsonlScanLog;
use aether_sight::{decode_image, AnalyzeRequest, CardIdentifier, FocusPoint, NormalizeMode, Session, SightConfig};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Auto,
    PointBox,
    Raw,
}

impl From<ModeArg> for NormalizeMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Auto => NormalizeMode::Auto,
            ModeArg::PointBox => NormalizeMode::PointBox,
            ModeArg::Raw => NormalizeMode::Raw,
        }
    }
}

/// Identify the card in a photo against a reference index
#[derive(Parser, Debug)]
#[command(author, version, about = "Identify a trading card in an image", long_about = None)]
struct Args {
    /// Image file to analyze
    image: PathBuf,

    /// Reference index artifact (overrides config and AETHER_SIGHT_BRAIN)
    #[arg(short, long)]
    brain: Option<PathBuf>,

    /// Optional JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Deck list restricting the search (plain names or Arena export)
    #[arg(short, long)]
    deck: Option<PathBuf>,

    /// Focus point as relative "x,y", both in [0, 1]
    #[arg(long)]
    focus: Option<String>,

    /// Box width as a fraction of the frame width (point-box mode)
    #[arg(long)]
    box_scale: Option<f32>,

    #[arg(long, value_enum, default_value_t = ModeArg::Auto)]
    mode: ModeArg,

    /// Print compact JSON instead of pretty JSON
    #[arg(long, default_value_t = false)]
    compact: bool,
}

fn parse_focus(raw: &str) -> Result<FocusPoint> {
    let (x, y) = raw
        .split_once(',')
        .ok_or_else(|| anyhow!("focus must look like x,y"))?;
    let x: f32 = x.trim().parse().context("focus x")?;
    let y: f32 = y.trim().parse().context("focus y")?;
    Ok(FocusPoint::new(x, y))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = SightConfig::load(args.config.as_deref()).context("loading config")?;
    if let Some(brain) = &args.brain {
        config.index.path = brain.clone();
    }

    let index = load_index(&config.index).context("loading reference index")?;
    let scan_log = config.scan_log.clone();
    let identifier = CardIdentifier::new(Arc::new(index), config).context("checking index against config")?;
    let mut session = Session::new(identifier);
    if let Some(path) = scan_log {
        let log = JsonlScanLog::open(&path).with_context(|| format!("opening scan log {}", path.display()))?;
        session = session.with_observer(Box::new(log));
    }

    if let Some(deck) = &args.deck {
        let text = std::fs::read_to_string(deck).with_context(|| format!("reading deck {}", deck.display()))?;
        let size = session.load_scope(&text);
        eprintln!("scope: {} entries", size);
    }

    let bytes = std::fs::read(&args.image).with_context(|| format!("reading {}", args.image.display()))?;
    let image = decode_image(&bytes)?;
    let mut request = AnalyzeRequest::new(image).with_mode(args.mode.into());
    if let Some(raw) = &args.focus {
        request = request.with_focus(parse_focus(raw)?, args.box_scale);
    } else if args.box_scale.is_some() {
        request.box_scale = args.box_scale;
    }

    let result = session.analyze(&request);
    let json = if args.compact {
        serde_json::to_string(&result)?
    } else {
        serde_json::to_string_pretty(&result)?
    };
    println!("{}", json);
    Ok(())
}
