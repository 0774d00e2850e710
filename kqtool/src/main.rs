//! `kqtool`: extracts chromatographic features from a centroided run.
//!
//! ```bash
//! kqtool --input run.json --output features.json
//! kqtool --input run.tsv --format tsv --ghost-scan 3 --min-size 6
//! ```

use std::path::PathBuf;
use std::process;

use clap::{Parser, ValueEnum};
use kqcore::algorithm::ghost::follow_ghost;
use kqcore::tracking::feature::ChromatographicFeature;
use kqcore::{NoiseSeed, Spectrum, TrackerManager};
use kqtool::io::{read_run_json, read_run_tsv, write_features, write_features_json, RunConfig};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Json,
    Tsv,
}

#[derive(Parser, Debug)]
#[command(name = "kqtool", version, about = "Kalman filter feature extraction for LC-MS runs", long_about = None)]
struct Args {
    /// Run to process.
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,

    #[arg(short, long, value_enum, default_value_t = Format::Json)]
    format: Format,

    /// Where to write the features; stdout if omitted.
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// JSON file with `parameters`, `model` and `noise_seed` sections.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(long)]
    max_misses: Option<usize>,

    #[arg(long)]
    min_size: Option<usize>,

    /// Scan whose most intense centroid starts the ghost trace that estimates the
    /// noise seed when none is given explicitly.
    #[arg(long, default_value_t = 0, conflicts_with_all = ["mz_variance", "intensity_variance", "max_intensity_scale"])]
    ghost_scan: usize,

    /// Largest m/z step between neighbouring points of the ghost trace.
    #[arg(long, default_value_t = 0.01)]
    ghost_tolerance: f64,

    #[arg(long, requires_all = ["intensity_variance", "max_intensity_scale"])]
    mz_variance: Option<f64>,

    #[arg(long, requires_all = ["mz_variance", "max_intensity_scale"])]
    intensity_variance: Option<f64>,

    #[arg(long, requires_all = ["mz_variance", "intensity_variance"])]
    max_intensity_scale: Option<f64>,

    /// Log level (trace, debug, info, warn, error); `RUST_LOG` takes precedence.
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Explicit flags win over the config file, which wins over the ghost scan.
fn resolve_seed(args: &Args, config: &RunConfig, spectra: &[Spectrum]) -> Result<NoiseSeed, Box<dyn std::error::Error>> {
    if let (Some(mz), Some(int), Some(scale)) = (args.mz_variance, args.intensity_variance, args.max_intensity_scale) {
        return Ok(NoiseSeed::new(mz, int, scale));
    }
    if let Some(seed) = config.noise_seed {
        return Ok(seed);
    }
    let trace = follow_ghost(spectra, args.ghost_scan, args.ghost_tolerance)?;
    let seed = NoiseSeed::from_ghost_trace(&trace.mz, &trace.intensity)?;
    info!(
        "noise seed from a {} point ghost trace around scan {}: {:?}",
        trace.len(),
        args.ghost_scan,
        seed
    );
    Ok(seed)
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match args.config.as_deref() {
        Some(path) => {
            info!("loading configuration from {}", path.display());
            RunConfig::from_json(path)?
        }
        None => RunConfig::default(),
    };
    if let Some(max_misses) = args.max_misses {
        config.parameters.max_misses = max_misses;
    }
    if let Some(min_size) = args.min_size {
        config.parameters.min_size = min_size;
    }

    let spectra = match args.format {
        Format::Json => read_run_json(&args.input)?,
        Format::Tsv => read_run_tsv(&args.input)?,
    };
    info!("{} spectra read from {}", spectra.len(), args.input.display());
    if spectra.is_empty() {
        warn!("run is empty, nothing to track");
        return emit(args, &[]);
    }

    let seed = resolve_seed(args, &config, &spectra)?;
    let extraction = TrackerManager::new(config.parameters, config.model, seed).run(&spectra)?;
    let features = extraction.to_features(&spectra);
    info!(
        "{} features, {} noise trackers (max_misses = {}, min_size = {})",
        features.len(),
        extraction.noise_count(),
        config.parameters.max_misses,
        config.parameters.min_size,
    );

    emit(args, &features)
}

fn emit(args: &Args, features: &[ChromatographicFeature]) -> Result<(), Box<dyn std::error::Error>> {
    match args.output.as_deref() {
        Some(path) => write_features_json(path, features),
        None => write_features(std::io::stdout().lock(), features),
    }
}

fn main() {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(&args) {
        error!("{e}");
        process::exit(1);
    }
}
