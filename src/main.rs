use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use validator::Validate;

use twostage_da::config::Settings;
use twostage_da::core::{select_beneficial, CollectingSink, ManipulationSearch, MatchingError};
use twostage_da::models::RecordSelection;
use twostage_da::services::{render_dot, write_first_case, write_report, JsonReport, ReportError};

/// Search for beneficial two-round misreports under deferred acceptance
#[derive(Debug, Parser)]
#[command(name = "twostage-da", version)]
struct Args {
    /// Configuration file (defaults to config/default and config/local)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Agents per side
    #[arg(long)]
    population: Option<usize>,

    /// Seed for sampled preference spaces
    #[arg(long)]
    seed: Option<u64>,

    /// Permutations drawn per agent above the exhaustive threshold
    #[arg(long)]
    sample_size: Option<usize>,

    /// Largest population that is enumerated exhaustively
    #[arg(long)]
    exhaustive_threshold: Option<usize>,

    /// Stop after this many beneficial cases
    #[arg(long)]
    cap: Option<u64>,

    /// Where to write the results document
    #[arg(long)]
    output: Option<PathBuf>,

    /// Where to write a DOT diagram of the first beneficial case
    #[arg(long)]
    diagram: Option<PathBuf>,
}

#[derive(Debug, Error)]
enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid settings: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("search failed: {0}")]
    Matching(#[from] MatchingError),

    #[error("could not write results: {0}")]
    Report(#[from] ReportError),

    #[error("could not write diagram: {0}")]
    Diagram(#[from] std::io::Error),
}

fn load_settings(args: &Args) -> Result<Settings, AppError> {
    let mut settings = match &args.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };

    let search = &mut settings.search;
    if let Some(population) = args.population {
        search.population = population;
    }
    if let Some(seed) = args.seed {
        search.seed = seed;
    }
    if let Some(sample_size) = args.sample_size {
        search.sample_size = sample_size;
    }
    if let Some(threshold) = args.exhaustive_threshold {
        search.exhaustive_threshold = threshold;
    }
    if let Some(cap) = args.cap {
        search.beneficial_cap = Some(cap);
    }
    if let Some(output) = &args.output {
        settings.output.results_path = output.clone();
    }
    if let Some(diagram) = &args.diagram {
        settings.output.diagram_path = Some(diagram.clone());
    }

    settings.search.validate()?;
    Ok(settings)
}

fn init_logging(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true);

    if settings.logging.format == "pretty" {
        subscriber.pretty().init();
    } else {
        subscriber.init();
    }
}

fn run(settings: Settings) -> Result<(), AppError> {
    let market = settings.search.market();
    let truthful = settings.search.truthful_list(&market)?;
    let search = ManipulationSearch::new(settings.search.policy());

    let mut rng = search.policy().rng();
    let input = search.prepare(market, settings.search.distinguished_id(), truthful, &mut rng)?;

    let mut sink = CollectingSink::new(settings.search.retain);
    let metadata = search.run(&input, &mut sink)?;

    if metadata.is_exhaustive_claim() {
        info!("Exhaustive run: counts cover every profile combination");
    } else {
        warn!("Sampled or capped run: results show existence only");
    }

    let report = JsonReport {
        metadata,
        records: sink.into_records(),
    };
    write_report(&settings.output.results_path, &report)?;

    match select_beneficial(&report.records, RecordSelection::First).first() {
        Some(first) => {
            write_first_case(&settings.output.first_case_path, first)?;
            if let Some(path) = &settings.output.diagram_path {
                std::fs::write(path, render_dot(first))?;
                info!("Wrote diagram to {}", path.display());
            }
        }
        None => info!("No beneficial manipulation found"),
    }

    info!(
        "Found {} beneficial cases across {} combinations",
        report.metadata.counters.beneficial, report.metadata.counters.combinations_explored
    );
    Ok(())
}

fn main() -> ExitCode {
    // Load .env file if present
    dotenv::dotenv().ok();

    let args = Args::parse();
    let settings = match load_settings(&args) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(&settings);

    match run(settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
