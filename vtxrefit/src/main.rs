use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use vtxcore::refit::config::RefitConfig;
use vtxcore::refit::producer::RefitVertexProducer;
use vtxrefit::data::io::{read_events, write_events, write_outputs};
use vtxrefit::logging::init_tracing;
use vtxrefit::run::refit_events;
use vtxrefit::sim::generator::{EventGenerator, GeneratorSettings};

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Parser)]
#[command(name = "vtxrefit")]
#[command(about = "Refit primary vertices without the tracks of lepton and tau combinations")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refit the primary vertex of every event in a file.
    Refit(RefitArgs),

    /// Write synthetic events.
    Simulate(SimulateArgs),

    /// Print the MiniAOD configuration as JSON.
    TemplateConfig,
}

#[derive(Debug, Clone, Args)]
struct RefitArgs {
    /// Refit configuration (JSON).
    #[arg(long)]
    config: PathBuf,

    /// Events (.json, .jsonl, optionally .zst compressed).
    #[arg(long)]
    input: PathBuf,

    /// Output file (.json, .jsonl or .bin, optionally .zst compressed).
    #[arg(long)]
    output: PathBuf,

    /// Number of worker threads.
    #[arg(long, default_value = "4")]
    threads: usize,

    /// Override `storeAsMap` of the configuration (`true` for a key-to-vertex map, `false` for a list).
    #[arg(long)]
    store_as_map: Option<bool>,
}

#[derive(Debug, Clone, Args)]
struct SimulateArgs {
    /// Number of events.
    #[arg(long, default_value = "100")]
    n: usize,

    #[arg(long, default_value = "42")]
    seed: u64,

    /// Output file (.json or .jsonl, optionally .zst compressed).
    #[arg(long)]
    output: PathBuf,

    /// Configuration whose input tags the events are stored under.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Generator settings (JSON); missing keys keep their defaults.
    #[arg(long)]
    settings: Option<PathBuf>,
}

fn load_config(path: &Path) -> CliResult<RefitConfig> {
    let config: RefitConfig = serde_json::from_str(&fs::read_to_string(path)?)?;
    config.validate()?;
    Ok(config)
}

/// Applies the command-line overrides; options left out keep the file's value.
fn apply_overrides(config: &mut RefitConfig, args: &RefitArgs) {
    if let Some(store_as_map) = args.store_as_map {
        config.store_as_map = store_as_map;
    }
}

fn run_refit(args: &RefitArgs) -> CliResult<()> {
    let mut config = load_config(&args.config)?;
    apply_overrides(&mut config, args);
    let producer = RefitVertexProducer::new(config)?;
    let events = read_events(&args.input)?;

    let summary = refit_events(&events, &producer, args.threads)?;
    for (event, reason) in &summary.failed {
        warn!(event, %reason, "no output for event");
    }
    write_outputs(&args.output, &summary.outputs)?;

    println!("{}", summary.stats);
    Ok(())
}

fn run_simulate(args: &SimulateArgs) -> CliResult<()> {
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => RefitConfig::mini_aod_template()?,
    };
    let settings: GeneratorSettings = match &args.settings {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => GeneratorSettings::default(),
    };

    let mut generator = EventGenerator::new(settings, config, args.seed)?;
    let events = generator.generate(args.n);
    write_events(&args.output, &events)?;
    info!(n = args.n, seed = args.seed, "simulation finished");
    Ok(())
}

fn run_template_config() -> CliResult<()> {
    let config = RefitConfig::mini_aod_template()?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn main() -> CliResult<()> {
    init_tracing()?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Refit(args) => run_refit(&args),
        Commands::Simulate(args) => run_simulate(&args),
        Commands::TemplateConfig => run_template_config(),
    }
}
