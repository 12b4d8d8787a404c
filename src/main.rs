use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use structure_signals::data::{load_candles, open_output, write_json_line};
use structure_signals::pipeline::{replay, ReplayOutcome};
use structure_signals::{EngineConfig, StructureAnalyzer};

#[derive(Parser, Debug)]
#[command(name = "structure-signals")]
#[command(about = "Market structure analysis and entry signal replay for futures candles")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// JSON engine config (analyzer, state_machine, htf_minutes)
    #[arg(short, long, global = true, env = "STRUCTURE_CONFIG")]
    config: Option<PathBuf>,

    /// Candles on each side of a swing
    #[arg(long, global = true, env = "SWING_LOOKBACK")]
    swing_lookback: Option<usize>,

    /// Points beyond a level to confirm a break
    #[arg(long, global = true, env = "BREAK_CONFIRMATION")]
    break_confirmation: Option<f64>,

    /// Minimum FVG size in points
    #[arg(long, global = true, env = "MIN_FVG_SIZE")]
    min_fvg_size: Option<f64>,

    /// Maximum distance from price to an entry zone in points
    #[arg(long, global = true, env = "MAX_ENTRY_DISTANCE")]
    max_entry_distance: Option<f64>,

    /// Only order blocks qualify as entry zones
    #[arg(long, global = true)]
    require_order_block: bool,

    /// Only FVGs qualify as entry zones
    #[arg(long, global = true)]
    require_fvg: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print per-candle structure events for one timeframe as JSON lines
    Scan {
        /// Candle CSV (optionally .zst compressed)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file (.jsonl or .jsonl.zst), stdout if omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Include candles that produced no events
        #[arg(long)]
        all: bool,
    },

    /// Run the full HTF/LTF signal pipeline over one or more candle files
    Replay {
        /// Candle CSVs (optionally .zst compressed), each replayed independently
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,

        /// Higher timeframe width in minutes
        #[arg(long, env = "HTF_MINUTES")]
        htf_minutes: Option<u32>,

        /// Signal output file (.jsonl or .jsonl.zst), stdout if omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Logs go to stderr; stdout carries JSON lines
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("structure_signals=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = build_config(&args)?;

    match args.command {
        Commands::Scan { input, output, all } => {
            run_scan(&input, output.as_deref(), all, &config)?;
        }
        Commands::Replay {
            input,
            htf_minutes,
            output,
        } => {
            if let Some(minutes) = htf_minutes {
                config.htf_minutes = minutes;
            }
            config.validate()?;
            run_replay(&input, output.as_deref(), &config)?;
        }
    }

    Ok(())
}

fn build_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    if let Some(v) = args.swing_lookback {
        config.analyzer.swing_lookback = v;
    }
    if let Some(v) = args.break_confirmation {
        config.analyzer.break_confirmation = v;
    }
    if let Some(v) = args.min_fvg_size {
        config.analyzer.min_fvg_size = v;
    }
    if let Some(v) = args.max_entry_distance {
        config.state_machine.max_entry_distance = v;
    }
    config.state_machine.require_order_block |= args.require_order_block;
    config.state_machine.require_fvg |= args.require_fvg;

    config.validate()?;
    Ok(config)
}

fn open_sink(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) => open_output(path),
        None => Ok(Box::new(std::io::BufWriter::new(std::io::stdout().lock()))),
    }
}

fn run_scan(input: &Path, output: Option<&Path>, all: bool, config: &EngineConfig) -> Result<()> {
    let candles = load_candles(input)?;
    info!(
        "Scanning {} candles from {:?} ({:?} to {:?})",
        candles.len(),
        input,
        candles.first().and_then(|c| c.datetime()),
        candles.last().and_then(|c| c.datetime())
    );

    let mut analyzer = StructureAnalyzer::new(config.analyzer.clone())?;
    let mut out = open_sink(output)?;
    let mut shifts = 0usize;

    for candle in &candles {
        let events = analyzer.process_candle(candle);
        if events.shift.is_some() {
            shifts += 1;
        }
        if all || !events.is_empty() {
            write_json_line(&mut out, &events)?;
        }
    }
    out.flush().context("Failed to flush output")?;

    info!(
        "Scan complete: {} candles, {} structure events, final trend {:?}",
        candles.len(),
        shifts,
        analyzer.trend()
    );
    Ok(())
}

fn run_replay(inputs: &[PathBuf], output: Option<&Path>, config: &EngineConfig) -> Result<()> {
    info!(
        "Replaying {} file(s) with {}m HTF",
        inputs.len(),
        config.htf_minutes
    );

    // Each file gets its own engines; results come back in input order
    let results: Vec<Result<ReplayOutcome>> = inputs
        .par_iter()
        .map(|path| {
            let candles = load_candles(path)?;
            replay(&candles, config).with_context(|| format!("Replay failed for {:?}", path))
        })
        .collect();

    let mut out = open_sink(output)?;
    let mut failures = 0usize;

    for (path, result) in inputs.iter().zip(results) {
        match result {
            Ok(outcome) => {
                for signal in &outcome.signals {
                    write_json_line(&mut out, signal)?;
                }
                let stats = &outcome.stats;
                info!(
                    "{:?}: {} candles ({} HTF) | {} CHoCH, {} MSS, {} BOS | {} transitions | {} signals",
                    path,
                    stats.ltf_candles,
                    stats.htf_candles,
                    stats.chochs,
                    stats.shifts,
                    stats.bos,
                    stats.transitions,
                    stats.signals
                );
            }
            Err(e) => {
                error!("{:?}: {:#}", path, e);
                failures += 1;
            }
        }
    }
    out.flush().context("Failed to flush output")?;

    if failures > 0 {
        bail!("{} of {} file(s) failed", failures, inputs.len());
    }
    Ok(())
}
