use anyhow::{ensure, Context, Result};
use std::{fmt::Write as _, path::PathBuf};
use tracing::{info, warn};

use crate::{
    cli::{AnalyzeArgs, Cli, Command, GenerateArgs, InspectArgs},
    config::Config,
};
use picoflow_core::{
    read_histograms, write_parquet, AnalysisOutput, EventWriteOptions, ExecutionContext,
    FloatPrecision, FlowAnalysis, HistogramCollection, ParquetSink, PicoReader, ToyModel,
};

/// What `analyze` produced.
#[derive(Debug)]
pub struct AnalyzeReport {
    pub output: AnalysisOutput,
    /// Paths of the written histogram collections.
    pub written: Vec<PathBuf>,
}

/// Dispatch a parsed command line.
pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Analyze(args) => {
            let report = analyze(&args)?;
            println!(
                "Average v2 for all events: {}",
                report.output.summary.mean_v2().unwrap_or(f64::NAN)
            );
            if report.output.summary.termination.is_completed() {
                println!("Analysis complete");
            } else {
                println!(
                    "Analysis stopped early ({}); partial histograms written",
                    report.output.summary.termination
                );
            }
            Ok(())
        }
        Command::Generate(args) => generate(&args),
        Command::Inspect(args) => {
            print!("{}", inspect(&args)?);
            Ok(())
        }
    }
}

/// Run the analysis described by `args` (and its configuration file) and write its
/// histogram collections.
pub fn analyze(args: &AnalyzeArgs) -> Result<AnalyzeReport> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    config.merge_with_args(args);
    let analysis_config = config.analysis_config()?;
    let options = config.output_options()?;
    let ctx = ExecutionContext::new(config.thread_policy())
        .context("Failed to set up the execution context")?;

    let mut reader = PicoReader::new(&args.input)
        .with_context(|| format!("Failed to open event file: {}", args.input))?;
    if let Some(tree) = &args.tree {
        reader = reader.with_tree(tree);
    }
    reader
        .init()
        .with_context(|| format!("Failed to read event file: {}", args.input))?;
    reader.set_status("*", false)?;
    for branch in ["Event", "Track", "BTofHit"] {
        reader.set_status(branch, true)?;
    }
    info!(
        input = %reader.path().display(),
        format = ?reader.format(),
        cuts = ?analysis_config.cuts,
        "branches selected"
    );

    let output = FlowAnalysis::new(analysis_config).run_with_context(&mut reader, &ctx);
    reader.finish();
    if !output.summary.termination.is_completed() {
        warn!(
            termination = %output.summary.termination,
            "writing histograms of a partial run"
        );
    }

    let written = output
        .write(&mut ParquetSink, &reader.file_name(), &options)
        .context("Failed to write histogram collections")?;
    Ok(AnalyzeReport { output, written })
}

/// Write toy events to `args.output`.
pub fn generate(args: &GenerateArgs) -> Result<()> {
    ensure!(
        args.v2.is_finite(),
        "--v2 must be a finite number, got {}",
        args.v2
    );
    let model = ToyModel::new(args.v2)
        .with_multiplicity(args.mult_min, args.mult_max)
        .with_reaction_plane(args.reaction_plane);
    let dataset = model
        .generate(args.events, args.seed)
        .context("Invalid toy model")?;
    let precision = if args.f32 {
        FloatPrecision::F32
    } else {
        FloatPrecision::F64
    };
    write_parquet(
        &dataset,
        &args.output,
        &EventWriteOptions::default().precision(precision),
    )
    .with_context(|| format!("Failed to write toy events to {}", args.output))?;
    info!(
        events = dataset.n_events(),
        tracks = dataset.n_tracks(),
        v2 = args.v2,
        path = %args.output,
        "wrote toy events"
    );
    Ok(())
}

/// Read a histogram collection and describe each histogram on its own line.
pub fn inspect(args: &InspectArgs) -> Result<String> {
    let collection = read_histograms(&args.file)
        .with_context(|| format!("Failed to read histograms from {}", args.file))?;
    Ok(describe(&collection))
}

fn describe(collection: &HistogramCollection) -> String {
    let width = collection
        .names()
        .iter()
        .map(|name| name.len())
        .max()
        .unwrap_or(0);
    let mut text = String::new();
    for histogram in collection.iter() {
        let _ = writeln!(
            text,
            "{:<width$}  {}D  entries = {:<10}  integral = {}",
            histogram.name(),
            histogram.dimension(),
            histogram.entries(),
            histogram.integral(),
        );
    }
    text
}
