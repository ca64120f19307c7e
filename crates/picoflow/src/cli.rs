use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

use picoflow_core::AnalysisVariant;

/// Event file analysed when none is given.
pub const DEFAULT_INPUT: &str = "st_physics_19140004_raw_5000011.picoDst.parquet";

/// Elliptic-flow analysis of PicoDst-style event files
///
/// Examples:
///   picoflow analyze st_physics.picoDst.parquet --variant centrality
///   picoflow analyze --config flow.toml --threads 4
///   picoflow generate toy.parquet --events 5000 --v2 0.08
///   picoflow inspect PicoV2/00v2toy.parquet
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    ///
    /// Ignored when RUST_LOG is set.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the flow analysis over an event file and write the histograms
    Analyze(AnalyzeArgs),
    /// Write toy events carrying a known elliptic-flow signal
    Generate(GenerateArgs),
    /// Print a summary of every histogram in a written collection
    Inspect(InspectArgs),
}

#[derive(Args, Debug, Clone)]
pub struct AnalyzeArgs {
    /// Event file (Parquet or ROOT)
    #[arg(default_value = DEFAULT_INPUT, value_name = "INPUT")]
    pub input: String,

    /// Analysis variant
    #[arg(long, value_parser = parse_variant, value_name = "inclusive|centrality")]
    pub variant: Option<AnalysisVariant>,

    /// TOML configuration file; flags given here take precedence
    #[arg(short, long, value_name = "FILE", env = "PICOFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Base directory of the histogram collections
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Process at most N events (0 for all)
    #[arg(short = 'n', long, value_name = "N")]
    pub max_events: Option<usize>,

    /// Require 0.2 < pT < 2.0 GeV/c instead of the chained comparison
    #[arg(long)]
    pub pt_window: bool,

    /// Worker threads (0 runs on the current thread)
    #[arg(short = 'j', long, value_name = "N")]
    pub threads: Option<usize>,

    /// Also write the collection of every histogram for the centrality variant
    #[arg(long)]
    pub write_processed: bool,

    /// Name of the tree to read from a ROOT file
    #[arg(long, value_name = "NAME")]
    pub tree: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct GenerateArgs {
    /// Output Parquet file
    #[arg(value_name = "OUTPUT")]
    pub output: String,

    /// Number of events
    #[arg(long, default_value_t = 1000)]
    pub events: usize,

    /// Input elliptic-flow coefficient
    #[arg(long, default_value_t = 0.05, allow_negative_numbers = true)]
    pub v2: f64,

    /// Seed of the random number generator
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Smallest number of tracks per event
    #[arg(long, default_value_t = 20)]
    pub mult_min: usize,

    /// Largest number of tracks per event
    #[arg(long, default_value_t = 400)]
    pub mult_max: usize,

    /// Fixed reaction-plane angle in radians (random per event when absent)
    #[arg(long, allow_negative_numbers = true)]
    pub reaction_plane: Option<f64>,

    /// Store momenta as 32-bit floats
    #[arg(long)]
    pub f32: bool,
}

#[derive(Args, Debug, Clone)]
pub struct InspectArgs {
    /// Histogram collection written by `analyze`
    #[arg(value_name = "FILE")]
    pub file: String,
}

fn parse_variant(s: &str) -> Result<AnalysisVariant, String> {
    s.parse().map_err(|e: picoflow_core::PicoFlowError| e.to_string())
}

impl Cli {
    /// The log level implied by `-v` and `-q`.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else {
            match self.verbose {
                0 => tracing::Level::INFO,
                1 => tracing::Level::DEBUG,
                _ => tracing::Level::TRACE,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_defaults() {
        let cli = Cli::try_parse_from(["picoflow", "analyze"]).unwrap();
        assert_eq!(cli.log_level(), tracing::Level::INFO);
        let Command::Analyze(args) = cli.command else {
            panic!("expected the analyze subcommand");
        };
        assert_eq!(args.input, DEFAULT_INPUT);
        assert!(args.variant.is_none());
        assert!(args.max_events.is_none());
        assert!(!args.pt_window);
    }

    #[test]
    fn test_analyze_flags() {
        let cli = Cli::try_parse_from([
            "picoflow",
            "analyze",
            "events.parquet",
            "--variant",
            "centrality",
            "--max-events",
            "10",
            "--pt-window",
            "-j",
            "4",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.log_level(), tracing::Level::TRACE);
        let Command::Analyze(args) = cli.command else {
            panic!("expected the analyze subcommand");
        };
        assert_eq!(args.input, "events.parquet");
        assert_eq!(args.variant, Some(AnalysisVariant::Centrality));
        assert_eq!(args.max_events, Some(10));
        assert!(args.pt_window);
        assert_eq!(args.threads, Some(4));
    }

    #[test]
    fn test_bad_variant() {
        assert!(Cli::try_parse_from(["picoflow", "analyze", "--variant", "peripheral"]).is_err());
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["picoflow", "-q", "-v", "analyze"]).is_err());
        let cli = Cli::try_parse_from(["picoflow", "inspect", "hists.parquet", "-q"]).unwrap();
        assert_eq!(cli.log_level(), tracing::Level::ERROR);
    }

    #[test]
    fn test_generate_args() {
        let cli = Cli::try_parse_from([
            "picoflow",
            "generate",
            "toy.parquet",
            "--events",
            "50",
            "--v2",
            "0.1",
            "--reaction-plane",
            "-0.5",
        ])
        .unwrap();
        let Command::Generate(args) = cli.command else {
            panic!("expected the generate subcommand");
        };
        assert_eq!(args.output, "toy.parquet");
        assert_eq!(args.events, 50);
        assert_eq!(args.v2, 0.1);
        assert_eq!(args.seed, 0);
        assert_eq!((args.mult_min, args.mult_max), (20, 400));
        assert_eq!(args.reaction_plane, Some(-0.5));
    }
}
