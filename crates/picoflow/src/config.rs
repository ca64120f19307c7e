//! Configuration file handling.
//!
//! A run is configured by an optional TOML file whose values are overridden by command-line
//! flags. Every key may be omitted:
//!
//! ```toml
//! variant = "centrality"
//!
//! [cuts]
//! min_n_hits = 15
//! max_abs_eta = 0.5
//! min_event_tracks = 5
//! pt_cut = "window"
//! pt_min = 0.2
//! pt_max = 2.0
//! negative_only = true
//!
//! [output]
//! directory = "."
//! write_processed = false
//!
//! [execution]
//! threads = 0
//! max_events = 0
//! ```

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cli::AnalyzeArgs;
use picoflow_core::{
    cuts::{DEFAULT_PT_MAX, DEFAULT_PT_MIN},
    AnalysisConfig, AnalysisVariant, OutputOptions, PtCut, ThreadPolicy, TrackCuts,
};

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Analysis variant.
    #[serde(default)]
    pub variant: AnalysisVariant,

    /// Track selection overrides.
    #[serde(default)]
    pub cuts: CutsConfig,

    /// Output settings.
    #[serde(default)]
    pub output: OutputConfig,

    /// Threading and event limits.
    #[serde(default)]
    pub execution: ExecutionConfig,
}

/// How the transverse-momentum cut is evaluated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PtCutKind {
    #[default]
    Chained,
    Window,
}

/// Track selection settings. Absent values fall back to the defaults of the variant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CutsConfig {
    pub min_n_hits: Option<i32>,
    pub max_abs_eta: Option<f64>,
    pub min_event_tracks: Option<usize>,
    #[serde(default)]
    pub pt_cut: PtCutKind,
    /// Lower bound of the window cut (GeV/c).
    pub pt_min: Option<f64>,
    /// Upper bound of the window cut (GeV/c).
    pub pt_max: Option<f64>,
    pub negative_only: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Base directory of the histogram collections. `~` and environment variables are expanded.
    #[serde(default = "default_directory")]
    pub directory: String,

    /// Write the collection of every histogram for the centrality variant too.
    #[serde(default)]
    pub write_processed: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            write_processed: false,
        }
    }
}

fn default_directory() -> String {
    ".".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionConfig {
    /// Worker threads, `0` runs on the current thread.
    #[serde(default)]
    pub threads: usize,

    /// Maximum number of events, `0` processes every event.
    #[serde(default)]
    pub max_events: usize,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// Only values given explicitly on the command line replace those from the file.
    pub fn merge_with_args(&mut self, args: &AnalyzeArgs) {
        if let Some(variant) = args.variant {
            self.variant = variant;
        }
        if let Some(ref directory) = args.output_dir {
            self.output.directory = directory.to_string_lossy().into_owned();
        }
        if let Some(max_events) = args.max_events {
            self.execution.max_events = max_events;
        }
        if let Some(threads) = args.threads {
            self.execution.threads = threads;
        }
        if args.pt_window {
            self.cuts.pt_cut = PtCutKind::Window;
        }
        if args.write_processed {
            self.output.write_processed = true;
        }
    }

    /// The track cuts: the variant's defaults with every configured value applied.
    pub fn track_cuts(&self) -> Result<TrackCuts> {
        let defaults = TrackCuts::for_variant(self.variant);
        let pt_cut = match self.cuts.pt_cut {
            PtCutKind::Chained => PtCut::Chained,
            PtCutKind::Window => {
                let min = self.cuts.pt_min.unwrap_or(DEFAULT_PT_MIN);
                let max = self.cuts.pt_max.unwrap_or(DEFAULT_PT_MAX);
                ensure!(min < max, "Empty pT window: pt_min = {min}, pt_max = {max}");
                PtCut::Window { min, max }
            }
        };
        Ok(TrackCuts {
            min_n_hits: self.cuts.min_n_hits.unwrap_or(defaults.min_n_hits),
            max_abs_eta: self.cuts.max_abs_eta.unwrap_or(defaults.max_abs_eta),
            min_event_tracks: self
                .cuts
                .min_event_tracks
                .unwrap_or(defaults.min_event_tracks),
            pt_cut,
            negative_only: self.cuts.negative_only.unwrap_or(defaults.negative_only),
        })
    }

    pub fn analysis_config(&self) -> Result<AnalysisConfig> {
        let max_events = match self.execution.max_events {
            0 => None,
            n => Some(n),
        };
        Ok(AnalysisConfig::for_variant(self.variant)
            .with_cuts(self.track_cuts()?)
            .with_max_events(max_events))
    }

    pub fn output_options(&self) -> Result<OutputOptions> {
        let directory = shellexpand::full(&self.output.directory).with_context(|| {
            format!("Failed to expand output directory: {}", self.output.directory)
        })?;
        Ok(OutputOptions {
            directory: PathBuf::from(directory.as_ref()),
            write_processed: self.output.write_processed,
        })
    }

    pub fn thread_policy(&self) -> ThreadPolicy {
        ThreadPolicy::from_threads(self.execution.threads)
    }
}
