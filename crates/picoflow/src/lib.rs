//! `picoflow` measures the elliptic flow ($`v_2`$) of charged tracks in PicoDst-style event
//! files with the event-plane method.
//!
//! <div class="warning">
//!
//! This crate is still in an early development phase, and the API is not stable.
//!
//! </div>
//!
//! # Table of Contents
//! - [Key Features](#key-features)
//! - [Quick Start](#quick-start)
//! - [Data Format](#data-format)
//! - [Command Line](#command-line)
//!
//! # Key Features
//! * A single [`FlowAnalysis`] driver with two variants: an inclusive one and one splitting the
//!   per-event $`v_2`$ into ten [`Centrality`] classes using only negative tracks.
//! * Events are read from Parquet or ROOT files through [`PicoReader`], or from any type
//!   implementing [`EventSource`](crate::traits::EventSource).
//! * Fixed-binning histograms with ROOT bin numbering, written to Parquet through a
//!   [`HistogramSink`](crate::traits::HistogramSink).
//! * Optional parallel processing with [`rayon`](https://github.com/rayon-rs/rayon).
//! * A toy generator, [`ToyModel`], producing events with a known input $`v_2`$.
//!
//! # Quick Start
//! ```rust,no_run
//! use picoflow::{
//!     AnalysisConfig, AnalysisVariant, FlowAnalysis, OutputOptions, ParquetSink, PicoReader,
//! };
//!
//! fn main() -> picoflow::PicoFlowResult<()> {
//!     let mut reader = PicoReader::new("st_physics_19140004_raw_5000011.picoDst.parquet")?;
//!     reader.init()?;
//!     let analysis = FlowAnalysis::new(AnalysisConfig::for_variant(AnalysisVariant::Centrality));
//!     let output = analysis.run(&mut reader);
//!     println!(
//!         "Average v2 for all events: {}",
//!         output.summary.mean_v2().unwrap_or(f64::NAN)
//!     );
//!     output.write(&mut ParquetSink, &reader.file_name(), &OutputOptions::default())?;
//!     Ok(())
//! }
//! ```
//!
//! # Data Format
//! Event files hold one row per event. The `Event` branch is a nullable `event_ref_mult`
//! column, the `Track` branch is a set of list columns (`track_gmom_x`, `track_gmom_y`,
//! `track_gmom_z`, `track_n_hits`, `track_is_primary`, `track_charge`) and the `BTofHit`
//! branch is a single `btof_tray` list column. ROOT files with the same branch names are read
//! as well.
//!
//! # Command Line
//! The `picoflow` binary has three subcommands:
//! * `picoflow analyze [INPUT]` runs the analysis and writes the histogram collections,
//! * `picoflow generate OUTPUT` writes toy events,
//! * `picoflow inspect FILE` summarizes a written histogram collection.
//!
//! Settings can also be read from a TOML file, see [`config::Config`].
#![warn(clippy::perf, clippy::style)]

/// Command-line argument definitions.
pub mod cli;
/// Implementations of the command-line subcommands.
pub mod commands;
/// TOML run configuration.
pub mod config;
/// Installation of the `tracing` subscriber.
pub mod logging;

pub use picoflow_core::*;
