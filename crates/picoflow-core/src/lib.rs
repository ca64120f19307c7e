//! # picoflow-core
//!
//! This is an internal crate used by `picoflow`.
#![warn(clippy::perf, clippy::style)]
// #![warn(missing_docs)]

use thiserror::Error;

/// The event-loop driver which turns [`PicoEvent`](crate::data::PicoEvent)s into flow
/// histograms and a global summary.
pub mod analysis;
/// Track quality and acceptance cuts.
pub mod cuts;
/// Methods for loading and manipulating PicoDst-like event data.
pub mod data;
/// Thread policy for running the analysis.
pub mod execution_context;
/// Event-plane and flow-observable calculations.
pub mod flow;
/// Fixed-binning histograms and their persistence.
pub mod histogram;
/// A toy event generator with a known elliptic-flow signal.
pub mod toy;
/// Utility functions, enums, and vectors
pub mod utils;
/// Useful traits for all crate structs
pub mod traits {
    pub use crate::data::EventSource;
    pub use crate::histogram::HistogramSink;
}

pub use crate::analysis::{
    AbortReason, AnalysisConfig, AnalysisOutput, FlowAnalysis, FlowHistograms, FlowSummary,
    OutputCollection, OutputOptions, Termination, V2Histograms,
};
pub use crate::cuts::{PtCut, TrackCuts};
pub use crate::data::{
    read_parquet, read_root, write_parquet, BTofHit, Branch, Dataset, EventMetadata,
    EventWriteOptions, FloatPrecision, PicoEvent, PicoReader, PicoTrack,
};
pub use crate::execution_context::{ExecutionContext, ThreadPolicy};
pub use crate::flow::{EventFlow, FlowVector};
pub use crate::histogram::{
    read_histograms, write_histograms, Histogram, Histogram1D, Histogram2D, HistogramCollection,
    MemorySink, ParquetSink,
};
pub use crate::toy::ToyModel;
pub use crate::utils::enums::{AnalysisVariant, Centrality};
pub use crate::utils::vectors::Vec3;

pub type PicoFlowResult<T> = Result<T, PicoFlowError>;

/// The error type used by all `picoflow` internal methods
#[derive(Error, Debug)]
pub enum PicoFlowError {
    /// An alias for [`std::io::Error`].
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
    /// An alias for [`parquet::errors::ParquetError`].
    #[error("Parquet Error: {0}")]
    ParquetError(#[from] parquet::errors::ParquetError),
    /// An alias for [`arrow::error::ArrowError`].
    #[error("Arrow Error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),
    /// An alias for [`shellexpand::LookupError`].
    #[error("Failed to expand path: {0}")]
    LookupError(#[from] shellexpand::LookupError<std::env::VarError>),
    /// The event source could not deliver the event at the requested index.
    #[error("Failed to read event {index}: {reason}")]
    EventRead {
        /// Index of the event which could not be read
        index: usize,
        /// Description of the failure
        reason: String,
    },
    /// An event was read but carries no event-level metadata (the `Event` branch is missing,
    /// disabled or null for this row).
    #[error("Event {index} has no event metadata")]
    MissingEventMetadata {
        /// Index of the event without metadata
        index: usize,
    },
    /// A required column (or ROOT branch) is not present in the input file.
    #[error("Missing column \"{name}\"")]
    MissingColumn {
        /// Name of the missing column
        name: String,
    },
    /// A column exists but has a type which cannot be interpreted.
    #[error("Column \"{name}\" has unsupported type {datatype}")]
    InvalidColumnType {
        /// Name of the column
        name: String,
        /// Description of the offending type
        datatype: String,
    },
    /// Two sequences which should be aligned have different lengths.
    #[error("{context}: expected length {expected}, found {actual}")]
    LengthMismatch {
        /// Description of what was being compared
        context: String,
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },
    /// Two histograms with different binning were combined, or a stored histogram is
    /// inconsistent with its declared binning.
    #[error("Histogram \"{name}\" mismatch: {reason}")]
    HistogramMismatch {
        /// Name of the histogram
        name: String,
        /// Description of the mismatch
        reason: String,
    },
    /// An error which occurs when the user tries to parse an invalid string of text, typically
    /// into an enum variant.
    #[error("Failed to parse string: \"{name}\" does not correspond to a valid \"{object}\"!")]
    ParseError {
        /// The string which was parsed
        name: String,
        /// The name of the object it failed to parse into
        object: String,
    },
    /// An invalid thread policy was requested.
    #[error("Execution context error: {reason}")]
    ExecutionContextError {
        /// Description of the problem
        reason: String,
    },
    /// An error type for [`rayon`] thread pools
    #[cfg(feature = "rayon")]
    #[error("Error building thread pool: {0}")]
    ThreadPoolError(#[from] rayon::ThreadPoolBuildError),
    /// A custom fallback error for errors too complex or too infrequent to warrant their own error
    /// category.
    #[error("{0}")]
    Custom(String),
}
