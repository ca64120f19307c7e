use accurate::{sum::Klein, traits::*};
use auto_ops::impl_op_ex;
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{
    fmt::Display,
    path::{Path, PathBuf},
};
use tracing::{debug, error, info};

use crate::{
    cuts::TrackCuts,
    data::{EventSource, PicoEvent},
    execution_context::ExecutionContext,
    flow::EventFlow,
    histogram::{Histogram1D, Histogram2D, HistogramCollection, HistogramSink},
    utils::enums::{AnalysisVariant, Centrality},
    PicoFlowResult,
};

/// File-name prefix of the collection holding every histogram.
pub const PROCESSED_PREFIX: &str = "00PROCESSED";
/// File-name prefix of the event-plane angle collection.
pub const PSI_PREFIX: &str = "00PsiCALC";
/// File-name prefix of the per-centrality $`v_2`$ collection.
pub const V2_PREFIX: &str = "00v2";
/// Subdirectory of the collection holding every histogram.
pub const PROCESSED_SUBDIR: &str = "PicoHists";
/// Subdirectory of the event-plane angle collection.
pub const PSI_SUBDIR: &str = "PicoPsiRP";
/// Subdirectory of the per-centrality $`v_2`$ collection.
pub const V2_SUBDIR: &str = "PicoV2";

/// Events held in memory at once by the parallel event loop.
#[cfg(feature = "rayon")]
const PARALLEL_CHUNK_SIZE: usize = 4096;

/// Settings of a flow analysis run.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Which histograms are produced and how $`v_2`$ is binned.
    pub variant: AnalysisVariant,
    /// Track selection used for both passes over the tracks.
    pub cuts: TrackCuts,
    /// Upper limit on the number of events to process (`None` for all).
    pub max_events: Option<usize>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self::for_variant(AnalysisVariant::default())
    }
}

impl AnalysisConfig {
    /// The standard configuration of a variant, with the variant's default cuts.
    pub fn for_variant(variant: AnalysisVariant) -> Self {
        Self {
            variant,
            cuts: TrackCuts::for_variant(variant),
            max_events: None,
        }
    }

    /// Replace the track cuts.
    pub fn with_cuts(mut self, cuts: TrackCuts) -> Self {
        self.cuts = cuts;
        self
    }

    /// Limit the number of processed events.
    pub fn with_max_events(mut self, max_events: Option<usize>) -> Self {
        self.max_events = max_events;
        self
    }

    fn events_to_read(&self, available: usize) -> usize {
        self.max_events
            .map_or(available, |limit| limit.min(available))
    }
}

/// The per-event $`v_2`$ histogram(s).
#[derive(Clone, Debug, PartialEq)]
pub enum V2Histograms {
    /// One histogram (`hV2`) for every event.
    Inclusive(Histogram1D),
    /// One histogram per centrality class, indexed by [`Centrality::index`].
    Centrality(Vec<Histogram1D>),
}

impl V2Histograms {
    fn new(variant: AnalysisVariant) -> Self {
        match variant {
            AnalysisVariant::Inclusive => V2Histograms::Inclusive(Histogram1D::new(
                "hV2",
                "v_{2} per Event;v_{2}",
                200,
                (-0.4, 0.4),
            )),
            AnalysisVariant::Centrality => V2Histograms::Centrality(
                Centrality::ALL
                    .iter()
                    .map(|class| {
                        Histogram1D::new(
                            class.histogram_name(),
                            &format!("v_{{2}} for {};v_{{2}}", class.label()),
                            200,
                            (-0.2, 0.2),
                        )
                    })
                    .collect(),
            ),
        }
    }

    /// Fill `v2` into the histogram for `centrality` (ignored by the inclusive variant).
    pub fn fill(&mut self, v2: f64, centrality: Centrality) {
        match self {
            V2Histograms::Inclusive(h) => h.fill(v2),
            V2Histograms::Centrality(hs) => hs[centrality.index()].fill(v2),
        }
    }

    /// All $`v_2`$ histograms, ordered from most peripheral to most central.
    pub fn histograms(&self) -> &[Histogram1D] {
        match self {
            V2Histograms::Inclusive(h) => std::slice::from_ref(h),
            V2Histograms::Centrality(hs) => hs,
        }
    }

    /// The histogram of a centrality class, if the variant splits by centrality.
    pub fn for_centrality(&self, centrality: Centrality) -> Option<&Histogram1D> {
        match self {
            V2Histograms::Inclusive(_) => None,
            V2Histograms::Centrality(hs) => hs.get(centrality.index()),
        }
    }
}

impl_op_ex!(+= |a: &mut V2Histograms, b: &V2Histograms| {
    match (a, b) {
        (V2Histograms::Inclusive(a), V2Histograms::Inclusive(b)) => *a += b,
        (V2Histograms::Centrality(a), V2Histograms::Centrality(b)) => {
            a.iter_mut().zip(b).for_each(|(a, b)| *a += b)
        }
        _ => debug_assert!(false, "cannot merge v2 histograms of different variants"),
    }
});

/// Every histogram filled by the analysis.
#[derive(Clone, Debug, PartialEq)]
pub struct FlowHistograms {
    /// `hRefMult`: reference multiplicity of every read event.
    pub ref_mult: Histogram1D,
    /// `hTransvMomentum`: $`p_T`$ of accepted tracks.
    pub transverse_momentum: Histogram1D,
    /// `hBTofTrayHit`: tray numbers of the BTof hits of events with an event plane.
    pub btof_tray: Histogram1D,
    /// `hPhiAngles`: azimuth of accepted tracks.
    pub phi: Histogram1D,
    /// Per-event $`v_2`$.
    pub v2: V2Histograms,
    /// `hPsiRP`: event-plane angle.
    pub psi: Histogram1D,
    /// `hV2Calc`: `(sum_var, n_tracks)` of events with an event plane.
    pub v2_calc: Histogram2D,
}

impl FlowHistograms {
    /// Empty histograms for an analysis variant.
    pub fn new(variant: AnalysisVariant) -> Self {
        Self {
            ref_mult: Histogram1D::new(
                "hRefMult",
                "Reference multiplicity;refMult",
                500,
                (-0.5, 499.5),
            ),
            transverse_momentum: Histogram1D::new(
                "hTransvMomentum",
                "Track transverse momentum;p_{T} (GeV/c)",
                200,
                (0.0, 2.0),
            ),
            btof_tray: Histogram1D::new(
                "hBTofTrayHit",
                "BTof tray number with the hit",
                120,
                (-0.5, 119.5),
            ),
            phi: Histogram1D::new(
                "hPhiAngles",
                "#phi_{T} for Each Track;#phi_{T} (rad)",
                200,
                (-3.2, 3.2),
            ),
            v2: V2Histograms::new(variant),
            psi: Histogram1D::new(
                "hPsiRP",
                "Reaction Plane Angle;#Psi_{RP} (rad)",
                200,
                (-1.0, 1.0),
            ),
            v2_calc: Histogram2D::new(
                "hV2Calc",
                "Sums for v_{2} Calculation;cos(2(#phi-#Psi_{RP});/N",
                200,
                (-100.0, 100.0),
                200,
                (500.0, 2000.0),
            ),
        }
    }

    /// Every histogram, in the order they are written.
    pub fn collection(&self) -> HistogramCollection {
        let mut collection = HistogramCollection::new();
        collection.insert(self.ref_mult.clone());
        collection.insert(self.transverse_momentum.clone());
        collection.insert(self.btof_tray.clone());
        for h in self.v2.histograms() {
            collection.insert(h.clone());
        }
        collection.insert(self.v2_calc.clone());
        collection.insert(self.phi.clone());
        collection.insert(self.psi.clone());
        collection
    }

    /// The event-plane angle histogram alone.
    pub fn psi_collection(&self) -> HistogramCollection {
        [self.psi.clone()].into_iter().collect()
    }

    /// The $`v_2`$ histogram(s) alone.
    pub fn v2_collection(&self) -> HistogramCollection {
        self.v2.histograms().iter().cloned().collect()
    }
}

impl_op_ex!(+= |a: &mut FlowHistograms, b: &FlowHistograms| {
    a.ref_mult += &b.ref_mult;
    a.transverse_momentum += &b.transverse_momentum;
    a.btof_tray += &b.btof_tray;
    a.phi += &b.phi;
    a.v2 += &b.v2;
    a.psi += &b.psi;
    a.v2_calc += &b.v2_calc;
});

/// Why an event loop stopped before its last event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    /// The event source failed to deliver the event.
    ReadFailed(String),
    /// The event has no event-level metadata.
    MissingMetadata,
}

impl Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::ReadFailed(reason) => write!(f, "read failed ({reason})"),
            AbortReason::MissingMetadata => write!(f, "event metadata is missing"),
        }
    }
}

/// How the event loop ended.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// Every requested event was processed.
    #[default]
    Completed,
    /// The loop stopped at `index`; events before it were processed.
    Aborted {
        /// Index of the event which could not be used
        index: usize,
        /// What went wrong
        reason: AbortReason,
    },
}

impl Termination {
    pub fn is_completed(&self) -> bool {
        matches!(self, Termination::Completed)
    }
}

impl Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Termination::Completed => write!(f, "completed"),
            Termination::Aborted { index, reason } => {
                write!(f, "aborted at event {index}: {reason}")
            }
        }
    }
}

/// Global results of a run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowSummary {
    /// Events the loop was asked to process.
    pub events_requested: usize,
    /// Events read with metadata and processed.
    pub events_read: usize,
    /// Processed events with a defined event plane.
    pub events_with_plane: usize,
    /// Processed events skipped because $`Q_x = 0`$.
    pub events_skipped: usize,
    /// $`\sum \cos 2(\phi - \Psi)`$ over all events with an event plane.
    pub sum_var: f64,
    /// Total stored tracks of all events with an event plane.
    pub n_tracks: u64,
    /// How the event loop ended.
    pub termination: Termination,
}

impl FlowSummary {
    /// The event-weighted average $`v_2`$, `sum_var / n_tracks`, or `None` if no tracks were
    /// summed.
    pub fn mean_v2(&self) -> Option<f64> {
        if self.n_tracks == 0 {
            None
        } else {
            Some(self.sum_var / self.n_tracks as f64)
        }
    }
}

/// Histograms and partial sums of the events processed by one worker.
#[derive(Clone, Debug)]
struct FlowAccumulator {
    histograms: FlowHistograms,
    sum_var: Klein<f64>,
    n_tracks: u64,
    events: usize,
    with_plane: usize,
    skipped: usize,
}

impl FlowAccumulator {
    fn new(variant: AnalysisVariant) -> Self {
        Self {
            histograms: FlowHistograms::new(variant),
            sum_var: Klein::zero(),
            n_tracks: 0,
            events: 0,
            with_plane: 0,
            skipped: 0,
        }
    }

    fn process(&mut self, index: usize, event: &PicoEvent, ref_mult: i32, cuts: &TrackCuts) {
        let histograms = &mut self.histograms;
        self.events += 1;
        histograms.ref_mult.fill(ref_mult as f64);
        let centrality = Centrality::from_ref_mult(ref_mult);

        let flow = EventFlow::compute_with(event, cuts, |track| {
            histograms.transverse_momentum.fill(track.g_pt());
            histograms.phi.fill(track.phi());
        });
        let (Some(psi), Some(v2)) = (flow.psi, flow.v2()) else {
            debug!(
                index,
                n_accepted = flow.n_accepted,
                "Qx = 0, no event plane; skipping flow fills"
            );
            self.skipped += 1;
            return;
        };

        for hit in &event.btof_hits {
            histograms.btof_tray.fill(hit.tray as f64);
        }
        histograms.psi.fill(psi);
        histograms.v2.fill(v2, centrality);
        histograms
            .v2_calc
            .fill(flow.sum_var, flow.n_tracks as f64);
        self.sum_var += flow.sum_var;
        self.with_plane += 1;
        self.n_tracks += flow.n_tracks as u64;
    }

    fn merge(mut self, other: Self) -> Self {
        self.histograms += &other.histograms;
        self.sum_var = self.sum_var + other.sum_var;
        self.n_tracks += other.n_tracks;
        self.events += other.events;
        self.with_plane += other.with_plane;
        self.skipped += other.skipped;
        self
    }
}

/// Options controlling where and which histogram collections are written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputOptions {
    /// Base directory; each collection goes into its own subdirectory.
    pub directory: PathBuf,
    /// Also write the collection of every histogram for the centrality variant. The inclusive
    /// variant always writes it.
    pub write_processed: bool,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            write_processed: false,
        }
    }
}

/// A histogram collection together with its output location.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputCollection {
    /// Literal prefix prepended to the input file name.
    pub prefix: &'static str,
    /// Subdirectory of [`OutputOptions::directory`].
    pub subdirectory: &'static str,
    /// The histograms to write.
    pub collection: HistogramCollection,
}

impl OutputCollection {
    /// Target path for an input named `input_file_name`.
    pub fn path(&self, directory: &Path, input_file_name: &str) -> PathBuf {
        directory
            .join(self.subdirectory)
            .join(format!("{}{}", self.prefix, input_file_name))
    }
}

/// The result of a run: the filled histograms and the global summary.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalysisOutput {
    /// The variant which produced the histograms.
    pub variant: AnalysisVariant,
    /// All filled histograms.
    pub histograms: FlowHistograms,
    /// Global accumulators and loop bookkeeping.
    pub summary: FlowSummary,
}

impl AnalysisOutput {
    /// The collections to write for this variant.
    pub fn collections(&self, options: &OutputOptions) -> Vec<OutputCollection> {
        let processed = OutputCollection {
            prefix: PROCESSED_PREFIX,
            subdirectory: PROCESSED_SUBDIR,
            collection: self.histograms.collection(),
        };
        match self.variant {
            AnalysisVariant::Inclusive => vec![
                processed,
                OutputCollection {
                    prefix: PSI_PREFIX,
                    subdirectory: PSI_SUBDIR,
                    collection: self.histograms.psi_collection(),
                },
            ],
            AnalysisVariant::Centrality => {
                let mut collections = Vec::with_capacity(2);
                if options.write_processed {
                    collections.push(processed);
                }
                collections.push(OutputCollection {
                    prefix: V2_PREFIX,
                    subdirectory: V2_SUBDIR,
                    collection: self.histograms.v2_collection(),
                });
                collections
            }
        }
    }

    /// Write every collection through `sink`, returning the paths written.
    pub fn write<S: HistogramSink>(
        &self,
        sink: &mut S,
        input_file_name: &str,
        options: &OutputOptions,
    ) -> PicoFlowResult<Vec<PathBuf>> {
        let mut written = Vec::new();
        for output in self.collections(options) {
            let path = output.path(&options.directory, input_file_name);
            sink.write_collection(&path, &output.collection)?;
            info!(
                path = %path.display(),
                histograms = output.collection.len(),
                "wrote histogram collection"
            );
            written.push(path);
        }
        Ok(written)
    }
}

/// The event-plane elliptic-flow analysis.
///
/// Every event is processed in two passes over its tracks: the accepted tracks build the
/// flow vector and event-plane angle, then the same selection is evaluated again to sum
/// $`\cos 2(\phi - \Psi)`$. An unreadable event or one without metadata ends the loop; the
/// histograms and sums gathered up to that point are kept.
///
/// ```ignore
/// let analysis = FlowAnalysis::new(AnalysisConfig::for_variant(AnalysisVariant::Centrality));
/// let mut reader = PicoReader::new("st_physics.picoDst.parquet")?;
/// reader.init()?;
/// let output = analysis.run(&mut reader);
/// println!("Average v2 for all events: {}", output.summary.mean_v2().unwrap_or(f64::NAN));
/// output.write(&mut ParquetSink, &reader.file_name(), &OutputOptions::default())?;
/// ```
#[derive(Clone, Debug, Default)]
pub struct FlowAnalysis {
    config: AnalysisConfig,
}

impl FlowAnalysis {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Run over `source` on the current thread.
    pub fn run<S: EventSource>(&self, source: S) -> AnalysisOutput {
        self.run_with_context(source, &ExecutionContext::default())
    }

    /// Run over `source` using the thread policy of `ctx`.
    ///
    /// Events are always read in order on the calling thread, so the loop stops at the same
    /// event regardless of the policy. With a parallel policy the read events are then
    /// processed on the pool and the per-thread results merged.
    pub fn run_with_context<S: EventSource>(
        &self,
        mut source: S,
        ctx: &ExecutionContext,
    ) -> AnalysisOutput {
        let events_requested = self.config.events_to_read(source.n_events());
        info!(
            variant = %self.config.variant,
            events = events_requested,
            "Number of events to read: {events_requested}"
        );

        #[cfg(feature = "rayon")]
        let (accumulator, termination) = if ctx.is_parallel() {
            self.run_parallel(&mut source, events_requested, ctx)
        } else {
            self.run_sequential(&mut source, events_requested)
        };
        #[cfg(not(feature = "rayon"))]
        let (accumulator, termination) = {
            let _ = ctx;
            self.run_sequential(&mut source, events_requested)
        };

        let summary = FlowSummary {
            events_requested,
            events_read: accumulator.events,
            events_with_plane: accumulator.with_plane,
            events_skipped: accumulator.skipped,
            sum_var: accumulator.sum_var.sum(),
            n_tracks: accumulator.n_tracks,
            termination,
        };
        info!(
            read = summary.events_read,
            with_plane = summary.events_with_plane,
            skipped = summary.events_skipped,
            termination = %summary.termination,
            "event loop finished"
        );
        AnalysisOutput {
            variant: self.config.variant,
            histograms: accumulator.histograms,
            summary,
        }
    }

    fn read_event<S: EventSource>(
        source: &mut S,
        index: usize,
    ) -> Result<(PicoEvent, i32), AbortReason> {
        let event = source.read_event(index).map_err(|err| {
            error!(index, %err, "Something went wrong in event loop, aborting");
            AbortReason::ReadFailed(err.to_string())
        })?;
        match event.ref_mult() {
            Some(ref_mult) => Ok((event, ref_mult)),
            None => {
                error!(index, "Event does not exist, aborting");
                Err(AbortReason::MissingMetadata)
            }
        }
    }

    fn run_sequential<S: EventSource>(
        &self,
        source: &mut S,
        events_requested: usize,
    ) -> (FlowAccumulator, Termination) {
        let mut accumulator = FlowAccumulator::new(self.config.variant);
        for index in 0..events_requested {
            match Self::read_event(source, index) {
                Ok((event, ref_mult)) => {
                    accumulator.process(index, &event, ref_mult, &self.config.cuts)
                }
                Err(reason) => return (accumulator, Termination::Aborted { index, reason }),
            }
        }
        (accumulator, Termination::Completed)
    }

    #[cfg(feature = "rayon")]
    fn run_parallel<S: EventSource>(
        &self,
        source: &mut S,
        events_requested: usize,
        ctx: &ExecutionContext,
    ) -> (FlowAccumulator, Termination) {
        self.run_parallel_chunked(source, events_requested, ctx, PARALLEL_CHUNK_SIZE)
    }

    /// Read up to `chunk_size` events, process them on the pool, and merge into the running
    /// result before reading the next chunk.
    #[cfg(feature = "rayon")]
    fn run_parallel_chunked<S: EventSource>(
        &self,
        source: &mut S,
        events_requested: usize,
        ctx: &ExecutionContext,
        chunk_size: usize,
    ) -> (FlowAccumulator, Termination) {
        let variant = self.config.variant;
        let cuts = &self.config.cuts;
        let chunk_size = chunk_size.max(1);
        let mut accumulator = FlowAccumulator::new(variant);
        let mut termination = Termination::Completed;
        let mut chunk = Vec::with_capacity(chunk_size.min(events_requested));
        let mut start = 0;
        while start < events_requested && termination.is_completed() {
            let end = (start + chunk_size).min(events_requested);
            chunk.clear();
            for index in start..end {
                match Self::read_event(source, index) {
                    Ok((event, ref_mult)) => chunk.push((index, event, ref_mult)),
                    Err(reason) => {
                        termination = Termination::Aborted { index, reason };
                        break;
                    }
                }
            }
            let partial = ctx.install(|| {
                chunk
                    .par_iter()
                    .fold(
                        || FlowAccumulator::new(variant),
                        |mut acc, (index, event, ref_mult)| {
                            acc.process(*index, event, *ref_mult, cuts);
                            acc
                        },
                    )
                    .reduce(|| FlowAccumulator::new(variant), FlowAccumulator::merge)
            });
            accumulator = accumulator.merge(partial);
            start = end;
        }
        (accumulator, termination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::{test_event, BTofHit, Dataset, PicoTrack},
        execution_context::ThreadPolicy,
        histogram::{read_histograms, MemorySink, ParquetSink},
        PicoFlowError, Vec3,
    };
    use approx::assert_relative_eq;
    use std::{env, fs};

    /// Six accepted tracks along the x and y axes: Qx cancels exactly.
    fn no_plane_event(ref_mult: i32) -> PicoEvent {
        let tracks = (0..6)
            .map(|i| {
                let g_mom = if i % 2 == 0 {
                    Vec3::new(0.5, 0.0, 0.0)
                } else {
                    Vec3::new(0.0, 0.5, 0.0)
                };
                PicoTrack::new(g_mom, 20, true, -1)
            })
            .collect();
        PicoEvent::new(ref_mult, tracks, vec![BTofHit::new(10)])
    }

    /// Five accepted tracks at phi = 0 plus two rejected ones: Psi = 0, sum_var = 5.
    fn aligned_event(ref_mult: i32) -> PicoEvent {
        let mut tracks: Vec<PicoTrack> = (0..5)
            .map(|_| PicoTrack::new(Vec3::new(1.0, 0.0, 0.0), 20, true, -1))
            .collect();
        tracks.push(PicoTrack::new(Vec3::new(1.0, 0.0, 0.0), 5, true, -1));
        tracks.push(PicoTrack::new(Vec3::new(0.0, 1.0, 0.0), 20, false, -1));
        PicoEvent::new(ref_mult, tracks, vec![BTofHit::new(1), BTofHit::new(2)])
    }

    struct FailingSource {
        events: Vec<PicoEvent>,
        fail_at: usize,
    }

    impl EventSource for FailingSource {
        fn n_events(&self) -> usize {
            self.events.len() + 5
        }

        fn read_event(&mut self, index: usize) -> PicoFlowResult<PicoEvent> {
            if index >= self.fail_at {
                return Err(PicoFlowError::EventRead {
                    index,
                    reason: "corrupt basket".to_string(),
                });
            }
            Ok(self.events[index].clone())
        }
    }

    #[test]
    fn test_two_event_trace() {
        let dataset = Dataset::new(vec![test_event(), aligned_event(300)]);
        let output = FlowAnalysis::default().run(dataset);
        let summary = &output.summary;
        assert_eq!(summary.termination, Termination::Completed);
        assert_eq!(summary.events_requested, 2);
        assert_eq!(summary.events_read, 2);
        assert_eq!(summary.events_with_plane, 2);
        assert_eq!(summary.events_skipped, 0);
        assert_eq!(summary.n_tracks, 6 + 7);
        let expected = (1.1680793009727637 + 5.0) / 13.0;
        assert_relative_eq!(summary.mean_v2().unwrap(), expected, epsilon = 1e-12);

        let h = &output.histograms;
        assert_eq!(h.ref_mult.entries(), 2);
        assert_eq!(h.ref_mult.bin_content(43), 1.0);
        assert_eq!(h.ref_mult.bin_content(301), 1.0);
        assert_eq!(h.transverse_momentum.entries(), 4 + 5);
        assert_eq!(h.phi.entries(), 9);
        assert_eq!(h.btof_tray.entries(), 5);
        assert_eq!(h.psi.entries(), 2);
        let V2Histograms::Inclusive(v2) = &h.v2 else {
            panic!("inclusive variant should have one v2 histogram");
        };
        assert_eq!(v2.entries(), 2);
        assert_eq!(h.v2_calc.entries(), 2);
        // both events have fewer than 500 tracks
        assert_eq!(h.v2_calc.bin_content(102, 0), 1.0);
        assert_eq!(h.v2_calc.bin_content(106, 0), 1.0);
    }

    #[test]
    fn test_zero_qx_event_skipped() {
        let dataset = Dataset::new(vec![no_plane_event(50), aligned_event(60)]);
        let output = FlowAnalysis::default().run(dataset);
        let summary = &output.summary;
        assert_eq!(summary.events_read, 2);
        assert_eq!(summary.events_with_plane, 1);
        assert_eq!(summary.events_skipped, 1);
        assert_eq!(summary.n_tracks, 7);
        assert_relative_eq!(summary.sum_var, 5.0, epsilon = 1e-12);
        assert_relative_eq!(summary.mean_v2().unwrap(), 5.0 / 7.0, epsilon = 1e-12);

        let h = &output.histograms;
        // read and first-pass fills are kept for the skipped event
        assert_eq!(h.ref_mult.entries(), 2);
        assert_eq!(h.transverse_momentum.entries(), 6 + 5);
        assert_eq!(h.phi.entries(), 11);
        // flow fills only come from the second event
        assert_eq!(h.psi.entries(), 1);
        assert_eq!(h.btof_tray.entries(), 2);
        assert_eq!(h.btof_tray.bin_content(11), 0.0);
        assert_eq!(h.v2_calc.entries(), 1);
    }

    #[test]
    fn test_only_skipped_events() {
        let output = FlowAnalysis::default().run(Dataset::new(vec![no_plane_event(10)]));
        assert_eq!(output.summary.n_tracks, 0);
        assert!(output.summary.mean_v2().is_none());
    }

    #[test]
    fn test_centrality_variant() {
        let config = AnalysisConfig::for_variant(AnalysisVariant::Centrality);
        let dataset = Dataset::new(vec![test_event(), aligned_event(300), aligned_event(10)]);
        let output = FlowAnalysis::new(config).run(dataset);
        let v2 = &output.histograms.v2;
        assert_eq!(v2.histograms().len(), 10);
        let count = |class: Centrality| v2.for_centrality(class).unwrap().entries();
        assert_eq!(count(Centrality::Bin60To70), 1); // refMult 42
        assert_eq!(count(Centrality::Central0To5), 1); // refMult 300
        assert_eq!(count(Centrality::Peripheral80To100), 1); // refMult 10
        assert_eq!(count(Centrality::Bin20To30), 0);
        // 5/7 lies beyond the +-0.2 range
        assert_eq!(
            v2.for_centrality(Centrality::Central0To5).unwrap().overflow(),
            1.0
        );
        assert_relative_eq!(
            output.summary.sum_var,
            1.3223662848489002 + 10.0,
            epsilon = 1e-12
        );
        assert_eq!(output.histograms.transverse_momentum.entries(), 2 + 5 + 5);
    }

    #[test]
    fn test_max_events() {
        let dataset = Dataset::new(vec![test_event(); 4]);
        let config = AnalysisConfig::default().with_max_events(Some(3));
        let output = FlowAnalysis::new(config).run(dataset);
        assert_eq!(output.summary.events_requested, 3);
        assert_eq!(output.summary.events_read, 3);
        assert!(output.summary.termination.is_completed());
    }

    #[test]
    fn test_abort_on_read_failure() {
        let mut source = FailingSource {
            events: vec![test_event(), aligned_event(100), test_event()],
            fail_at: 2,
        };
        let output = FlowAnalysis::default().run(&mut source);
        let summary = &output.summary;
        assert_eq!(summary.events_requested, 8);
        assert_eq!(summary.events_read, 2);
        assert!(matches!(
            summary.termination,
            Termination::Aborted {
                index: 2,
                reason: AbortReason::ReadFailed(_)
            }
        ));
        assert_eq!(output.histograms.ref_mult.entries(), 2);
    }

    #[test]
    fn test_abort_on_missing_metadata() {
        let dataset = Dataset::new(vec![
            aligned_event(30),
            PicoEvent::without_metadata(vec![], vec![]),
            aligned_event(30),
        ]);
        let output = FlowAnalysis::default().run(dataset);
        assert_eq!(
            output.summary.termination,
            Termination::Aborted {
                index: 1,
                reason: AbortReason::MissingMetadata
            }
        );
        assert_eq!(output.summary.events_read, 1);
        assert_eq!(output.summary.n_tracks, 7);
    }

    #[test]
    fn test_partial_output_written() {
        let dir = env::temp_dir().join(format!("picoflow_analysis_test_{}", fastrand::u64(..)));
        let mut source = FailingSource {
            events: vec![aligned_event(20), test_event()],
            fail_at: 2,
        };
        let output = FlowAnalysis::default().run(&mut source);
        assert!(!output.summary.termination.is_completed());
        let options = OutputOptions {
            directory: dir.clone(),
            write_processed: false,
        };
        let written = output
            .write(&mut ParquetSink, "input.picoDst.parquet", &options)
            .unwrap();
        assert_eq!(
            written,
            vec![
                dir.join("PicoHists/00PROCESSEDinput.picoDst.parquet"),
                dir.join("PicoPsiRP/00PsiCALCinput.picoDst.parquet"),
            ]
        );
        let processed = read_histograms(written[0].to_str().unwrap()).unwrap();
        assert_eq!(
            processed.names(),
            vec![
                "hRefMult",
                "hTransvMomentum",
                "hBTofTrayHit",
                "hV2",
                "hV2Calc",
                "hPhiAngles",
                "hPsiRP"
            ]
        );
        assert_eq!(processed.get_1d("hRefMult").unwrap().entries(), 2);
        assert_eq!(processed.get_1d("hPsiRP").unwrap().entries(), 2);
        let psi = read_histograms(written[1].to_str().unwrap()).unwrap();
        assert_eq!(psi.names(), vec!["hPsiRP"]);
        assert_eq!(psi.get_1d("hPsiRP"), Some(&output.histograms.psi));
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_centrality_collections() {
        let output = FlowAnalysis::new(AnalysisConfig::for_variant(AnalysisVariant::Centrality))
            .run(Dataset::new(vec![test_event()]));
        let mut sink = MemorySink::new();
        let options = OutputOptions::default();
        output.write(&mut sink, "f.root", &options).unwrap();
        assert_eq!(sink.written.len(), 1);
        let v2 = sink.find("00v2f.root").unwrap();
        assert_eq!(v2.len(), 10);
        assert_eq!(v2.names()[0], "hV280");
        assert_eq!(v2.names()[9], "hV20");
        assert!(sink.written[0].0.starts_with("./PicoV2"));

        let with_processed = OutputOptions {
            write_processed: true,
            ..Default::default()
        };
        let collections = output.collections(&with_processed);
        assert_eq!(collections.len(), 2);
        assert_eq!(collections[0].prefix, PROCESSED_PREFIX);
        assert_eq!(collections[0].collection.len(), 16);
    }

    #[cfg(feature = "rayon")]
    #[test]
    fn test_parallel_matches_sequential() {
        let mut events = Vec::new();
        for i in 0..64 {
            events.push(test_event());
            events.push(aligned_event(20 + 7 * i));
            if i % 5 == 0 {
                events.push(no_plane_event(3 * i));
            }
        }
        events.push(PicoEvent::without_metadata(vec![], vec![]));
        events.push(test_event());
        let dataset = Dataset::new(events);
        let config = AnalysisConfig::for_variant(AnalysisVariant::Centrality);
        let sequential = FlowAnalysis::new(config).run(dataset.clone());
        let ctx = ExecutionContext::new(ThreadPolicy::Dedicated(3)).unwrap();
        let parallel = FlowAnalysis::new(config).run_with_context(dataset, &ctx);
        assert_eq!(parallel.histograms, sequential.histograms);
        assert_eq!(parallel.summary.termination, sequential.summary.termination);
        assert_eq!(parallel.summary.events_read, sequential.summary.events_read);
        assert_eq!(parallel.summary.n_tracks, sequential.summary.n_tracks);
        assert_relative_eq!(
            parallel.summary.sum_var,
            sequential.summary.sum_var,
            epsilon = 1e-9
        );
    }

    #[cfg(feature = "rayon")]
    #[test]
    fn test_parallel_chunks_stop_at_failed_read() {
        let events: Vec<PicoEvent> = (0..10).map(|i| aligned_event(40 + i)).collect();
        let analysis = FlowAnalysis::default();
        let ctx = ExecutionContext::new(ThreadPolicy::Dedicated(2)).unwrap();
        let mut source = FailingSource {
            events: events.clone(),
            fail_at: 7,
        };
        let (accumulator, termination) =
            analysis.run_parallel_chunked(&mut source, 15, &ctx, 3);
        assert!(matches!(termination, Termination::Aborted { index: 7, .. }));
        assert_eq!(accumulator.events, 7);
        assert_eq!(accumulator.with_plane, 7);
        assert_relative_eq!(accumulator.sum_var.sum(), 35.0, epsilon = 1e-12);

        let (accumulator, termination) =
            analysis.run_parallel_chunked(&mut Dataset::new(events), 10, &ctx, 4);
        assert!(termination.is_completed());
        assert_eq!(accumulator.events, 10);
        assert_eq!(accumulator.histograms.psi.entries(), 10);
    }

    #[test]
    fn test_sum_var_merges_compensated() {
        let mut a = FlowAccumulator::new(AnalysisVariant::Inclusive);
        let mut b = FlowAccumulator::new(AnalysisVariant::Inclusive);
        a.sum_var += 1e16;
        a.sum_var += 1.0;
        b.sum_var += 1.0;
        b.sum_var += -1e16;
        a.with_plane = 2;
        b.with_plane = 2;
        let merged = a.merge(b);
        assert_eq!(merged.with_plane, 4);
        assert_eq!(merged.sum_var.sum(), 2.0);
    }
}
