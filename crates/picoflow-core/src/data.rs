use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use crate::{utils::vectors::Vec3, PicoFlowError, PicoFlowResult};

/// PicoDst-style file readers and writers.
pub mod io;

pub use io::{read_parquet, read_root, write_parquet, EventWriteOptions, FloatPrecision, PicoReader};

/// An event that can be used to test track selection and the flow calculation. It contains six
/// tracks at mid-rapidity, two of which fail the quality cuts, and three BTof hits.
pub fn test_event() -> PicoEvent {
    PicoEvent::new(
        42,
        vec![
            PicoTrack::new(Vec3::from_pt_eta_phi(1.0, 0.1, 0.3), 20, true, -1),
            PicoTrack::new(Vec3::from_pt_eta_phi(0.6, -0.2, 1.2), 25, true, 1),
            PicoTrack::new(Vec3::from_pt_eta_phi(0.8, 0.4, -2.0), 18, true, -1),
            PicoTrack::new(Vec3::from_pt_eta_phi(1.5, 0.0, 2.9), 31, true, 1),
            PicoTrack::new(Vec3::from_pt_eta_phi(0.9, 0.2, 0.7), 10, true, -1), // too few hits
            PicoTrack::new(Vec3::from_pt_eta_phi(0.4, 0.3, -0.5), 22, false, 1), // global only
        ],
        vec![BTofHit::new(3), BTofHit::new(57), BTofHit::new(119)],
    )
}

/// A [`Dataset`] containing a single [`test_event`].
pub fn test_dataset() -> Dataset {
    Dataset::new(vec![test_event()])
}

/// A reconstructed track as stored in the `Track` branch.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PicoTrack {
    /// Global momentum at the distance of closest approach (GeV/c).
    pub g_mom: Vec3,
    /// Number of TPC hits used in the fit.
    pub n_hits: i32,
    /// Whether the track was associated with the primary vertex.
    pub is_primary: bool,
    /// Charge sign (`-1`, `0` or `1`).
    pub charge: i8,
}

impl PicoTrack {
    /// Create a new track.
    pub fn new(g_mom: Vec3, n_hits: i32, is_primary: bool, charge: i8) -> Self {
        Self {
            g_mom,
            n_hits,
            is_primary,
            charge,
        }
    }

    /// Global transverse momentum.
    pub fn g_pt(&self) -> f64 {
        self.g_mom.pt()
    }

    /// Azimuthal angle of the global momentum.
    pub fn phi(&self) -> f64 {
        self.g_mom.phi()
    }

    /// Pseudorapidity of the global momentum.
    pub fn eta(&self) -> f64 {
        self.g_mom.pseudorapidity()
    }
}

/// A barrel time-of-flight hit as stored in the `BTofHit` branch.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BTofHit {
    /// Tray number of the hit.
    pub tray: i32,
}

impl BTofHit {
    /// Create a new hit in the given tray.
    pub fn new(tray: i32) -> Self {
        Self { tray }
    }
}

/// Event-level information stored in the `Event` branch.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Reference multiplicity.
    pub ref_mult: i32,
}

/// A single collision event with its tracks and BTof hits.
///
/// Event metadata is optional because it may be absent from the file or excluded by the active
/// branch selection; analyses treat such events as unreadable.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PicoEvent {
    /// Event-level metadata, if present.
    pub metadata: Option<EventMetadata>,
    /// Reconstructed tracks, in storage order.
    pub tracks: Vec<PicoTrack>,
    /// BTof hits, in storage order.
    pub btof_hits: Vec<BTofHit>,
}

impl Display for PicoEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Event:")?;
        match self.metadata {
            Some(metadata) => writeln!(f, "  refMult: {}", metadata.ref_mult)?,
            None => writeln!(f, "  refMult: <missing>")?,
        }
        writeln!(f, "  tracks:")?;
        for track in &self.tracks {
            writeln!(
                f,
                "    gMom: {} nHits: {} primary: {} charge: {}",
                track.g_mom, track.n_hits, track.is_primary, track.charge
            )?;
        }
        writeln!(f, "  btof trays:")?;
        for hit in &self.btof_hits {
            writeln!(f, "    {}", hit.tray)?;
        }
        Ok(())
    }
}

impl PicoEvent {
    /// Create an event with metadata.
    pub fn new(ref_mult: i32, tracks: Vec<PicoTrack>, btof_hits: Vec<BTofHit>) -> Self {
        Self {
            metadata: Some(EventMetadata { ref_mult }),
            tracks,
            btof_hits,
        }
    }

    /// Create an event whose `Event` branch is missing.
    pub fn without_metadata(tracks: Vec<PicoTrack>, btof_hits: Vec<BTofHit>) -> Self {
        Self {
            metadata: None,
            tracks,
            btof_hits,
        }
    }

    /// Reference multiplicity, if the event metadata is present.
    pub fn ref_mult(&self) -> Option<i32> {
        self.metadata.map(|metadata| metadata.ref_mult)
    }

    /// Number of stored tracks (all tracks, regardless of quality).
    pub fn n_tracks(&self) -> usize {
        self.tracks.len()
    }

    /// Number of stored BTof hits.
    pub fn n_btof_hits(&self) -> usize {
        self.btof_hits.len()
    }
}

/// A source of [`PicoEvent`]s addressed by index.
///
/// Implementors decide how events are stored; the analysis only needs the total count and
/// random access. A failed read is reported as an error and ends the event loop.
pub trait EventSource {
    /// Total number of events available.
    fn n_events(&self) -> usize;

    /// Fetch the event at `index`.
    fn read_event(&mut self, index: usize) -> PicoFlowResult<PicoEvent>;
}

impl<S: EventSource + ?Sized> EventSource for &mut S {
    fn n_events(&self) -> usize {
        (**self).n_events()
    }

    fn read_event(&mut self, index: usize) -> PicoFlowResult<PicoEvent> {
        (**self).read_event(index)
    }
}

/// An in-memory collection of [`PicoEvent`]s.
#[derive(Clone, Debug, Default)]
pub struct Dataset {
    events: Vec<PicoEvent>,
}

impl Dataset {
    /// Create a new [`Dataset`] from a list of events.
    pub fn new(events: Vec<PicoEvent>) -> Self {
        Self { events }
    }

    /// Number of events.
    pub fn n_events(&self) -> usize {
        self.events.len()
    }

    /// Borrow all events.
    pub fn events(&self) -> &[PicoEvent] {
        &self.events
    }

    /// Retrieve a single event by index.
    pub fn event(&self, index: usize) -> PicoFlowResult<&PicoEvent> {
        self.events.get(index).ok_or_else(|| PicoFlowError::EventRead {
            index,
            reason: format!("index out of bounds for dataset of length {}", self.n_events()),
        })
    }

    /// Iterate over all events.
    pub fn iter(&self) -> std::slice::Iter<'_, PicoEvent> {
        self.events.iter()
    }

    /// Append an event.
    pub fn push(&mut self, event: PicoEvent) {
        self.events.push(event);
    }

    /// Total number of stored tracks over all events.
    pub fn n_tracks(&self) -> usize {
        self.events.iter().map(PicoEvent::n_tracks).sum()
    }
}

impl EventSource for Dataset {
    fn n_events(&self) -> usize {
        self.events.len()
    }

    fn read_event(&mut self, index: usize) -> PicoFlowResult<PicoEvent> {
        self.event(index).cloned()
    }
}

impl FromIterator<PicoEvent> for Dataset {
    fn from_iter<T: IntoIterator<Item = PicoEvent>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl IntoIterator for Dataset {
    type Item = PicoEvent;

    type IntoIter = std::vec::IntoIter<PicoEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

impl<'a> IntoIterator for &'a Dataset {
    type Item = &'a PicoEvent;

    type IntoIter = std::slice::Iter<'a, PicoEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

/// The groups of columns ("branches") in a PicoDst-style file.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Branch {
    /// Event-level metadata.
    Event,
    /// Reconstructed tracks.
    Track,
    /// Barrel time-of-flight hits.
    BTofHit,
}

impl Branch {
    /// All known branches.
    pub const ALL: [Branch; 3] = [Branch::Event, Branch::Track, Branch::BTofHit];

    /// The columns stored for this branch.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Branch::Event => &[io::EVENT_REF_MULT],
            Branch::Track => &[
                io::TRACK_GMOM_X,
                io::TRACK_GMOM_Y,
                io::TRACK_GMOM_Z,
                io::TRACK_N_HITS,
                io::TRACK_IS_PRIMARY,
                io::TRACK_CHARGE,
            ],
            Branch::BTofHit => &[io::BTOF_TRAY],
        }
    }

    /// Find the branch owning a column.
    pub fn of_column(column: &str) -> Option<Branch> {
        Self::ALL
            .into_iter()
            .find(|branch| branch.columns().contains(&column))
    }
}

impl Display for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Branch::Event => write!(f, "Event"),
            Branch::Track => write!(f, "Track"),
            Branch::BTofHit => write!(f, "BTofHit"),
        }
    }
}

impl FromStr for Branch {
    type Err = PicoFlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "event" => Ok(Self::Event),
            "track" => Ok(Self::Track),
            "btofhit" | "btof" => Ok(Self::BTofHit),
            _ => Err(PicoFlowError::ParseError {
                name: s.to_string(),
                object: "Branch".to_string(),
            }),
        }
    }
}

/// Which branches should be read from an input file.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BranchStatus {
    event: bool,
    track: bool,
    btof_hit: bool,
}

impl Default for BranchStatus {
    fn default() -> Self {
        Self {
            event: true,
            track: true,
            btof_hit: true,
        }
    }
}

impl BranchStatus {
    /// Enable or disable branches matching `pattern`, which is either `"*"` (every branch) or a
    /// branch name.
    pub fn set(&mut self, pattern: &str, active: bool) -> PicoFlowResult<()> {
        if pattern.trim() == "*" {
            self.event = active;
            self.track = active;
            self.btof_hit = active;
            return Ok(());
        }
        match pattern.parse::<Branch>()? {
            Branch::Event => self.event = active,
            Branch::Track => self.track = active,
            Branch::BTofHit => self.btof_hit = active,
        }
        Ok(())
    }

    /// Whether a branch is currently read.
    pub fn is_active(&self, branch: Branch) -> bool {
        match branch {
            Branch::Event => self.event,
            Branch::Track => self.track,
            Branch::BTofHit => self.btof_hit,
        }
    }

    /// Whether a column belongs to an active branch. Unknown columns are never read.
    pub fn is_column_active(&self, column: &str) -> bool {
        Branch::of_column(column).is_some_and(|branch| self.is_active(branch))
    }

    /// Active branches, in declaration order.
    pub fn active_branches(&self) -> Vec<Branch> {
        Branch::ALL
            .into_iter()
            .filter(|branch| self.is_active(*branch))
            .collect()
    }
}

#[derive(Clone, Debug, Default)]
pub(crate) struct TrackColumns {
    pub(crate) offsets: Vec<usize>,
    pub(crate) px: Vec<f64>,
    pub(crate) py: Vec<f64>,
    pub(crate) pz: Vec<f64>,
    pub(crate) n_hits: Vec<i32>,
    pub(crate) is_primary: Vec<bool>,
    pub(crate) charge: Vec<i8>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct HitColumns {
    pub(crate) offsets: Vec<usize>,
    pub(crate) tray: Vec<i32>,
}

/// Columnar event storage used by [`PicoReader`]. Tracks and hits are stored flat, with
/// `offsets[i]..offsets[i + 1]` selecting the entries of event `i`.
///
/// Rows that could not be decoded keep empty slices and are listed in `invalid_rows` with the
/// reason, which is reported when that event is requested.
#[derive(Clone, Debug)]
pub(crate) struct PicoDstStorage {
    pub(crate) ref_mult: Vec<Option<i32>>,
    pub(crate) tracks: TrackColumns,
    pub(crate) hits: HitColumns,
    pub(crate) invalid_rows: BTreeMap<usize, String>,
}

impl PicoDstStorage {
    pub(crate) fn with_capacity(n_events: usize) -> Self {
        let mut tracks = TrackColumns::default();
        tracks.offsets.reserve(n_events + 1);
        tracks.offsets.push(0);
        let mut hits = HitColumns::default();
        hits.offsets.reserve(n_events + 1);
        hits.offsets.push(0);
        Self {
            ref_mult: Vec::with_capacity(n_events),
            tracks,
            hits,
            invalid_rows: BTreeMap::new(),
        }
    }

    /// Storage for `n_events` events with no metadata, tracks or hits.
    pub(crate) fn empty(n_events: usize) -> Self {
        Self {
            ref_mult: vec![None; n_events],
            tracks: TrackColumns {
                offsets: vec![0; n_events + 1],
                ..Default::default()
            },
            hits: HitColumns {
                offsets: vec![0; n_events + 1],
                ..Default::default()
            },
            invalid_rows: BTreeMap::new(),
        }
    }

    pub(crate) fn n_events(&self) -> usize {
        self.ref_mult.len()
    }

    /// Record why row `index` is unreadable. The first reason recorded for a row is kept.
    pub(crate) fn mark_invalid(&mut self, index: usize, reason: String) {
        self.invalid_rows.entry(index).or_insert(reason);
    }

    /// Append invalid rows with no content until the storage holds `n_events` rows.
    pub(crate) fn pad_invalid(&mut self, n_events: usize, reason: &str) {
        for index in self.n_events()..n_events {
            self.ref_mult.push(None);
            let last = self.tracks.offsets.last().copied().unwrap_or(0);
            self.tracks.offsets.push(last);
            let last = self.hits.offsets.last().copied().unwrap_or(0);
            self.hits.offsets.push(last);
            self.mark_invalid(index, reason.to_string());
        }
    }

    pub(crate) fn event(&self, index: usize) -> PicoFlowResult<PicoEvent> {
        if index >= self.n_events() {
            return Err(PicoFlowError::EventRead {
                index,
                reason: format!("index out of bounds for {} stored events", self.n_events()),
            });
        }
        if let Some(reason) = self.invalid_rows.get(&index) {
            return Err(PicoFlowError::EventRead {
                index,
                reason: reason.clone(),
            });
        }
        let track_range = self.tracks.offsets[index]..self.tracks.offsets[index + 1];
        let tracks = track_range
            .map(|i| PicoTrack {
                g_mom: Vec3::new(self.tracks.px[i], self.tracks.py[i], self.tracks.pz[i]),
                n_hits: self.tracks.n_hits[i],
                is_primary: self.tracks.is_primary[i],
                charge: self.tracks.charge[i],
            })
            .collect();
        let hit_range = self.hits.offsets[index]..self.hits.offsets[index + 1];
        let btof_hits = hit_range
            .map(|i| BTofHit::new(self.hits.tray[i]))
            .collect();
        Ok(PicoEvent {
            metadata: self.ref_mult[index].map(|ref_mult| EventMetadata { ref_mult }),
            tracks,
            btof_hits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_event_creation() {
        let event = test_event();
        assert_eq!(event.ref_mult(), Some(42));
        assert_eq!(event.n_tracks(), 6);
        assert_eq!(event.n_btof_hits(), 3);
        assert_relative_eq!(event.tracks[0].g_pt(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(event.tracks[0].phi(), 0.3, epsilon = 1e-12);
        assert_relative_eq!(event.tracks[0].eta(), 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_event_without_metadata() {
        let event = PicoEvent::without_metadata(vec![], vec![BTofHit::new(1)]);
        assert_eq!(event.ref_mult(), None);
        assert!(event.to_string().contains("<missing>"));
    }

    #[test]
    fn test_dataset_source() {
        let mut dataset = test_dataset();
        assert_eq!(EventSource::n_events(&dataset), 1);
        assert_eq!(dataset.read_event(0).unwrap(), test_event());
        assert!(matches!(
            dataset.read_event(1),
            Err(PicoFlowError::EventRead { index: 1, .. })
        ));
        dataset.push(PicoEvent::default());
        assert_eq!(dataset.n_events(), 2);
        assert_eq!(dataset.n_tracks(), 6);
    }

    #[test]
    fn test_branch_status() {
        let mut status = BranchStatus::default();
        status.set("*", false).unwrap();
        assert!(status.active_branches().is_empty());
        status.set("Event", true).unwrap();
        status.set("Track", true).unwrap();
        assert_eq!(status.active_branches(), vec![Branch::Event, Branch::Track]);
        assert!(status.is_column_active("track_gmom_x"));
        assert!(!status.is_column_active("btof_tray"));
        assert!(!status.is_column_active("unrelated"));
        assert!(status.set("EmcPidTraits", true).is_err());
    }

    #[test]
    fn test_storage_event_slices() {
        let mut storage = PicoDstStorage::with_capacity(2);
        storage.ref_mult.extend([Some(7), None]);
        storage.tracks.offsets.extend([1, 1]);
        storage.tracks.px.push(0.5);
        storage.tracks.py.push(0.0);
        storage.tracks.pz.push(0.0);
        storage.tracks.n_hits.push(30);
        storage.tracks.is_primary.push(true);
        storage.tracks.charge.push(-1);
        storage.hits.offsets.extend([0, 2]);
        storage.hits.tray.extend([4, 5]);

        let first = storage.event(0).unwrap();
        assert_eq!(first.ref_mult(), Some(7));
        assert_eq!(first.n_tracks(), 1);
        assert!(first.btof_hits.is_empty());
        let second = storage.event(1).unwrap();
        assert_eq!(second.ref_mult(), None);
        assert!(second.tracks.is_empty());
        assert_eq!(second.btof_hits, vec![BTofHit::new(4), BTofHit::new(5)]);
        assert!(storage.event(2).is_err());
    }

    #[test]
    fn test_storage_invalid_rows() {
        let mut storage = PicoDstStorage::with_capacity(3);
        storage.ref_mult.push(Some(12));
        storage.tracks.offsets.push(0);
        storage.hits.offsets.push(0);
        storage.mark_invalid(1, "bad list".to_string());
        storage.pad_invalid(3, "truncated");
        storage.mark_invalid(2, "ignored".to_string());

        assert_eq!(storage.n_events(), 3);
        assert_eq!(storage.event(0).unwrap().ref_mult(), Some(12));
        match storage.event(1) {
            Err(PicoFlowError::EventRead { index, reason }) => {
                assert_eq!(index, 1);
                assert_eq!(reason, "bad list");
            }
            other => panic!("expected an event read error, got {other:?}"),
        }
        match storage.event(2) {
            Err(PicoFlowError::EventRead { index: 2, reason }) => assert_eq!(reason, "truncated"),
            other => panic!("expected an event read error, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_storage() {
        let storage = PicoDstStorage::empty(3);
        assert_eq!(storage.n_events(), 3);
        let event = storage.event(2).unwrap();
        assert_eq!(event, PicoEvent::default());
    }
}
