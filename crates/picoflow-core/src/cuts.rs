use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

use crate::{data::PicoTrack, AnalysisVariant, PicoFlowError};

/// Lower transverse-momentum bound of [`PtCut::Window`] by default (GeV/c).
pub const DEFAULT_PT_MIN: f64 = 0.2;
/// Upper transverse-momentum bound of [`PtCut::Window`] by default (GeV/c).
pub const DEFAULT_PT_MAX: f64 = 2.0;

/// The transverse-momentum requirement applied to each track.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum PtCut {
    /// Reject tracks for which `(0.2 > pT) > 2.0`, evaluated left to right. The inner comparison
    /// is a boolean (`0` or `1`) which is never above `2.0`, so no track is ever rejected. This
    /// is the behaviour of the reference analysis and keeps results comparable with it.
    #[default]
    Chained,
    /// Keep only tracks with `min < pT < max`.
    Window {
        /// Exclusive lower bound (GeV/c)
        min: f64,
        /// Exclusive upper bound (GeV/c)
        max: f64,
    },
}

impl PtCut {
    /// The intended `0.2 < pT < 2.0` window.
    pub fn window() -> Self {
        Self::Window {
            min: DEFAULT_PT_MIN,
            max: DEFAULT_PT_MAX,
        }
    }

    /// Whether a track with transverse momentum `pt` survives this cut.
    pub fn passes(&self, pt: f64) -> bool {
        match *self {
            PtCut::Chained => {
                let below_min = if DEFAULT_PT_MIN > pt { 1.0 } else { 0.0 };
                below_min <= DEFAULT_PT_MAX
            }
            PtCut::Window { min, max } => min < pt && pt < max,
        }
    }
}

impl Display for PtCut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PtCut::Chained => write!(f, "chained"),
            PtCut::Window { min, max } => write!(f, "window({min}, {max})"),
        }
    }
}

impl FromStr for PtCut {
    type Err = PicoFlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "chained" | "literal" => Ok(Self::Chained),
            "window" => Ok(Self::window()),
            _ => Err(PicoFlowError::ParseError {
                name: s.to_string(),
                object: "PtCut".to_string(),
            }),
        }
    }
}

/// Track quality and acceptance requirements.
///
/// The same predicate selects tracks for the flow vector and for the $`v_2`$ sum. It depends
/// only on the track and on the number of tracks stored in its event.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackCuts {
    /// Minimum number of TPC hits (inclusive).
    pub min_n_hits: i32,
    /// Maximum $`|\eta|`$ (inclusive).
    pub max_abs_eta: f64,
    /// Minimum number of tracks stored in the event (inclusive).
    pub min_event_tracks: usize,
    /// Transverse-momentum requirement.
    pub pt_cut: PtCut,
    /// Reject positively charged tracks.
    pub negative_only: bool,
}

impl Default for TrackCuts {
    fn default() -> Self {
        Self {
            min_n_hits: 15,
            max_abs_eta: 0.5,
            min_event_tracks: 5,
            pt_cut: PtCut::default(),
            negative_only: false,
        }
    }
}

impl TrackCuts {
    /// Default cuts for an analysis variant. The centrality variant keeps only tracks which are
    /// not positively charged.
    pub fn for_variant(variant: AnalysisVariant) -> Self {
        Self {
            negative_only: matches!(variant, AnalysisVariant::Centrality),
            ..Default::default()
        }
    }

    /// Whether `track`, stored in an event holding `n_event_tracks` tracks, is accepted.
    pub fn accepts(&self, track: &PicoTrack, n_event_tracks: usize) -> bool {
        track.is_primary
            && track.n_hits >= self.min_n_hits
            && track.eta().abs() <= self.max_abs_eta
            && !(self.negative_only && track.charge > 0)
            && self.pt_cut.passes(track.g_pt())
            && n_event_tracks >= self.min_event_tracks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{data::test_event, Vec3};

    fn track(pt: f64, eta: f64, n_hits: i32, is_primary: bool, charge: i8) -> PicoTrack {
        PicoTrack::new(Vec3::from_pt_eta_phi(pt, eta, 0.4), n_hits, is_primary, charge)
    }

    #[test]
    fn test_default_selection() {
        let cuts = TrackCuts::default();
        assert!(cuts.accepts(&track(1.0, 0.1, 15, true, 1), 5));
        assert!(!cuts.accepts(&track(1.0, 0.1, 14, true, 1), 5));
        assert!(!cuts.accepts(&track(1.0, 0.1, 20, false, 1), 5));
        assert!(!cuts.accepts(&track(1.0, 0.6, 20, true, 1), 5));
        assert!(!cuts.accepts(&track(1.0, -0.6, 20, true, 1), 5));
        assert!(!cuts.accepts(&track(1.0, 0.1, 20, true, 1), 4));
    }

    #[test]
    fn test_chained_pt_cut_never_rejects() {
        let cuts = TrackCuts::default();
        for pt in [0.0, 0.05, 0.2, 1.0, 2.0, 7.5, 100.0] {
            assert!(PtCut::Chained.passes(pt));
            assert!(cuts.accepts(&track(pt.max(1e-3), 0.0, 20, true, -1), 10));
        }
    }

    #[test]
    fn test_window_pt_cut() {
        let cut = PtCut::window();
        assert!(!cut.passes(0.1));
        assert!(!cut.passes(0.2));
        assert!(cut.passes(0.21));
        assert!(cut.passes(1.99));
        assert!(!cut.passes(2.0));
        assert_eq!("window".parse::<PtCut>().unwrap(), cut);
        assert_eq!("Chained".parse::<PtCut>().unwrap(), PtCut::Chained);
        assert!("tight".parse::<PtCut>().is_err());
    }

    #[test]
    fn test_negative_only() {
        let cuts = TrackCuts::for_variant(AnalysisVariant::Centrality);
        assert!(cuts.negative_only);
        assert!(cuts.accepts(&track(1.0, 0.0, 20, true, -1), 5));
        assert!(cuts.accepts(&track(1.0, 0.0, 20, true, 0), 5));
        assert!(!cuts.accepts(&track(1.0, 0.0, 20, true, 1), 5));
        assert!(!TrackCuts::for_variant(AnalysisVariant::Inclusive).negative_only);
    }

    #[test]
    fn test_event_selection() {
        let event = test_event();
        let cuts = TrackCuts::default();
        let accepted: Vec<bool> = event
            .tracks
            .iter()
            .map(|t| cuts.accepts(t, event.n_tracks()))
            .collect();
        assert_eq!(accepted, vec![true, true, true, true, false, false]);
        let negative = TrackCuts::for_variant(AnalysisVariant::Centrality);
        let accepted: Vec<bool> = event
            .tracks
            .iter()
            .map(|t| negative.accepts(t, event.n_tracks()))
            .collect();
        assert_eq!(accepted, vec![true, false, true, false, false, false]);
    }
}
