use fastrand::Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::{
    data::{BTofHit, Dataset, PicoEvent, PicoTrack},
    PicoFlowError, PicoFlowResult, Vec3,
};

/// Generates events whose tracks carry a known elliptic-flow signal.
///
/// Track azimuths follow $`1 + 2 v_2 \cos 2(\phi - \Psi_{RP})`$ around a reaction plane which
/// is either fixed or drawn uniformly per event. Transverse momenta are exponential with slope
/// `temperature` and pseudorapidities are uniform in `[-max_abs_eta, max_abs_eta]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToyModel {
    /// Input $`v_2`$.
    pub v2: f64,
    /// Inclusive range of the number of tracks per event.
    pub multiplicity: (usize, usize),
    /// Inverse slope of the $`p_T`$ spectrum (GeV/c).
    pub temperature: f64,
    /// Half-width of the pseudorapidity range.
    pub max_abs_eta: f64,
    /// Fraction of tracks flagged as primary.
    pub primary_fraction: f64,
    /// Inclusive range of TPC hit counts.
    pub n_hits: (i32, i32),
    /// Fixed reaction-plane angle, or `None` for a random plane per event.
    pub reaction_plane: Option<f64>,
}

impl Default for ToyModel {
    fn default() -> Self {
        Self {
            v2: 0.05,
            multiplicity: (20, 400),
            temperature: 0.5,
            max_abs_eta: 1.0,
            primary_fraction: 0.9,
            n_hits: (10, 45),
            reaction_plane: None,
        }
    }
}

impl ToyModel {
    /// A model with the given input $`v_2`$ and default kinematics.
    pub fn new(v2: f64) -> Self {
        Self {
            v2,
            ..Default::default()
        }
    }

    pub fn with_multiplicity(mut self, min: usize, max: usize) -> Self {
        self.multiplicity = (min.min(max), max.max(min));
        self
    }

    pub fn with_reaction_plane(mut self, reaction_plane: Option<f64>) -> Self {
        self.reaction_plane = reaction_plane;
        self
    }

    pub fn with_max_abs_eta(mut self, max_abs_eta: f64) -> Self {
        self.max_abs_eta = max_abs_eta;
        self
    }

    pub fn with_primary_fraction(mut self, primary_fraction: f64) -> Self {
        self.primary_fraction = primary_fraction;
        self
    }

    pub fn with_n_hits(mut self, min: i32, max: i32) -> Self {
        self.n_hits = (min.min(max), max.max(min));
        self
    }

    fn sample_phi(&self, rng: &mut Rng, psi: f64) -> f64 {
        let envelope = 1.0 + 2.0 * self.v2.abs();
        loop {
            let phi = PI * (2.0 * rng.f64() - 1.0);
            let density = 1.0 + 2.0 * self.v2 * (2.0 * (phi - psi)).cos();
            if rng.f64() * envelope < density {
                return phi;
            }
        }
    }

    fn sample_track(&self, rng: &mut Rng, psi: f64) -> PicoTrack {
        let pt = -self.temperature * (1.0 - rng.f64()).ln();
        let eta = self.max_abs_eta * (2.0 * rng.f64() - 1.0);
        let phi = self.sample_phi(rng, psi);
        PicoTrack::new(
            Vec3::from_pt_eta_phi(pt, eta, phi),
            rng.i32(self.n_hits.0..=self.n_hits.1),
            rng.f64() < self.primary_fraction,
            if rng.bool() { 1 } else { -1 },
        )
    }

    /// Check that the azimuthal distribution can be sampled.
    pub fn validate(&self) -> PicoFlowResult<()> {
        if !self.v2.is_finite() {
            return Err(PicoFlowError::Custom(format!(
                "Toy v2 must be finite, got {}",
                self.v2
            )));
        }
        if let Some(psi) = self.reaction_plane.filter(|psi| !psi.is_finite()) {
            return Err(PicoFlowError::Custom(format!(
                "Toy reaction plane must be finite, got {psi}"
            )));
        }
        Ok(())
    }

    /// Generate one event.
    ///
    /// The reference multiplicity is the number of primary tracks with $`|\eta| < 0.5`$.
    fn generate_event(&self, rng: &mut Rng) -> PicoEvent {
        let psi = self
            .reaction_plane
            .unwrap_or_else(|| PI * (rng.f64() - 0.5));
        let n_tracks = rng.usize(self.multiplicity.0..=self.multiplicity.1);
        let tracks: Vec<PicoTrack> = (0..n_tracks)
            .map(|_| self.sample_track(rng, psi))
            .collect();
        let ref_mult = tracks
            .iter()
            .filter(|t| t.is_primary && t.eta().abs() < 0.5)
            .count() as i32;
        let btof_hits = (0..n_tracks / 4)
            .map(|_| BTofHit::new(rng.i32(1..=120)))
            .collect();
        PicoEvent::new(ref_mult, tracks, btof_hits)
    }

    /// Generate `n_events` events from a seeded generator.
    pub fn generate(&self, n_events: usize, seed: u64) -> PicoFlowResult<Dataset> {
        self.validate()?;
        let mut rng = Rng::with_seed(seed);
        Ok((0..n_events).map(|_| self.generate_event(&mut rng)).collect())
    }
}
