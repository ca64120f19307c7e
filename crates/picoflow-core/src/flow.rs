use auto_ops::impl_op_ex;
use serde::{Deserialize, Serialize};

use crate::{
    cuts::TrackCuts,
    data::{PicoEvent, PicoTrack},
};

/// The second-harmonic flow vector $`\vec{Q}_2 = \sum_i p_{T,i}\,(\cos 2\phi_i, \sin 2\phi_i)`$.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowVector {
    /// The $`x`$-component
    pub qx: f64,
    /// The $`y`$-component
    pub qy: f64,
}

impl FlowVector {
    pub fn new(qx: f64, qy: f64) -> Self {
        Self { qx, qy }
    }

    /// Add a track with transverse momentum `pt` and azimuth `phi`.
    pub fn add_track(&mut self, pt: f64, phi: f64) {
        self.qx += pt * (2.0 * phi).cos();
        self.qy += pt * (2.0 * phi).sin();
    }

    /// The event-plane angle $`\Psi = \tfrac{1}{2}\arctan(Q_y / Q_x)`$, or `None` when
    /// $`Q_x = 0`$.
    ///
    /// This uses `atan` rather than `atan2`, so the result always lies in
    /// $`(-\pi/4, \pi/4)`$: flow vectors pointing into the left half-plane are folded onto the
    /// right one and the quadrant information is lost. Results are therefore only comparable with
    /// analyses using the same convention.
    pub fn event_plane_angle(&self) -> Option<f64> {
        if self.qx == 0.0 {
            None
        } else {
            Some((self.qy / self.qx).atan() / 2.0)
        }
    }
}

impl_op_ex!(+= |a: &mut FlowVector, b: &FlowVector| {
    a.qx += b.qx;
    a.qy += b.qy;
});

/// The flow quantities of a single event.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFlow {
    /// Flow vector of the accepted tracks.
    pub q: FlowVector,
    /// Event-plane angle, `None` when $`Q_x = 0`$.
    pub psi: Option<f64>,
    /// $`\sum \cos 2(\phi - \Psi)`$ over accepted tracks, zero without an event plane.
    pub sum_var: f64,
    /// Total number of tracks stored in the event.
    pub n_tracks: usize,
    /// Number of tracks passing the cuts.
    pub n_accepted: usize,
}

impl EventFlow {
    /// Compute the flow quantities of `event` using the tracks accepted by `cuts`.
    pub fn compute(event: &PicoEvent, cuts: &TrackCuts) -> Self {
        Self::compute_with(event, cuts, |_| {})
    }

    /// Like [`EventFlow::compute`], calling `on_accepted` for every track entering the flow
    /// vector, in storage order.
    ///
    /// The selection is evaluated again for the $`v_2`$ sum rather than remembered from the
    /// first pass.
    pub fn compute_with<F>(event: &PicoEvent, cuts: &TrackCuts, mut on_accepted: F) -> Self
    where
        F: FnMut(&PicoTrack),
    {
        let n_tracks = event.n_tracks();
        let mut q = FlowVector::default();
        let mut n_accepted = 0;
        for track in event.tracks.iter().filter(|t| cuts.accepts(t, n_tracks)) {
            on_accepted(track);
            q.add_track(track.g_pt(), track.phi());
            n_accepted += 1;
        }
        let psi = q.event_plane_angle();
        let sum_var = match psi {
            Some(psi) => event
                .tracks
                .iter()
                .filter(|t| cuts.accepts(t, n_tracks))
                .map(|t| (2.0 * (t.phi() - psi)).cos())
                .sum(),
            None => 0.0,
        };
        Self {
            q,
            psi,
            sum_var,
            n_tracks,
            n_accepted,
        }
    }

    /// Whether the event has a defined event plane.
    pub fn has_plane(&self) -> bool {
        self.psi.is_some()
    }

    /// The per-event $`v_2`$ estimate, `sum_var / n_tracks`.
    ///
    /// The divisor is the number of tracks stored in the event, not the number of accepted
    /// tracks, which biases the estimate low when cuts reject tracks. `None` without an event
    /// plane or without tracks.
    pub fn v2(&self) -> Option<f64> {
        if self.psi.is_none() || self.n_tracks == 0 {
            return None;
        }
        Some(self.sum_var / self.n_tracks as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{data::test_event, AnalysisVariant, PicoEvent, Vec3};
    use approx::assert_relative_eq;

    #[test]
    fn test_single_track_plane() {
        let mut q = FlowVector::default();
        q.add_track(1.0, 0.3);
        assert_relative_eq!(q.qx, 0.6_f64.cos());
        assert_relative_eq!(q.qy, 0.6_f64.sin());
        assert_relative_eq!(q.event_plane_angle().unwrap(), 0.3, epsilon = 1e-12);
    }

    #[test]
    fn test_plane_angle_folding() {
        // a vector in the left half-plane is folded into (-pi/4, pi/4)
        let q = FlowVector::new(-1.0, 1.0);
        assert_relative_eq!(q.event_plane_angle().unwrap(), -std::f64::consts::FRAC_PI_8);
        assert!(FlowVector::new(0.0, 3.0).event_plane_angle().is_none());
    }

    #[test]
    fn test_flow_vector_sum() {
        let mut a = FlowVector::new(1.0, 2.0);
        a += FlowVector::new(0.5, -1.0);
        assert_eq!(a, FlowVector::new(1.5, 1.0));
    }

    #[test]
    fn test_event_flow() {
        let mut seen = Vec::new();
        let flow = EventFlow::compute_with(&test_event(), &TrackCuts::default(), |t| {
            seen.push(t.n_hits)
        });
        assert_eq!(seen, vec![20, 25, 18, 31]);
        assert_eq!(flow.n_tracks, 6);
        assert_eq!(flow.n_accepted, 4);
        assert_relative_eq!(flow.q.qx, 1.1882637643060199, epsilon = 1e-12);
        assert_relative_eq!(flow.q.qy, 0.8784591088514324, epsilon = 1e-12);
        assert_relative_eq!(flow.psi.unwrap(), 0.31830232295603833, epsilon = 1e-12);
        assert_relative_eq!(flow.sum_var, 1.1680793009727637, epsilon = 1e-12);
        assert_relative_eq!(flow.v2().unwrap(), 1.1680793009727637 / 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_event_flow_negative_only() {
        let cuts = TrackCuts::for_variant(AnalysisVariant::Centrality);
        let flow = EventFlow::compute(&test_event(), &cuts);
        assert_eq!(flow.n_accepted, 2);
        assert_relative_eq!(flow.psi.unwrap(), 0.6589353732699846, epsilon = 1e-12);
        assert_relative_eq!(flow.sum_var, 1.3223662848489002, epsilon = 1e-12);
        assert_relative_eq!(flow.v2().unwrap(), 0.22039438080815002, epsilon = 1e-12);
    }

    #[test]
    fn test_symmetric_tracks_have_no_plane() {
        // alternating tracks along x and y cancel exactly in Qx
        let tracks = (0..6)
            .map(|i| {
                let g_mom = if i % 2 == 0 {
                    Vec3::new(1.0, 0.0, 0.0)
                } else {
                    Vec3::new(0.0, 1.0, 0.0)
                };
                PicoTrack::new(g_mom, 20, true, -1)
            })
            .collect();
        let event = PicoEvent::new(100, tracks, vec![]);
        let flow = EventFlow::compute(&event, &TrackCuts::default());
        assert_eq!(flow.n_accepted, 6);
        assert_eq!(flow.q.qx, 0.0);
        assert!(!flow.has_plane());
        assert_eq!(flow.sum_var, 0.0);
        assert!(flow.v2().is_none());
    }

    #[test]
    fn test_no_accepted_tracks() {
        let event = PicoEvent::new(
            3,
            vec![PicoTrack::new(Vec3::new(1.0, 0.0, 0.0), 30, true, 1)],
            vec![],
        );
        let flow = EventFlow::compute(&event, &TrackCuts::default());
        assert_eq!(flow.n_accepted, 0);
        assert!(!flow.has_plane());
        assert_eq!(flow.q, FlowVector::default());
    }
}
