//! Adaptive vertex fit with deterministic annealing.
//!
//! Tracks enter the fit with soft weights `w = 1 / (1 + exp((chi2 - chi_cut^2) / 2T))`
//! that are recomputed from the current vertex estimate on every iteration while
//! the temperature `T` is lowered towards 1. Outlying tracks fade out of the fit
//! instead of being cut away.

use nalgebra::{Matrix3, Vector3};
use ordered_float::OrderedFloat;
use tracing::trace;

use crate::algorithm::transient_track::TransientTrack;
use crate::data::vertex::BeamSpot;
use crate::refit::error::FitError;

/// Result of a successful vertex fit.
#[derive(Clone, Debug, PartialEq)]
pub struct TransientVertex {
    pub position: Vector3<f64>,
    pub covariance: Matrix3<f64>,
    pub chi2: f64,
    pub ndof: f64,
    /// Final weight of every input track, in input order.
    pub track_weights: Vec<f64>,
    pub iterations: usize,
}

impl TransientVertex {
    pub fn total_weight(&self) -> f64 {
        self.track_weights.iter().sum()
    }
}

/// A vertex fitting service.
pub trait VertexFitter {
    /// Fits a vertex to the tracks alone.
    fn vertex(&self, tracks: &[TransientTrack]) -> Result<TransientVertex, FitError>;

    /// Fits a vertex to the tracks with the beam spot as an additional Gaussian constraint.
    fn vertex_with_beam_spot(&self, tracks: &[TransientTrack], beam_spot: &BeamSpot) -> Result<TransientVertex, FitError>;
}

#[derive(Clone, Debug)]
pub struct AdaptiveVertexFitter {
    /// A fit is only valid if at least two tracks end with a weight of at least this value.
    pub weight_threshold: f64,
    pub chi_cut: f64,
    pub initial_temperature: f64,
    pub temperature_ratio: f64,
    /// Convergence tolerance on the vertex shift between iterations, in cm.
    pub max_shift: f64,
    pub max_iterations: usize,
}

impl Default for AdaptiveVertexFitter {
    fn default() -> Self {
        AdaptiveVertexFitter {
            weight_threshold: 0.001,
            chi_cut: 3.0,
            initial_temperature: 256.0,
            temperature_ratio: 0.25,
            max_shift: 1e-4,
            max_iterations: 50,
        }
    }
}

impl AdaptiveVertexFitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_weight_threshold(&mut self, weight_threshold: f64) {
        self.weight_threshold = weight_threshold;
    }

    pub fn with_weight_threshold(mut self, weight_threshold: f64) -> Self {
        self.weight_threshold = weight_threshold;
        self
    }

    fn weight(&self, chi2: f64, temperature: f64) -> f64 {
        let arg = (chi2 - self.chi_cut * self.chi_cut) / (2.0 * temperature);
        1.0 / (1.0 + arg.exp())
    }

    fn weights(&self, tracks: &[TransientTrack], x: &Vector3<f64>, temperature: f64) -> Vec<f64> {
        tracks.iter().map(|t| self.weight(t.chi2_to(x), temperature)).collect()
    }

    fn fit(&self, tracks: &[TransientTrack], beam_spot: Option<&BeamSpot>) -> Result<TransientVertex, FitError> {
        if tracks.len() < 2 {
            return Err(FitError::TooFewTracks { found: tracks.len() });
        }

        let prior = match beam_spot {
            Some(bs) => {
                let information = bs
                    .covariance()
                    .and_then(|c| c.try_inverse())
                    .ok_or(FitError::InvalidBeamSpot)?;
                Some((bs.position_vector(), information))
            }
            None => None,
        };

        let mut x = match &prior {
            Some((center, _)) => *center,
            None => median_seed(tracks),
        };
        let mut temperature = self.initial_temperature;
        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.max_iterations {
            iterations += 1;
            let weights = self.weights(tracks, &x, temperature);
            let (next, _) = solve(tracks, &weights, prior.as_ref())?;
            if !next.iter().all(|v| v.is_finite()) {
                return Err(FitError::NonFinite);
            }
            let shift = (next - x).norm();
            x = next;
            trace!(iterations, temperature, shift, "adaptive fit step");
            if temperature <= 1.0 && shift < self.max_shift {
                converged = true;
                break;
            }
            temperature = (temperature * self.temperature_ratio).max(1.0);
        }

        if !converged {
            return Err(FitError::NotConverged { iterations });
        }

        let weights = self.weights(tracks, &x, 1.0);
        let compatible = weights.iter().filter(|w| **w >= self.weight_threshold).count();
        if compatible < 2 {
            return Err(FitError::InsufficientCompatibleTracks { compatible, threshold: self.weight_threshold });
        }

        let (_, covariance) = solve(tracks, &weights, prior.as_ref())?;
        let mut chi2: f64 = tracks.iter().zip(&weights).map(|(t, w)| w * t.chi2_to(&x)).sum();
        let mut ndof = 2.0 * weights.iter().sum::<f64>() - 3.0;
        if let Some((center, information)) = &prior {
            let d = x - center;
            chi2 += d.dot(&(information * d));
            ndof += 3.0;
        }

        Ok(TransientVertex { position: x, covariance, chi2, ndof, track_weights: weights, iterations })
    }
}

impl VertexFitter for AdaptiveVertexFitter {
    fn vertex(&self, tracks: &[TransientTrack]) -> Result<TransientVertex, FitError> {
        self.fit(tracks, None)
    }

    fn vertex_with_beam_spot(&self, tracks: &[TransientTrack], beam_spot: &BeamSpot) -> Result<TransientVertex, FitError> {
        self.fit(tracks, Some(beam_spot))
    }
}

/// Weighted least-squares vertex for fixed track weights, with its covariance.
fn solve(
    tracks: &[TransientTrack],
    weights: &[f64],
    prior: Option<&(Vector3<f64>, Matrix3<f64>)>,
) -> Result<(Vector3<f64>, Matrix3<f64>), FitError> {
    let mut normal = Matrix3::zeros();
    let mut rhs = Vector3::zeros();
    for (track, w) in tracks.iter().zip(weights) {
        normal += track.information * *w;
        rhs += track.information * track.point * *w;
    }
    if let Some((center, information)) = prior {
        normal += information;
        rhs += information * center;
    }

    let chol = normal.cholesky().ok_or(FitError::Singular)?;
    Ok((chol.solve(&rhs), chol.inverse()))
}

/// Component-wise median of the track reference points.
fn median_seed(tracks: &[TransientTrack]) -> Vector3<f64> {
    let mut seed = Vector3::zeros();
    for axis in 0..3 {
        let mut values: Vec<OrderedFloat<f64>> = tracks.iter().map(|t| OrderedFloat(t.point[axis])).collect();
        values.sort();
        let n = values.len();
        seed[axis] = if n % 2 == 1 {
            values[n / 2].0
        } else {
            0.5 * (values[n / 2 - 1].0 + values[n / 2].0)
        };
    }
    seed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::transient_track::{LinearTrackBuilder, TransientTrackBuilder};
    use crate::data::track::Track;

    fn tracks_through(vertex: [f64; 3], directions: &[[f64; 3]]) -> Vec<TransientTrack> {
        let builder = LinearTrackBuilder::default();
        directions
            .iter()
            .enumerate()
            .map(|(i, d)| {
                // slide the reference point along the track, the fit must not care
                let s = 0.05 * (i as f64 + 1.0);
                let point = [vertex[0] + s * d[0], vertex[1] + s * d[1], vertex[2] + s * d[2]];
                builder.build(&Track::new(point, *d, 1, 0.01, 0.02)).unwrap()
            })
            .collect()
    }

    const DIRECTIONS: [[f64; 3]; 4] = [
        [1.0, 0.2, 0.3],
        [-0.4, 1.0, -0.8],
        [0.3, -1.0, 1.5],
        [-1.0, -0.5, 0.1],
    ];

    #[test]
    fn test_recovers_common_vertex() {
        let truth = Vector3::new(0.1, -0.2, 1.5);
        let tracks = tracks_through([0.1, -0.2, 1.5], &DIRECTIONS);
        let fitted = AdaptiveVertexFitter::new().vertex(&tracks).unwrap();
        assert!((fitted.position - truth).norm() < 1e-6);
        assert!(fitted.chi2 < 1e-6);
        assert!(fitted.track_weights.iter().all(|w| *w > 0.98));
        assert!((fitted.ndof - (2.0 * fitted.total_weight() - 3.0)).abs() < 1e-12);
        assert!(fitted.covariance[(0, 0)] > 0.0);
    }

    #[test]
    fn test_outlier_is_downweighted() {
        let truth = Vector3::new(0.0, 0.0, -2.0);
        let mut tracks = tracks_through([0.0, 0.0, -2.0], &DIRECTIONS);
        tracks.extend(tracks_through([0.5, 0.0, -2.0], &[[0.0, 1.0, 0.4]]));
        let fitted = AdaptiveVertexFitter::new().vertex(&tracks).unwrap();
        assert!((fitted.position - truth).norm() < 1e-4);
        assert!(fitted.track_weights[4] < 1e-3);
    }

    #[test]
    fn test_beam_spot_constraint() {
        let tracks = tracks_through([0.01, 0.02, 0.5], &DIRECTIONS[..2]);
        let bs = BeamSpot::new([0.01, 0.02, 0.0], 4.0, 0.002, 0.002);
        let fitted = AdaptiveVertexFitter::new().vertex_with_beam_spot(&tracks, &bs).unwrap();
        assert!((fitted.position - Vector3::new(0.01, 0.02, 0.5)).norm() < 1e-4);
        assert!((fitted.ndof - 2.0 * fitted.total_weight()).abs() < 1e-3);

        let broken = BeamSpot::new([0.0; 3], 4.0, 0.0, 0.002);
        assert_eq!(
            AdaptiveVertexFitter::new().vertex_with_beam_spot(&tracks, &broken),
            Err(FitError::InvalidBeamSpot)
        );
    }

    #[test]
    fn test_failure_modes() {
        let fitter = AdaptiveVertexFitter::new();
        let one = tracks_through([0.0; 3], &DIRECTIONS[..1]);
        assert_eq!(fitter.vertex(&one), Err(FitError::TooFewTracks { found: 1 }));

        let builder = LinearTrackBuilder::default();
        let parallel: Vec<TransientTrack> = [[0.0, 0.0, 0.0], [0.1, 0.0, 0.0], [0.0, 0.1, 0.0]]
            .iter()
            .map(|p| builder.build(&Track::new(*p, [0.0, 0.0, 1.0], 1, 0.01, 0.02)).unwrap())
            .collect();
        assert_eq!(fitter.vertex(&parallel), Err(FitError::Singular));

        let strict = AdaptiveVertexFitter::new().with_weight_threshold(1.5);
        let tracks = tracks_through([0.0; 3], &DIRECTIONS);
        assert!(matches!(strict.vertex(&tracks), Err(FitError::InsufficientCompatibleTracks { compatible: 0, .. })));
    }
}
