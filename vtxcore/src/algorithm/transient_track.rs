use nalgebra::{Matrix3, Vector3};

use crate::data::track::Track;
use crate::refit::error::TrackBuildError;

/// Track representation consumed by the vertex fitter.
///
/// The trajectory is a straight line through `point` along the unit vector
/// `direction`. `information` is the inverse covariance of a point on the line,
/// already projected onto the plane perpendicular to `direction`, so that the
/// compatibility of a vertex `x` is `chi2 = (x - point)^T * information * (x - point)`.
#[derive(Clone, Debug, PartialEq)]
pub struct TransientTrack {
    pub point: Vector3<f64>,
    pub direction: Vector3<f64>,
    pub information: Matrix3<f64>,
}

impl TransientTrack {
    /// Chi-square distance between a point and this trajectory.
    pub fn chi2_to(&self, x: &Vector3<f64>) -> f64 {
        let d = x - self.point;
        (d.transpose() * self.information * d)[(0, 0)]
    }

    /// Point on the trajectory closest to `x`.
    pub fn closest_point(&self, x: &Vector3<f64>) -> Vector3<f64> {
        let s = (x - self.point).dot(&self.direction);
        self.point + self.direction * s
    }
}

/// Converts reconstructed tracks into the fitter's representation.
pub trait TransientTrackBuilder {
    fn build(&self, track: &Track) -> Result<TransientTrack, TrackBuildError>;
}

/// Builds straight-line trajectories from the track's reference point and momentum.
#[derive(Clone, Debug)]
pub struct LinearTrackBuilder {
    /// Floor applied to both position uncertainties, in cm.
    pub min_sigma: f64,
}

impl Default for LinearTrackBuilder {
    fn default() -> Self {
        LinearTrackBuilder { min_sigma: 1e-4 }
    }
}

impl TransientTrackBuilder for LinearTrackBuilder {
    fn build(&self, track: &Track) -> Result<TransientTrack, TrackBuildError> {
        let point = Vector3::from(track.reference_point);
        let momentum = Vector3::from(track.momentum);
        if !point.iter().all(|v| v.is_finite()) {
            return Err(TrackBuildError::NonFiniteReferencePoint);
        }
        let norm = momentum.norm();
        if !(norm.is_finite() && norm > 0.0) {
            return Err(TrackBuildError::DegenerateMomentum);
        }
        let sigmas = [track.sigma_transverse, track.sigma_longitudinal];
        if sigmas.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
            return Err(TrackBuildError::InvalidUncertainty {
                transverse: track.sigma_transverse,
                longitudinal: track.sigma_longitudinal,
            });
        }

        let direction = momentum / norm;
        let st = track.sigma_transverse.max(self.min_sigma);
        let sl = track.sigma_longitudinal.max(self.min_sigma);
        let weights = Matrix3::from_diagonal(&Vector3::new(1.0 / (st * st), 1.0 / (st * st), 1.0 / (sl * sl)));
        let projector = Matrix3::identity() - direction * direction.transpose();
        let information = projector * weights * projector;

        Ok(TransientTrack { point, direction, information })
    }
}
