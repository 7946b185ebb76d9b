use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use bincode::{Decode, Encode};
use nalgebra::{Matrix3, Vector3};
use serde::{Serialize, Deserialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::algorithm::adaptive_fitter::TransientVertex;
use crate::data::candidate::CandidatePtr;

/// A reconstructed interaction vertex.
///
/// Positions are in cm. The covariance is the symmetric 3x3 position error matrix.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct Vertex {
    pub position: [f64; 3],
    pub covariance: [[f64; 3]; 3],
    pub chi2: f64,
    pub ndof: f64,
    #[serde(default)]
    pub n_tracks: usize,
    #[serde(default = "default_valid")]
    pub is_valid: bool,
}

fn default_valid() -> bool {
    true
}

impl Vertex {
    pub fn new(position: [f64; 3], covariance: [[f64; 3]; 3], chi2: f64, ndof: f64, n_tracks: usize) -> Self {
        Vertex { position, covariance, chi2, ndof, n_tracks, is_valid: true }
    }

    pub fn position_vector(&self) -> Vector3<f64> {
        Vector3::from(self.position)
    }

    pub fn covariance_matrix(&self) -> Matrix3<f64> {
        let c = &self.covariance;
        Matrix3::new(
            c[0][0], c[0][1], c[0][2],
            c[1][0], c[1][1], c[1][2],
            c[2][0], c[2][1], c[2][2],
        )
    }

    pub fn x_error(&self) -> f64 {
        self.covariance[0][0].sqrt()
    }

    pub fn y_error(&self) -> f64 {
        self.covariance[1][1].sqrt()
    }

    pub fn z_error(&self) -> f64 {
        self.covariance[2][2].sqrt()
    }

    pub fn normalized_chi2(&self) -> f64 {
        if self.ndof > 0.0 { self.chi2 / self.ndof } else { 0.0 }
    }

    /// Upper-tail chi-square probability of the fit; zero without degrees of freedom.
    pub fn probability(&self) -> f64 {
        if !(self.ndof > 0.0) || !self.chi2.is_finite() {
            return 0.0;
        }
        match ChiSquared::new(self.ndof) {
            Ok(dist) => dist.sf(self.chi2.max(0.0)),
            Err(_) => 0.0,
        }
    }
}

impl Display for Vertex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Vertex(x={:.4}, y={:.4}, z={:.4}, chi2={:.2}, ndof={:.2}, tracks={})",
            self.position[0], self.position[1], self.position[2], self.chi2, self.ndof, self.n_tracks
        )
    }
}

/// Luminous region used as an optional constraint of the fit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BeamSpot {
    pub position: [f64; 3],
    pub sigma_z: f64,
    pub beam_width_x: f64,
    pub beam_width_y: f64,
}

impl BeamSpot {
    pub fn new(position: [f64; 3], sigma_z: f64, beam_width_x: f64, beam_width_y: f64) -> Self {
        BeamSpot { position, sigma_z, beam_width_x, beam_width_y }
    }

    pub fn position_vector(&self) -> Vector3<f64> {
        Vector3::from(self.position)
    }

    /// Diagonal covariance of the luminous region, `None` if any width is not strictly positive.
    pub fn covariance(&self) -> Option<Matrix3<f64>> {
        let widths = [self.beam_width_x, self.beam_width_y, self.sigma_z];
        if widths.iter().any(|w| !(w.is_finite() && *w > 0.0)) {
            return None;
        }
        Some(Matrix3::from_diagonal(&Vector3::new(
            widths[0] * widths[0],
            widths[1] * widths[1],
            widths[2] * widths[2],
        )))
    }
}

/// Back-reference to the candidate a refitted vertex was built for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct CandidateLink {
    pub product: String,
    pub key: usize,
}

impl From<&CandidatePtr<'_>> for CandidateLink {
    fn from(ptr: &CandidatePtr<'_>) -> Self {
        CandidateLink { product: ptr.product.encode(), key: ptr.key }
    }
}

/// Vertex refitted without the tracks of the candidates it is labelled with.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct RefitVertex {
    pub vertex: Vertex,
    pub user_cands: BTreeMap<String, CandidateLink>,
}

impl RefitVertex {
    /// Starts from a copy of the given vertex with no candidate labels.
    pub fn from_template(template: &Vertex) -> Self {
        RefitVertex { vertex: template.clone(), user_cands: BTreeMap::new() }
    }

    /// Overwrites the vertex body with a fit result.
    pub fn apply_fit(&mut self, fitted: &TransientVertex) {
        self.vertex.position = [fitted.position.x, fitted.position.y, fitted.position.z];
        for i in 0..3 {
            for j in 0..3 {
                self.vertex.covariance[i][j] = fitted.covariance[(i, j)];
            }
        }
        self.vertex.chi2 = fitted.chi2;
        self.vertex.ndof = fitted.ndof;
        self.vertex.n_tracks = fitted.track_weights.len();
        self.vertex.is_valid = true;
    }

    pub fn add_user_cand(&mut self, label: String, ptr: &CandidatePtr<'_>) {
        self.user_cands.insert(label, CandidateLink::from(ptr));
    }

    pub fn user_cand(&self, label: &str) -> Option<&CandidateLink> {
        self.user_cands.get(label)
    }

    pub fn probability(&self) -> f64 {
        self.vertex.probability()
    }
}

impl Display for RefitVertex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.vertex)?;
        for (label, link) in &self.user_cands {
            write!(f, " {}={}[{}]", label, link.product, link.key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probability() {
        let mut vertex = Vertex::new([0.0; 3], [[0.0; 3]; 3], 0.0, 4.0, 5);
        assert!((vertex.probability() - 1.0).abs() < 1e-12);
        vertex.chi2 = 4.0;
        // P(chi2 > 4 | ndof = 4) = 3 exp(-2)
        assert!((vertex.probability() - 3.0 * (-2.0f64).exp()).abs() < 1e-9);
        vertex.ndof = 0.0;
        assert_eq!(vertex.probability(), 0.0);
    }

    #[test]
    fn test_beam_spot_covariance() {
        let bs = BeamSpot::new([0.1, -0.05, 0.3], 3.5, 0.001, 0.002);
        let cov = bs.covariance().unwrap();
        assert!((cov[(2, 2)] - 12.25).abs() < 1e-12);
        assert!((cov[(0, 0)] - 1e-6).abs() < 1e-18);
        assert!(BeamSpot::new([0.0; 3], 0.0, 0.001, 0.001).covariance().is_none());
    }

    #[test]
    fn test_template_copy_keeps_pv_until_fit() {
        let pv = Vertex::new([0.01, 0.02, 1.5], [[1e-6, 0.0, 0.0], [0.0, 1e-6, 0.0], [0.0, 0.0, 1e-4]], 12.0, 15.0, 9);
        let refit = RefitVertex::from_template(&pv);
        assert_eq!(refit.vertex, pv);
        assert!(refit.user_cands.is_empty());
    }
}
