use std::f64::consts::PI;
use std::fmt::{self, Display, Formatter};
use serde::{Serialize, Deserialize};

/// Anything that carries a four-momentum.
pub trait HasP4 {
    fn p4(&self) -> &LorentzVector;

    fn pt(&self) -> f64 {
        self.p4().pt
    }
}

/// Four-momentum in collider coordinates.
///
/// # Description
///
/// Stores transverse momentum (GeV), pseudorapidity, azimuth (rad) and mass (GeV),
/// the representation reconstruction objects are usually handed around in.
///
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LorentzVector {
    pub pt: f64,
    pub eta: f64,
    pub phi: f64,
    #[serde(default)]
    pub mass: f64,
}

impl LorentzVector {
    /// Constructs a new `LorentzVector`.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use vtxcore::data::kinematics::LorentzVector;
    /// let p4 = LorentzVector::new(25.0, 0.5, 1.0, 0.000511);
    /// assert_eq!(p4.pt, 25.0);
    /// ```
    pub fn new(pt: f64, eta: f64, phi: f64, mass: f64) -> Self {
        LorentzVector { pt, eta, phi, mass }
    }

    /// Builds a massless four-momentum from a cartesian three-momentum.
    pub fn from_momentum(px: f64, py: f64, pz: f64) -> Self {
        let pt = px.hypot(py);
        let phi = if pt > 0.0 { py.atan2(px) } else { 0.0 };
        let eta = if pt > 0.0 { (pz / pt).asinh() } else if pz >= 0.0 { f64::INFINITY } else { f64::NEG_INFINITY };
        LorentzVector { pt, eta, phi, mass: 0.0 }
    }

    pub fn px(&self) -> f64 {
        self.pt * self.phi.cos()
    }

    pub fn py(&self) -> f64 {
        self.pt * self.phi.sin()
    }

    pub fn pz(&self) -> f64 {
        self.pt * self.eta.sinh()
    }

    pub fn p(&self) -> f64 {
        self.pt * self.eta.cosh()
    }

    pub fn energy(&self) -> f64 {
        self.p().hypot(self.mass)
    }
}

impl HasP4 for LorentzVector {
    fn p4(&self) -> &LorentzVector {
        self
    }
}

impl Display for LorentzVector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "(pt={:.2}, eta={:.3}, phi={:.3}, m={:.4})", self.pt, self.eta, self.phi, self.mass)
    }
}

/// Azimuthal difference wrapped into [-pi, pi].
///
/// Constant time for any input; a non-finite difference gives NaN.
pub fn delta_phi(phi1: f64, phi2: f64) -> f64 {
    let dphi = (phi1 - phi2) % (2.0 * PI);
    if dphi > PI {
        dphi - 2.0 * PI
    } else if dphi <= -PI {
        dphi + 2.0 * PI
    } else {
        dphi
    }
}

/// Euclidean distance in (eta, phi) space.
///
/// # Example
///
/// ```rust
/// # use vtxcore::data::kinematics::{delta_r, LorentzVector};
/// let a = LorentzVector::new(10.0, 0.0, 0.0, 0.0);
/// let b = LorentzVector::new(10.0, 0.3, 0.4, 0.0);
/// assert!((delta_r(&a, &b) - 0.5).abs() < 1e-12);
/// ```
pub fn delta_r<A: HasP4 + ?Sized, B: HasP4 + ?Sized>(a: &A, b: &B) -> f64 {
    let (a, b) = (a.p4(), b.p4());
    let deta = a.eta - b.eta;
    let dphi = delta_phi(a.phi, b.phi);
    deta.hypot(dphi)
}

/// Relative transverse momentum difference `|pt_a / pt_b - 1|`.
///
/// A zero `pt_b` yields infinity, which never passes a finite tolerance.
pub fn relative_pt_difference(pt_a: f64, pt_b: f64) -> f64 {
    (pt_a / pt_b - 1.0).abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_phi_wraps() {
        let dphi = delta_phi(3.1, -3.1);
        assert!((dphi - (6.2 - 2.0 * PI)).abs() < 1e-12);
        assert!(delta_phi(0.5, 0.2) > 0.0);
    }

    #[test]
    fn test_delta_phi_huge_angles_reduce_immediately() {
        let a = LorentzVector::new(10.0, 0.0, 1.0e20, 0.0);
        let b = LorentzVector::new(10.0, 0.0, 0.0, 0.0);
        let dr = delta_r(&a, &b);
        assert!(dr.is_finite() && dr <= PI);

        let dphi = delta_phi(1.0e6, 0.0);
        assert!(dphi > -PI && dphi <= PI);
        assert!((dphi - (1.0e6 - (1.0e6 / (2.0 * PI)).round() * 2.0 * PI)).abs() < 1e-6);
        assert!((delta_phi(4.0 * PI + 0.5, 0.0) - 0.5).abs() < 1e-12);
        assert!(delta_phi(f64::INFINITY, 0.0).is_nan());
    }

    #[test]
    fn test_delta_r_is_zero_for_identical_directions() {
        let a = LorentzVector::new(30.0, 1.2, -2.0, 0.1);
        assert_eq!(delta_r(&a, &a), 0.0);
    }

    #[test]
    fn test_momentum_round_trip() {
        let a = LorentzVector::new(20.0, -0.7, 2.5, 0.0);
        let b = LorentzVector::from_momentum(a.px(), a.py(), a.pz());
        assert!((a.pt - b.pt).abs() < 1e-9);
        assert!((a.eta - b.eta).abs() < 1e-9);
        assert!(delta_phi(a.phi, b.phi).abs() < 1e-9);
    }

    #[test]
    fn test_relative_pt_difference() {
        assert!((relative_pt_difference(11.0, 10.0) - 0.1).abs() < 1e-12);
        assert_eq!(relative_pt_difference(10.0, 10.0), 0.0);
        assert!(relative_pt_difference(10.0, 0.0).is_infinite());
    }
}
