//! Removal of the tracks that belong to a combination's own candidates.

use tracing::trace;

use crate::data::candidate::{CandidateKind, CandidatePtr};
use crate::data::kinematics::{delta_r, relative_pt_difference, HasP4, LorentzVector};
use crate::data::track::{PackedCandidate, Track};
use crate::refit::error::RefitError;

/// Index of the vertex the refit replaces within the primary vertex collection.
pub const PRIMARY_VERTEX_INDEX: usize = 0;

/// Matching window between a candidate and a track, both bounds exclusive.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MatchTolerance {
    pub delta_r: f64,
    pub delta_pt: f64,
}

impl MatchTolerance {
    pub fn new(delta_r: f64, delta_pt: f64) -> Self {
        MatchTolerance { delta_r, delta_pt }
    }

    /// True if `track` lies within the window around `target`.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use vtxcore::algorithm::track_exclusion::MatchTolerance;
    /// # use vtxcore::data::kinematics::LorentzVector;
    /// let tol = MatchTolerance::new(0.01, 0.05);
    /// let lepton = LorentzVector::new(30.0, 0.5, 1.0, 0.0);
    /// assert!(tol.matches(&lepton, &LorentzVector::new(29.5, 0.505, 1.0, 0.0)));
    /// assert!(!tol.matches(&lepton, &LorentzVector::new(20.0, 0.5, 1.0, 0.0)));
    /// ```
    pub fn matches(&self, target: &LorentzVector, track: &LorentzVector) -> bool {
        delta_r(target, track) < self.delta_r && relative_pt_difference(target.pt, track.pt) < self.delta_pt
    }
}

/// Whether a pool entry may enter the vertex fit at all.
///
/// The track must be charged, carry a usable trajectory, originate from the
/// vertex being refitted and have been used in that vertex's original fit.
pub fn is_eligible(cand: &PackedCandidate, pv_index: usize) -> bool {
    cand.charge != 0
        && cand.best_track.is_some()
        && cand.vertex_ref == Some(pv_index)
        && cand.pv_association_quality.used_in_fit()
}

/// Four-momenta a track is compared against to decide whether it belongs to the combination.
///
/// Electrons and muons are their own target. Every other constituent contributes
/// its tau signal charged hadrons; a constituent that is neither a light lepton
/// nor carries tau decay products violates the species contract and is an error.
pub fn match_targets<'a>(combination: &[CandidatePtr<'a>]) -> Result<Vec<&'a LorentzVector>, RefitError> {
    let mut targets = Vec::new();
    for ptr in combination {
        let cand = ptr.get();
        if cand.species().is_light_lepton() {
            targets.push(&cand.p4);
            continue;
        }
        match &cand.kind {
            CandidateKind::Tau(tau) => targets.extend(tau.signal_charged_hadr_cands.iter().map(|s| s.p4())),
            _ => {
                return Err(RefitError::MissingSignalCandidates {
                    product: ptr.product.encode(),
                    key: ptr.key,
                    pdg_id: cand.pdg_id(),
                })
            }
        }
    }
    Ok(targets)
}

/// True if the track matches any target.
pub fn matches_any(track: &LorentzVector, targets: &[&LorentzVector], tolerance: &MatchTolerance) -> bool {
    targets.iter().any(|target| tolerance.matches(target, track))
}

/// Tracks from `pools` that are eligible for the fit and not matched to any target.
pub fn surviving_tracks<'a>(
    pools: &[&'a [PackedCandidate]],
    targets: &[&LorentzVector],
    tolerance: &MatchTolerance,
    pv_index: usize,
) -> Vec<&'a Track> {
    let mut survivors = Vec::new();
    for pool in pools {
        for cand in pool.iter() {
            if !is_eligible(cand, pv_index) {
                continue;
            }
            if matches_any(&cand.p4, targets, tolerance) {
                trace!(track = %cand.p4, "track excluded");
                continue;
            }
            if let Some(track) = &cand.best_track {
                survivors.push(track);
            }
        }
    }
    survivors
}
