use std::fmt::{self, Display, Formatter};
use serde::{Serialize, Deserialize};

use crate::data::kinematics::{HasP4, LorentzVector};

/// How a particle-flow candidate's track was associated with its vertex.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PvAssociationQuality {
    NotReconstructed,
    OtherDeltaZ,
    CompatibilityBTag,
    CompatibilityDz,
    UsedInFitLoose,
    UsedInFitTight,
}

impl PvAssociationQuality {
    /// Returns the grade corresponding to its numeric code; unknown codes map to `NotReconstructed`.
    pub fn new(code: i32) -> PvAssociationQuality {
        match code {
            1 => PvAssociationQuality::OtherDeltaZ,
            4 => PvAssociationQuality::CompatibilityBTag,
            5 => PvAssociationQuality::CompatibilityDz,
            6 => PvAssociationQuality::UsedInFitLoose,
            7 => PvAssociationQuality::UsedInFitTight,
            _ => PvAssociationQuality::NotReconstructed,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            PvAssociationQuality::NotReconstructed => 0,
            PvAssociationQuality::OtherDeltaZ => 1,
            PvAssociationQuality::CompatibilityBTag => 4,
            PvAssociationQuality::CompatibilityDz => 5,
            PvAssociationQuality::UsedInFitLoose => 6,
            PvAssociationQuality::UsedInFitTight => 7,
        }
    }

    /// Only tracks that entered the original vertex fit may enter the refit.
    pub fn used_in_fit(&self) -> bool {
        matches!(self, PvAssociationQuality::UsedInFitLoose | PvAssociationQuality::UsedInFitTight)
    }
}

impl Default for PvAssociationQuality {
    fn default() -> Self {
        PvAssociationQuality::NotReconstructed
    }
}

impl Display for PvAssociationQuality {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PvAssociationQuality::NotReconstructed => write!(f, "NotReconstructed"),
            PvAssociationQuality::OtherDeltaZ => write!(f, "OtherDeltaZ"),
            PvAssociationQuality::CompatibilityBTag => write!(f, "CompatibilityBTag"),
            PvAssociationQuality::CompatibilityDz => write!(f, "CompatibilityDz"),
            PvAssociationQuality::UsedInFitLoose => write!(f, "UsedInFitLoose"),
            PvAssociationQuality::UsedInFitTight => write!(f, "UsedInFitTight"),
        }
    }
}

/// Best-fit trajectory of a charged particle, linearised near the beam line.
///
/// `reference_point` is in cm, `momentum` in GeV. The two sigmas are the position
/// uncertainties transverse to and along the beam axis at the reference point.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub reference_point: [f64; 3],
    pub momentum: [f64; 3],
    pub charge: i32,
    pub sigma_transverse: f64,
    pub sigma_longitudinal: f64,
}

impl Track {
    pub fn new(reference_point: [f64; 3], momentum: [f64; 3], charge: i32, sigma_transverse: f64, sigma_longitudinal: f64) -> Self {
        Track { reference_point, momentum, charge, sigma_transverse, sigma_longitudinal }
    }

    pub fn pt(&self) -> f64 {
        self.momentum[0].hypot(self.momentum[1])
    }

    pub fn p4(&self) -> LorentzVector {
        LorentzVector::from_momentum(self.momentum[0], self.momentum[1], self.momentum[2])
    }
}

/// A particle-flow candidate as stored in the track pools.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PackedCandidate {
    pub charge: i32,
    pub p4: LorentzVector,
    /// Index of the originating vertex in the primary vertex collection.
    #[serde(default)]
    pub vertex_ref: Option<usize>,
    #[serde(default)]
    pub pv_association_quality: PvAssociationQuality,
    #[serde(default)]
    pub best_track: Option<Track>,
}

impl PackedCandidate {
    pub fn new(
        charge: i32,
        p4: LorentzVector,
        vertex_ref: Option<usize>,
        pv_association_quality: PvAssociationQuality,
        best_track: Option<Track>,
    ) -> Self {
        PackedCandidate { charge, p4, vertex_ref, pv_association_quality, best_track }
    }

    /// A candidate built around a track; the four-momentum is taken from the track momentum.
    pub fn from_track(track: Track, vertex_ref: Option<usize>, pv_association_quality: PvAssociationQuality) -> Self {
        PackedCandidate {
            charge: track.charge,
            p4: track.p4(),
            vertex_ref,
            pv_association_quality,
            best_track: Some(track),
        }
    }
}

impl HasP4 for PackedCandidate {
    fn p4(&self) -> &LorentzVector {
        &self.p4
    }
}
