use serde::{Serialize, Deserialize};

use crate::algorithm::pair_gate::PairGateThresholds;
use crate::algorithm::track_exclusion::MatchTolerance;
use crate::data::event::InputTag;
use crate::refit::error::ConfigError;

/// Configuration of the vertex refit producer.
///
/// Every field except `gate` is required when deserializing; the camelCase
/// names are the ones used in configuration files.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefitConfig {
    /// Primary pool of particle-flow candidates carrying the tracks.
    pub src_cands: InputTag,
    /// Tracks not associated with any particle-flow candidate.
    pub src_lost_tracks: InputTag,
    pub src_electrons: InputTag,
    pub src_muons: InputTag,
    pub src_taus: InputTag,
    /// Collections whose candidates are combined, in this order.
    pub src_leptons: Vec<InputTag>,
    #[serde(rename = "PVTag")]
    pub pv_tag: InputTag,
    pub beam_spot: InputTag,
    /// Maximum (eta, phi) distance for a track to be matched to a candidate.
    pub delta_r_threshold: f64,
    /// Maximum relative pt difference for a track to be matched to a candidate.
    pub delta_pt_threshold: f64,
    pub use_beam_spot: bool,
    pub use_lost_cands: bool,
    /// Publish a key-to-vertex map instead of the ordered vertex list.
    pub store_as_map: bool,
    #[serde(rename = "combineNLeptons")]
    pub combine_n_leptons: usize,
    #[serde(default)]
    pub gate: PairGateThresholds,
}

impl RefitConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("deltaRThreshold", self.delta_r_threshold),
            ("deltaPtThreshold", self.delta_pt_threshold),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::InvalidTolerance { name, value });
            }
        }
        if self.combine_n_leptons == 0 {
            return Err(ConfigError::InvalidArity);
        }
        if self.src_leptons.is_empty() {
            return Err(ConfigError::NoLeptonSources);
        }
        Ok(())
    }

    pub fn match_tolerance(&self) -> MatchTolerance {
        MatchTolerance::new(self.delta_r_threshold, self.delta_pt_threshold)
    }

    /// Settings used for tau-pair refits in MiniAOD.
    pub fn mini_aod_template() -> Result<Self, ConfigError> {
        Ok(RefitConfig {
            src_cands: "packedPFCandidates".parse()?,
            src_lost_tracks: "lostTracks".parse()?,
            src_electrons: "slimmedElectrons".parse()?,
            src_muons: "slimmedMuons".parse()?,
            src_taus: "slimmedTaus".parse()?,
            src_leptons: vec![
                "slimmedElectrons".parse()?,
                "slimmedMuons".parse()?,
                "slimmedTaus".parse()?,
            ],
            pv_tag: "offlineSlimmedPrimaryVertices".parse()?,
            beam_spot: "offlineBeamSpot".parse()?,
            delta_r_threshold: 0.001,
            delta_pt_threshold: 0.001,
            use_beam_spot: true,
            use_lost_cands: true,
            store_as_map: false,
            combine_n_leptons: 2,
            gate: PairGateThresholds::default(),
        })
    }
}
