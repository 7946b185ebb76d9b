//! Kinematic and identification preselection of candidate pairs.
//!
//! A refit is expensive; pairs that the downstream analysis channels would drop
//! anyway are rejected before any track is touched.

use std::fmt::{self, Display, Formatter};
use serde::{Serialize, Deserialize};

use crate::data::candidate::{Candidate, CandidatePtr, Species};

/// Deep-tau discriminators, all three must pass.
pub const DEEP_TAU_IDS: [&str; 3] = [
    "byVVVLooseDeepTau2017v2p1VSjet",
    "byVVVLooseDeepTau2017v2p1VSe",
    "byVLooseDeepTau2017v2p1VSmu",
];

/// Legacy MVA isolation and anti-lepton discriminators, all three must pass.
pub const LEGACY_TAU_IDS: [&str; 3] = [
    "byVLooseIsolationMVArun2017v2DBnewDMwLT2017",
    "againstElectronVLooseMVA6",
    "againstMuonLoose3",
];

/// Analysis channel of a candidate pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PairChannel {
    ElectronElectron,
    MuonMuon,
    ElectronMuon,
    LeptonTau,
    TauTau,
}

impl PairChannel {
    /// Classifies a pair by species; the result does not depend on the order.
    pub fn classify(a: Species, b: Species) -> PairChannel {
        match (a, b) {
            (Species::Electron, Species::Electron) => PairChannel::ElectronElectron,
            (Species::Muon, Species::Muon) => PairChannel::MuonMuon,
            (Species::Electron, Species::Muon) | (Species::Muon, Species::Electron) => PairChannel::ElectronMuon,
            _ if a.is_light_lepton() || b.is_light_lepton() => PairChannel::LeptonTau,
            _ => PairChannel::TauTau,
        }
    }
}

impl Display for PairChannel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PairChannel::ElectronElectron => write!(f, "ee"),
            PairChannel::MuonMuon => write!(f, "mm"),
            PairChannel::ElectronMuon => write!(f, "em"),
            PairChannel::LeptonTau => write!(f, "lt"),
            PairChannel::TauTau => write!(f, "tt"),
        }
    }
}

/// Transverse momentum floors in GeV, inclusive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairGateThresholds {
    /// Both legs of an ee or mm pair.
    pub same_flavour_pt: f64,
    /// Both legs of an e-mu pair.
    pub electron_muon_pt: f64,
    /// The electron or muon of a lepton-tau pair.
    pub lepton_tau_lepton_pt: f64,
    /// Both legs of a tau-tau pair.
    pub tau_tau_pt: f64,
}

impl Default for PairGateThresholds {
    fn default() -> Self {
        PairGateThresholds {
            same_flavour_pt: 19.0,
            electron_muon_pt: 10.0,
            lepton_tau_lepton_pt: 19.0,
            tau_tau_pt: 39.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateRejection {
    LowPt(PairChannel),
    TauId(PairChannel),
}

impl GateRejection {
    pub fn channel(&self) -> PairChannel {
        match self {
            GateRejection::LowPt(channel) | GateRejection::TauId(channel) => *channel,
        }
    }
}

impl Display for GateRejection {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            GateRejection::LowPt(channel) => write!(f, "{} pair below pt threshold", channel),
            GateRejection::TauId(channel) => write!(f, "{} pair failed tau identification", channel),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateDecision {
    Admit,
    Reject(GateRejection),
}

impl GateDecision {
    pub fn is_admit(&self) -> bool {
        matches!(self, GateDecision::Admit)
    }
}

/// True unless the candidate is a tau failing both discriminator bundles.
pub fn pass_tau_id(cand: &Candidate) -> bool {
    match cand.tau_details() {
        Some(tau) => {
            DEEP_TAU_IDS.iter().all(|name| tau.tau_id(name))
                || LEGACY_TAU_IDS.iter().all(|name| tau.tau_id(name))
        }
        None => true,
    }
}

#[derive(Clone, Debug, Default)]
pub struct PairGate {
    pub thresholds: PairGateThresholds,
}

impl PairGate {
    pub fn new(thresholds: PairGateThresholds) -> Self {
        PairGate { thresholds }
    }

    /// Decides whether a combination is worth refitting.
    ///
    /// The policy is defined for pairs only; combinations of any other size are admitted.
    pub fn evaluate(&self, combination: &[CandidatePtr<'_>]) -> GateDecision {
        match combination {
            [a, b] => self.evaluate_pair(a.get(), b.get()),
            _ => GateDecision::Admit,
        }
    }

    pub fn evaluate_pair(&self, a: &Candidate, b: &Candidate) -> GateDecision {
        let t = &self.thresholds;
        let channel = PairChannel::classify(a.species(), b.species());
        let both_above = |floor: f64| a.p4.pt >= floor && b.p4.pt >= floor;

        match channel {
            PairChannel::ElectronElectron | PairChannel::MuonMuon => {
                if !both_above(t.same_flavour_pt) {
                    return GateDecision::Reject(GateRejection::LowPt(channel));
                }
            }
            PairChannel::ElectronMuon => {
                if !both_above(t.electron_muon_pt) {
                    return GateDecision::Reject(GateRejection::LowPt(channel));
                }
            }
            PairChannel::LeptonTau => {
                if !pass_tau_id(a) || !pass_tau_id(b) {
                    return GateDecision::Reject(GateRejection::TauId(channel));
                }
                let lepton_too_soft = |c: &Candidate| c.species().is_light_lepton() && c.p4.pt < t.lepton_tau_lepton_pt;
                if lepton_too_soft(a) || lepton_too_soft(b) {
                    return GateDecision::Reject(GateRejection::LowPt(channel));
                }
            }
            PairChannel::TauTau => {
                if !pass_tau_id(a) || !pass_tau_id(b) {
                    return GateDecision::Reject(GateRejection::TauId(channel));
                }
                if !both_above(t.tau_tau_pt) {
                    return GateDecision::Reject(GateRejection::LowPt(channel));
                }
            }
        }
        GateDecision::Admit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use crate::data::candidate::TauDetails;
    use crate::data::kinematics::LorentzVector;

    fn p4(pt: f64) -> LorentzVector {
        LorentzVector::new(pt, 0.1, 0.2, 0.0)
    }

    fn tau(pt: f64, ids: &[&str]) -> Candidate {
        let ids: BTreeMap<String, bool> = ids.iter().map(|n| (n.to_string(), true)).collect();
        Candidate::tau(1, p4(pt), TauDetails::new(Vec::new(), ids))
    }

    fn assert_symmetric(gate: &PairGate, a: &Candidate, b: &Candidate) -> GateDecision {
        let forward = gate.evaluate_pair(a, b);
        let backward = gate.evaluate_pair(b, a);
        assert_eq!(forward.is_admit(), backward.is_admit());
        forward
    }

    #[test]
    fn test_classify() {
        use Species::*;
        assert_eq!(PairChannel::classify(Electron, Electron), PairChannel::ElectronElectron);
        assert_eq!(PairChannel::classify(Muon, Electron), PairChannel::ElectronMuon);
        assert_eq!(PairChannel::classify(Tau, Muon), PairChannel::LeptonTau);
        assert_eq!(PairChannel::classify(Electron, Other), PairChannel::LeptonTau);
        assert_eq!(PairChannel::classify(Tau, Tau), PairChannel::TauTau);
        assert_eq!(PairChannel::classify(Other, Tau), PairChannel::TauTau);
    }

    #[test]
    fn test_tau_id_bundles() {
        assert!(pass_tau_id(&tau(40.0, &DEEP_TAU_IDS)));
        assert!(pass_tau_id(&tau(40.0, &LEGACY_TAU_IDS)));
        assert!(!pass_tau_id(&tau(40.0, &[DEEP_TAU_IDS[0], DEEP_TAU_IDS[1], LEGACY_TAU_IDS[2]])));
        assert!(!pass_tau_id(&tau(40.0, &[])));
        assert!(pass_tau_id(&Candidate::electron(-1, p4(5.0))));
    }

    #[test]
    fn test_same_flavour_thresholds() {
        let gate = PairGate::default();
        let e25 = Candidate::electron(-1, p4(25.0));
        let e30 = Candidate::electron(1, p4(30.0));
        let e15 = Candidate::electron(1, p4(15.0));
        let e19 = Candidate::electron(1, p4(19.0));
        assert!(assert_symmetric(&gate, &e25, &e30).is_admit());
        assert_eq!(
            assert_symmetric(&gate, &e15, &e30),
            GateDecision::Reject(GateRejection::LowPt(PairChannel::ElectronElectron))
        );
        assert!(assert_symmetric(&gate, &e19, &e25).is_admit());

        let m20 = Candidate::muon(-1, p4(20.0));
        let m18 = Candidate::muon(1, p4(18.9));
        assert!(!assert_symmetric(&gate, &m20, &m18).is_admit());
    }

    #[test]
    fn test_electron_muon_threshold() {
        let gate = PairGate::default();
        let e = Candidate::electron(-1, p4(10.0));
        let m = Candidate::muon(1, p4(12.0));
        let soft = Candidate::muon(1, p4(9.5));
        assert!(assert_symmetric(&gate, &e, &m).is_admit());
        assert!(!assert_symmetric(&gate, &e, &soft).is_admit());
    }

    #[test]
    fn test_lepton_tau_branch() {
        let gate = PairGate::default();
        let e = Candidate::electron(-1, p4(25.0));
        let soft_e = Candidate::electron(-1, p4(18.0));
        // no tau pt floor on this branch
        let good_tau = tau(21.0, &DEEP_TAU_IDS);
        let bad_tau = tau(80.0, &[]);

        assert!(assert_symmetric(&gate, &e, &good_tau).is_admit());
        assert_eq!(
            assert_symmetric(&gate, &e, &bad_tau),
            GateDecision::Reject(GateRejection::TauId(PairChannel::LeptonTau))
        );
        assert_eq!(
            assert_symmetric(&gate, &soft_e, &good_tau),
            GateDecision::Reject(GateRejection::LowPt(PairChannel::LeptonTau))
        );
    }

    #[test]
    fn test_tau_tau_branch() {
        let gate = PairGate::default();
        let t45 = tau(45.0, &LEGACY_TAU_IDS);
        let t40 = tau(40.0, &DEEP_TAU_IDS);
        let t38 = tau(38.0, &DEEP_TAU_IDS);
        let t50_bad = tau(50.0, &DEEP_TAU_IDS[..2]);
        assert!(assert_symmetric(&gate, &t45, &t40).is_admit());
        assert!(!assert_symmetric(&gate, &t45, &t38).is_admit());
        assert_eq!(
            assert_symmetric(&gate, &t45, &t50_bad),
            GateDecision::Reject(GateRejection::TauId(PairChannel::TauTau))
        );
    }

    #[test]
    fn test_non_pairs_bypass_the_gate() {
        let gate = PairGate::default();
        let tag: crate::data::event::InputTag = "slimmedElectrons".parse().unwrap();
        let soft = Candidate::electron(-1, p4(1.0));
        let single = [CandidatePtr::new(&tag, 0, &soft)];
        assert!(gate.evaluate(&single).is_admit());
    }
}
