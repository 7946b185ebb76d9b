use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::ops::Deref;
use serde::{Serialize, Deserialize};
use xxhash_rust::xxh3::xxh3_64;

use crate::data::event::InputTag;
use crate::data::kinematics::{HasP4, LorentzVector};

/// Particle species a candidate was reconstructed as.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Species {
    Electron,
    Muon,
    Tau,
    Other,
}

impl Species {
    /// Returns the `Species` corresponding to a PDG particle id, sign ignored.
    pub fn from_pdg_id(pdg_id: i32) -> Species {
        match pdg_id.abs() {
            11 => Species::Electron,
            13 => Species::Muon,
            15 => Species::Tau,
            _ => Species::Other,
        }
    }

    /// Electrons and muons are matched to tracks directly.
    pub fn is_light_lepton(&self) -> bool {
        matches!(self, Species::Electron | Species::Muon)
    }
}

impl Display for Species {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Species::Electron => write!(f, "Electron"),
            Species::Muon => write!(f, "Muon"),
            Species::Tau => write!(f, "Tau"),
            Species::Other => write!(f, "Other"),
        }
    }
}

/// A charged decay product owned by a tau candidate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubCandidate {
    pub charge: i32,
    pub p4: LorentzVector,
}

impl SubCandidate {
    pub fn new(charge: i32, p4: LorentzVector) -> Self {
        SubCandidate { charge, p4 }
    }
}

impl HasP4 for SubCandidate {
    fn p4(&self) -> &LorentzVector {
        &self.p4
    }
}

/// Tau-only payload: signal charged hadrons and identification flags.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TauDetails {
    #[serde(default)]
    pub signal_charged_hadr_cands: Vec<SubCandidate>,
    #[serde(default)]
    pub ids: BTreeMap<String, bool>,
}

impl TauDetails {
    pub fn new(signal_charged_hadr_cands: Vec<SubCandidate>, ids: BTreeMap<String, bool>) -> Self {
        TauDetails { signal_charged_hadr_cands, ids }
    }

    /// Value of a named discriminator; a flag that was never filled counts as failed.
    pub fn tau_id(&self, name: &str) -> bool {
        self.ids.get(name).copied().unwrap_or(false)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "species", rename_all = "lowercase")]
pub enum CandidateKind {
    Electron,
    Muon,
    Tau(TauDetails),
    Other { pdg_id: i32 },
}

/// A reconstructed physics object that can take part in a combination.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub charge: i32,
    pub p4: LorentzVector,
    pub kind: CandidateKind,
}

impl Candidate {
    pub fn new(charge: i32, p4: LorentzVector, kind: CandidateKind) -> Self {
        Candidate { charge, p4, kind }
    }

    pub fn electron(charge: i32, p4: LorentzVector) -> Self {
        Candidate::new(charge, p4, CandidateKind::Electron)
    }

    pub fn muon(charge: i32, p4: LorentzVector) -> Self {
        Candidate::new(charge, p4, CandidateKind::Muon)
    }

    pub fn tau(charge: i32, p4: LorentzVector, details: TauDetails) -> Self {
        Candidate::new(charge, p4, CandidateKind::Tau(details))
    }

    pub fn species(&self) -> Species {
        match &self.kind {
            CandidateKind::Electron => Species::Electron,
            CandidateKind::Muon => Species::Muon,
            CandidateKind::Tau(_) => Species::Tau,
            CandidateKind::Other { pdg_id } => Species::from_pdg_id(*pdg_id),
        }
    }

    pub fn pdg_id(&self) -> i32 {
        let magnitude = match &self.kind {
            CandidateKind::Electron => 11,
            CandidateKind::Muon => 13,
            CandidateKind::Tau(_) => 15,
            CandidateKind::Other { pdg_id } => return *pdg_id,
        };
        if self.charge > 0 { -magnitude } else { magnitude }
    }

    pub fn tau_details(&self) -> Option<&TauDetails> {
        match &self.kind {
            CandidateKind::Tau(details) => Some(details),
            _ => None,
        }
    }
}

impl HasP4 for Candidate {
    fn p4(&self) -> &LorentzVector {
        &self.p4
    }
}

/// Reference to a candidate inside one event's products.
///
/// The (tag, key) pair is the candidate's identity: two pointers to the same
/// slot of the same product compare equal and hash identically, wherever they
/// were obtained.
#[derive(Clone, Copy, Debug)]
pub struct CandidatePtr<'a> {
    pub product: &'a InputTag,
    pub key: usize,
    pub cand: &'a Candidate,
}

impl<'a> CandidatePtr<'a> {
    pub fn new(product: &'a InputTag, key: usize, cand: &'a Candidate) -> Self {
        CandidatePtr { product, key, cand }
    }

    pub fn get(&self) -> &'a Candidate {
        self.cand
    }

    /// Stable 64-bit hash of the candidate's identity.
    pub fn id_hash(&self) -> u64 {
        let encoded = self.product.encode();
        let mut bytes = Vec::with_capacity(encoded.len() + 9);
        bytes.extend_from_slice(encoded.as_bytes());
        bytes.push(0);
        bytes.extend_from_slice(&(self.key as u64).to_le_bytes());
        xxh3_64(&bytes)
    }

    pub fn same_identity(&self, other: &CandidatePtr<'_>) -> bool {
        self.key == other.key && self.product == other.product
    }
}

impl PartialEq for CandidatePtr<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.same_identity(other)
    }
}

impl Eq for CandidatePtr<'_> {}

impl Deref for CandidatePtr<'_> {
    type Target = Candidate;

    fn deref(&self) -> &Candidate {
        self.cand
    }
}

impl HasP4 for CandidatePtr<'_> {
    fn p4(&self) -> &LorentzVector {
        &self.cand.p4
    }
}

impl Display for CandidatePtr<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}] {} {}", self.product, self.key, self.cand.species(), self.cand.p4)
    }
}
