use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::OnceLock;
use regex::Regex;
use serde::{Serialize, Deserialize};

use crate::data::candidate::Candidate;
use crate::data::track::PackedCandidate;
use crate::data::vertex::{BeamSpot, Vertex};
use crate::refit::error::{ConfigError, RefitError};

fn input_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)(?::([A-Za-z0-9_]*))?(?::([A-Za-z0-9_]*))?$")
            .expect("input tag pattern is valid")
    })
}

/// Selector for one product of an event, written `label[:instance[:process]]`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InputTag {
    pub label: String,
    pub instance: String,
    pub process: String,
}

impl InputTag {
    /// Canonical string form, trailing empty fields dropped.
    pub fn encode(&self) -> String {
        if !self.process.is_empty() {
            format!("{}:{}:{}", self.label, self.instance, self.process)
        } else if !self.instance.is_empty() {
            format!("{}:{}", self.label, self.instance)
        } else {
            self.label.clone()
        }
    }
}

impl FromStr for InputTag {
    type Err = ConfigError;

    /// Parses an input tag.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use vtxcore::data::event::InputTag;
    /// let tag: InputTag = "offlineSlimmedPrimaryVertices::PAT".parse().unwrap();
    /// assert_eq!(tag.label, "offlineSlimmedPrimaryVertices");
    /// assert_eq!(tag.process, "PAT");
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let captures = input_tag_regex()
            .captures(s.trim())
            .ok_or_else(|| ConfigError::InvalidInputTag(s.to_string()))?;
        let field = |i: usize| captures.get(i).map(|m| m.as_str().to_string()).unwrap_or_default();
        Ok(InputTag {
            label: field(1),
            instance: field(2),
            process: field(3),
        })
    }
}

impl TryFrom<String> for InputTag {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<InputTag> for String {
    fn from(tag: InputTag) -> Self {
        tag.encode()
    }
}

impl Display for InputTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// All products of one collision event, keyed by the canonical input tag string.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(default)]
    pub run: u32,
    #[serde(default)]
    pub lumi: u32,
    pub event: u64,
    #[serde(default)]
    pub candidates: BTreeMap<String, Vec<Candidate>>,
    #[serde(default)]
    pub packed_candidates: BTreeMap<String, Vec<PackedCandidate>>,
    #[serde(default)]
    pub vertices: BTreeMap<String, Vec<Vertex>>,
    #[serde(default)]
    pub beam_spots: BTreeMap<String, BeamSpot>,
}

impl EventRecord {
    pub fn new(run: u32, lumi: u32, event: u64) -> Self {
        EventRecord { run, lumi, event, ..Default::default() }
    }

    pub fn candidates(&self, tag: &InputTag) -> Result<&[Candidate], RefitError> {
        self.candidates
            .get(&tag.encode())
            .map(|v| v.as_slice())
            .ok_or_else(|| RefitError::MissingProduct { kind: "candidates", tag: tag.encode() })
    }

    pub fn packed_candidates(&self, tag: &InputTag) -> Result<&[PackedCandidate], RefitError> {
        self.packed_candidates
            .get(&tag.encode())
            .map(|v| v.as_slice())
            .ok_or_else(|| RefitError::MissingProduct { kind: "packed candidates", tag: tag.encode() })
    }

    pub fn vertices(&self, tag: &InputTag) -> Result<&[Vertex], RefitError> {
        self.vertices
            .get(&tag.encode())
            .map(|v| v.as_slice())
            .ok_or_else(|| RefitError::MissingProduct { kind: "vertices", tag: tag.encode() })
    }

    pub fn beam_spot(&self, tag: &InputTag) -> Result<&BeamSpot, RefitError> {
        self.beam_spots
            .get(&tag.encode())
            .ok_or_else(|| RefitError::MissingProduct { kind: "beam spot", tag: tag.encode() })
    }

    pub fn insert_candidates(&mut self, tag: &InputTag, candidates: Vec<Candidate>) {
        self.candidates.insert(tag.encode(), candidates);
    }

    pub fn insert_packed_candidates(&mut self, tag: &InputTag, packed: Vec<PackedCandidate>) {
        self.packed_candidates.insert(tag.encode(), packed);
    }

    pub fn insert_vertices(&mut self, tag: &InputTag, vertices: Vec<Vertex>) {
        self.vertices.insert(tag.encode(), vertices);
    }

    pub fn insert_beam_spot(&mut self, tag: &InputTag, beam_spot: BeamSpot) {
        self.beam_spots.insert(tag.encode(), beam_spot);
    }
}

impl Display for EventRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.run, self.lumi, self.event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input_tags() {
        let tag: InputTag = "slimmedTaus".parse().unwrap();
        assert_eq!(tag.encode(), "slimmedTaus");

        let tag: InputTag = "lostTracks::PAT".parse().unwrap();
        assert_eq!(tag.instance, "");
        assert_eq!(tag.encode(), "lostTracks::PAT");

        assert!("9bad".parse::<InputTag>().is_err());
        assert!("a:b:c:d".parse::<InputTag>().is_err());
        assert!("".parse::<InputTag>().is_err());
    }

    #[test]
    fn test_missing_product_is_reported() {
        let event = EventRecord::new(1, 1, 42);
        let tag: InputTag = "packedPFCandidates".parse().unwrap();
        match event.packed_candidates(&tag) {
            Err(RefitError::MissingProduct { tag, .. }) => assert_eq!(tag, "packedPFCandidates"),
            other => panic!("unexpected result: {:?}", other.map(|p| p.len())),
        }
    }
}
