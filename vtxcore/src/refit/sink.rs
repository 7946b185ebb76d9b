use std::collections::BTreeMap;
use bincode::{Decode, Encode};
use serde::{Serialize, Deserialize};

use crate::data::candidate::CandidatePtr;
use crate::data::vertex::RefitVertex;

/// Identity key of a combination: the wrapping sum of its constituents' identity hashes.
///
/// Summation makes the key independent of the order the constituents were combined in.
pub fn combination_key(combination: &[CandidatePtr<'_>]) -> u64 {
    combination.iter().fold(0u64, |acc, ptr| acc.wrapping_add(ptr.id_hash()))
}

/// Label a constituent is attached to its refitted vertex under.
pub fn lepton_label(index: usize) -> String {
    format!("lepton{}", index)
}

/// The product published for one event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
#[serde(tag = "kind", content = "vertices", rename_all = "snake_case")]
pub enum RefitProduct {
    Vertices(Vec<RefitVertex>),
    VertexMap(BTreeMap<u64, RefitVertex>),
}

impl RefitProduct {
    pub fn len(&self) -> usize {
        match self {
            RefitProduct::Vertices(v) => v.len(),
            RefitProduct::VertexMap(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Vertices in publication order.
    pub fn vertices(&self) -> Vec<&RefitVertex> {
        match self {
            RefitProduct::Vertices(v) => v.iter().collect(),
            RefitProduct::VertexMap(m) => m.values().collect(),
        }
    }
}

/// Collects accepted refits of one event.
#[derive(Clone, Debug, Default)]
pub struct RefitSink {
    vertices: Vec<RefitVertex>,
    by_key: BTreeMap<u64, RefitVertex>,
    store_as_map: bool,
}

impl RefitSink {
    pub fn new(store_as_map: bool) -> Self {
        RefitSink { vertices: Vec::new(), by_key: BTreeMap::new(), store_as_map }
    }

    /// Labels the vertex with its constituents and stores it; returns the combination key.
    ///
    /// In map mode a key that is already present keeps its first vertex.
    pub fn deposit(&mut self, combination: &[CandidatePtr<'_>], mut vertex: RefitVertex) -> u64 {
        for (i, ptr) in combination.iter().enumerate() {
            vertex.add_user_cand(lepton_label(i), ptr);
        }
        let key = combination_key(combination);
        if self.store_as_map {
            self.by_key.entry(key).or_insert_with(|| vertex.clone());
        }
        self.vertices.push(vertex);
        key
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn finish(self) -> RefitProduct {
        if self.store_as_map {
            RefitProduct::VertexMap(self.by_key)
        } else {
            RefitProduct::Vertices(self.vertices)
        }
    }
}
