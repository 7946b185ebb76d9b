//! Per-event driver of the refit: candidate collection, combination, gating,
//! track exclusion, refit and publication.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use bincode::{Decode, Encode};
use itertools::Itertools;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::algorithm::adaptive_fitter::{AdaptiveVertexFitter, VertexFitter};
use crate::algorithm::combinations::CombinationScratch;
use crate::algorithm::pair_gate::{GateDecision, PairChannel, PairGate};
use crate::algorithm::track_exclusion::{match_targets, surviving_tracks, PRIMARY_VERTEX_INDEX};
use crate::algorithm::transient_track::{LinearTrackBuilder, TransientTrackBuilder};
use crate::data::candidate::CandidatePtr;
use crate::data::event::EventRecord;
use crate::data::track::PackedCandidate;
use crate::data::vertex::RefitVertex;
use crate::refit::config::RefitConfig;
use crate::refit::error::{ConfigError, RefitError};
use crate::refit::refitter::{FitResult, RejectReason, VertexRefitter, REFIT_WEIGHT_THRESHOLD};
use crate::refit::sink::{RefitProduct, RefitSink};

/// Refit product of one event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct EventOutput {
    pub run: u32,
    pub lumi: u32,
    pub event: u64,
    pub product: RefitProduct,
}

/// Bookkeeping of what happened to the combinations of one or more events.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RefitStats {
    pub events: usize,
    pub leptons: usize,
    pub combinations: usize,
    pub gate_rejected: BTreeMap<PairChannel, usize>,
    pub insufficient_tracks: usize,
    pub fit_failures: usize,
    pub accepted: usize,
}

impl RefitStats {
    pub fn gate_rejected_total(&self) -> usize {
        self.gate_rejected.values().sum()
    }

    pub fn merge(&mut self, other: &RefitStats) {
        self.events += other.events;
        self.leptons += other.leptons;
        self.combinations += other.combinations;
        for (channel, n) in &other.gate_rejected {
            *self.gate_rejected.entry(*channel).or_default() += n;
        }
        self.insufficient_tracks += other.insufficient_tracks;
        self.fit_failures += other.fit_failures;
        self.accepted += other.accepted;
    }
}

impl Display for RefitStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let pct = if self.combinations > 0 {
            100.0 * self.accepted as f64 / self.combinations as f64
        } else {
            0.0
        };
        let per_channel = self
            .gate_rejected
            .iter()
            .map(|(channel, n)| format!("{}={}", channel, n))
            .join(", ");
        write!(
            f,
            "Refit summary: {} of {} combinations accepted ({:.1}%) in {} events with {} leptons\n\
             - rejected by pair gate: {} [{}]\n\
             - insufficient tracks: {}\n\
             - fit failures: {}",
            self.accepted,
            self.combinations,
            pct,
            self.events,
            self.leptons,
            self.gate_rejected_total(),
            per_channel,
            self.insufficient_tracks,
            self.fit_failures,
        )
    }
}

/// Refits the primary vertex once per admitted lepton combination.
///
/// The producer holds configuration and services only; every call to
/// [`produce`](Self::produce) works on its own buffers, so a producer can be
/// shared between threads processing different events.
pub struct RefitVertexProducer<B = LinearTrackBuilder, F = AdaptiveVertexFitter> {
    config: RefitConfig,
    gate: PairGate,
    builder: B,
    fitter: F,
}

impl RefitVertexProducer {
    /// Producer with the straight-line track builder and the adaptive fitter.
    pub fn new(config: RefitConfig) -> Result<Self, ConfigError> {
        Self::with_services(
            config,
            LinearTrackBuilder::default(),
            AdaptiveVertexFitter::new().with_weight_threshold(REFIT_WEIGHT_THRESHOLD),
        )
    }
}

impl<B: TransientTrackBuilder, F: VertexFitter> RefitVertexProducer<B, F> {
    pub fn with_services(config: RefitConfig, builder: B, fitter: F) -> Result<Self, ConfigError> {
        config.validate()?;
        let gate = PairGate::new(config.gate.clone());
        Ok(RefitVertexProducer { config, gate, builder, fitter })
    }

    pub fn config(&self) -> &RefitConfig {
        &self.config
    }

    /// All candidates of the lepton sources in configuration order, each identity once.
    pub fn collect_leptons<'a>(&'a self, event: &'a EventRecord) -> Result<Vec<CandidatePtr<'a>>, RefitError> {
        let mut leptons = Vec::new();
        for tag in &self.config.src_leptons {
            let candidates = event.candidates(tag)?;
            leptons.extend(candidates.iter().enumerate().map(|(key, cand)| CandidatePtr::new(tag, key, cand)));
        }
        Ok(leptons.into_iter().unique_by(|ptr| (ptr.product.encode(), ptr.key)).collect())
    }

    pub fn produce(&self, event: &EventRecord) -> Result<EventOutput, RefitError> {
        let mut stats = RefitStats::default();
        self.produce_with_stats(event, &mut stats)
    }

    pub fn produce_with_stats(&self, event: &EventRecord, stats: &mut RefitStats) -> Result<EventOutput, RefitError> {
        let cfg = &self.config;

        let primary_vertices = event.vertices(&cfg.pv_tag)?;
        let pv = primary_vertices
            .get(PRIMARY_VERTEX_INDEX)
            .ok_or_else(|| RefitError::EmptyVertexCollection { tag: cfg.pv_tag.encode() })?;
        let beam_spot = if cfg.use_beam_spot { Some(event.beam_spot(&cfg.beam_spot)?) } else { None };

        let mut pools: Vec<&[PackedCandidate]> = vec![event.packed_candidates(&cfg.src_cands)?];
        if cfg.use_lost_cands {
            pools.push(event.packed_candidates(&cfg.src_lost_tracks)?);
        }

        debug!(
            event = %event,
            electrons = event.candidates(&cfg.src_electrons).map(|c| c.len()).ok(),
            muons = event.candidates(&cfg.src_muons).map(|c| c.len()).ok(),
            taus = event.candidates(&cfg.src_taus).map(|c| c.len()).ok(),
            "event inputs"
        );

        let leptons = self.collect_leptons(event)?;
        let mut scratch = CombinationScratch::new();
        let combinations = scratch.fill(&leptons, cfg.combine_n_leptons);
        stats.events += 1;
        stats.leptons += leptons.len();
        stats.combinations += combinations.len();

        let tolerance = cfg.match_tolerance();
        let refitter = VertexRefitter::new(&self.builder, &self.fitter, beam_spot);
        let mut sink = RefitSink::new(cfg.store_as_map);

        for combination in combinations {
            if let GateDecision::Reject(reason) = self.gate.evaluate(combination) {
                debug!(event = %event, %reason, "combination rejected");
                *stats.gate_rejected.entry(reason.channel()).or_default() += 1;
                continue;
            }

            let targets = match_targets(combination)?;
            let tracks = surviving_tracks(&pools, &targets, &tolerance, PRIMARY_VERTEX_INDEX);

            match refitter.refit(&tracks) {
                FitResult::Accepted { vertex, n_tracks } => {
                    let mut refit = RefitVertex::from_template(pv);
                    refit.apply_fit(&vertex);
                    let key = sink.deposit(combination, refit);
                    stats.accepted += 1;
                    debug!(event = %event, key, n_tracks, "vertex refitted");
                }
                FitResult::Rejected(reason) => {
                    debug!(event = %event, %reason, "refit rejected");
                    match reason {
                        RejectReason::InsufficientTracks { .. } => stats.insufficient_tracks += 1,
                        RejectReason::FitFailed(_) => stats.fit_failures += 1,
                    }
                }
            }
        }

        Ok(EventOutput {
            run: event.run,
            lumi: event.lumi,
            event: event.event,
            product: sink.finish(),
        })
    }

    /// Processes events in parallel, one independent `produce` call per event.
    ///
    /// Results keep the order of `events`.
    pub fn produce_batch(
        &self,
        events: &[EventRecord],
        num_threads: usize,
    ) -> Result<Vec<Result<(EventOutput, RefitStats), RefitError>>, RefitError>
    where
        B: Sync,
        F: Sync,
    {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .map_err(|e| RefitError::ThreadPool(e.to_string()))?;

        Ok(pool.install(|| {
            events
                .par_iter()
                .map(|event| {
                    let mut stats = RefitStats::default();
                    self.produce_with_stats(event, &mut stats).map(|output| (output, stats))
                })
                .collect()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::pair_gate::DEEP_TAU_IDS;
    use crate::data::candidate::{Candidate, CandidateKind, SubCandidate, TauDetails};
    use crate::data::kinematics::LorentzVector;
    use crate::data::track::{PvAssociationQuality, Track};
    use crate::data::vertex::{BeamSpot, Vertex};

    const PILEUP: [(f64, f64, f64); 4] = [(3.0, 0.5, 0.3), (4.0, -1.0, 1.7), (2.5, 1.5, -2.0), (5.0, -0.2, -0.9)];

    fn track_from(p4: &LorentzVector, charge: i32) -> Track {
        let d = [p4.px(), p4.py(), p4.pz()];
        Track::new([0.001 * d[0], 0.001 * d[1], 0.001 * d[2]], d, charge, 0.01, 0.02)
    }

    fn packed(p4: LorentzVector, quality: PvAssociationQuality) -> PackedCandidate {
        PackedCandidate::from_track(track_from(&p4, 1), Some(0), quality)
    }

    fn config(store_as_map: bool) -> RefitConfig {
        let mut config = RefitConfig::mini_aod_template().unwrap();
        config.delta_r_threshold = 0.01;
        config.delta_pt_threshold = 0.01;
        config.use_beam_spot = false;
        config.use_lost_cands = false;
        config.store_as_map = store_as_map;
        config
    }

    fn event_with(config: &RefitConfig, electrons: Vec<Candidate>, taus: Vec<Candidate>, extra: Vec<LorentzVector>) -> EventRecord {
        let mut event = EventRecord::new(1, 7, 1234);
        let mut pf: Vec<PackedCandidate> = PILEUP
            .iter()
            .map(|(pt, eta, phi)| packed(LorentzVector::new(*pt, *eta, *phi, 0.0), PvAssociationQuality::UsedInFitTight))
            .collect();
        for p4 in electrons.iter().map(|e| e.p4).chain(extra) {
            pf.push(packed(p4, PvAssociationQuality::UsedInFitTight));
        }
        event.insert_packed_candidates(&config.src_cands, pf);
        event.insert_packed_candidates(&config.src_lost_tracks, Vec::new());
        event.insert_candidates(&config.src_electrons, electrons);
        event.insert_candidates(&config.src_muons, Vec::new());
        event.insert_candidates(&config.src_taus, taus);
        let cov = [[1e-6, 0.0, 0.0], [0.0, 1e-6, 0.0], [0.0, 0.0, 1e-4]];
        event.insert_vertices(&config.pv_tag, vec![Vertex::new([0.003, -0.002, 0.01], cov, 8.0, 9.0, 12)]);
        event.insert_beam_spot(&config.beam_spot, BeamSpot::new([0.0; 3], 3.5, 0.002, 0.002));
        event
    }

    fn electron(pt: f64, eta: f64, phi: f64) -> Candidate {
        let p4 = LorentzVector::new(pt, eta, phi, 0.0);
        Candidate::electron(-1, track_from(&p4, -1).p4())
    }

    fn good_tau() -> (Candidate, Vec<LorentzVector>) {
        let prongs = vec![
            LorentzVector::new(20.0, 1.0, 0.8, 0.0),
            LorentzVector::new(15.0, 1.05, 0.75, 0.0),
            LorentzVector::new(10.0, 0.95, 0.85, 0.0),
        ];
        let ids = DEEP_TAU_IDS.iter().map(|n| (n.to_string(), true)).collect();
        let signal = prongs.iter().map(|p| SubCandidate::new(1, *p)).collect();
        let tau = Candidate::tau(1, LorentzVector::new(45.0, 1.0, 0.8, 1.3), TauDetails::new(signal, ids));
        (tau, prongs)
    }

    #[test]
    fn test_two_hard_electrons_give_one_vertex() {
        let config = config(false);
        let event = event_with(&config, vec![electron(25.0, 0.2, 2.5), electron(30.0, -0.8, -1.5)], Vec::new(), Vec::new());
        let producer = RefitVertexProducer::new(config).unwrap();
        let mut stats = RefitStats::default();
        let output = producer.produce_with_stats(&event, &mut stats).unwrap();

        assert_eq!(output.event, 1234);
        let vertices = output.product.vertices();
        assert_eq!(vertices.len(), 1);
        let refit = vertices[0];
        assert_eq!(refit.vertex.n_tracks, PILEUP.len());
        assert!(refit.vertex.position_vector().norm() < 1e-4);
        assert_eq!(refit.user_cand("lepton0").unwrap().key, 0);
        assert_eq!(refit.user_cand("lepton1").unwrap().key, 1);
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.combinations, 1);
    }

    #[test]
    fn test_soft_electron_pair_is_gated() {
        let config = config(false);
        let event = event_with(&config, vec![electron(15.0, 0.2, 2.5), electron(30.0, -0.8, -1.5)], Vec::new(), Vec::new());
        let producer = RefitVertexProducer::new(config).unwrap();
        let mut stats = RefitStats::default();
        let output = producer.produce_with_stats(&event, &mut stats).unwrap();
        assert_eq!(output.product, RefitProduct::Vertices(Vec::new()));
        assert_eq!(stats.gate_rejected.get(&PairChannel::ElectronElectron), Some(&1));
        assert_eq!(stats.accepted, 0);
    }

    #[test]
    fn test_electron_tau_pair_excludes_tau_prongs() {
        let config = config(false);
        let (tau, prongs) = good_tau();
        let event = event_with(&config, vec![electron(25.0, 0.2, 2.5)], vec![tau], prongs);
        let producer = RefitVertexProducer::new(config).unwrap();
        let output = producer.produce(&event).unwrap();

        let vertices = output.product.vertices();
        assert_eq!(vertices.len(), 1);
        // electron track and all three prongs removed, pile-up left
        assert_eq!(vertices[0].vertex.n_tracks, PILEUP.len());
        assert_eq!(vertices[0].user_cand("lepton1").unwrap().product, "slimmedTaus");
    }

    #[test]
    fn test_map_mode_deduplicates_repeated_sources() {
        let mut config = config(true);
        config.src_leptons.push(config.src_electrons.clone());
        let event = event_with(&config, vec![electron(25.0, 0.2, 2.5), electron(30.0, -0.8, -1.5)], Vec::new(), Vec::new());
        let producer = RefitVertexProducer::new(config).unwrap();
        assert_eq!(producer.collect_leptons(&event).unwrap().len(), 2);

        match producer.produce(&event).unwrap().product {
            RefitProduct::VertexMap(map) => assert_eq!(map.len(), 1),
            other => panic!("expected a map, got {:?}", other),
        }
    }

    #[test]
    fn test_too_few_tracks_publishes_empty_product() {
        let config = config(true);
        let mut event = event_with(&config, vec![electron(25.0, 0.2, 2.5), electron(30.0, -0.8, -1.5)], Vec::new(), Vec::new());
        for cand in event.packed_candidates.get_mut("packedPFCandidates").unwrap().iter_mut().take(2) {
            cand.pv_association_quality = PvAssociationQuality::CompatibilityDz;
        }
        let producer = RefitVertexProducer::new(config).unwrap();
        let mut stats = RefitStats::default();
        let output = producer.produce_with_stats(&event, &mut stats).unwrap();
        assert_eq!(output.product, RefitProduct::VertexMap(BTreeMap::new()));
        assert_eq!(stats.insufficient_tracks, 1);
    }

    #[test]
    fn test_beam_spot_and_lost_tracks() {
        let mut config = config(false);
        config.use_beam_spot = true;
        config.use_lost_cands = true;
        let mut event = event_with(&config, vec![electron(25.0, 0.2, 2.5), electron(30.0, -0.8, -1.5)], Vec::new(), Vec::new());
        let lost = vec![packed(LorentzVector::new(1.5, 0.0, 0.1, 0.0), PvAssociationQuality::UsedInFitLoose)];
        event.insert_packed_candidates(&config.src_lost_tracks, lost);
        let producer = RefitVertexProducer::new(config.clone()).unwrap();
        let output = producer.produce(&event).unwrap();
        let vertices = output.product.vertices();
        assert_eq!(vertices[0].vertex.n_tracks, PILEUP.len() + 1);

        event.beam_spots.clear();
        assert!(matches!(producer.produce(&event), Err(RefitError::MissingProduct { kind: "beam spot", .. })));
    }

    #[test]
    fn test_lost_tracks_only_used_when_enabled() {
        let mut config = config(false);
        let mut event = event_with(&config, vec![electron(25.0, 0.2, 2.5), electron(30.0, -0.8, -1.5)], Vec::new(), Vec::new());
        let lost = vec![
            packed(LorentzVector::new(1.5, 0.0, 0.1, 0.0), PvAssociationQuality::UsedInFitLoose),
            packed(LorentzVector::new(2.2, -1.3, -2.6, 0.0), PvAssociationQuality::UsedInFitTight),
        ];
        event.insert_packed_candidates(&config.src_lost_tracks, lost.clone());

        let off = RefitVertexProducer::new(config.clone()).unwrap().produce(&event).unwrap();
        assert_eq!(off.product.vertices()[0].vertex.n_tracks, PILEUP.len());

        config.use_lost_cands = true;
        let on = RefitVertexProducer::new(config.clone()).unwrap().produce(&event).unwrap();
        assert_eq!(on.product.vertices()[0].vertex.n_tracks, PILEUP.len() + lost.len());

        // the pool is not even looked up while disabled
        event.packed_candidates.remove(&config.src_lost_tracks.encode());
        config.use_lost_cands = false;
        assert!(RefitVertexProducer::new(config).unwrap().produce(&event).is_ok());
    }

    #[test]
    fn test_missing_primary_vertex_is_an_error() {
        let config = config(false);
        let mut event = event_with(&config, Vec::new(), Vec::new(), Vec::new());
        event.insert_vertices(&config.pv_tag, Vec::new());
        let producer = RefitVertexProducer::new(config).unwrap();
        assert!(matches!(producer.produce(&event), Err(RefitError::EmptyVertexCollection { .. })));
    }

    #[test]
    fn test_species_without_substructure_fails_loudly() {
        let config = config(false);
        let jets = vec![
            Candidate::new(0, LorentzVector::new(60.0, 0.0, 0.0, 5.0), CandidateKind::Other { pdg_id: 1 }),
            Candidate::new(0, LorentzVector::new(70.0, 1.0, 2.0, 5.0), CandidateKind::Other { pdg_id: 21 }),
        ];
        let event = event_with(&config, Vec::new(), jets, Vec::new());
        let producer = RefitVertexProducer::new(config).unwrap();
        assert!(matches!(producer.produce(&event), Err(RefitError::MissingSignalCandidates { .. })));
    }

    #[test]
    fn test_batch_keeps_event_order() {
        let config = config(false);
        let events: Vec<EventRecord> = (0..8u64)
            .map(|i| {
                let mut event = event_with(&config, vec![electron(25.0, 0.2, 2.5), electron(30.0, -0.8, -1.5)], Vec::new(), Vec::new());
                event.event = i;
                event
            })
            .collect();
        let producer = RefitVertexProducer::new(config).unwrap();
        let results = producer.produce_batch(&events, 4).unwrap();
        assert_eq!(results.len(), 8);
        let mut total = RefitStats::default();
        for (i, result) in results.iter().enumerate() {
            let (output, stats) = result.as_ref().unwrap();
            assert_eq!(output.event, i as u64);
            total.merge(stats);
        }
        assert_eq!(total.events, 8);
        assert_eq!(total.accepted, 8);
        assert!(total.to_string().contains("8 of 8 combinations accepted"));
    }
}
