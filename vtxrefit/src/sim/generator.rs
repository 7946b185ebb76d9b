//! Synthetic collision events for exercising the refit end to end.

use std::collections::BTreeMap;
use std::f64::consts::PI;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Serialize, Deserialize};
use statrs::distribution::Normal;
use thiserror::Error;

use vtxcore::algorithm::pair_gate::{DEEP_TAU_IDS, LEGACY_TAU_IDS};
use vtxcore::data::candidate::{Candidate, SubCandidate, TauDetails};
use vtxcore::data::event::EventRecord;
use vtxcore::data::kinematics::LorentzVector;
use vtxcore::data::track::{PackedCandidate, PvAssociationQuality, Track};
use vtxcore::data::vertex::{BeamSpot, Vertex};
use vtxcore::refit::config::RefitConfig;

const PION_MASS: f64 = 0.13957;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeneratorSettings {
    pub min_pileup: usize,
    pub max_pileup: usize,
    pub pileup_pt_mean: f64,
    pub lepton_pt_mean: f64,
    pub tau_pt_mean: f64,
    /// Fraction of taus with all identification flags set.
    pub tau_id_efficiency: f64,
    pub max_lost_tracks: usize,
    pub beam_width: f64,
    pub beam_sigma_z: f64,
    pub sigma_transverse: f64,
    pub sigma_longitudinal: f64,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        GeneratorSettings {
            min_pileup: 4,
            max_pileup: 20,
            pileup_pt_mean: 3.0,
            lepton_pt_mean: 30.0,
            tau_pt_mean: 45.0,
            tau_id_efficiency: 0.8,
            max_lost_tracks: 2,
            beam_width: 0.002,
            beam_sigma_z: 3.5,
            sigma_transverse: 0.002,
            sigma_longitudinal: 0.004,
        }
    }
}

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("invalid generator settings: {0}")]
    InvalidSettings(String),
    #[error("invalid distribution: {0}")]
    Distribution(String),
}

impl GeneratorSettings {
    pub fn validate(&self) -> Result<(), GeneratorError> {
        if self.max_pileup < self.min_pileup {
            return Err(GeneratorError::InvalidSettings(format!(
                "maxPileup {} below minPileup {}",
                self.max_pileup, self.min_pileup
            )));
        }
        if !(0.0..=1.0).contains(&self.tau_id_efficiency) {
            return Err(GeneratorError::InvalidSettings(format!(
                "tauIdEfficiency {} outside [0, 1]",
                self.tau_id_efficiency
            )));
        }
        let widths = [self.beam_width, self.beam_sigma_z, self.sigma_transverse, self.sigma_longitudinal];
        if widths.iter().any(|w| !(w.is_finite() && *w > 0.0)) {
            return Err(GeneratorError::InvalidSettings("widths must be positive".to_string()));
        }
        Ok(())
    }
}

/// Which candidate species a generated lepton is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LeptonKind {
    Electron,
    Muon,
    Tau,
}

/// Seeded generator; the same seed, settings and config always give the same events.
pub struct EventGenerator {
    settings: GeneratorSettings,
    config: RefitConfig,
    rng: StdRng,
    unit: Normal,
    eta: Uniform<f64>,
    phi: Uniform<f64>,
    next_event: u64,
}

impl EventGenerator {
    pub fn new(settings: GeneratorSettings, config: RefitConfig, seed: u64) -> Result<Self, GeneratorError> {
        settings.validate()?;
        Ok(EventGenerator {
            settings,
            config,
            rng: StdRng::seed_from_u64(seed),
            unit: Normal::new(0.0, 1.0).map_err(|e| GeneratorError::Distribution(e.to_string()))?,
            eta: Uniform::new(-2.4, 2.4),
            phi: Uniform::new(-PI, PI),
            next_event: 1,
        })
    }

    fn gauss(&mut self, mean: f64, sigma: f64) -> f64 {
        mean + sigma * self.unit.sample(&mut self.rng)
    }

    fn direction(&mut self, pt: f64, mass: f64) -> LorentzVector {
        let eta = self.eta.sample(&mut self.rng);
        let phi = self.phi.sample(&mut self.rng);
        LorentzVector::new(pt, eta, phi, mass)
    }

    /// Track through `origin` with the given momentum, displaced by its resolution.
    fn track(&mut self, origin: [f64; 3], p4: &LorentzVector, charge: i32) -> Track {
        let st = self.settings.sigma_transverse;
        let sl = self.settings.sigma_longitudinal;
        let reference = [
            origin[0] + self.gauss(0.0, st * 0.1),
            origin[1] + self.gauss(0.0, st * 0.1),
            origin[2] + self.gauss(0.0, sl * 0.1),
        ];
        Track::new(reference, [p4.px(), p4.py(), p4.pz()], charge, st, sl)
    }

    fn charge(&mut self) -> i32 {
        if self.rng.gen_bool(0.5) { 1 } else { -1 }
    }

    fn pileup_quality(&mut self) -> PvAssociationQuality {
        match self.rng.gen_range(0..10) {
            0 => PvAssociationQuality::CompatibilityDz,
            1 => PvAssociationQuality::OtherDeltaZ,
            2 => PvAssociationQuality::UsedInFitLoose,
            _ => PvAssociationQuality::UsedInFitTight,
        }
    }

    pub fn next_event(&mut self) -> EventRecord {
        let s = self.settings.clone();
        let mut event = EventRecord::new(1, 1, self.next_event);
        self.next_event += 1;

        let beam_spot = BeamSpot::new([0.01, -0.02, 0.0], s.beam_sigma_z, s.beam_width, s.beam_width);
        let pv = [
            self.gauss(beam_spot.position[0], s.beam_width),
            self.gauss(beam_spot.position[1], s.beam_width),
            self.gauss(0.0, s.beam_sigma_z * 0.3),
        ];
        let secondary = [pv[0], pv[1], pv[2] + self.gauss(0.0, s.beam_sigma_z).abs() + 0.5];

        let mut pf = Vec::new();

        let n_pileup = self.rng.gen_range(s.min_pileup..=s.max_pileup);
        for _ in 0..n_pileup {
            let pt = self.gauss(s.pileup_pt_mean, s.pileup_pt_mean * 0.5).abs() + 0.5;
            let p4 = self.direction(pt, PION_MASS);
            let charge = self.charge();
            let from_secondary = self.rng.gen_bool(0.15);
            let origin = if from_secondary { secondary } else { pv };
            let track = self.track(origin, &p4, charge);
            let (vertex_ref, quality) = if from_secondary {
                (Some(1), PvAssociationQuality::UsedInFitTight)
            } else {
                (Some(0), self.pileup_quality())
            };
            pf.push(PackedCandidate::from_track(track, vertex_ref, quality));
        }

        // a few neutrals without tracks
        for _ in 0..self.rng.gen_range(0..4) {
            let pt = self.gauss(2.0, 1.0).abs() + 0.2;
            let p4 = self.direction(pt, 0.0);
            pf.push(PackedCandidate::new(0, p4, None, PvAssociationQuality::NotReconstructed, None));
        }

        let mut electrons = Vec::new();
        let mut muons = Vec::new();
        let mut taus = Vec::new();
        let kinds = [LeptonKind::Electron, LeptonKind::Muon, LeptonKind::Tau];
        for _ in 0..2 {
            let kind = kinds[self.rng.gen_range(0..kinds.len())];
            let charge = self.charge();
            match kind {
                LeptonKind::Electron | LeptonKind::Muon => {
                    let pt = self.gauss(s.lepton_pt_mean, s.lepton_pt_mean * 0.3).abs() + 5.0;
                    let mass = if kind == LeptonKind::Electron { 0.000511 } else { 0.10566 };
                    let direction = self.direction(pt, mass);
                    let track = self.track(pv, &direction, charge);
                    let p4 = track.p4();
                    pf.push(PackedCandidate::from_track(track, Some(0), PvAssociationQuality::UsedInFitTight));
                    if kind == LeptonKind::Electron {
                        electrons.push(Candidate::electron(charge, p4));
                    } else {
                        muons.push(Candidate::muon(charge, p4));
                    }
                }
                LeptonKind::Tau => {
                    let pt = self.gauss(s.tau_pt_mean, s.tau_pt_mean * 0.3).abs() + 10.0;
                    let axis = self.direction(pt, 1.2);
                    let n_prongs = if self.rng.gen_bool(0.7) { 1 } else { 3 };
                    let mut signal = Vec::with_capacity(n_prongs);
                    for i in 0..n_prongs {
                        let fraction = if n_prongs == 1 { 0.7 } else { [0.45, 0.3, 0.15][i] };
                        let p4 = LorentzVector::new(
                            axis.pt * fraction,
                            axis.eta + self.gauss(0.0, 0.03),
                            axis.phi + self.gauss(0.0, 0.03),
                            PION_MASS,
                        );
                        let prong_charge = if i == 0 { charge } else if i == 1 { -charge } else { charge };
                        let track = self.track(pv, &p4, prong_charge);
                        signal.push(SubCandidate::new(prong_charge, track.p4()));
                        pf.push(PackedCandidate::from_track(track, Some(0), PvAssociationQuality::UsedInFitTight));
                    }
                    let passes = self.rng.gen_bool(s.tau_id_efficiency);
                    let ids: BTreeMap<String, bool> = DEEP_TAU_IDS
                        .iter()
                        .chain(LEGACY_TAU_IDS.iter())
                        .map(|name| (name.to_string(), passes))
                        .collect();
                    taus.push(Candidate::tau(charge, axis, TauDetails::new(signal, ids)));
                }
            }
        }

        pf.shuffle(&mut self.rng);

        let mut lost = Vec::new();
        for _ in 0..self.rng.gen_range(0..=s.max_lost_tracks) {
            let pt = self.gauss(1.0, 0.5).abs() + 0.3;
            let p4 = self.direction(pt, PION_MASS);
            let charge = self.charge();
            let track = self.track(pv, &p4, charge);
            lost.push(PackedCandidate::from_track(track, Some(0), PvAssociationQuality::UsedInFitLoose));
        }

        let n_used = pf.iter().filter(|c| c.vertex_ref == Some(0) && c.best_track.is_some()).count();
        let pv_cov = [
            [s.beam_width.powi(2), 0.0, 0.0],
            [0.0, s.beam_width.powi(2), 0.0],
            [0.0, 0.0, (2.0 * s.beam_width).powi(2)],
        ];
        let vertices = vec![
            Vertex::new(pv, pv_cov, 1.2 * n_used as f64, 2.0 * n_used as f64 - 3.0, n_used),
            Vertex::new(secondary, pv_cov, 3.0, 4.0, 3),
        ];

        let cfg = &self.config;
        event.insert_packed_candidates(&cfg.src_cands, pf);
        event.insert_packed_candidates(&cfg.src_lost_tracks, lost);
        event.insert_candidates(&cfg.src_electrons, electrons);
        event.insert_candidates(&cfg.src_muons, muons);
        event.insert_candidates(&cfg.src_taus, taus);
        event.insert_vertices(&cfg.pv_tag, vertices);
        event.insert_beam_spot(&cfg.beam_spot, beam_spot);
        event
    }

    pub fn generate(&mut self, n: usize) -> Vec<EventRecord> {
        (0..n).map(|_| self.next_event()).collect()
    }
}

/// Generates `n` events with default settings under the tags of `config`.
pub fn simulate_events(n: usize, seed: u64, config: &RefitConfig) -> Result<Vec<EventRecord>, GeneratorError> {
    let mut generator = EventGenerator::new(GeneratorSettings::default(), config.clone(), seed)?;
    Ok(generator.generate(n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vtxcore::refit::producer::{RefitStats, RefitVertexProducer};

    fn config() -> RefitConfig {
        RefitConfig::mini_aod_template().unwrap()
    }

    #[test]
    fn test_same_seed_same_events() {
        let a = simulate_events(5, 17, &config()).unwrap();
        let b = simulate_events(5, 17, &config()).unwrap();
        let c = simulate_events(5, 18, &config()).unwrap();
        assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
        assert_ne!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&c).unwrap());
        assert_eq!(a.iter().map(|e| e.event).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_settings_are_validated() {
        let mut settings = GeneratorSettings::default();
        settings.tau_id_efficiency = 1.5;
        assert!(matches!(EventGenerator::new(settings, config(), 1), Err(GeneratorError::InvalidSettings(_))));

        let settings: GeneratorSettings = serde_json::from_str(r#"{"minPileup": 8, "maxPileup": 2}"#).unwrap();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_events_carry_every_configured_product() {
        let cfg = config();
        for event in simulate_events(10, 3, &cfg).unwrap() {
            assert!(event.packed_candidates(&cfg.src_cands).is_ok());
            assert!(event.packed_candidates(&cfg.src_lost_tracks).is_ok());
            assert_eq!(event.vertices(&cfg.pv_tag).unwrap().len(), 2);
            assert!(event.beam_spot(&cfg.beam_spot).is_ok());
            let leptons: usize = cfg.src_leptons.iter().map(|t| event.candidates(t).unwrap().len()).sum();
            assert_eq!(leptons, 2);
        }
    }

    #[test]
    fn test_lepton_tracks_are_in_the_pool() {
        let cfg = config();
        for event in simulate_events(10, 9, &cfg).unwrap() {
            let pool = event.packed_candidates(&cfg.src_cands).unwrap();
            for electron in event.candidates(&cfg.src_electrons).unwrap() {
                assert!(pool.iter().any(|c| c.p4 == electron.p4));
            }
        }
    }

    #[test]
    fn test_generated_events_refit() {
        let cfg = config();
        let events = simulate_events(40, 5, &cfg).unwrap();
        let producer = RefitVertexProducer::new(cfg).unwrap();
        let mut stats = RefitStats::default();
        for event in &events {
            let output = producer.produce_with_stats(event, &mut stats).unwrap();
            assert!(output.product.len() <= 1);
        }
        assert_eq!(stats.events, 40);
        assert_eq!(stats.combinations, 40);
        assert!(stats.accepted > 0);
        assert_eq!(
            stats.accepted + stats.gate_rejected_total() + stats.insufficient_tracks + stats.fit_failures,
            stats.combinations
        );
    }
}
