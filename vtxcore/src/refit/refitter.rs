use std::fmt::{self, Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, warn};

use crate::algorithm::adaptive_fitter::{TransientVertex, VertexFitter};
use crate::algorithm::transient_track::{TransientTrack, TransientTrackBuilder};
use crate::data::track::Track;
use crate::data::vertex::BeamSpot;

/// Minimum number of usable tracks before a fit is attempted.
pub const MIN_REFIT_TRACKS: usize = 3;

/// Per-track weight threshold of the refit; low enough to let almost every fit through.
pub const REFIT_WEIGHT_THRESHOLD: f64 = 0.1;

#[derive(Clone, Debug, PartialEq)]
pub enum RejectReason {
    InsufficientTracks { usable: usize },
    FitFailed(String),
}

impl Display for RejectReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::InsufficientTracks { usable } => {
                write!(f, "insufficient tracks ({} usable, {} required)", usable, MIN_REFIT_TRACKS)
            }
            RejectReason::FitFailed(reason) => write!(f, "fit threw: {}", reason),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FitResult {
    Accepted { vertex: TransientVertex, n_tracks: usize },
    Rejected(RejectReason),
}

impl FitResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, FitResult::Accepted { .. })
    }
}

/// Refits a vertex from a set of surviving tracks.
pub struct VertexRefitter<'a, B, F> {
    builder: &'a B,
    fitter: &'a F,
    beam_spot: Option<&'a BeamSpot>,
}

impl<'a, B: TransientTrackBuilder, F: VertexFitter> VertexRefitter<'a, B, F> {
    /// `beam_spot` is used as a fit constraint when given.
    pub fn new(builder: &'a B, fitter: &'a F, beam_spot: Option<&'a BeamSpot>) -> Self {
        VertexRefitter { builder, fitter, beam_spot }
    }

    pub fn transient_tracks(&self, tracks: &[&Track]) -> Vec<TransientTrack> {
        tracks
            .iter()
            .filter_map(|track| match self.builder.build(track) {
                Ok(tt) => Some(tt),
                Err(e) => {
                    debug!(error = %e, "track skipped");
                    None
                }
            })
            .collect()
    }

    pub fn refit(&self, tracks: &[&Track]) -> FitResult {
        let transient = self.transient_tracks(tracks);
        if transient.len() < MIN_REFIT_TRACKS {
            return FitResult::Rejected(RejectReason::InsufficientTracks { usable: transient.len() });
        }

        // the fitter is an external numerical service: neither its errors nor its
        // panics may abort the event
        let outcome = catch_unwind(AssertUnwindSafe(|| match self.beam_spot {
            Some(bs) => self.fitter.vertex_with_beam_spot(&transient, bs),
            None => self.fitter.vertex(&transient),
        }));

        match outcome {
            Ok(Ok(vertex)) => FitResult::Accepted { vertex, n_tracks: transient.len() },
            Ok(Err(e)) => {
                debug!(error = %e, tracks = transient.len(), "vertex fit failed");
                FitResult::Rejected(RejectReason::FitFailed(e.to_string()))
            }
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(%message, "vertex fitter panicked");
                FitResult::Rejected(RejectReason::FitFailed(message))
            }
        }
    }
}
