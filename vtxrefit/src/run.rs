use serde::{Serialize, Deserialize};
use tracing::{error, info};

use vtxcore::algorithm::adaptive_fitter::VertexFitter;
use vtxcore::algorithm::transient_track::TransientTrackBuilder;
use vtxcore::data::event::EventRecord;
use vtxcore::refit::error::RefitError;
use vtxcore::refit::producer::{EventOutput, RefitStats, RefitVertexProducer};

/// Result of refitting a batch of events.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Outputs of the events that were processed, in input order.
    pub outputs: Vec<EventOutput>,
    pub stats: RefitStats,
    /// Event number and error of every event that could not be processed.
    pub failed: Vec<(u64, String)>,
}

/// Refits `events` on a pool of `num_threads` workers.
///
/// An event whose inputs are inconsistent is reported in `failed` and does not
/// stop the others.
pub fn refit_events<B, F>(
    events: &[EventRecord],
    producer: &RefitVertexProducer<B, F>,
    num_threads: usize,
) -> Result<RunSummary, RefitError>
where
    B: TransientTrackBuilder + Sync,
    F: VertexFitter + Sync,
{
    let results = producer.produce_batch(events, num_threads)?;

    let mut summary = RunSummary::default();
    for (event, result) in events.iter().zip(results) {
        match result {
            Ok((output, stats)) => {
                summary.stats.merge(&stats);
                summary.outputs.push(output);
            }
            Err(e) => {
                error!(event = %event, error = %e, "event skipped");
                summary.failed.push((event.event, e.to_string()));
            }
        }
    }

    info!(
        events = events.len(),
        failed = summary.failed.len(),
        vertices = summary.stats.accepted,
        "refit finished"
    );
    Ok(summary)
}
