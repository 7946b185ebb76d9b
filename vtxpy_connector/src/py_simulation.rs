use pyo3::prelude::*;
use pyo3::exceptions::PyValueError;

use vtxcore::refit::config::RefitConfig;
use vtxrefit::sim::generator::simulate_events;

use crate::py_refit::PyRefitConfig;

/// Synthetic events as a JSON array, stored under the tags of `config` (MiniAOD tags by default).
#[pyfunction]
#[pyo3(signature = (n, seed, config=None))]
pub fn simulate_events_json(n: usize, seed: u64, config: Option<PyRefitConfig>) -> PyResult<String> {
    let config = match config {
        Some(c) => c.inner,
        None => RefitConfig::mini_aod_template().map_err(|e| PyValueError::new_err(e.to_string()))?,
    };
    let events = simulate_events(n, seed, &config).map_err(|e| PyValueError::new_err(e.to_string()))?;
    serde_json::to_string(&events).map_err(|e| PyValueError::new_err(e.to_string()))
}
