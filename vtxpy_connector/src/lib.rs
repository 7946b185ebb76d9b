mod py_refit;
mod py_simulation;

use pyo3::prelude::*;
use pyo3::wrap_pyfunction;

use crate::py_refit::{PyRefitConfig, PyRefitVertex, PyRefitVertexProducer};
use crate::py_simulation::simulate_events_json;

#[pymodule]
fn vtxpy_connector(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyRefitConfig>()?;
    m.add_class::<PyRefitVertexProducer>()?;
    m.add_class::<PyRefitVertex>()?;
    m.add_function(wrap_pyfunction!(simulate_events_json, m)?)?;
    Ok(())
}
