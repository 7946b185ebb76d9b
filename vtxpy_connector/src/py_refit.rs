use pyo3::prelude::*;
use pyo3::exceptions::PyValueError;
use numpy::PyArray1;

use vtxcore::data::event::EventRecord;
use vtxcore::data::vertex::RefitVertex;
use vtxcore::refit::config::RefitConfig;
use vtxcore::refit::producer::{EventOutput, RefitVertexProducer};
use vtxcore::refit::sink::RefitProduct;
use vtxrefit::run::refit_events;

fn value_error<E: ToString>(e: E) -> PyErr {
    PyValueError::new_err(e.to_string())
}

#[pyclass]
#[derive(Clone)]
pub struct PyRefitConfig {
    pub inner: RefitConfig,
}

#[pymethods]
impl PyRefitConfig {
    #[new]
    pub fn new(json: &str) -> PyResult<Self> {
        let inner: RefitConfig = serde_json::from_str(json).map_err(value_error)?;
        inner.validate().map_err(value_error)?;
        Ok(PyRefitConfig { inner })
    }

    #[staticmethod]
    pub fn mini_aod_template() -> PyResult<Self> {
        Ok(PyRefitConfig { inner: RefitConfig::mini_aod_template().map_err(value_error)? })
    }

    pub fn to_json(&self) -> PyResult<String> {
        serde_json::to_string_pretty(&self.inner).map_err(value_error)
    }

    #[getter]
    pub fn store_as_map(&self) -> bool { self.inner.store_as_map }

    #[setter]
    pub fn set_store_as_map(&mut self, value: bool) { self.inner.store_as_map = value; }

    #[getter]
    pub fn use_beam_spot(&self) -> bool { self.inner.use_beam_spot }

    #[setter]
    pub fn set_use_beam_spot(&mut self, value: bool) { self.inner.use_beam_spot = value; }

    #[getter]
    pub fn use_lost_cands(&self) -> bool { self.inner.use_lost_cands }

    #[setter]
    pub fn set_use_lost_cands(&mut self, value: bool) { self.inner.use_lost_cands = value; }

    #[getter]
    pub fn delta_r_threshold(&self) -> f64 { self.inner.delta_r_threshold }

    #[getter]
    pub fn delta_pt_threshold(&self) -> f64 { self.inner.delta_pt_threshold }

    #[getter]
    pub fn combine_n_leptons(&self) -> usize { self.inner.combine_n_leptons }

    #[getter]
    pub fn src_leptons(&self) -> Vec<String> {
        self.inner.src_leptons.iter().map(|tag| tag.encode()).collect()
    }
}

#[pyclass]
#[derive(Clone)]
pub struct PyRefitVertex {
    pub inner: RefitVertex,
    pub key: Option<u64>,
}

#[pymethods]
impl PyRefitVertex {
    #[getter]
    pub fn position(&self, py: Python) -> Py<PyArray1<f64>> {
        PyArray1::from_vec_bound(py, self.inner.vertex.position.to_vec()).unbind()
    }

    #[getter]
    pub fn covariance(&self) -> Vec<Vec<f64>> {
        self.inner.vertex.covariance.iter().map(|row| row.to_vec()).collect()
    }

    #[getter]
    pub fn chi2(&self) -> f64 { self.inner.vertex.chi2 }

    #[getter]
    pub fn ndof(&self) -> f64 { self.inner.vertex.ndof }

    #[getter]
    pub fn n_tracks(&self) -> usize { self.inner.vertex.n_tracks }

    #[getter]
    pub fn is_valid(&self) -> bool { self.inner.vertex.is_valid }

    #[getter]
    pub fn probability(&self) -> f64 { self.inner.probability() }

    /// Key of the vertex in map mode, `None` for list output.
    #[getter]
    pub fn key(&self) -> Option<u64> { self.key }

    /// `(label, product, key)` of every candidate the vertex was refitted for.
    #[getter]
    pub fn leptons(&self) -> Vec<(String, String, usize)> {
        self.inner
            .user_cands
            .iter()
            .map(|(label, link)| (label.clone(), link.product.clone(), link.key))
            .collect()
    }

    pub fn __repr__(&self) -> String {
        self.inner.to_string()
    }
}

fn to_py_vertices(output: EventOutput) -> Vec<PyRefitVertex> {
    match output.product {
        RefitProduct::Vertices(vertices) => vertices
            .into_iter()
            .map(|inner| PyRefitVertex { inner, key: None })
            .collect(),
        RefitProduct::VertexMap(map) => map
            .into_iter()
            .map(|(key, inner)| PyRefitVertex { inner, key: Some(key) })
            .collect(),
    }
}

#[pyclass]
pub struct PyRefitVertexProducer {
    pub inner: RefitVertexProducer,
}

#[pymethods]
impl PyRefitVertexProducer {
    #[new]
    pub fn new(config: PyRefitConfig) -> PyResult<Self> {
        Ok(PyRefitVertexProducer { inner: RefitVertexProducer::new(config.inner).map_err(value_error)? })
    }

    #[getter]
    pub fn config(&self) -> PyRefitConfig {
        PyRefitConfig { inner: self.inner.config().clone() }
    }

    pub fn produce(&self, event_json: &str) -> PyResult<Vec<PyRefitVertex>> {
        let event: EventRecord = serde_json::from_str(event_json).map_err(value_error)?;
        let output = self.inner.produce(&event).map_err(value_error)?;
        Ok(to_py_vertices(output))
    }

    pub fn produce_json(&self, event_json: &str) -> PyResult<String> {
        let event: EventRecord = serde_json::from_str(event_json).map_err(value_error)?;
        let output = self.inner.produce(&event).map_err(value_error)?;
        serde_json::to_string(&output).map_err(value_error)
    }

    /// Refits a JSON array of events in parallel.
    ///
    /// Returns a JSON object with the `outputs` of the processed events, the merged
    /// `stats` and the `failed` events as `[event, reason]` pairs.
    pub fn produce_batch_json(&self, py: Python, events_json: &str, num_threads: usize) -> PyResult<String> {
        let events: Vec<EventRecord> = serde_json::from_str(events_json).map_err(value_error)?;
        let summary = py
            .allow_threads(|| refit_events(&events, &self.inner, num_threads))
            .map_err(value_error)?;
        serde_json::to_string(&summary).map_err(value_error)
    }
}
