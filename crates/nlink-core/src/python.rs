//! Python bindings.
//!
//! Results cross the boundary as JSON and are turned into plain dicts with
//! the `json` module, so the Python side never sees Rust types.

use std::time::Duration;

use pyo3::prelude::*;
use pyo3::wrap_pyfunction;
use serde::Serialize;

use crate::analysis::signal::StopSignal;
use crate::config::{
    EngineConfig, DEFAULT_COLLAPSE_THRESHOLD, DEFAULT_MAX_CHASE_HOPS, DEFAULT_REDIRECT_HOP_LIMIT,
    DEFAULT_TOP_K_BRANCHES, MAX_CHASE_HOPS, MAX_REDIRECT_HOP_LIMIT, MAX_TOP_K_BRANCHES,
};
use crate::pipeline::{run_decomposition, run_tunneling, Decomposition};
use crate::store::database::Database;

fn to_py_dict<T: Serialize>(py: Python<'_>, value: &T) -> PyResult<PyObject> {
    let json_str = serde_json::to_string(value)
        .map_err(|e| pyo3::exceptions::PyRuntimeError::new_err(e.to_string()))?;
    let json_module = py.import("json")?;
    json_module
        .call_method1("loads", (json_str,))
        .map(|o| o.into())
}

fn load_config(config_json: Option<&str>) -> PyResult<EngineConfig> {
    let config = match config_json {
        Some(raw) => EngineConfig::from_json_str(raw)?,
        None => EngineConfig::default(),
    };
    Ok(config)
}

/// Create tables and run pending migrations.
#[pyfunction]
pub fn init_schema(db_path: &str) -> PyResult<()> {
    Database::open(db_path)?.init_schema()?;
    Ok(())
}

/// Decompose the stored graph and persist basin, trunkiness, and chase tables.
#[pyfunction]
#[pyo3(signature = (db_path, config_json=None, min_mass=1, timeout_ms=None))]
pub fn decompose(
    py: Python<'_>,
    db_path: &str,
    config_json: Option<&str>,
    min_mass: u64,
    timeout_ms: Option<u64>,
) -> PyResult<PyObject> {
    let config = load_config(config_json)?;
    let db = Database::open(db_path)?;
    let mut signal = StopSignal::new();
    if let Some(ms) = timeout_ms {
        signal = signal.with_timeout(Duration::from_millis(ms));
    }
    let report = py.allow_threads(|| run_decomposition(&db, &config, min_mass, &signal))?;
    to_py_dict(py, &report)
}

/// Chase upstream from the page titled `title`.
#[pyfunction]
#[pyo3(signature = (db_path, title, config_json=None))]
pub fn chase(
    py: Python<'_>,
    db_path: &str,
    title: &str,
    config_json: Option<&str>,
) -> PyResult<PyObject> {
    let config = load_config(config_json)?;
    let db = Database::open(db_path)?;
    let row = py.allow_threads(|| {
        let store = db.load_graph_store()?;
        let decomposition = Decomposition::compute(&store, config.rule())?;
        decomposition.context(&store).chase_from_title(title, &config)
    })?;
    to_py_dict(py, &row)
}

/// Compare basin assignments under N1 and N2 and persist the tunneling table.
#[pyfunction]
#[pyo3(signature = (db_path, n1, n2, config_json=None, max_transitions=20))]
pub fn tunneling(
    py: Python<'_>,
    db_path: &str,
    n1: u32,
    n2: u32,
    config_json: Option<&str>,
    max_transitions: usize,
) -> PyResult<PyObject> {
    let config = load_config(config_json)?;
    let db = Database::open(db_path)?;
    let summary =
        py.allow_threads(|| run_tunneling(&db, &config, n1, n2, max_transitions))?;
    to_py_dict(py, &summary)
}

pub fn register(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // -- Guards and defaults -------------------------------------------------
    m.add("MAX_REDIRECT_HOP_LIMIT", MAX_REDIRECT_HOP_LIMIT)?;
    m.add("MAX_CHASE_HOPS", MAX_CHASE_HOPS)?;
    m.add("MAX_TOP_K_BRANCHES", MAX_TOP_K_BRANCHES)?;
    m.add("DEFAULT_REDIRECT_HOP_LIMIT", DEFAULT_REDIRECT_HOP_LIMIT)?;
    m.add("DEFAULT_COLLAPSE_THRESHOLD", DEFAULT_COLLAPSE_THRESHOLD)?;
    m.add("DEFAULT_MAX_CHASE_HOPS", DEFAULT_MAX_CHASE_HOPS)?;
    m.add("DEFAULT_TOP_K_BRANCHES", DEFAULT_TOP_K_BRANCHES)?;

    // -- Pipeline -------------------------------------------------------------
    m.add_function(wrap_pyfunction!(init_schema, m)?)?;
    m.add_function(wrap_pyfunction!(decompose, m)?)?;
    m.add_function(wrap_pyfunction!(chase, m)?)?;
    m.add_function(wrap_pyfunction!(tunneling, m)?)?;
    Ok(())
}
