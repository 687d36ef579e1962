//! nlink core library: N-link functional-graph basin analysis.
//!
//! Under a rule "follow the Nth outgoing link", every page has exactly one
//! successor, so the link graph collapses into a functional graph whose
//! terminal cycles partition the pages into basins.  This crate builds that
//! graph from persisted page/link tables, labels basins, measures how
//! branchy each basin is, chases dominant upstream branches, and compares
//! basin assignments across values of N.
//!
//! With the `python` feature the crate also compiles as a Python extension
//! module (`_nlink_core`) via PyO3.

pub mod analysis;
pub mod config;
pub mod engine;
pub mod errors;
pub mod models;
pub mod pipeline;
pub mod store;

#[cfg(feature = "python")]
mod python;

#[cfg(feature = "python")]
use pyo3::prelude::*;

// ---------------------------------------------------------------------------
// Top-level Python module: _nlink_core
// ---------------------------------------------------------------------------

#[cfg(feature = "python")]
#[pymodule]
fn _nlink_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    python::register(m)
}
