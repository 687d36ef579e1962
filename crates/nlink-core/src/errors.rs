//! Error types for the N-link basin engine.

#[cfg(feature = "python")]
use pyo3::exceptions::{PyIOError, PyRuntimeError, PyValueError};
#[cfg(feature = "python")]
use pyo3::PyErr;

/// Top-level error enum for the engine.
///
/// Integrity and configuration errors are fatal: nothing downstream of the
/// failing stage is computed or persisted.
#[derive(Debug, thiserror::Error)]
pub enum NLinkError {
    #[error("Data integrity error at page {node_id}: {message}")]
    DataIntegrity { node_id: i64, message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NLinkError {
    pub fn integrity(node_id: i64, message: impl Into<String>) -> Self {
        NLinkError::DataIntegrity {
            node_id,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        NLinkError::Configuration(message.into())
    }
}

#[cfg(feature = "python")]
impl From<NLinkError> for PyErr {
    fn from(err: NLinkError) -> PyErr {
        match &err {
            NLinkError::DataIntegrity { .. } | NLinkError::Configuration(_) => {
                PyValueError::new_err(err.to_string())
            }
            NLinkError::Sqlite(_) => PyRuntimeError::new_err(err.to_string()),
            NLinkError::Io(_) => PyIOError::new_err(err.to_string()),
            NLinkError::Json(_) => PyValueError::new_err(err.to_string()),
        }
    }
}

pub type NLinkResult<T> = Result<T, NLinkError>;
