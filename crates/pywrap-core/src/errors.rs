//! Error types for the pywrap core library.

/// Top-level error enum for the pywrap core library.
#[derive(Debug, thiserror::Error)]
pub enum PywrapError {
    #[error("Analysis error: {0}")]
    Analysis(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Override error: {0}")]
    Override(String),

    #[error("Planning error: {0}")]
    Planning(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("An action is already running")]
    Busy,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

#[cfg(feature = "python")]
impl From<PywrapError> for pyo3::PyErr {
    fn from(err: PywrapError) -> pyo3::PyErr {
        use pyo3::exceptions::{PyIOError, PyRuntimeError, PyValueError};

        match &err {
            PywrapError::Analysis(_) | PywrapError::Execution(_) | PywrapError::Busy => {
                PyRuntimeError::new_err(err.to_string())
            }
            PywrapError::Planning(_) => PyRuntimeError::new_err(err.to_string()),
            PywrapError::Parse(_) | PywrapError::Override(_) => {
                PyValueError::new_err(err.to_string())
            }
            PywrapError::Io(_) => PyIOError::new_err(err.to_string()),
            PywrapError::Json(_) | PywrapError::Yaml(_) | PywrapError::Toml(_) => {
                PyValueError::new_err(err.to_string())
            }
        }
    }
}

pub type PywrapResult<T> = Result<T, PywrapError>;
