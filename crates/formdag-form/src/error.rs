//! Error types for form definitions and form files.

use formdag_core::{CoreError, TreeReference};
use formdag_dag::DagError;

/// Errors from building, driving, or storing a form.
#[derive(Debug, thiserror::Error)]
pub enum FormError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Dag(#[from] DagError),

    #[error("invalid bind on {target}: {source}")]
    InvalidBind { target: String, source: CoreError },

    #[error("bind target {0} is not declared in the instance")]
    UnknownTarget(TreeReference),

    #[error("form definition error: {0}")]
    Definition(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("invalid form file magic bytes")]
    InvalidMagic,

    #[error("unsupported form file version {major}.{minor}")]
    UnsupportedVersion { major: u8, minor: u8 },

    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityFailed { expected: String, actual: String },

    #[error("form file too short: need at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("form file has no {0} section")]
    MissingSection(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
