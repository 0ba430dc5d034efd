use crate::dataset::WhichSet;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReportError>;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to load model from {path}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },
    #[error("failed to load dataset: {0}")]
    DatasetLoad(String),
    #[error("shape mismatch: expected {expected:?}, got {given:?}")]
    Shape {
        expected: Vec<usize>,
        given: Vec<usize>,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(
        "report covers {found_set} [{found_start}, ..) but {requested_set} [{requested_start}, ..) \
         was requested; rerun with recompute to discard it"
    )]
    RangeMismatch {
        found_set: WhichSet,
        found_start: usize,
        requested_set: WhichSet,
        requested_start: usize,
    },
    #[error("confidence {0} is outside [0, 1]")]
    InvalidConfidence(f64),
    #[error("model produced non-finite probabilities")]
    NonFinite,
}
