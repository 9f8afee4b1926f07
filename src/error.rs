//! Service-wide error classification.
//!
//! Each subsystem keeps its own `thiserror` enum; `WorkerError` is the
//! umbrella the facade maps onto HTTP response categories. Pure kernels
//! never raise on well-formed input, so they do not appear here.

use thiserror::Error;

use crate::bundle::BundleError;
use crate::extractors::ExtractError;
use crate::inference::InferenceError;
use crate::queue::QueueError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// Entity missing or tenant-mismatched. Client-visible as 404.
    #[error("{0}")]
    NotFound(String),

    /// Extractor schema violation or absent required request fields.
    #[error("{0}")]
    Validation(String),

    /// Unknown artifact schema version.
    #[error("{0}")]
    Unsupported(String),

    #[error("model bundle error: {0}")]
    Bundle(#[from] BundleError),

    #[error("inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("database error: {0}")]
    Gateway(#[from] sqlx::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

impl From<ExtractError> for WorkerError {
    fn from(err: ExtractError) -> Self {
        WorkerError::Validation(err.to_string())
    }
}
