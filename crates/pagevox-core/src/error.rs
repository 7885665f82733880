//! Error taxonomy for the orchestration engine.
//!
//! Per-page failures are recorded on the page record and surfaced through the
//! progress/status query surface. Only validation, not-found, and
//! precondition errors propagate synchronously to the caller of a mutating
//! entry point.

use thiserror::Error;

/// Errors returned by the engine's public entry points.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad parameters, caller's fault. No state was mutated.
    #[error("{0}")]
    Validation(String),

    /// Document or page missing, or owner mismatch.
    #[error("document not found")]
    NotFound,

    /// Operation requested in a state that does not allow it
    /// (e.g. retry of a page that is not `failed`). No state was mutated.
    #[error("{0}")]
    Precondition(String),

    /// Underlying store failure.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound | StoreError::PageNotFound(_) => Self::NotFound,
            other => Self::Store(other),
        }
    }
}

/// Errors from the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found")]
    NotFound,

    #[error("page {0} not found")]
    PageNotFound(u32),

    #[error("document already exists")]
    AlreadyExists,
}

/// Errors from the synthesis provider client.
#[derive(Debug, Error)]
pub enum TtsError {
    /// The provider rejected the request (invalid parameters or a
    /// provider-side error). The page that triggered it becomes `failed`.
    #[error("synthesis rejected: {0}")]
    Rejected(String),

    /// The provider was unreachable. At dispatch time this fails the page;
    /// during polling it is logged and the handle is re-queried next cycle.
    #[error("synthesis provider unreachable: {0}")]
    Unavailable(String),
}
