use record_store::StoreError;
use saga::SagaError;
use thiserror::Error;

/// Errors that can occur in the dispatcher and façade.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Saga or step operation failed.
    #[error("Saga error: {0}")]
    Saga(#[from] SagaError),

    /// Record store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A step names a worker that is not registered.
    #[error("Unknown worker: {0}")]
    UnknownWorker(String),
}

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
