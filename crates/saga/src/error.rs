//! Saga error types.

use record_store::{RecordId, StoreError};
use thiserror::Error;

use crate::status::StepStatus;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Record store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A step result could not be encoded as JSON.
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The saga record is missing from the store.
    #[error("Saga not found: {0}")]
    SagaNotFound(RecordId),

    /// A step record is missing from the saga's step table.
    #[error("Step not found: {0}")]
    StepNotFound(RecordId),

    /// `enqueue` was called on a step whose dependency is not satisfied.
    /// The scheduler is expected to prevent this; seeing it indicates a
    /// scheduling bug.
    #[error("Step {step} depends on step {dependency} which is {status}")]
    DependencyNotSatisfied {
        step: RecordId,
        dependency: RecordId,
        status: StepStatus,
    },
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
