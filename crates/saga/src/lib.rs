//! Saga and step entities of the workflow orchestrator.
//!
//! A saga is a persisted DAG of steps, each executed by a named worker, with
//! optional per-step compensators that undo the step's effect after a
//! failure. This crate owns the two state machines and the scheduling
//! algorithm that decides which steps are ready; dispatching ready steps to
//! workers is the `orchestrator` crate's job.

pub mod error;
pub mod saga;
pub mod status;
pub mod step;

pub use error::{Result, SagaError};
pub use saga::{SAGA_TABLE, Saga, SagaRecord};
pub use status::{SagaStatus, StepStatus};
pub use step::{Step, StepRecord};
