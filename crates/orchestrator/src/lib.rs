//! Orchestrator: dispatcher and public façade of the saga engine.
//!
//! The [`Orchestrator`] owns the process-local registries (sagas in flight,
//! named workers) and the [`Dispatcher`], a periodic tick that promotes
//! queued steps into a bounded pool of in-flight worker invocations. Saga
//! and step semantics live in the `saga` crate; persistence in
//! `record-store`.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod orchestrator;
pub mod worker;

pub use config::{DispatcherConfig, OrchestratorConfig};
pub use dispatcher::Dispatcher;
pub use error::{OrchestratorError, Result};
pub use orchestrator::Orchestrator;
pub use worker::{Worker, WorkerRegistry};
