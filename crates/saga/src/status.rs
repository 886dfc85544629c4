//! Saga and step state machines.

use serde::{Deserialize, Serialize};

/// The state of a saga in its lifecycle.
///
/// State transitions:
/// ```text
/// Uninitialized ──► Created ──► Running ──┬──► Finished
///                                         └──► Failed
/// ```
///
/// `Finished` and `Failed` are terminal; a terminal saga never re-enters
/// `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaStatus {
    /// Handle exists but nothing has been persisted yet.
    #[default]
    Uninitialized,

    /// Persisted, steps may be added, not yet scheduled.
    Created,

    /// Steps are being scheduled and executed.
    Running,

    /// Every step completed successfully (terminal).
    Finished,

    /// A step failed and compensation was triggered (terminal).
    Failed,
}

impl SagaStatus {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaStatus::Finished | SagaStatus::Failed)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Uninitialized => "Uninitialized",
            SagaStatus::Created => "Created",
            SagaStatus::Running => "Running",
            SagaStatus::Finished => "Finished",
            SagaStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The state of a single step.
///
/// State transitions (driver in parentheses):
/// ```text
/// Uninitialized ──► Created ──────────────► Queued    (saga tick)
///                   Created ──► WaitingForCompensation
///                   WaitingForCompensation ► Queued    (parent rollback)
///                   Queued ───────────────► Running   (dispatcher)
///                   Running ──┬───────────► Finished  (step_finished)
///                             └───────────► Failed    (step_failed)
///                   Finished ─────────────► RolledBack (failure cascade)
/// ```
///
/// `Failed` and `RolledBack` are terminal; `Finished` is terminal unless the
/// saga fails and the step is rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StepStatus {
    /// Handle exists but nothing has been persisted yet.
    #[default]
    Uninitialized,

    /// Persisted, waiting for its dependencies.
    Created,

    /// A compensator, parked until its parent step is rolled back.
    WaitingForCompensation,

    /// Dependencies satisfied; waiting for a dispatcher slot.
    Queued,

    /// Dispatched to a worker.
    Running,

    /// The worker reported success.
    Finished,

    /// The worker reported failure, or the worker was unknown.
    Failed,

    /// Undone after the saga failed.
    RolledBack,
}

impl StepStatus {
    /// Returns true if no further forward transition can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Finished | StepStatus::Failed | StepStatus::RolledBack
        )
    }

    /// Returns true if a step in this state satisfies a dependent's enqueue
    /// precondition. A rolled-back step counts: the compensator of a
    /// rolled-back parent must be allowed to run.
    pub fn satisfies_dependency(&self) -> bool {
        matches!(self, StepStatus::Finished | StepStatus::RolledBack)
    }

    /// Returns true while the step still holds up saga completion.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            StepStatus::Created | StepStatus::Queued | StepStatus::Running
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Uninitialized => "Uninitialized",
            StepStatus::Created => "Created",
            StepStatus::WaitingForCompensation => "WaitingForCompensation",
            StepStatus::Queued => "Queued",
            StepStatus::Running => "Running",
            StepStatus::Finished => "Finished",
            StepStatus::Failed => "Failed",
            StepStatus::RolledBack => "RolledBack",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
