//! Step entity: the persisted record and its state transitions.

use chrono::{DateTime, Utc};
use record_store::{Record, RecordId, Records};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SagaError};
use crate::status::StepStatus;

/// A step record as persisted in the saga's step table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// Record id, unique within the saga.
    pub id: RecordId,
    /// Name of the worker that executes this step.
    pub worker_name: String,
    /// Arguments fixed at creation, passed to the worker on dispatch.
    pub args: Vec<Value>,
    /// Ids of the steps this step depends on. Order is significant:
    /// dependency results are passed to the worker positionally.
    pub depends_on: Vec<RecordId>,
    /// Current state.
    pub status: StepStatus,
    /// Id of the step that compensates this one, if any.
    pub compensator_id: Option<RecordId>,
    /// Result reported by the worker on success.
    pub result: Option<Value>,
    /// Results of `depends_on` steps, captured at the moment of enqueue.
    pub dependency_args: Vec<Value>,
    /// When the step was created.
    pub created_at: DateTime<Utc>,
}

impl Record for StepRecord {
    fn id(&self) -> RecordId {
        self.id
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = id;
    }
}

/// Shallow-merge patch for a step record. Only set fields are written.
#[derive(Debug, Default, Serialize)]
struct StepPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<StepStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dependency_args: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    compensator_id: Option<RecordId>,
}

/// Handle over one persisted step.
///
/// Transitions write a patch through the record layer and refresh the cached
/// record from the merged result, so the handle always mirrors the store.
#[derive(Debug, Clone)]
pub struct Step {
    records: Records,
    table: String,
    record: StepRecord,
}

impl Step {
    /// Creates and persists a new step in the given step table.
    ///
    /// `status` is `Created` for ordinary steps and `WaitingForCompensation`
    /// for compensators.
    pub(crate) async fn create(
        records: Records,
        table: String,
        worker_name: &str,
        args: Vec<Value>,
        depends_on: Vec<RecordId>,
        status: StepStatus,
    ) -> Result<Step> {
        let record = StepRecord {
            id: RecordId::default(),
            worker_name: worker_name.to_string(),
            args,
            depends_on,
            status,
            compensator_id: None,
            result: None,
            dependency_args: Vec::new(),
            created_at: Utc::now(),
        };
        let record = records.create(&table, record).await?;
        tracing::debug!(step = %record.id, worker = %record.worker_name, %status, "step created");
        Ok(Step {
            records,
            table,
            record,
        })
    }

    /// Loads a step from its table, or `None` if absent.
    pub(crate) async fn load(
        records: Records,
        table: String,
        id: RecordId,
    ) -> Result<Option<Step>> {
        let record: Option<StepRecord> = records.get(&table, id).await?;
        Ok(record.map(|record| Step {
            records,
            table,
            record,
        }))
    }

    /// Wraps an already-loaded record.
    pub(crate) fn from_record(records: Records, table: String, record: StepRecord) -> Step {
        Step {
            records,
            table,
            record,
        }
    }

    /// Returns the step id.
    pub fn id(&self) -> RecordId {
        self.record.id
    }

    /// Returns the current status as of the last read or write.
    pub fn status(&self) -> StepStatus {
        self.record.status
    }

    /// Returns the underlying record.
    pub fn record(&self) -> &StepRecord {
        &self.record
    }

    async fn apply(&mut self, patch: StepPatch) -> Result<()> {
        let patch = serde_json::to_value(&patch)?;
        let merged = self
            .records
            .update(&self.table, self.record.id, &patch)
            .await?;
        self.record = serde_json::from_value(merged)?;
        Ok(())
    }

    /// Creates a compensator for this step and links both halves of the
    /// relation: the compensator's sole dependency is this step, and this
    /// step's `compensator_id` points back at it.
    pub async fn attach_compensator(&mut self, worker_name: &str, args: Vec<Value>) -> Result<Step> {
        let compensator = Step::create(
            self.records.clone(),
            self.table.clone(),
            worker_name,
            args,
            vec![self.record.id],
            StepStatus::WaitingForCompensation,
        )
        .await?;
        self.apply(StepPatch {
            compensator_id: Some(compensator.id()),
            ..Default::default()
        })
        .await?;
        Ok(compensator)
    }

    /// Promotes the step to `Queued`.
    ///
    /// Precondition: every `depends_on` step is `Finished` or `RolledBack`.
    /// Their `result` values are captured into `dependency_args` in
    /// declaration order (a missing result becomes JSON null so positions
    /// stay aligned).
    pub async fn enqueue(&mut self) -> Result<()> {
        let deps: Vec<Option<StepRecord>> = self
            .records
            .get_multiple(&self.table, &self.record.depends_on)
            .await?;

        let mut dependency_args = Vec::with_capacity(deps.len());
        for (dep_id, dep) in self.record.depends_on.clone().into_iter().zip(deps) {
            let dep = dep.ok_or(SagaError::StepNotFound(dep_id))?;
            if !dep.status.satisfies_dependency() {
                return Err(SagaError::DependencyNotSatisfied {
                    step: self.record.id,
                    dependency: dep_id,
                    status: dep.status,
                });
            }
            dependency_args.push(dep.result.unwrap_or(Value::Null));
        }

        self.apply(StepPatch {
            status: Some(StepStatus::Queued),
            dependency_args: Some(dependency_args),
            ..Default::default()
        })
        .await?;
        tracing::debug!(step = %self.record.id, "step queued");
        Ok(())
    }

    /// Marks the step as dispatched to a worker. Dispatcher only.
    pub async fn mark_running(&mut self) -> Result<()> {
        self.apply(StepPatch {
            status: Some(StepStatus::Running),
            ..Default::default()
        })
        .await
    }

    /// Records the worker's result and marks the step `Finished`.
    pub async fn finished(&mut self, result: Option<Value>) -> Result<()> {
        self.apply(StepPatch {
            status: Some(StepStatus::Finished),
            result,
            ..Default::default()
        })
        .await
    }

    /// Marks the step `Failed`.
    pub async fn fail(&mut self) -> Result<()> {
        self.apply(StepPatch {
            status: Some(StepStatus::Failed),
            ..Default::default()
        })
        .await
    }

    /// Marks the step `RolledBack` and, if a compensator is attached,
    /// enqueues it. The compensator's sole dependency (this step) is now
    /// `RolledBack`, which satisfies its enqueue precondition, and this
    /// step's `result` becomes its sole dependency arg.
    pub async fn rollback(&mut self) -> Result<()> {
        self.apply(StepPatch {
            status: Some(StepStatus::RolledBack),
            ..Default::default()
        })
        .await?;

        if let Some(compensator_id) = self.record.compensator_id {
            let mut compensator =
                Step::load(self.records.clone(), self.table.clone(), compensator_id)
                    .await?
                    .ok_or(SagaError::StepNotFound(compensator_id))?;
            compensator.enqueue().await?;
            tracing::info!(
                step = %self.record.id,
                compensator = %compensator_id,
                "compensator enqueued"
            );
        }
        Ok(())
    }
}
