//! Saga entity: persisted record, DAG scheduling, and the failure cascade.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future;
use record_store::{Record, RecordId, Records};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{Result, SagaError};
use crate::status::{SagaStatus, StepStatus};
use crate::step::{Step, StepRecord};

/// Table holding the saga records.
pub const SAGA_TABLE: &str = "saga";

/// Name of the dedicated step table of one saga. Per-saga tables keep step
/// enumeration a single `list_keys`, never a filtered scan.
pub(crate) fn step_table(saga_id: RecordId) -> String {
    format!("saga_step_{saga_id}")
}

/// A saga record as persisted in the saga table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaRecord {
    /// Record id, unique within the namespace.
    pub id: RecordId,
    /// Current state.
    pub status: SagaStatus,
    /// When the saga was created.
    pub created_at: DateTime<Utc>,
}

impl Record for SagaRecord {
    fn id(&self) -> RecordId {
        self.id
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = id;
    }
}

#[derive(Debug, Default, Serialize)]
struct SagaPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<SagaStatus>,
}

/// Handle over one persisted saga.
///
/// The handle carries no cached state: every operation reloads the record, so
/// clones held by workers and the dispatcher never go stale. All mutating
/// operations serialize behind a process-local per-saga gate; clones of one
/// handle share the gate, giving actor-style ordering between the
/// dispatcher's tick and worker completion callbacks.
#[derive(Clone)]
pub struct Saga {
    records: Records,
    id: RecordId,
    table: String,
    gate: Arc<Mutex<()>>,
}

impl Saga {
    /// Creates and persists a new saga in state `Created`.
    pub async fn create(records: Records) -> Result<Saga> {
        let record = SagaRecord {
            id: RecordId::default(),
            status: SagaStatus::Created,
            created_at: Utc::now(),
        };
        let record = records.create(SAGA_TABLE, record).await?;
        tracing::info!(saga = %record.id, "saga created");
        metrics::counter!("saga_created").increment(1);
        Ok(Self::attach(records, record.id))
    }

    /// Rebuilds a handle over an existing saga record (restart recovery).
    ///
    /// The gate is fresh: serialization only holds between clones of one
    /// handle, so keep a single attached handle per saga per process.
    pub fn attach(records: Records, id: RecordId) -> Saga {
        Saga {
            records,
            id,
            table: step_table(id),
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Returns the saga id.
    pub fn id(&self) -> RecordId {
        self.id
    }

    /// Loads the saga record from the store.
    pub async fn load(&self) -> Result<SagaRecord> {
        self.records
            .get(SAGA_TABLE, self.id)
            .await?
            .ok_or(SagaError::SagaNotFound(self.id))
    }

    /// Returns the saga's persisted status.
    pub async fn status(&self) -> Result<SagaStatus> {
        Ok(self.load().await?.status)
    }

    /// Enumerates all saga records in the namespace.
    pub async fn all_records(records: &Records) -> Result<Vec<SagaRecord>> {
        let ids = records.get_ids(SAGA_TABLE).await?;
        let sagas = records.get_multiple(SAGA_TABLE, &ids).await?;
        sagas
            .into_iter()
            .zip(ids)
            .map(|(saga, id)| saga.ok_or(SagaError::SagaNotFound(id)))
            .collect()
    }

    async fn set_status(&self, status: SagaStatus) -> Result<()> {
        let patch = serde_json::to_value(SagaPatch {
            status: Some(status),
        })?;
        self.records.update(SAGA_TABLE, self.id, &patch).await?;
        Ok(())
    }

    /// Adds a step in state `Created`.
    ///
    /// `depends_on` may only contain ids returned by earlier `add_step` calls
    /// on this saga, which keeps the dependency graph acyclic by
    /// construction. Dependency order is the order results are passed to the
    /// worker.
    pub async fn add_step(
        &self,
        worker_name: &str,
        args: Vec<Value>,
        depends_on: Vec<RecordId>,
    ) -> Result<Step> {
        Step::create(
            self.records.clone(),
            self.table.clone(),
            worker_name,
            args,
            depends_on,
            StepStatus::Created,
        )
        .await
    }

    /// Loads one step of this saga.
    pub async fn step(&self, step_id: RecordId) -> Result<Step> {
        Step::load(self.records.clone(), self.table.clone(), step_id)
            .await?
            .ok_or(SagaError::StepNotFound(step_id))
    }

    /// Loads all step records of this saga, in creation order.
    pub async fn steps(&self) -> Result<Vec<StepRecord>> {
        let ids = self.records.get_ids(&self.table).await?;
        let steps = self.records.get_multiple(&self.table, &ids).await?;
        steps
            .into_iter()
            .zip(ids)
            .map(|(step, id)| step.ok_or(SagaError::StepNotFound(id)))
            .collect()
    }

    /// Atomically reads the saga status and all step records under the gate.
    ///
    /// Mutating operations hold the gate for their whole span, so a snapshot
    /// never observes a half-applied failure cascade: it sees the saga before
    /// the failure, or failed with its compensators already queued. The
    /// dispatcher scans from snapshots for exactly this reason.
    pub async fn snapshot(&self) -> Result<(SagaStatus, Vec<StepRecord>)> {
        let _gate = self.gate.lock().await;
        let record = self.load().await?;
        let steps = self.steps().await?;
        Ok((record.status, steps))
    }

    /// Moves the saga to `Running` and performs the first scheduling pass.
    #[tracing::instrument(skip(self), fields(saga = %self.id))]
    pub async fn start(&self) -> Result<()> {
        let _gate = self.gate.lock().await;

        let record = self.load().await?;
        if record.status.is_terminal() {
            tracing::warn!(status = %record.status, "start on terminal saga ignored");
            return Ok(());
        }

        self.set_status(SagaStatus::Running).await?;
        tracing::info!("saga started");
        self.tick_locked().await
    }

    /// One scheduling pass: promote every ready step, or finish the saga when
    /// nothing is pending. Idempotent; quiescent state makes it a no-op.
    pub async fn tick(&self) -> Result<()> {
        let _gate = self.gate.lock().await;
        self.tick_locked().await
    }

    /// Scheduling pass body; callers hold the gate.
    ///
    /// A `Created` step is ready iff every dependency is `Finished` — a
    /// `RolledBack` dependency does not count, a rollback in progress is not
    /// a success. The saga finishes when no step is pending (`Created`,
    /// `Queued` or `Running`); parked compensators never hold up completion.
    async fn tick_locked(&self) -> Result<()> {
        let record = self.load().await?;
        if record.status != SagaStatus::Running {
            return Ok(());
        }

        let steps = self.steps().await?;

        if !steps.iter().any(|s| s.status.is_pending()) {
            self.set_status(SagaStatus::Finished).await?;
            metrics::counter!("saga_finished").increment(1);
            tracing::info!(saga = %self.id, steps = steps.len(), "saga finished");
            return Ok(());
        }

        let finished: HashSet<RecordId> = steps
            .iter()
            .filter(|s| s.status == StepStatus::Finished)
            .map(|s| s.id)
            .collect();

        let ready = steps
            .iter()
            .filter(|s| s.status == StepStatus::Created)
            .filter(|s| s.depends_on.iter().all(|dep| finished.contains(dep)))
            .cloned()
            .collect::<Vec<_>>();

        future::try_join_all(ready.into_iter().map(|record| {
            let mut step = Step::from_record(self.records.clone(), self.table.clone(), record);
            async move { step.enqueue().await }
        }))
        .await?;
        Ok(())
    }

    /// Records a worker's successful completion and reschedules.
    ///
    /// The result must be JSON-encodable; encoding is attempted before any
    /// state is touched. A completion for an already-terminal step only
    /// re-ticks. After the saga has failed, only compensators may still
    /// finish — a frozen sibling's late completion is dropped.
    #[tracing::instrument(skip(self, result), fields(saga = %self.id, step = %step_id))]
    pub async fn step_finished(
        &self,
        step_id: RecordId,
        result: Option<impl Serialize>,
    ) -> Result<()> {
        let result = result.map(|r| serde_json::to_value(r)).transpose()?;

        let _gate = self.gate.lock().await;

        let mut step = self.step(step_id).await?;
        if step.status().is_terminal() {
            tracing::debug!("completion for terminal step, re-ticking only");
            return self.tick_locked().await;
        }

        if self.status().await? == SagaStatus::Failed && !self.is_compensator(step_id).await? {
            tracing::warn!("completion after saga failure dropped");
            return Ok(());
        }

        step.finished(result).await?;
        tracing::info!("step finished");
        self.tick_locked().await
    }

    /// Records a worker failure and runs the compensation cascade.
    ///
    /// The saga transitions to `Failed` before anything else so concurrent
    /// ticks return early. Every step `Finished` at the moment of enumeration
    /// is rolled back in parallel; rollback enqueues attached compensators.
    /// `Queued` and `Running` siblings freeze in place. A failure reported
    /// for a step of an already-failed saga (a compensator) fails that step
    /// only — compensators are leaves, there is no second cascade.
    #[tracing::instrument(skip(self), fields(saga = %self.id, step = %step_id))]
    pub async fn step_failed(&self, step_id: RecordId) -> Result<()> {
        let _gate = self.gate.lock().await;

        let mut step = self.step(step_id).await?;
        if step.status().is_terminal() {
            tracing::debug!("failure for terminal step ignored");
            return Ok(());
        }

        let already_failed = self.status().await? == SagaStatus::Failed;
        if !already_failed {
            self.set_status(SagaStatus::Failed).await?;
            metrics::counter!("saga_failed").increment(1);
        }

        step.fail().await?;
        tracing::warn!("step failed");

        if already_failed {
            return Ok(());
        }

        let steps = self.steps().await?;
        let rollbacks = steps
            .into_iter()
            .filter(|s| s.status == StepStatus::Finished)
            .map(|record| {
                let mut step =
                    Step::from_record(self.records.clone(), self.table.clone(), record);
                async move { step.rollback().await }
            });
        future::try_join_all(rollbacks).await?;
        Ok(())
    }

    /// Returns true if some step's `compensator_id` points at `step_id`.
    async fn is_compensator(&self, step_id: RecordId) -> Result<bool> {
        let steps = self.steps().await?;
        Ok(steps.iter().any(|s| s.compensator_id == Some(step_id)))
    }
}
