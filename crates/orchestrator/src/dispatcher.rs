//! Tick-driven dispatcher: promotes queued steps into a bounded pool of
//! in-flight worker invocations.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use futures_util::future;
use record_store::RecordId;
use saga::{Saga, StepRecord, StepStatus};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::DispatcherConfig;
use crate::error::{OrchestratorError, Result};
use crate::worker::WorkerRegistry;

/// In-flight key: step ids are only unique within their saga.
type InFlightKey = (RecordId, RecordId);

struct Inner {
    config: DispatcherConfig,
    workers: WorkerRegistry,
    sagas: RwLock<HashMap<RecordId, Saga>>,
    in_flight: Mutex<HashSet<InFlightKey>>,
    ticking: AtomicBool,
    shutdown: Notify,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

/// The scheduler of the orchestrator.
///
/// A periodic tick scans every registered saga, releases the in-flight slots
/// of steps that are no longer `Running`, and dispatches `Queued` steps to
/// their workers while the process-wide capacity allows. Worker invocations
/// are fire-and-forget: completion comes back out-of-band through
/// `Saga::step_finished` / `Saga::step_failed`, and the next tick observes
/// the effect.
///
/// Clones share all state.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Creates a dispatcher over the given worker registry. The tick loop is
    /// not started; call [`start`](Self::start).
    pub fn new(config: DispatcherConfig, workers: WorkerRegistry) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                workers,
                sagas: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashSet::new()),
                ticking: AtomicBool::new(false),
                shutdown: Notify::new(),
                loop_task: Mutex::new(None),
            }),
        }
    }

    /// Registers a saga for scheduling.
    pub fn register(&self, saga: Saga) {
        tracing::debug!(saga = %saga.id(), "saga registered with dispatcher");
        self.inner.sagas.write().unwrap().insert(saga.id(), saga);
    }

    /// Removes a saga from scheduling and drops its in-flight entries.
    pub fn deregister(&self, saga_id: RecordId) {
        self.inner.sagas.write().unwrap().remove(&saga_id);
        self.inner
            .in_flight
            .lock()
            .unwrap()
            .retain(|(saga, _)| *saga != saga_id);
    }

    /// Looks up a registered saga.
    pub fn get_saga(&self, saga_id: RecordId) -> Option<Saga> {
        self.inner.sagas.read().unwrap().get(&saga_id).cloned()
    }

    /// Snapshot of all registered sagas.
    pub fn sagas(&self) -> Vec<Saga> {
        self.inner.sagas.read().unwrap().values().cloned().collect()
    }

    /// Number of steps currently holding an in-flight slot.
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.lock().unwrap().len()
    }

    /// Returns true if the tick loop is running.
    pub fn is_running(&self) -> bool {
        self.inner.loop_task.lock().unwrap().is_some()
    }

    /// Spawns the periodic tick loop. Idempotent.
    pub fn start(&self) {
        let mut task = self.inner.loop_task.lock().unwrap();
        if task.is_some() {
            return;
        }
        tracing::info!(
            interval_ms = self.inner.config.tick_interval.as_millis() as u64,
            capacity = self.inner.config.capacity,
            "dispatcher started"
        );
        let dispatcher = self.clone();
        *task = Some(tokio::spawn(async move { dispatcher.run_loop().await }));
    }

    /// Stops the tick loop and waits for it to wind down. Already-dispatched
    /// workers keep running; `Queued` steps stay queued and survive a later
    /// [`start`](Self::start).
    pub async fn stop(&self) {
        let task = self.inner.loop_task.lock().unwrap().take();
        if let Some(task) = task {
            self.inner.shutdown.notify_one();
            let _ = task.await;
            tracing::info!("dispatcher stopped");
        }
    }

    async fn run_loop(self) {
        let mut interval = tokio::time::interval(self.inner.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.inner.shutdown.notified() => {
                    tracing::debug!("dispatcher loop shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        metrics::counter!("dispatcher_tick_errors").increment(1);
                        tracing::warn!(error = %e, "dispatcher tick failed");
                    }
                }
            }
        }
    }

    /// One scan-and-promote pass over every registered saga.
    ///
    /// Non-reentrant: an invocation that overlaps a running tick is dropped,
    /// not queued — two overlapping ticks could both observe a `Queued` step
    /// and dispatch its worker twice.
    pub async fn tick(&self) -> Result<()> {
        if self
            .inner
            .ticking
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("tick already in progress, dropped");
            return Ok(());
        }
        let result = self.tick_inner().await;
        self.inner.ticking.store(false, Ordering::SeqCst);
        result
    }

    async fn tick_inner(&self) -> Result<()> {
        let sagas = self.sagas();
        if sagas.is_empty() {
            return Ok(());
        }

        // per-saga scans run concurrently; one saga's store failure must not
        // block the others
        let scans = sagas.into_iter().map(|saga| {
            let dispatcher = self.clone();
            async move {
                let saga_id = saga.id();
                match dispatcher.scan_saga(&saga).await {
                    Ok(terminal) => terminal.then_some(saga_id),
                    Err(e) => {
                        tracing::warn!(saga = %saga_id, error = %e, "saga scan failed");
                        None
                    }
                }
            }
        });
        let terminal: Vec<RecordId> = future::join_all(scans).await.into_iter().flatten().collect();

        for saga_id in terminal {
            self.deregister(saga_id);
            tracing::info!(saga = %saga_id, "terminal saga deregistered");
        }

        metrics::gauge!("dispatcher_in_flight").set(self.in_flight_count() as f64);
        Ok(())
    }

    /// Scans one saga's steps: releases slots of steps that stopped running,
    /// dispatches queued steps while capacity remains. Returns true when the
    /// saga is terminal and should be deregistered — after the scan, so
    /// compensators queued by a failure cascade still get dispatched.
    async fn scan_saga(&self, saga: &Saga) -> Result<bool> {
        // snapshot under the saga gate: a failure cascade is either not yet
        // visible or fully applied, compensators included
        let (status, steps) = saga.snapshot().await?;

        for step in steps {
            let key = (saga.id(), step.id);
            let tracked = self.inner.in_flight.lock().unwrap().contains(&key);

            if tracked {
                if step.status != StepStatus::Running {
                    self.release(key);
                    tracing::debug!(
                        saga = %saga.id(),
                        step = %step.id,
                        status = %step.status,
                        "in-flight slot released"
                    );
                }
                continue;
            }

            if step.status != StepStatus::Queued || !self.try_claim(key) {
                continue;
            }

            let step_id = step.id;
            match self.dispatch(saga, step).await {
                Ok(()) => {}
                Err(OrchestratorError::UnknownWorker(name)) => {
                    self.release(key);
                    if self.inner.config.fail_on_unknown_worker {
                        tracing::warn!(
                            saga = %saga.id(),
                            step = %step_id,
                            worker = %name,
                            "unknown worker, failing step"
                        );
                        saga.step_failed(step_id).await?;
                    } else {
                        tracing::warn!(
                            saga = %saga.id(),
                            step = %step_id,
                            worker = %name,
                            "unknown worker, step stays queued"
                        );
                    }
                }
                Err(e) => {
                    self.release(key);
                    tracing::warn!(
                        saga = %saga.id(),
                        step = %step_id,
                        error = %e,
                        "dispatch failed"
                    );
                }
            }
        }

        Ok(status.is_terminal())
    }

    /// Marks the step `Running`, then invokes its worker fire-and-forget.
    /// The persisted transition happens before the invocation so a crash
    /// between the two leaves the step `Running`, never double-queued.
    async fn dispatch(&self, saga: &Saga, record: StepRecord) -> Result<()> {
        let worker = self
            .inner
            .workers
            .get(&record.worker_name)
            .ok_or_else(|| OrchestratorError::UnknownWorker(record.worker_name.clone()))?;

        let mut step = saga.step(record.id).await?;
        if step.status() != StepStatus::Queued {
            tracing::debug!(
                saga = %saga.id(),
                step = %record.id,
                status = %step.status(),
                "step no longer queued, dispatch skipped"
            );
            self.release((saga.id(), record.id));
            return Ok(());
        }
        step.mark_running().await?;

        metrics::counter!("step_dispatched").increment(1);
        tracing::debug!(
            saga = %saga.id(),
            step = %record.id,
            worker = %record.worker_name,
            "step dispatched"
        );

        let saga = saga.clone();
        tokio::spawn(async move {
            worker
                .run(record.args, record.dependency_args, saga, record.id)
                .await;
        });
        Ok(())
    }

    fn try_claim(&self, key: InFlightKey) -> bool {
        let mut in_flight = self.inner.in_flight.lock().unwrap();
        if in_flight.len() >= self.inner.config.capacity {
            return false;
        }
        in_flight.insert(key)
    }

    fn release(&self, key: InFlightKey) {
        self.inner.in_flight.lock().unwrap().remove(&key);
    }
}
