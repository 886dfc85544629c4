//! End-to-end tests: sagas driven through the dispatcher and real workers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use orchestrator::{DispatcherConfig, Orchestrator, OrchestratorConfig, Worker};
use record_store::{InMemoryStore, RecordId};
use saga::{Saga, SagaStatus, StepStatus};
use serde_json::{Value, json};

const TICK: Duration = Duration::from_millis(10);

fn orchestrator_over(store: Arc<InMemoryStore>, tick: Duration) -> Orchestrator {
    Orchestrator::new(
        store,
        OrchestratorConfig::new().with_namespace("it"),
        DispatcherConfig::new().with_tick_interval(tick),
    )
}

fn orchestrator() -> Orchestrator {
    orchestrator_over(Arc::new(InMemoryStore::new()), TICK)
}

/// Records dispatches and waits for the test to report completion.
#[derive(Clone)]
struct ManualWorker {
    name: String,
    dispatches: Arc<Mutex<Vec<RecordId>>>,
}

impl ManualWorker {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            dispatches: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn dispatch_count(&self) -> usize {
        self.dispatches.lock().unwrap().len()
    }
}

#[async_trait]
impl Worker for ManualWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _: Vec<Value>, _: Vec<Value>, _: Saga, step_id: RecordId) {
        self.dispatches.lock().unwrap().push(step_id);
    }
}

/// Immediately reports success with a fixed result.
struct CompletingWorker {
    name: String,
    result: Value,
}

impl CompletingWorker {
    fn new(name: &str, result: Value) -> Self {
        Self {
            name: name.to_string(),
            result,
        }
    }
}

#[async_trait]
impl Worker for CompletingWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _: Vec<Value>, _: Vec<Value>, saga: Saga, step_id: RecordId) {
        saga.step_finished(step_id, Some(self.result.clone()))
            .await
            .unwrap();
    }
}

async fn wait_for_dispatches(worker: &ManualWorker, n: usize) {
    for _ in 0..300 {
        if worker.dispatch_count() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("worker {} never saw {n} dispatches", worker.name);
}

async fn wait_for_saga(saga: &Saga, status: SagaStatus) {
    for _ in 0..300 {
        if saga.status().await.unwrap() == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("saga {} never reached {status}", saga.id());
}

async fn wait_for_step(saga: &Saga, step_id: RecordId, status: StepStatus) {
    for _ in 0..300 {
        if saga.step(step_id).await.unwrap().status() == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("step {step_id} never reached {status}");
}

#[tokio::test]
async fn single_step_success() {
    let orchestrator = orchestrator();
    let worker = ManualWorker::new("W");
    orchestrator.register_worker(Arc::new(worker.clone()));

    let saga = orchestrator.create_saga().await.unwrap();
    let step = saga.add_step("W", vec![json!("x")], vec![]).await.unwrap();
    assert_eq!(step.status(), StepStatus::Created);

    saga.start().await.unwrap();
    // queued by start; the background tick may promote it at any moment
    assert!(matches!(
        saga.step(step.id()).await.unwrap().status(),
        StepStatus::Queued | StepStatus::Running
    ));

    wait_for_step(&saga, step.id(), StepStatus::Running).await;
    wait_for_dispatches(&worker, 1).await;

    saga.step_finished(step.id(), Some(json!({"ok": true})))
        .await
        .unwrap();

    wait_for_saga(&saga, SagaStatus::Finished).await;
    let step = saga.step(step.id()).await.unwrap();
    assert_eq!(step.status(), StepStatus::Finished);
    assert_eq!(step.record().result, Some(json!({"ok": true})));
}

#[tokio::test]
async fn two_independent_steps_run_in_parallel() {
    let orchestrator = orchestrator();
    let worker = ManualWorker::new("W");
    orchestrator.register_worker(Arc::new(worker.clone()));

    let saga = orchestrator.create_saga().await.unwrap();
    let step1 = saga.add_step("W", vec![json!("a")], vec![]).await.unwrap();
    let step2 = saga.add_step("W", vec![json!("b")], vec![]).await.unwrap();
    saga.start().await.unwrap();

    // both queue immediately and go in flight together
    wait_for_step(&saga, step1.id(), StepStatus::Running).await;
    wait_for_step(&saga, step2.id(), StepStatus::Running).await;
    wait_for_dispatches(&worker, 2).await;

    saga.step_finished(step1.id(), None::<Value>).await.unwrap();
    assert_eq!(saga.status().await.unwrap(), SagaStatus::Running);

    saga.step_finished(step2.id(), None::<Value>).await.unwrap();
    wait_for_saga(&saga, SagaStatus::Finished).await;
}

#[tokio::test]
async fn diamond_dependency_passes_results_positionally() {
    let orchestrator = orchestrator();
    let worker = ManualWorker::new("W");
    orchestrator.register_worker(Arc::new(worker.clone()));

    let saga = orchestrator.create_saga().await.unwrap();
    let step1 = saga.add_step("W", vec![], vec![]).await.unwrap();
    let step2 = saga.add_step("W", vec![], vec![]).await.unwrap();
    let step3 = saga
        .add_step("W", vec![], vec![step1.id(), step2.id()])
        .await
        .unwrap();
    saga.start().await.unwrap();

    wait_for_step(&saga, step1.id(), StepStatus::Running).await;
    wait_for_step(&saga, step2.id(), StepStatus::Running).await;
    assert_eq!(
        saga.step(step3.id()).await.unwrap().status(),
        StepStatus::Created
    );

    saga.step_finished(step1.id(), Some(json!({"a": 1})))
        .await
        .unwrap();
    saga.step_finished(step2.id(), Some(json!({"b": 2})))
        .await
        .unwrap();

    wait_for_step(&saga, step3.id(), StepStatus::Running).await;
    let step3 = saga.step(step3.id()).await.unwrap();
    // declaration order, not completion order
    assert_eq!(
        step3.record().dependency_args,
        vec![json!({"a": 1}), json!({"b": 2})]
    );

    saga.step_finished(step3.id(), None::<Value>).await.unwrap();
    wait_for_saga(&saga, SagaStatus::Finished).await;
}

#[tokio::test]
async fn failure_triggers_compensation_cascade() {
    let orchestrator = orchestrator();
    let create = ManualWorker::new("Create");
    let destroy = ManualWorker::new("Destroy");
    orchestrator.register_workers([
        Arc::new(create.clone()) as Arc<dyn Worker>,
        Arc::new(destroy.clone()) as Arc<dyn Worker>,
    ]);

    let saga = orchestrator.create_saga().await.unwrap();
    let mut step1 = saga
        .add_step("Create", vec![json!("A")], vec![])
        .await
        .unwrap();
    let compensator = step1.attach_compensator("Destroy", vec![]).await.unwrap();
    let step2 = saga
        .add_step("Create", vec![json!("B")], vec![step1.id()])
        .await
        .unwrap();
    saga.start().await.unwrap();

    wait_for_step(&saga, step1.id(), StepStatus::Running).await;
    saga.step_finished(step1.id(), Some(json!({"id": 42})))
        .await
        .unwrap();

    wait_for_step(&saga, step2.id(), StepStatus::Running).await;
    saga.step_failed(step2.id()).await.unwrap();

    assert_eq!(saga.status().await.unwrap(), SagaStatus::Failed);
    assert_eq!(
        saga.step(step2.id()).await.unwrap().status(),
        StepStatus::Failed
    );
    assert_eq!(
        saga.step(step1.id()).await.unwrap().status(),
        StepStatus::RolledBack
    );

    // the compensator left its parking state with the parent's result and
    // gets dispatched like any other step
    wait_for_step(&saga, compensator.id(), StepStatus::Running).await;
    let compensator = saga.step(compensator.id()).await.unwrap();
    assert_eq!(compensator.record().dependency_args, vec![json!({"id": 42})]);
    wait_for_dispatches(&destroy, 1).await;
}

#[tokio::test]
async fn unknown_worker_fails_the_saga() {
    let orchestrator = orchestrator();

    let saga = orchestrator.create_saga().await.unwrap();
    let step = saga.add_step("Missing", vec![], vec![]).await.unwrap();
    saga.start().await.unwrap();

    wait_for_saga(&saga, SagaStatus::Failed).await;
    assert_eq!(
        saga.step(step.id()).await.unwrap().status(),
        StepStatus::Failed
    );
}

#[tokio::test]
async fn restart_recovery_restores_only_non_terminal_sagas() {
    let store = Arc::new(InMemoryStore::new());

    // first process: long tick so nothing is dispatched underneath the test
    let first = orchestrator_over(store.clone(), Duration::from_secs(3600));

    let done = first.create_saga().await.unwrap();
    let step = done.add_step("W", vec![], vec![]).await.unwrap();
    done.start().await.unwrap();
    done.step_finished(step.id(), Some(json!("r"))).await.unwrap();
    assert_eq!(done.status().await.unwrap(), SagaStatus::Finished);

    let pending = first.create_saga().await.unwrap();
    let pending_step = pending.add_step("W", vec![json!("x")], vec![]).await.unwrap();
    pending.start().await.unwrap();
    assert_eq!(
        pending.step(pending_step.id()).await.unwrap().status(),
        StepStatus::Queued
    );

    let (done_id, pending_id) = (done.id(), pending.id());
    first.stop().await;
    drop(first);

    // second process over the same store
    let second = orchestrator_over(store, TICK);
    second.register_worker(Arc::new(CompletingWorker::new("W", json!({"ok": 1}))));
    let restored = second.restore_previous_state().await.unwrap();

    let restored_ids: Vec<RecordId> = restored.iter().map(Saga::id).collect();
    assert_eq!(restored_ids, vec![pending_id]);
    assert!(second.get_saga(done_id).is_none());

    // the queued step survived the stop/start cycle and now runs to the end
    let pending = second.get_saga(pending_id).unwrap();
    wait_for_saga(&pending, SagaStatus::Finished).await;
    let pending_step = pending.step(pending_step.id()).await.unwrap();
    assert_eq!(pending_step.status(), StepStatus::Finished);
    assert_eq!(pending_step.record().result, Some(json!({"ok": 1})));

    second.stop().await;
}
