//! Demo: a three-step provisioning saga, once to completion and once through
//! the compensation cascade.
//!
//! Run with `cargo run --example provision`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orchestrator::{DispatcherConfig, Orchestrator, OrchestratorConfig, Worker};
use record_store::{InMemoryStore, RecordId};
use saga::{Saga, SagaStatus};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

/// Completes immediately, fabricating a resource id from the step id.
struct Provision(&'static str);

#[async_trait]
impl Worker for Provision {
    fn name(&self) -> &str {
        self.0
    }

    async fn run(&self, args: Vec<Value>, deps: Vec<Value>, saga: Saga, step_id: RecordId) {
        tracing::info!(worker = self.0, ?args, ?deps, %step_id, "provisioning");
        let result = json!({"resource": format!("{}-{step_id}", self.0)});
        saga.step_finished(step_id, Some(result))
            .await
            .expect("completion failed");
    }
}

/// Always reports failure.
struct Broken(&'static str);

#[async_trait]
impl Worker for Broken {
    fn name(&self) -> &str {
        self.0
    }

    async fn run(&self, _: Vec<Value>, _: Vec<Value>, saga: Saga, step_id: RecordId) {
        tracing::warn!(worker = self.0, %step_id, "provisioning failed");
        saga.step_failed(step_id).await.expect("failure report failed");
    }
}

/// Compensator: tears down the resource its parent created.
struct Teardown(&'static str);

#[async_trait]
impl Worker for Teardown {
    fn name(&self) -> &str {
        self.0
    }

    async fn run(&self, _: Vec<Value>, deps: Vec<Value>, saga: Saga, step_id: RecordId) {
        tracing::info!(worker = self.0, parent_result = ?deps, "tearing down");
        saga.step_finished(step_id, None::<Value>)
            .await
            .expect("completion failed");
    }
}

async fn build_saga(orchestrator: &Orchestrator, dns_worker: &str) -> Saga {
    let saga = orchestrator.create_saga().await.expect("create saga");

    let mut vm = saga
        .add_step("create_vm", vec![json!({"size": "m1"})], vec![])
        .await
        .expect("add step");
    vm.attach_compensator("delete_vm", vec![])
        .await
        .expect("attach compensator");

    let mut ip = saga
        .add_step("assign_ip", vec![], vec![vm.id()])
        .await
        .expect("add step");
    ip.attach_compensator("release_ip", vec![])
        .await
        .expect("attach compensator");

    saga.add_step(dns_worker, vec![], vec![ip.id()])
        .await
        .expect("add step");

    saga
}

async fn wait_until_terminal(saga: &Saga) -> SagaStatus {
    loop {
        let status = saga.status().await.expect("status");
        if status.is_terminal() {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::main]
async fn main() {
    // 1. Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 2. Build the orchestrator over an in-memory store
    let orchestrator = Orchestrator::new(
        Arc::new(InMemoryStore::new()),
        OrchestratorConfig::new().with_namespace("demo"),
        DispatcherConfig::new().with_tick_interval(Duration::from_millis(50)),
    );

    // 3. Register the workers
    orchestrator.register_workers([
        Arc::new(Provision("create_vm")) as Arc<dyn Worker>,
        Arc::new(Provision("assign_ip")),
        Arc::new(Provision("register_dns")),
        Arc::new(Broken("broken_dns")),
        Arc::new(Teardown("delete_vm")),
        Arc::new(Teardown("release_ip")),
    ]);

    // 4. A saga that runs to completion
    let ok = build_saga(&orchestrator, "register_dns").await;
    ok.start().await.expect("start");
    let status = wait_until_terminal(&ok).await;
    tracing::info!(saga = %ok.id(), %status, "first saga done");

    // 5. A saga whose last step fails: the completed prefix is compensated
    let failing = build_saga(&orchestrator, "broken_dns").await;
    failing.start().await.expect("start");
    let status = wait_until_terminal(&failing).await;

    // give the compensators a few ticks to drain
    tokio::time::sleep(Duration::from_millis(300)).await;

    for step in failing.steps().await.expect("steps") {
        tracing::info!(
            step = %step.id,
            worker = %step.worker_name,
            status = %step.status,
            "final step state"
        );
    }
    tracing::info!(saga = %failing.id(), %status, "second saga done");

    orchestrator.stop().await;
}
