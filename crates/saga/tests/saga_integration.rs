//! Integration tests driving whole sagas through the entity API.

use std::sync::Arc;

use record_store::{InMemoryStore, Records};
use saga::{Saga, SagaStatus, StepStatus};
use serde_json::{Value, json};

fn records() -> Records {
    Records::new(Arc::new(InMemoryStore::new()), "flows")
}

#[tokio::test]
async fn chain_of_dependent_steps_runs_in_order() {
    let saga = Saga::create(records()).await.unwrap();
    let a = saga.add_step("w", vec![], vec![]).await.unwrap();
    let b = saga.add_step("w", vec![], vec![a.id()]).await.unwrap();
    let c = saga.add_step("w", vec![], vec![b.id()]).await.unwrap();
    saga.start().await.unwrap();

    // only the head of the chain is schedulable
    assert_eq!(saga.step(a.id()).await.unwrap().status(), StepStatus::Queued);
    assert_eq!(saga.step(b.id()).await.unwrap().status(), StepStatus::Created);

    saga.step_finished(a.id(), Some(json!(1))).await.unwrap();
    assert_eq!(saga.step(b.id()).await.unwrap().status(), StepStatus::Queued);
    assert_eq!(saga.step(c.id()).await.unwrap().status(), StepStatus::Created);

    saga.step_finished(b.id(), Some(json!(2))).await.unwrap();
    let c_loaded = saga.step(c.id()).await.unwrap();
    assert_eq!(c_loaded.status(), StepStatus::Queued);
    assert_eq!(c_loaded.record().dependency_args, vec![json!(2)]);

    saga.step_finished(c.id(), Some(json!(3))).await.unwrap();
    assert_eq!(saga.status().await.unwrap(), SagaStatus::Finished);
}

#[tokio::test]
async fn fan_out_fan_in_collects_all_results() {
    let saga = Saga::create(records()).await.unwrap();
    let head = saga.add_step("w", vec![], vec![]).await.unwrap();
    let left = saga.add_step("w", vec![], vec![head.id()]).await.unwrap();
    let right = saga.add_step("w", vec![], vec![head.id()]).await.unwrap();
    let join = saga
        .add_step("w", vec![], vec![left.id(), right.id()])
        .await
        .unwrap();
    saga.start().await.unwrap();

    saga.step_finished(head.id(), Some(json!("h"))).await.unwrap();

    // both branches unblock from the single head result
    assert_eq!(
        saga.step(left.id()).await.unwrap().status(),
        StepStatus::Queued
    );
    assert_eq!(
        saga.step(right.id()).await.unwrap().status(),
        StepStatus::Queued
    );

    saga.step_finished(right.id(), Some(json!("r"))).await.unwrap();
    saga.step_finished(left.id(), Some(json!("l"))).await.unwrap();

    let join_loaded = saga.step(join.id()).await.unwrap();
    assert_eq!(join_loaded.status(), StepStatus::Queued);
    assert_eq!(
        join_loaded.record().dependency_args,
        vec![json!("l"), json!("r")]
    );

    saga.step_finished(join.id(), None::<Value>).await.unwrap();
    assert_eq!(saga.status().await.unwrap(), SagaStatus::Finished);
}

#[tokio::test]
async fn mid_chain_failure_compensates_the_completed_prefix() {
    let saga = Saga::create(records()).await.unwrap();
    let mut a = saga.add_step("create", vec![json!("A")], vec![]).await.unwrap();
    let undo_a = a.attach_compensator("destroy", vec![]).await.unwrap();
    let mut b = saga
        .add_step("create", vec![json!("B")], vec![a.id()])
        .await
        .unwrap();
    let undo_b = b.attach_compensator("destroy", vec![]).await.unwrap();
    let c = saga
        .add_step("create", vec![json!("C")], vec![b.id()])
        .await
        .unwrap();
    saga.start().await.unwrap();

    saga.step_finished(a.id(), Some(json!({"id": "a"}))).await.unwrap();
    saga.step_finished(b.id(), Some(json!({"id": "b"}))).await.unwrap();
    saga.step_failed(c.id()).await.unwrap();

    assert_eq!(saga.status().await.unwrap(), SagaStatus::Failed);
    assert_eq!(
        saga.step(a.id()).await.unwrap().status(),
        StepStatus::RolledBack
    );
    assert_eq!(
        saga.step(b.id()).await.unwrap().status(),
        StepStatus::RolledBack
    );

    // each compensator queued with its parent's result
    let undo_a = saga.step(undo_a.id()).await.unwrap();
    assert_eq!(undo_a.status(), StepStatus::Queued);
    assert_eq!(undo_a.record().dependency_args, vec![json!({"id": "a"})]);

    let undo_b = saga.step(undo_b.id()).await.unwrap();
    assert_eq!(undo_b.status(), StepStatus::Queued);
    assert_eq!(undo_b.record().dependency_args, vec![json!({"id": "b"})]);

    // compensators complete, saga stays failed
    saga.step_finished(undo_a.id(), None::<Value>).await.unwrap();
    saga.step_finished(undo_b.id(), None::<Value>).await.unwrap();
    assert_eq!(saga.status().await.unwrap(), SagaStatus::Failed);
}

#[tokio::test]
async fn handles_reattached_over_the_same_store_see_saga_state() {
    let store = Arc::new(InMemoryStore::new());
    let records = Records::new(store.clone(), "flows");

    let saga = Saga::create(records.clone()).await.unwrap();
    let a = saga.add_step("w", vec![], vec![]).await.unwrap();
    saga.start().await.unwrap();
    let saga_id = saga.id();
    drop(saga);

    // a fresh handle over the same store picks up where the old one left off
    let saga = Saga::attach(Records::new(store, "flows"), saga_id);
    assert_eq!(saga.status().await.unwrap(), SagaStatus::Running);
    assert_eq!(saga.step(a.id()).await.unwrap().status(), StepStatus::Queued);

    saga.step_finished(a.id(), Some(json!({"ok": true})))
        .await
        .unwrap();
    assert_eq!(saga.status().await.unwrap(), SagaStatus::Finished);
}
