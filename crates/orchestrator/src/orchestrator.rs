//! Public façade: composition root of the saga engine.

use std::sync::Arc;

use record_store::{RecordId, Records, Store};
use saga::Saga;

use crate::config::{DispatcherConfig, OrchestratorConfig};
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::worker::{Worker, WorkerRegistry};

/// Entry point of the engine.
///
/// Wires a store driver into the record layer, owns the worker registry and
/// the dispatcher, and hands out saga handles. One orchestrator per process
/// and namespace: scheduling is process-local, only the records are shared.
pub struct Orchestrator {
    records: Records,
    workers: WorkerRegistry,
    dispatcher: Dispatcher,
}

impl Orchestrator {
    /// Builds the engine over a store driver and starts the dispatcher tick.
    ///
    /// Must be called within a tokio runtime (the tick loop is spawned here).
    pub fn new(
        store: Arc<dyn Store>,
        options: OrchestratorConfig,
        queue: DispatcherConfig,
    ) -> Self {
        let records = Records::new(store, options.namespace);
        let workers = WorkerRegistry::new();
        let dispatcher = Dispatcher::new(queue, workers.clone());
        dispatcher.start();

        tracing::info!(namespace = records.namespace(), "orchestrator ready");
        Self {
            records,
            workers,
            dispatcher,
        }
    }

    /// Creates a saga, registers it with the dispatcher and returns the
    /// handle.
    pub async fn create_saga(&self) -> Result<Saga> {
        let saga = Saga::create(self.records.clone()).await?;
        self.dispatcher.register(saga.clone());
        Ok(saga)
    }

    /// Adds a worker to the process-local registry.
    pub fn register_worker(&self, worker: Arc<dyn Worker>) {
        self.workers.register(worker);
    }

    /// Registers several workers at once.
    pub fn register_workers(&self, workers: impl IntoIterator<Item = Arc<dyn Worker>>) {
        for worker in workers {
            self.register_worker(worker);
        }
    }

    /// Looks up a registered worker by name.
    pub fn get_worker(&self, name: &str) -> Option<Arc<dyn Worker>> {
        self.workers.get(name)
    }

    /// Looks up a saga currently registered with the dispatcher.
    ///
    /// Terminal sagas are deregistered by the tick and won't be found here;
    /// their records remain in the store.
    pub fn get_saga(&self, saga_id: RecordId) -> Option<Saga> {
        self.dispatcher.get_saga(saga_id)
    }

    /// The dispatcher, for manual tick pumping or direct inspection.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Restarts the dispatcher tick loop.
    pub fn start(&self) {
        self.dispatcher.start();
    }

    /// Stops the dispatcher tick loop. Already-dispatched workers keep
    /// running; queued steps stay queued until the next start.
    pub async fn stop(&self) {
        self.dispatcher.stop().await;
    }

    /// Re-registers every non-terminal saga found in the store.
    ///
    /// Call after a restart, before or after re-registering workers — steps
    /// whose worker is missing are subject to the unknown-worker policy once
    /// dispatched, so register workers first.
    #[tracing::instrument(skip(self))]
    pub async fn restore_previous_state(&self) -> Result<Vec<Saga>> {
        let records = Saga::all_records(&self.records).await?;
        let mut restored = Vec::new();

        for record in records {
            if record.status.is_terminal() {
                continue;
            }
            let saga = Saga::attach(self.records.clone(), record.id);
            self.dispatcher.register(saga.clone());
            restored.push(saga);
        }

        tracing::info!(count = restored.len(), "previous sagas restored");
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use record_store::InMemoryStore;
    use serde_json::Value;

    struct Noop;

    #[async_trait]
    impl Worker for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        async fn run(&self, _: Vec<Value>, _: Vec<Value>, _: Saga, _: RecordId) {}
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(
            Arc::new(InMemoryStore::new()),
            OrchestratorConfig::default(),
            DispatcherConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_create_saga_registers_with_dispatcher() {
        let orchestrator = orchestrator();
        let saga = orchestrator.create_saga().await.unwrap();

        assert!(orchestrator.get_saga(saga.id()).is_some());
        assert!(orchestrator.get_saga(RecordId::new(99)).is_none());
    }

    #[tokio::test]
    async fn test_worker_registration() {
        let orchestrator = orchestrator();
        orchestrator.register_workers([Arc::new(Noop) as Arc<dyn Worker>]);

        assert!(orchestrator.get_worker("noop").is_some());
        assert!(orchestrator.get_worker("other").is_none());
    }

    #[tokio::test]
    async fn test_new_starts_dispatcher() {
        let orchestrator = orchestrator();
        assert!(orchestrator.dispatcher().is_running());
        orchestrator.stop().await;
        assert!(!orchestrator.dispatcher().is_running());
        orchestrator.start();
        assert!(orchestrator.dispatcher().is_running());
        orchestrator.stop().await;
    }
}
