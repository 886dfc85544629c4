//! Worker contract and process-local registry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use record_store::RecordId;
use saga::Saga;
use serde_json::Value;

/// A named unit of work, invoked when a step is dispatched.
///
/// The worker receives the step's fixed `args`, the results of its
/// dependencies in declaration order, a handle to the owning saga and the
/// step id. The return of `run` is ignored: completion is reported
/// out-of-band by calling `saga.step_finished` or `saga.step_failed` exactly
/// once per dispatch. A worker that never reports leaves its step stuck in
/// `Running`. Dispatch is at-least-once, so compensators should be
/// idempotent.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Name that step `worker_name`s are resolved against.
    fn name(&self) -> &str;

    /// Executes one dispatched step.
    async fn run(
        &self,
        args: Vec<Value>,
        dependency_args: Vec<Value>,
        saga: Saga,
        step_id: RecordId,
    );
}

/// Process-local name → worker map.
///
/// Registration replaces any worker previously held under the same name.
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    workers: Arc<RwLock<HashMap<String, Arc<dyn Worker>>>>,
}

impl WorkerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a worker under its own name.
    pub fn register(&self, worker: Arc<dyn Worker>) {
        let name = worker.name().to_string();
        tracing::debug!(worker = %name, "worker registered");
        self.workers.write().unwrap().insert(name, worker);
    }

    /// Looks up a worker by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Worker>> {
        self.workers.read().unwrap().get(name).cloned()
    }

    /// Returns true if a worker is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.workers.read().unwrap().contains_key(name)
    }

    /// Returns the number of registered workers.
    pub fn len(&self) -> usize {
        self.workers.read().unwrap().len()
    }

    /// Returns true if no workers are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(&'static str);

    #[async_trait]
    impl Worker for Noop {
        fn name(&self) -> &str {
            self.0
        }

        async fn run(&self, _: Vec<Value>, _: Vec<Value>, _: Saga, _: RecordId) {}
    }

    #[test]
    fn test_register_and_get() {
        let registry = WorkerRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(Noop("a")));
        registry.register(Arc::new(Noop("b")));

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("a"));
        assert!(!registry.contains("c"));
        assert_eq!(registry.get("b").unwrap().name(), "b");
        assert!(registry.get("c").is_none());
    }

    #[test]
    fn test_register_replaces_same_name() {
        let registry = WorkerRegistry::new();
        registry.register(Arc::new(Noop("a")));
        registry.register(Arc::new(Noop("a")));
        assert_eq!(registry.len(), 1);
    }
}
