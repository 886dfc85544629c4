//! Orchestrator and dispatcher configuration.

use std::time::Duration;

/// Dispatcher tuning knobs with sensible defaults.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Time between scheduling ticks.
    pub tick_interval: Duration,
    /// Maximum concurrently in-flight steps, process-wide across all sagas.
    pub capacity: usize,
    /// When a step names an unregistered worker: `true` fails the step (and
    /// with it the saga, triggering compensation), `false` logs and leaves
    /// the step queued.
    pub fail_on_unknown_worker: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            capacity: 25,
            fail_on_unknown_worker: true,
        }
    }
}

impl DispatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_fail_on_unknown_worker(mut self, fail: bool) -> Self {
        self.fail_on_unknown_worker = fail;
        self
    }
}

/// Façade configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Namespace prefixed onto every store table.
    pub namespace: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            namespace: "saga".to_string(),
        }
    }
}

impl OrchestratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatcher_defaults() {
        let config = DispatcherConfig::default();
        assert_eq!(config.tick_interval, Duration::from_secs(1));
        assert_eq!(config.capacity, 25);
        assert!(config.fail_on_unknown_worker);
    }

    #[test]
    fn test_dispatcher_builders() {
        let config = DispatcherConfig::new()
            .with_tick_interval(Duration::from_millis(10))
            .with_capacity(2)
            .with_fail_on_unknown_worker(false);
        assert_eq!(config.tick_interval, Duration::from_millis(10));
        assert_eq!(config.capacity, 2);
        assert!(!config.fail_on_unknown_worker);
    }

    #[test]
    fn test_orchestrator_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.namespace, "saga");
        assert_eq!(
            OrchestratorConfig::new().with_namespace("billing").namespace,
            "billing"
        );
    }
}
