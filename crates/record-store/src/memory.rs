use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{Result, store::Store};

/// In-memory store driver.
///
/// Keeps one `key → value` map per table. Used as the reference driver in
/// tests and single-process deployments that don't need durability.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<HashMap<String, HashMap<String, String>>>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records in a table.
    pub async fn table_len(&self, table: &str) -> usize {
        self.tables
            .read()
            .await
            .get(table)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    /// Drops all tables.
    pub async fn clear(&self) {
        self.tables.write().await.clear();
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn set(&self, table: &str, key: &str, value: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, table: &str, key: &str) -> Result<Option<String>> {
        let tables = self.tables.read().await;
        Ok(tables.get(table).and_then(|t| t.get(key)).cloned())
    }

    async fn list_keys(&self, table: &str) -> Result<Vec<String>> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(table)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn multi_get(&self, table: &str, keys: &[String]) -> Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let tables = self.tables.read().await;
        let table = tables.get(table);
        Ok(keys
            .iter()
            .map(|key| table.and_then(|t| t.get(key)).cloned())
            .collect())
    }
}
