use async_trait::async_trait;

use crate::Result;

/// Core trait for key/value store drivers.
///
/// A driver exposes flat string tables of opaque JSON values. Table names
/// arrive fully namespaced (`"<namespace>_<table>"`, applied by
/// [`Records`](crate::Records)); a missing record is signalled by `None`.
/// All implementations must be thread-safe (`Send + Sync`).
///
/// For a hash-per-table external KV (e.g. Redis), map one hash per table:
/// `set` ↔ `HSET`, `get` ↔ `HGET`, `list_keys` ↔ `HKEYS`,
/// `multi_get` ↔ `HMGET`. Writes must be durable on return and values must
/// round-trip byte-for-byte.
#[async_trait]
pub trait Store: Send + Sync {
    /// Upserts a value under `table`/`key`.
    async fn set(&self, table: &str, key: &str, value: &str) -> Result<()>;

    /// Returns the value under `table`/`key`, or `None` if absent.
    async fn get(&self, table: &str, key: &str) -> Result<Option<String>>;

    /// Returns all current keys of a table, in unspecified order.
    async fn list_keys(&self, table: &str) -> Result<Vec<String>>;

    /// Returns the values for `keys`, positionally aligned with the input.
    ///
    /// An empty `keys` slice must produce an empty vec without touching the
    /// backing store.
    async fn multi_get(&self, table: &str, keys: &[String]) -> Result<Vec<Option<String>>>;
}
