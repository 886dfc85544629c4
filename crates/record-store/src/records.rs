use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{Result, StoreError, store::Store};

/// Table holding the per-table id counters.
pub const META_TABLE: &str = "meta";

/// Monotonically increasing identifier of a record within a table.
///
/// Wraps the integer allocated by [`Records::create`] to prevent mixing up
/// record ids with other numeric values.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RecordId(u64);

impl RecordId {
    /// Creates a record id from a raw integer.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying integer.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl From<u64> for RecordId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// A typed record persisted through [`Records`].
///
/// The `id` field is managed by the layer: [`Records::create`] stamps the
/// allocated id into the record before writing it.
pub trait Record: Serialize + DeserializeOwned + Send {
    fn id(&self) -> RecordId;
    fn set_id(&mut self, id: RecordId);
}

/// Typed record access over a raw [`Store`].
///
/// Adds three things on top of the driver: a `"<namespace>_"` prefix on every
/// table name, id allocation from the [`META_TABLE`] counters, and JSON
/// (de)serialization of typed records.
#[derive(Clone)]
pub struct Records {
    store: Arc<dyn Store>,
    namespace: String,
}

impl std::fmt::Debug for Records {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Records")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl Records {
    /// Creates a record layer over `store`, prefixing all tables with
    /// `namespace`.
    pub fn new(store: Arc<dyn Store>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    /// Returns the namespace applied to table names.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn table_name(&self, table: &str) -> String {
        format!("{}_{}", self.namespace, table)
    }

    /// Allocates the next id for `table` from the meta counter.
    ///
    /// Read-increment-write: safe under a single writer process only. A
    /// multi-writer deployment must swap this for an atomic increment
    /// primitive on the store.
    async fn next_id(&self, table: &str) -> Result<RecordId> {
        let meta = self.table_name(META_TABLE);
        let last: u64 = match self.store.get(&meta, table).await? {
            Some(raw) => raw.parse().map_err(|_| StoreError::InvalidKey {
                table: meta.clone(),
                key: raw,
            })?,
            None => 0,
        };
        let next = last + 1;
        self.store.set(&meta, table, &next.to_string()).await?;
        Ok(RecordId(next))
    }

    /// Allocates an id, stamps it into `record`, and persists the record.
    ///
    /// Returns the stored record including its id.
    pub async fn create<T: Record>(&self, table: &str, mut record: T) -> Result<T> {
        let id = self.next_id(table).await?;
        record.set_id(id);
        let json = serde_json::to_string(&record)?;
        self.store
            .set(&self.table_name(table), &id.to_string(), &json)
            .await?;
        Ok(record)
    }

    /// Shallow-merges `patch` over the stored record and writes it back.
    ///
    /// Patch keys override current keys; keys absent from the patch are
    /// preserved. Returns the merged value.
    pub async fn update(&self, table: &str, id: RecordId, patch: &Value) -> Result<Value> {
        let full_table = self.table_name(table);
        let key = id.to_string();

        let Some(patch) = patch.as_object() else {
            return Err(StoreError::Serialization(serde_json::Error::io(
                std::io::Error::other("record patch must be a JSON object"),
            )));
        };

        let raw = self
            .store
            .get(&full_table, &key)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                table: full_table.clone(),
                key: key.clone(),
            })?;
        let mut current: Value = serde_json::from_str(&raw)?;

        if let Some(fields) = current.as_object_mut() {
            for (name, value) in patch {
                fields.insert(name.clone(), value.clone());
            }
        }

        self.store
            .set(&full_table, &key, &serde_json::to_string(&current)?)
            .await?;
        Ok(current)
    }

    /// Fetches a record by id, or `None` if absent.
    pub async fn get<T: Record>(&self, table: &str, id: RecordId) -> Result<Option<T>> {
        match self
            .store
            .get(&self.table_name(table), &id.to_string())
            .await?
        {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Returns all record ids of a table, ascending.
    pub async fn get_ids(&self, table: &str) -> Result<Vec<RecordId>> {
        let full_table = self.table_name(table);
        let keys = self.store.list_keys(&full_table).await?;
        let mut ids = Vec::with_capacity(keys.len());
        for key in keys {
            let id = key.parse().map_err(|_| StoreError::InvalidKey {
                table: full_table.clone(),
                key: key.clone(),
            })?;
            ids.push(id);
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Fetches several records at once, positionally aligned with `ids`.
    pub async fn get_multiple<T: Record>(
        &self,
        table: &str,
        ids: &[RecordId],
    ) -> Result<Vec<Option<T>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = ids.iter().map(ToString::to_string).collect();
        let raws = self
            .store
            .multi_get(&self.table_name(table), &keys)
            .await?;
        raws.into_iter()
            .map(|raw| match raw {
                Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
                None => Ok(None),
            })
            .collect()
    }
}
