use thiserror::Error;

/// Errors that can occur when interacting with the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A driver-level I/O failure.
    #[error("Store backend error: {0}")]
    Backend(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The record was not found in the given table.
    #[error("Record not found: {table}/{key}")]
    NotFound { table: String, key: String },

    /// A table key could not be parsed as a record id.
    #[error("Invalid record key in {table}: {key:?}")]
    InvalidKey { table: String, key: String },
}

/// Result type for record store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
