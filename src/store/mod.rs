//! Durable metadata store
//!
//! Records are addressed by a structured [`StoreKey`] and written with
//! optimistic concurrency: every write carries the version the caller last
//! observed and is rejected with [`StoreError::Conflict`] when the stored
//! version has moved on.

pub mod file;
pub mod memory;
pub mod record;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use record::{PodIdentity, PodNetworkRecord, StoreKey, RECORD_PREFIX};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Key modified concurrently: {0} (retry might fix the error)")]
    Conflict(String),

    #[error("Invalid store key: {0}")]
    InvalidKey(String),

    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store task failed: {0}")]
    Task(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Key/value store contract used by the orchestrator and the reconciler
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Read a record. The result carries the stored version and `exists = true`.
    async fn get(&self, key: &StoreKey) -> Result<PodNetworkRecord, StoreError>;

    /// Write a record if the stored version still matches.
    ///
    /// A record with `exists == false` may only be created, never overwrite.
    /// On success `record.version` is bumped and `record.exists` is set.
    async fn put_atomic(&self, record: &mut PodNetworkRecord) -> Result<(), StoreError>;

    /// Remove a record if the stored version still matches. Removing an absent
    /// key succeeds.
    async fn delete_atomic(&self, record: &PodNetworkRecord) -> Result<(), StoreError>;

    /// All stored records
    async fn list(&self) -> Result<Vec<PodNetworkRecord>, StoreError>;
}

/// Compare-and-swap decision shared by the store implementations.
///
/// `stored` is the version currently held for the key, `None` if absent.
pub(crate) fn check_put(
    key: &StoreKey,
    stored: Option<u64>,
    record: &PodNetworkRecord,
) -> Result<u64, StoreError> {
    match (stored, record.exists) {
        (None, false) => Ok(1),
        (Some(_), false) => Err(StoreError::Conflict(format!("{} already exists", key))),
        (None, true) => Err(StoreError::Conflict(format!(
            "{} was removed after version {}",
            key, record.version
        ))),
        (Some(current), true) if current == record.version => Ok(current + 1),
        (Some(current), true) => Err(StoreError::Conflict(format!(
            "{} is at version {}, caller observed {}",
            key, current, record.version
        ))),
    }
}

pub(crate) fn check_delete(
    key: &StoreKey,
    stored: Option<u64>,
    record: &PodNetworkRecord,
) -> Result<bool, StoreError> {
    match stored {
        None => Ok(false),
        Some(current) if record.exists && current == record.version => Ok(true),
        Some(current) => Err(StoreError::Conflict(format!(
            "{} is at version {}, caller observed {}",
            key, current, record.version
        ))),
    }
}
