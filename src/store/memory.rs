use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{check_delete, check_put, MetadataStore, PodNetworkRecord, StoreError, StoreKey};

/// In-memory store with the same optimistic-concurrency semantics as
/// [`super::FileStore`]. Contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<StoreKey, (u64, PodNetworkRecord)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn get(&self, key: &StoreKey) -> Result<PodNetworkRecord, StoreError> {
        let entry = self
            .records
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        let (version, record) = entry.value();
        let mut record = record.clone();
        record.mark_stored(*version);
        Ok(record)
    }

    async fn put_atomic(&self, record: &mut PodNetworkRecord) -> Result<(), StoreError> {
        let key = record.key();
        // The entry guard holds the shard lock for the whole check-and-write
        match self.records.entry(key.clone()) {
            Entry::Vacant(vacant) => {
                let next = check_put(&key, None, record)?;
                vacant.insert((next, record.clone()));
                record.mark_stored(next);
            }
            Entry::Occupied(mut occupied) => {
                let next = check_put(&key, Some(occupied.get().0), record)?;
                occupied.insert((next, record.clone()));
                record.mark_stored(next);
            }
        }
        Ok(())
    }

    async fn delete_atomic(&self, record: &PodNetworkRecord) -> Result<(), StoreError> {
        let key = record.key();
        match self.records.entry(key.clone()) {
            Entry::Vacant(_) => Ok(()),
            Entry::Occupied(occupied) => {
                if check_delete(&key, Some(occupied.get().0), record)? {
                    occupied.remove();
                }
                Ok(())
            }
        }
    }

    async fn list(&self) -> Result<Vec<PodNetworkRecord>, StoreError> {
        Ok(self
            .records
            .iter()
            .map(|r| {
                let (version, record) = r.value();
                let mut record = record.clone();
                record.mark_stored(*version);
                record
            })
            .collect())
    }
}
