//! File-backed metadata store
//!
//! Each record lives in its own JSON file at `<root>/<prefix>/<name>/<namespace>.json`
//! together with its version. Writes go to a temporary file in the same
//! directory which is then renamed over the target, so readers only ever see a
//! complete record.
//!
//! Writers hold a lock on the pod name, not on the full key: every namespace
//! of a name shares one directory, and a delete removes that directory once
//! it is empty.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::locks::KeyedLocks;

use super::{
    check_delete, check_put, MetadataStore, PodNetworkRecord, StoreError, StoreKey, RECORD_PREFIX,
};

const RECORD_EXTENSION: &str = "json";

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u64,
    record: PodNetworkRecord,
}

pub struct FileStore {
    root: PathBuf,
    /// One lock per `<prefix>/<name>` directory
    dir_locks: KeyedLocks<String>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(root.join(RECORD_PREFIX))?;
        debug!("Opened metadata store at {}", root.display());
        Ok(Self {
            root,
            dir_locks: KeyedLocks::new(),
        })
    }

    fn record_path(&self, key: &StoreKey) -> Result<PathBuf, StoreError> {
        for segment in key.segments() {
            validate_segment(segment).map_err(|reason| {
                StoreError::InvalidKey(format!("{}: {}", key, reason))
            })?;
        }
        Ok(self
            .root
            .join(&key.prefix)
            .join(&key.name)
            .join(format!("{}.{}", key.namespace, RECORD_EXTENSION)))
    }
}

fn validate_segment(segment: &str) -> Result<(), &'static str> {
    if segment.is_empty() {
        return Err("empty segment");
    }
    if segment == "." || segment == ".." || segment.starts_with('.') {
        return Err("segment may not start with '.'");
    }
    if segment.contains('/') || segment.contains('\\') || segment.contains('\0') {
        return Err("segment contains a path separator");
    }
    Ok(())
}

async fn blocking<T, F>(f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}

fn read_envelope(path: &Path) -> Result<Option<Envelope>, StoreError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_envelope(path: &Path, envelope: &Envelope) -> Result<(), StoreError> {
    let dir = path
        .parent()
        .ok_or_else(|| StoreError::InvalidKey(path.display().to_string()))?;
    fs::create_dir_all(dir)?;

    let content = serde_json::to_vec_pretty(envelope)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

/// Make a preceding rename durable
fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    fs::File::open(dir)?.sync_all()
}

fn into_record(envelope: Envelope) -> PodNetworkRecord {
    let mut record = envelope.record;
    record.mark_stored(envelope.version);
    record
}

#[async_trait]
impl MetadataStore for FileStore {
    async fn get(&self, key: &StoreKey) -> Result<PodNetworkRecord, StoreError> {
        let path = self.record_path(key)?;
        let missing = key.to_string();
        blocking(move || {
            read_envelope(&path)?
                .map(into_record)
                .ok_or(StoreError::NotFound(missing))
        })
        .await
    }

    async fn put_atomic(&self, record: &mut PodNetworkRecord) -> Result<(), StoreError> {
        let key = record.key();
        let path = self.record_path(&key)?;
        let _guard = self.dir_locks.acquire(&key.name).await;

        let snapshot = record.clone();
        let next = blocking(move || {
            let stored = read_envelope(&path)?.map(|e| e.version);
            let next = check_put(&key, stored, &snapshot)?;
            write_envelope(
                &path,
                &Envelope {
                    version: next,
                    record: snapshot,
                },
            )?;
            Ok(next)
        })
        .await?;

        record.mark_stored(next);
        Ok(())
    }

    async fn delete_atomic(&self, record: &PodNetworkRecord) -> Result<(), StoreError> {
        let key = record.key();
        let path = self.record_path(&key)?;
        let _guard = self.dir_locks.acquire(&key.name).await;

        let snapshot = record.clone();
        blocking(move || {
            let stored = read_envelope(&path)?.map(|e| e.version);
            if !check_delete(&key, stored, &snapshot)? {
                return Ok(());
            }
            fs::remove_file(&path)?;
            if let Some(dir) = path.parent() {
                fsync_dir(dir)?;
                // Fails while another namespace still has a record under this name
                if fs::remove_dir(dir).is_ok() {
                    debug!("Removed empty record directory {}", dir.display());
                }
            }
            Ok(())
        })
        .await
    }

    async fn list(&self) -> Result<Vec<PodNetworkRecord>, StoreError> {
        let base = self.root.join(RECORD_PREFIX);
        blocking(move || {
            let mut records = Vec::new();
            for name_dir in fs::read_dir(&base)? {
                let name_dir = name_dir?;
                if !name_dir.file_type()?.is_dir() {
                    continue;
                }
                // A concurrent delete may have just removed the directory
                let entries = match fs::read_dir(name_dir.path()) {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                };
                for entry in entries {
                    let path = entry?.path();
                    if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                        continue;
                    }
                    match read_envelope(&path) {
                        Ok(Some(envelope)) => records.push(into_record(envelope)),
                        Ok(None) => {}
                        Err(e) => warn!("Skipping unreadable record {}: {}", path.display(), e),
                    }
                }
            }
            records.sort_by(|a, b| a.identity().cmp(&b.identity()));
            Ok(records)
        })
        .await
    }
}
