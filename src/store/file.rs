//! Single-file JSON filesystem record store backend (spec §4.4, §6).
//!
//! Write-through in-memory map; a flush to disk is scheduled 1 second after
//! the most recent write (debounced), `close()` flushes synchronously, reads
//! always serve from memory.

use super::{check_capacity, stats_from, RecordStore, StoreStats};
use crate::error::{Error, Result};
use crate::types::{AnchorState, AnchorStatus, SignedRecord};
use async_trait::async_trait;
use ethereum_types::H256;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const FLUSH_DEBOUNCE: Duration = Duration::from_secs(1);

struct Inner {
    limit: usize,
    path: PathBuf,
    records: RwLock<Vec<SignedRecord>>,
    index: RwLock<HashMap<H256, usize>>,
    dirty: Mutex<bool>,
}

/// Debounced, write-through single-file JSON store.
pub struct FileStore {
    inner: Arc<Inner>,
    flush_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl FileStore {
    /// Open (or create) the backing file at `path`.
    pub fn new(path: PathBuf, limit: usize) -> Self {
        let records = Self::load(&path).unwrap_or_default();
        let mut index = HashMap::new();
        for (i, r) in records.iter().enumerate() {
            index.insert(r.hash, i);
        }
        Self {
            inner: Arc::new(Inner {
                limit,
                path,
                records: RwLock::new(records),
                index: RwLock::new(index),
                dirty: Mutex::new(false),
            }),
            flush_handle: Mutex::new(None),
        }
    }

    fn load(path: &PathBuf) -> Option<Vec<SignedRecord>> {
        let bytes = std::fs::read(path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    fn flush_sync(inner: &Inner) -> Result<()> {
        let records = inner.records.read();
        let bytes = serde_json::to_vec_pretty(&*records)?;
        std::fs::write(&inner.path, bytes)?;
        *inner.dirty.lock() = false;
        Ok(())
    }

    /// Schedule a debounced flush 1s after the most recent write, replacing
    /// any previously pending flush (spec §4.4).
    fn schedule_flush(&self) {
        *self.inner.dirty.lock() = true;
        let inner = self.inner.clone();
        let mut handle = self.flush_handle.lock();
        if let Some(h) = handle.take() {
            h.abort();
        }
        *handle = Some(tokio::spawn(async move {
            tokio::time::sleep(FLUSH_DEBOUNCE).await;
            if let Err(e) = Self::flush_sync(&inner) {
                log::error!("failed to flush record store to {:?}: {}", inner.path, e);
            }
        }));
    }
}

#[async_trait]
impl RecordStore for FileStore {
    async fn append(&self, record: SignedRecord) -> Result<()> {
        {
            let mut records = self.inner.records.write();
            check_capacity(records.len(), self.inner.limit)?;
            if self.inner.index.read().contains_key(&record.hash) {
                return Err(Error::DuplicateHash(record.hash));
            }
            self.inner.index.write().insert(record.hash, records.len());
            records.push(record);
        }
        self.schedule_flush();
        Ok(())
    }

    async fn get(&self, hash: H256) -> Result<Option<SignedRecord>> {
        let index = self.inner.index.read();
        Ok(index.get(&hash).map(|&i| self.inner.records.read()[i].clone()))
    }

    async fn get_all(&self) -> Result<Vec<SignedRecord>> {
        Ok(self.inner.records.read().clone())
    }

    async fn get_by_status(&self, state: AnchorState) -> Result<Vec<SignedRecord>> {
        Ok(self.inner.records.read().iter().filter(|r| r.anchor_status.state == state).cloned().collect())
    }

    async fn update_status(&self, hash: H256, status: AnchorStatus) -> Result<()> {
        {
            let index = self.inner.index.read();
            let &i = index.get(&hash).ok_or(Error::NotFound(hash))?;
            self.inner.records.write()[i].anchor_status = status;
        }
        self.schedule_flush();
        Ok(())
    }

    async fn get_stats(&self) -> Result<StoreStats> {
        Ok(stats_from(&self.inner.records.read(), self.inner.limit))
    }

    async fn clear(&self) -> Result<()> {
        self.inner.records.write().clear();
        self.inner.index.write().clear();
        self.schedule_flush();
        self.close().await
    }

    fn limit(&self) -> usize {
        self.inner.limit
    }

    async fn close(&self) -> Result<()> {
        if let Some(h) = self.flush_handle.lock().take() {
            h.abort();
        }
        if *self.inner.dirty.lock() {
            Self::flush_sync(&self.inner)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::keccak256;
    use crate::types::Signature;
    use crate::types::{Outcome, TraceEntry};
    use crate::value::Value;
    use ethereum_types::Address;

    fn record(seed: u8) -> SignedRecord {
        let entry = TraceEntry::new("m", vec![Value::String("x".into())], Outcome::Result(Value::Null), 0, 0, None);
        SignedRecord {
            entry,
            hash: H256::from(keccak256(&[seed])),
            previous_hash: H256::zero(),
            signature: Signature { v: 27, r: H256::zero(), s: H256::zero() },
            signer_address: Address::zero(),
            created_at: seed as i64,
            anchor_status: AnchorStatus::pending(),
        }
    }

    #[tokio::test]
    async fn close_flushes_synchronously_without_waiting_for_debounce() {
        let dir = std::env::temp_dir().join(format!("call-anchor-test-{}", uuid::Uuid::new_v4()));
        let store = FileStore::new(dir.clone(), 10);
        store.append(record(1)).await.unwrap();
        store.close().await.unwrap();
        let on_disk: Vec<SignedRecord> = serde_json::from_slice(&std::fs::read(&dir).unwrap()).unwrap();
        assert_eq!(on_disk.len(), 1);
        let _ = std::fs::remove_file(&dir);
    }

    #[tokio::test]
    async fn reads_serve_from_memory_before_flush() {
        let dir = std::env::temp_dir().join(format!("call-anchor-test-{}", uuid::Uuid::new_v4()));
        let store = FileStore::new(dir.clone(), 10);
        let r = record(1);
        store.append(r.clone()).await.unwrap();
        assert_eq!(store.get(r.hash).await.unwrap(), Some(r));
        store.close().await.unwrap();
        let _ = std::fs::remove_file(&dir);
    }
}
