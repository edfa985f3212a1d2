//! Volatile in-memory record store backend.

use super::{check_capacity, stats_from, RecordStore, StoreStats};
use crate::error::{Error, Result};
use crate::types::{AnchorState, AnchorStatus, SignedRecord};
use async_trait::async_trait;
use ethereum_types::H256;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Volatile store; lifecycle operations are no-ops (spec §4.4).
pub struct MemoryStore {
    limit: usize,
    records: RwLock<Vec<SignedRecord>>,
    index: RwLock<HashMap<H256, usize>>,
}

impl MemoryStore {
    pub fn new(limit: usize) -> Self {
        Self { limit, records: RwLock::new(Vec::new()), index: RwLock::new(HashMap::new()) }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn append(&self, record: SignedRecord) -> Result<()> {
        let mut records = self.records.write();
        check_capacity(records.len(), self.limit)?;
        if self.index.read().contains_key(&record.hash) {
            return Err(Error::DuplicateHash(record.hash));
        }
        self.index.write().insert(record.hash, records.len());
        records.push(record);
        Ok(())
    }

    async fn get(&self, hash: H256) -> Result<Option<SignedRecord>> {
        let index = self.index.read();
        Ok(index.get(&hash).map(|&i| self.records.read()[i].clone()))
    }

    async fn get_all(&self) -> Result<Vec<SignedRecord>> {
        Ok(self.records.read().clone())
    }

    async fn get_by_status(&self, state: AnchorState) -> Result<Vec<SignedRecord>> {
        Ok(self.records.read().iter().filter(|r| r.anchor_status.state == state).cloned().collect())
    }

    async fn update_status(&self, hash: H256, status: AnchorStatus) -> Result<()> {
        let index = self.index.read();
        let &i = index.get(&hash).ok_or(Error::NotFound(hash))?;
        self.records.write()[i].anchor_status = status;
        Ok(())
    }

    async fn get_stats(&self) -> Result<StoreStats> {
        Ok(stats_from(&self.records.read(), self.limit))
    }

    async fn clear(&self) -> Result<()> {
        self.records.write().clear();
        self.index.write().clear();
        Ok(())
    }

    fn limit(&self) -> usize {
        self.limit
    }
}
