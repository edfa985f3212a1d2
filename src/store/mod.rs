//! Durable mapping from record hash to signed record with status (C4).

#[cfg(feature = "async-runtime")]
pub mod file;
pub mod memory;
#[cfg(target_arch = "wasm32")]
pub mod wasm;

use crate::error::{Error, Result};
use crate::types::{AnchorState, AnchorStatus, SignedRecord};
use async_trait::async_trait;
use ethereum_types::H256;

/// Aggregate counters over a store's current contents (spec §4.4 `getStats`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub total_records: usize,
    pub unconfirmed: usize,
    pub confirmed: usize,
    pub estimated_bytes: usize,
    pub limit: usize,
}

impl StoreStats {
    /// `totalRecords / limit * 100`, computed exactly per property P5.
    pub fn capacity_percent(&self) -> f64 {
        if self.limit == 0 {
            return 0.0;
        }
        (self.total_records as f64 / self.limit as f64) * 100.0
    }
}

/// Uniform key-value store keyed by `hash`, ordered by `createdAt` (spec §4.4).
///
/// All three backends (in-memory, filesystem, browser-durable) implement
/// this trait identically from the caller's point of view.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Append a record. Fails with `CapacityExceeded` if the backend already
    /// holds `limit` records, or `DuplicateHash` if the hash is already
    /// present (I7). A missing `anchor_status` is not possible here since
    /// `SignedRecord` always carries one; the backend persists it as-is.
    async fn append(&self, record: SignedRecord) -> Result<()>;

    /// Look up a record by hash.
    async fn get(&self, hash: H256) -> Result<Option<SignedRecord>>;

    /// All records in ascending `createdAt` order.
    async fn get_all(&self) -> Result<Vec<SignedRecord>>;

    /// Records whose current state equals `state`, in ascending `createdAt` order.
    async fn get_by_status(&self, state: AnchorState) -> Result<Vec<SignedRecord>>;

    /// Replace a record's `anchor_status` wholesale. Fails with `NotFound`
    /// if the hash is absent. Persists before returning.
    async fn update_status(&self, hash: H256, status: AnchorStatus) -> Result<()>;

    /// Aggregate counters, see `StoreStats`.
    async fn get_stats(&self) -> Result<StoreStats>;

    /// Remove all records. Destructive, administrative (spec §3 lifecycles).
    async fn clear(&self) -> Result<()>;

    /// The configured capacity limit.
    fn limit(&self) -> usize;

    /// Release any resources (flush pending writes). A no-op for backends
    /// that have nothing buffered.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

pub(crate) fn check_capacity(current: usize, limit: usize) -> Result<()> {
    if current >= limit {
        return Err(Error::CapacityExceeded { limit });
    }
    Ok(())
}

pub(crate) fn estimate_size(records: &[SignedRecord]) -> usize {
    records
        .iter()
        .map(|r| serde_json::to_vec(r).map(|v| v.len()).unwrap_or(0))
        .sum()
}

pub(crate) fn stats_from(records: &[SignedRecord], limit: usize) -> StoreStats {
    let unconfirmed = records
        .iter()
        .filter(|r| {
            matches!(
                r.anchor_status.state,
                AnchorState::Pending | AnchorState::Submitted | AnchorState::Failed
            )
        })
        .count();
    let confirmed = records
        .iter()
        .filter(|r| matches!(r.anchor_status.state, AnchorState::Confirmed | AnchorState::LocalOnly))
        .count();
    StoreStats {
        total_records: records.len(),
        unconfirmed,
        confirmed,
        estimated_bytes: estimate_size(records),
        limit,
    }
}

/// Select a backend per spec §4.4's `auto` rule: browser-durable store on
/// `wasm32`, else a filesystem file if `path` is given, else in-memory.
pub fn auto(path: Option<std::path::PathBuf>, limit: usize) -> Box<dyn RecordStore> {
    #[cfg(target_arch = "wasm32")]
    {
        let _ = path;
        Box::new(wasm::WasmStore::new(limit))
    }
    #[cfg(not(target_arch = "wasm32"))]
    {
        #[cfg(feature = "async-runtime")]
        if let Some(path) = path {
            return Box::new(file::FileStore::new(path, limit));
        }
        Box::new(memory::MemoryStore::new(limit))
    }
}
