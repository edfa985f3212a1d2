//! Thin facade over a `RecordStore` adding callbacks, capacity-warning
//! hysteresis, and derived aggregates (C5).

use crate::error::Result;
use crate::store::{RecordStore, StoreStats};
use crate::types::{AnchorState, AnchorStatus, SignedRecord};
use ethereum_types::H256;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Named lifecycle handlers. Every field is optional; a handler that
/// panics or is simply absent never affects the surrounding operation
/// (spec §4.5, §7 `CallbackError`).
///
/// Modeled as a set of narrow function values rather than an interface
/// hierarchy, per Design Note §9.
#[derive(Default, Clone)]
pub struct CallbackConfig {
    pub on_record_signed: Option<Arc<dyn Fn(&SignedRecord) + Send + Sync>>,
    pub on_anchor_pending: Option<Arc<dyn Fn(&SignedRecord) + Send + Sync>>,
    pub on_anchor_confirmed: Option<Arc<dyn Fn(&SignedRecord) + Send + Sync>>,
    pub on_anchor_failed: Option<Arc<dyn Fn(&SignedRecord) + Send + Sync>>,
    pub on_storage_warning: Option<Arc<dyn Fn(f64) + Send + Sync>>,
}

fn fire(name: &str, f: &Option<Arc<dyn Fn(&SignedRecord) + Send + Sync>>, record: &SignedRecord) {
    if let Some(f) = f {
        let f = AssertUnwindSafe(f);
        if catch_unwind(|| (f.0)(record)).is_err() {
            log::warn!("callback {name} panicked; swallowed");
        }
    }
}

/// Store facade: lifecycle callbacks, capacity warning, status queries,
/// aggregation.
pub struct CacheManager {
    store: Box<dyn RecordStore>,
    callbacks: CallbackConfig,
    warning_threshold: f64,
    warning_fired: Mutex<bool>,
}

impl CacheManager {
    pub fn new(store: Box<dyn RecordStore>, callbacks: CallbackConfig, warning_threshold: f64) -> Self {
        Self { store, callbacks, warning_threshold, warning_fired: Mutex::new(false) }
    }

    /// Persist a freshly signed record, firing `onRecordSigned` and
    /// `onAnchorPending`, then checking the capacity-warning hysteresis.
    pub async fn persist(&self, record: SignedRecord) -> Result<SignedRecord> {
        self.store.append(record.clone()).await?;
        fire("onRecordSigned", &self.callbacks.on_record_signed, &record);
        fire("onAnchorPending", &self.callbacks.on_anchor_pending, &record);
        self.check_storage_warning().await?;
        Ok(record)
    }

    /// Replace a record's status, firing `onAnchorConfirmed`/`onAnchorFailed`
    /// as appropriate. Rejects any transition outside the graph in
    /// `AnchorState::validate_transition` (spec §4.7).
    pub async fn update_status(&self, hash: H256, status: AnchorStatus) -> Result<()> {
        let current = self.store.get(hash).await?.ok_or(crate::error::Error::NotFound(hash))?;
        if !AnchorState::validate_transition(current.anchor_status.state, status.state) {
            return Err(crate::error::Error::InvalidState { from: current.anchor_status.state, to: status.state });
        }
        let confirmed = status.state == AnchorState::Confirmed;
        let failed = status.state == AnchorState::Failed;
        self.store.update_status(hash, status).await?;
        if confirmed || failed {
            if let Some(record) = self.store.get(hash).await? {
                if confirmed {
                    fire("onAnchorConfirmed", &self.callbacks.on_anchor_confirmed, &record);
                } else {
                    fire("onAnchorFailed", &self.callbacks.on_anchor_failed, &record);
                }
            }
        }
        Ok(())
    }

    /// Union of `pending`/`submitted`/`failed` records.
    pub async fn get_pending(&self) -> Result<Vec<SignedRecord>> {
        let mut out = Vec::new();
        for state in [AnchorState::Pending, AnchorState::Submitted, AnchorState::Failed] {
            out.extend(self.store.get_by_status(state).await?);
        }
        out.sort_by_key(|r| r.created_at);
        Ok(out)
    }

    /// Count of records in each `AnchorState`.
    pub async fn get_status_counts(&self) -> Result<HashMap<AnchorState, usize>> {
        let mut counts = HashMap::new();
        for record in self.store.get_all().await? {
            *counts.entry(record.anchor_status.state).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Transition a record to `local-only`, preserving its prior retry count
    /// (spec §4.5, S6).
    pub async fn mark_locally_verified(&self, hash: H256) -> Result<()> {
        let record = self.store.get(hash).await?.ok_or(crate::error::Error::NotFound(hash))?;
        let status = AnchorStatus { state: AnchorState::LocalOnly, ..record.anchor_status };
        self.update_status(hash, status).await
    }

    pub async fn get(&self, hash: H256) -> Result<Option<SignedRecord>> {
        self.store.get(hash).await
    }

    pub async fn get_stats(&self) -> Result<StoreStats> {
        self.store.get_stats().await
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await?;
        *self.warning_fired.lock() = false;
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        self.store.close().await
    }

    /// Fire `onStorageWarning` once when `capacityPercent >= threshold * 100`,
    /// not again until `clear` (spec §4.5, P6).
    async fn check_storage_warning(&self) -> Result<()> {
        let stats = self.store.get_stats().await?;
        let percent = stats.capacity_percent();
        let mut fired = self.warning_fired.lock();
        if percent >= self.warning_threshold * 100.0 && !*fired {
            *fired = true;
            if let Some(f) = &self.callbacks.on_storage_warning {
                let f = AssertUnwindSafe(f);
                if catch_unwind(|| (f.0)(percent)).is_err() {
                    log::warn!("callback onStorageWarning panicked; swallowed");
                }
            }
        }
        Ok(())
    }
}
