//! Strategies for when a signed record is submitted for anchoring relative
//! to the call that produced it (C7).

use crate::error::{Error, Result};
use crate::types::{AnchorState, AnchorStatus, SignedRecord};
use async_trait::async_trait;
use ethereum_types::H256;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::clock::now_millis;

/// Outcome of a single attempt to anchor a record on-chain.
#[derive(Debug, Clone)]
pub struct AnchorResult {
    pub success: bool,
    pub tx_id: Option<String>,
    pub block_number: Option<u64>,
    pub error: Option<String>,
}

/// Submits a record for anchoring, returning how the attempt went. Modeled
/// as a boxed-future-returning function (the teacher's own `Transport::Out`
/// shape — see `lib.rs::Transport` — applied to an async collaborator
/// rather than a trait).
pub type AnchorFn = Arc<dyn Fn(SignedRecord) -> BoxFuture<'static, AnchorResult> + Send + Sync>;
pub(crate) type UpdateStatusFn = Arc<dyn Fn(H256, AnchorStatus) -> BoxFuture<'static, Result<()>> + Send + Sync>;
pub(crate) type GetRecordFn = Arc<dyn Fn(H256) -> BoxFuture<'static, Result<Option<SignedRecord>>> + Send + Sync>;

/// Retry/backoff constants shared by every strategy (spec §4.7).
pub struct RetryPolicy;

impl RetryPolicy {
    pub const BASE_DELAY_MS: u64 = 1000;
    pub const MULTIPLIER: u64 = 2;
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    pub fn delay_for(retry_count: u32) -> Duration {
        Duration::from_millis(Self::BASE_DELAY_MS * Self::MULTIPLIER.pow(retry_count))
    }
}

fn status_from_result(result: AnchorResult, retry_count: u32) -> AnchorStatus {
    if result.success {
        AnchorStatus {
            state: AnchorState::Confirmed,
            retry_count,
            tx_id: result.tx_id,
            block_number: result.block_number,
            confirmed_at: Some(now_millis()),
            last_error: None,
        }
    } else {
        AnchorStatus {
            state: AnchorState::Failed,
            retry_count: retry_count + 1,
            tx_id: result.tx_id,
            block_number: None,
            confirmed_at: None,
            last_error: result.error,
        }
    }
}

/// Shared collaborator handles every strategy needs: submit a record for
/// anchoring, read a record back, and persist a status change.
#[derive(Clone)]
struct AnchorIo {
    anchor_fn: AnchorFn,
    get_record: GetRecordFn,
    update_status: UpdateStatusFn,
    max_retries: u32,
}

impl AnchorIo {
    /// Submit `record` for anchoring and persist the outcome. Returns
    /// `Error::AnchorFailure` when `anchor_fn` reports failure — the
    /// status is still written as `failed` before the error is returned.
    async fn submit(&self, record: SignedRecord) -> Result<()> {
        let hash = record.hash;
        let retry_count = record.anchor_status.retry_count;
        (self.update_status)(
            hash,
            AnchorStatus { state: AnchorState::Submitted, ..record.anchor_status.clone() },
        )
        .await?;
        let outcome = (self.anchor_fn)(record).await;
        let success = outcome.success;
        let failure_message = outcome.error.clone().unwrap_or_else(|| "anchor attempt failed".into());
        let status = status_from_result(outcome, retry_count);
        let new_retry_count = status.retry_count;
        (self.update_status)(hash, status).await?;
        if !success {
            return Err(Error::AnchorFailure { message: failure_message, retry_count: new_retry_count });
        }
        Ok(())
    }

    /// Retry an anchor attempt for `hash`. Rejects a record currently
    /// `submitted` (Open Question resolved in `DESIGN.md`: reject rather
    /// than race a second attempt) and a record that has exhausted
    /// `max_retries`.
    async fn retry(&self, hash: H256) -> Result<()> {
        let record = (self.get_record)(hash).await?.ok_or(Error::NotFound(hash))?;
        match record.anchor_status.state {
            AnchorState::Submitted => {
                return Err(Error::InvalidState { from: AnchorState::Submitted, to: AnchorState::Submitted });
            }
            AnchorState::Pending | AnchorState::Failed => {}
            other => return Err(Error::InvalidState { from: other, to: AnchorState::Submitted }),
        }
        if record.anchor_status.retry_count >= self.max_retries {
            return Err(Error::AnchorFailure {
                message: "max retries exceeded".into(),
                retry_count: record.anchor_status.retry_count,
            });
        }
        self.submit(record).await
    }
}

/// Per-completion behavior: when and how a freshly signed record gets
/// submitted for anchoring.
#[async_trait]
pub trait ConsistencyStrategy: Send + Sync {
    /// Called once per completed intercepted call, after the record has
    /// been signed and persisted with status `pending`.
    async fn on_action_complete(&self, record: SignedRecord) -> Result<()>;

    /// Manually retry anchoring a specific record.
    async fn retry_anchor(&self, hash: H256) -> Result<()>;

    /// Release any background resources (timers, spawned tasks).
    async fn stop(&self);

    /// Downcast support for strategy-specific operations (e.g.
    /// `CacheStrategy::flush_now`), since callers hold a `dyn ConsistencyStrategy`.
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Anchor inline: the call that produced the record does not complete
/// until the anchor attempt has resolved. Strongest consistency, highest
/// latency.
pub struct SyncStrategy {
    io: AnchorIo,
}

impl SyncStrategy {
    pub fn new(anchor_fn: AnchorFn, get_record: GetRecordFn, update_status: UpdateStatusFn, max_retries: u32) -> Self {
        Self { io: AnchorIo { anchor_fn, get_record, update_status, max_retries } }
    }
}

#[async_trait]
impl ConsistencyStrategy for SyncStrategy {
    async fn on_action_complete(&self, record: SignedRecord) -> Result<()> {
        self.io.submit(record).await
    }

    async fn retry_anchor(&self, hash: H256) -> Result<()> {
        self.io.retry(hash).await
    }

    async fn stop(&self) {}

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Submit `record` on a spawned task, retrying with backoff on
/// `AnchorFailure` up to `io.max_retries`. Shared by `AsyncStrategy` and
/// `TwoPhaseStrategy`, whose phase 2 is spec-identical to Async.
fn spawn_anchor_retry_loop(io: AnchorIo, record: SignedRecord) {
    let hash = record.hash;
    tokio::spawn(async move {
        let mut attempt = record;
        loop {
            match io.submit(attempt.clone()).await {
                Ok(()) => return,
                Err(Error::AnchorFailure { .. }) => {}
                Err(e) => {
                    log::error!("background anchor submission failed for {hash:#x}: {e}");
                    return;
                }
            }
            match (io.get_record)(hash).await {
                Ok(Some(r)) if r.anchor_status.state == AnchorState::Failed => {
                    if r.anchor_status.retry_count >= io.max_retries {
                        return;
                    }
                    tokio::time::sleep(RetryPolicy::delay_for(r.anchor_status.retry_count)).await;
                    attempt = r;
                }
                _ => return,
            }
        }
    });
}

/// Anchor in the background: the call returns as soon as the record is
/// persisted; the anchor attempt, and any automatic backoff retries up to
/// `max_retries`, run on a spawned task.
pub struct AsyncStrategy {
    io: AnchorIo,
}

impl AsyncStrategy {
    pub fn new(anchor_fn: AnchorFn, get_record: GetRecordFn, update_status: UpdateStatusFn, max_retries: u32) -> Self {
        Self { io: AnchorIo { anchor_fn, get_record, update_status, max_retries } }
    }
}

#[async_trait]
impl ConsistencyStrategy for AsyncStrategy {
    async fn on_action_complete(&self, record: SignedRecord) -> Result<()> {
        spawn_anchor_retry_loop(self.io.clone(), record);
        Ok(())
    }

    async fn retry_anchor(&self, hash: H256) -> Result<()> {
        self.io.retry(hash).await
    }

    async fn stop(&self) {}

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

const MIN_CACHE_FLUSH_MS: u64 = 1_000;

/// Buffer completed records and anchor them in periodic batches, trading
/// anchoring latency for throughput.
pub struct CacheStrategy {
    io: AnchorIo,
    buffer: Arc<Mutex<Vec<SignedRecord>>>,
    flushing: Arc<AtomicBool>,
    flush_handle: Mutex<Option<JoinHandle<()>>>,
}

impl CacheStrategy {
    pub fn new(
        anchor_fn: AnchorFn,
        get_record: GetRecordFn,
        update_status: UpdateStatusFn,
        max_retries: u32,
        flush_interval_ms: u64,
    ) -> Self {
        let io = AnchorIo { anchor_fn, get_record, update_status, max_retries };
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let flushing = Arc::new(AtomicBool::new(false));
        let interval = Duration::from_millis(flush_interval_ms.max(MIN_CACHE_FLUSH_MS));

        let task_io = io.clone();
        let task_buffer = buffer.clone();
        let task_flushing = flushing.clone();
        let flush_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                Self::flush_once(&task_io, &task_buffer, &task_flushing).await;
            }
        });

        Self { io, buffer, flushing, flush_handle: Mutex::new(Some(flush_handle)) }
    }

    async fn flush_once(io: &AnchorIo, buffer: &Mutex<Vec<SignedRecord>>, flushing: &AtomicBool) {
        if flushing.swap(true, Ordering::SeqCst) {
            return;
        }
        let batch: Vec<SignedRecord> = std::mem::take(&mut *buffer.lock());
        for record in batch {
            if let Err(e) = io.submit(record).await {
                log::error!("cache strategy flush failed: {e}");
            }
        }
        flushing.store(false, Ordering::SeqCst);
    }

    /// Drain and anchor the buffer immediately, outside the periodic timer.
    pub async fn flush_now(&self) {
        Self::flush_once(&self.io, &self.buffer, &self.flushing).await;
    }
}

#[async_trait]
impl ConsistencyStrategy for CacheStrategy {
    async fn on_action_complete(&self, record: SignedRecord) -> Result<()> {
        self.buffer.lock().push(record);
        Ok(())
    }

    async fn retry_anchor(&self, hash: H256) -> Result<()> {
        self.io.retry(hash).await
    }

    async fn stop(&self) {
        if let Some(h) = self.flush_handle.lock().take() {
            h.abort();
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Phase 1 (persisting the signed record as `pending`) is already done by
/// the time `on_action_complete` runs; phase 2 is spec-identical to
/// `AsyncStrategy` — a background task anchors and retries automatically.
pub struct TwoPhaseStrategy {
    io: AnchorIo,
}

impl TwoPhaseStrategy {
    pub fn new(anchor_fn: AnchorFn, get_record: GetRecordFn, update_status: UpdateStatusFn, max_retries: u32) -> Self {
        Self { io: AnchorIo { anchor_fn, get_record, update_status, max_retries } }
    }
}

#[async_trait]
impl ConsistencyStrategy for TwoPhaseStrategy {
    async fn on_action_complete(&self, record: SignedRecord) -> Result<()> {
        spawn_anchor_retry_loop(self.io.clone(), record);
        Ok(())
    }

    async fn retry_anchor(&self, hash: H256) -> Result<()> {
        self.io.retry(hash).await
    }

    async fn stop(&self) {}

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::keccak256;
    use crate::types::Signature;
    use crate::store::memory::MemoryStore;
    use crate::store::RecordStore;
    use crate::types::{Outcome, TraceEntry};
    use crate::value::Value;
    use ethereum_types::Address;
    use std::sync::atomic::AtomicU32;

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

    fn io_over(store: Arc<MemoryStore>, anchor_fn: AnchorFn, max_retries: u32) -> AnchorIo {
        let get_store = store.clone();
        let get_record: GetRecordFn = Arc::new(move |hash| {
            let store = get_store.clone();
            Box::pin(async move { store.get(hash).await })
        });
        let update_store = store;
        let update_status: UpdateStatusFn = Arc::new(move |hash, status| {
            let store = update_store.clone();
            Box::pin(async move { store.update_status(hash, status).await })
        });
        AnchorIo { anchor_fn, get_record, update_status, max_retries }
    }

    #[tokio::test]
    async fn sync_strategy_anchors_before_returning() {
        let store = Arc::new(MemoryStore::new(10));
        let r = record(1);
        store.append(r.clone()).await.unwrap();
        let anchor_fn: AnchorFn =
            Arc::new(|_r| Box::pin(async { AnchorResult { success: true, tx_id: Some("0xabc".into()), block_number: Some(1), error: None } }));
        let io = io_over(store.clone(), anchor_fn, 3);
        let strategy = SyncStrategy { io };
        strategy.on_action_complete(r.clone()).await.unwrap();
        let updated = store.get(r.hash).await.unwrap().unwrap();
        assert_eq!(updated.anchor_status.state, AnchorState::Confirmed);
    }

    #[tokio::test]
    async fn retry_anchor_rejects_while_submitted() {
        let store = Arc::new(MemoryStore::new(10));
        let mut r = record(1);
        r.anchor_status.state = AnchorState::Submitted;
        store.append(r.clone()).await.unwrap();
        let anchor_fn: AnchorFn = Arc::new(|_r| Box::pin(async { AnchorResult { success: true, tx_id: None, block_number: None, error: None } }));
        let io = io_over(store, anchor_fn, 3);
        let strategy = SyncStrategy { io };
        let err = strategy.retry_anchor(r.hash).await;
        assert!(matches!(err, Err(Error::InvalidState { from: AnchorState::Submitted, .. })));
    }

    #[tokio::test]
    async fn retry_anchor_rejects_past_max_retries() {
        let store = Arc::new(MemoryStore::new(10));
        let mut r = record(1);
        r.anchor_status.state = AnchorState::Failed;
        r.anchor_status.retry_count = 3;
        store.append(r.clone()).await.unwrap();
        let anchor_fn: AnchorFn = Arc::new(|_r| Box::pin(async { AnchorResult { success: true, tx_id: None, block_number: None, error: None } }));
        let io = io_over(store, anchor_fn, 3);
        let strategy = SyncStrategy { io };
        let err = strategy.retry_anchor(r.hash).await;
        assert!(matches!(err, Err(Error::AnchorFailure { retry_count: 3, .. })));
    }

    #[tokio::test]
    async fn cache_strategy_buffers_until_flush_now() {
        let store = Arc::new(MemoryStore::new(10));
        let r = record(1);
        store.append(r.clone()).await.unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let anchor_fn: AnchorFn = Arc::new(move |_r| {
            calls2.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { AnchorResult { success: true, tx_id: None, block_number: None, error: None } })
        });
        let io = io_over(store.clone(), anchor_fn, 3);
        let strategy = CacheStrategy {
            io,
            buffer: Arc::new(Mutex::new(Vec::new())),
            flushing: Arc::new(AtomicBool::new(false)),
            flush_handle: Mutex::new(None),
        };
        strategy.on_action_complete(r.clone()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        strategy.flush_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let updated = store.get(r.hash).await.unwrap().unwrap();
        assert_eq!(updated.anchor_status.state, AnchorState::Confirmed);
    }

    #[tokio::test]
    async fn two_phase_strategy_anchors_automatically_in_background() {
        let store = Arc::new(MemoryStore::new(10));
        let r = record(1);
        store.append(r.clone()).await.unwrap();
        let anchor_fn: AnchorFn = Arc::new(|_r| Box::pin(async { AnchorResult { success: true, tx_id: None, block_number: None, error: None } }));
        let io = io_over(store.clone(), anchor_fn, 3);
        let strategy = TwoPhaseStrategy { io };
        strategy.on_action_complete(r.clone()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let confirmed = store.get(r.hash).await.unwrap().unwrap();
        assert_eq!(confirmed.anchor_status.state, AnchorState::Confirmed);
    }

    #[tokio::test]
    async fn sync_strategy_surfaces_anchor_failure() {
        let store = Arc::new(MemoryStore::new(10));
        let r = record(1);
        store.append(r.clone()).await.unwrap();
        let anchor_fn: AnchorFn = Arc::new(|_r| {
            Box::pin(async {
                AnchorResult { success: false, tx_id: None, block_number: None, error: Some("rpc timeout".into()) }
            })
        });
        let io = io_over(store.clone(), anchor_fn, 3);
        let strategy = SyncStrategy { io };

        let err = strategy.on_action_complete(r.clone()).await;
        assert!(matches!(err, Err(Error::AnchorFailure { retry_count: 1, .. })));
        if let Err(e) = &err {
            assert!(e.to_string().contains("rpc timeout"));
            assert!(e.to_string().contains('1'));
        }

        let updated = store.get(r.hash).await.unwrap().unwrap();
        assert_eq!(updated.anchor_status.state, AnchorState::Failed);
    }
}
