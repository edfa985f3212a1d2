//! Browser-durable key-value record store backend (spec §4.4).
//!
//! IndexedDB-backed, keyed on `hash`, with a secondary index on `status`
//! used by `get_by_status`. Built on the same `wasm-bindgen`/`js-sys` stack
//! the teacher already carries (optional `wasm` feature, used there for the
//! EIP-1193 in-browser provider transport) — the
//! `#[wasm_bindgen(inline_js = ...)] extern "C"` shim pattern is reused here
//! for IndexedDB access instead of a `window.ethereum` provider.
//!
//! `JsValue`-bearing futures are not `Send`, but `RecordStore` is (native
//! backends run under a multi-threaded tokio runtime). Each operation below
//! is driven to completion on the local microtask queue via
//! `wasm_bindgen_futures::spawn_local` and its plain-data result handed back
//! across a `futures::channel::oneshot`, the same bridge the teacher uses in
//! `transports/batch.rs` to turn a pending call into an awaitable value.

use super::{RecordStore, StoreStats};
use crate::error::{Error, Result};
use crate::types::{AnchorState, AnchorStatus, SignedRecord};
use async_trait::async_trait;
use ethereum_types::H256;
use futures::channel::oneshot;
use wasm_bindgen::prelude::*;

#[wasm_bindgen(inline_js = "
export function __callAnchorOpenDb() {
    if (window.__callAnchorDbPromise) return window.__callAnchorDbPromise;
    window.__callAnchorDbPromise = new Promise((resolve, reject) => {
        const req = indexedDB.open('call-anchor', 1);
        req.onupgradeneeded = () => {
            const db = req.result;
            if (!db.objectStoreNames.contains('records')) {
                const store = db.createObjectStore('records', { keyPath: 'hash' });
                store.createIndex('status', 'status');
                store.createIndex('createdAt', 'createdAt');
                store.createIndex('parentId', 'parentId');
            }
        };
        req.onsuccess = () => resolve(req.result);
        req.onerror = () => reject(req.error);
    });
    return window.__callAnchorDbPromise;
}
function __callAnchorStore(mode) {
    return __callAnchorOpenDb().then(db => db.transaction('records', mode).objectStore('records'));
}
export function __callAnchorPut(hash, status, createdAt, parentId, json) {
    return __callAnchorStore('readwrite').then(store => new Promise((resolve, reject) => {
        const req = store.put({ hash, status, createdAt, parentId, json });
        req.onsuccess = () => resolve();
        req.onerror = () => reject(req.error);
    }));
}
export function __callAnchorGet(hash) {
    return __callAnchorStore('readonly').then(store => new Promise((resolve, reject) => {
        const req = store.get(hash);
        req.onsuccess = () => resolve(req.result ? req.result.json : null);
        req.onerror = () => reject(req.error);
    }));
}
export function __callAnchorGetAll() {
    return __callAnchorStore('readonly').then(store => new Promise((resolve, reject) => {
        const req = store.getAll();
        req.onsuccess = () => resolve(req.result.map(r => r.json));
        req.onerror = () => reject(req.error);
    }));
}
export function __callAnchorGetByStatus(status) {
    return __callAnchorStore('readonly').then(store => new Promise((resolve, reject) => {
        const req = store.index('status').getAll(status);
        req.onsuccess = () => resolve(req.result.map(r => r.json));
        req.onerror = () => reject(req.error);
    }));
}
export function __callAnchorCount() {
    return __callAnchorStore('readonly').then(store => new Promise((resolve, reject) => {
        const req = store.count();
        req.onsuccess = () => resolve(req.result);
        req.onerror = () => reject(req.error);
    }));
}
export function __callAnchorClear() {
    return __callAnchorStore('readwrite').then(store => new Promise((resolve, reject) => {
        const req = store.clear();
        req.onsuccess = () => resolve();
        req.onerror = () => reject(req.error);
    }));
}
")]
extern "C" {
    #[wasm_bindgen(catch, js_name = __callAnchorPut)]
    async fn idb_put(hash: String, status: String, created_at: f64, parent_id: String, json: String) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch, js_name = __callAnchorGet)]
    async fn idb_get(hash: String) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch, js_name = __callAnchorGetAll)]
    async fn idb_get_all() -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch, js_name = __callAnchorGetByStatus)]
    async fn idb_get_by_status(status: String) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch, js_name = __callAnchorCount)]
    async fn idb_count() -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch, js_name = __callAnchorClear)]
    async fn idb_clear() -> Result<JsValue, JsValue>;
}

fn js_msg(js: JsValue) -> String {
    js.as_string().unwrap_or_else(|| format!("{js:?}"))
}

fn hash_key(hash: H256) -> String {
    format!("{hash:#x}")
}

fn status_key(state: AnchorState) -> String {
    serde_json::to_value(state).ok().and_then(|v| v.as_str().map(str::to_owned)).unwrap_or_default()
}

fn decode(json: String) -> Result<SignedRecord> {
    serde_json::from_str(&json).map_err(|e| Error::Io(e.to_string()))
}

/// Run `make`'s future to completion on the local microtask queue and hand
/// its (plain, `Send`) result back across a channel. `make`'s future itself
/// holds `JsValue`s and is not `Send`; only the bridged result crosses into
/// the `Send`-bound trait method that awaits it.
async fn bridge<T, Fut>(make: impl FnOnce() -> Fut + 'static) -> Result<T>
where
    T: Send + 'static,
    Fut: std::future::Future<Output = T> + 'static,
{
    let (tx, rx) = oneshot::channel();
    wasm_bindgen_futures::spawn_local(async move {
        let _ = tx.send(make().await);
    });
    rx.await.map_err(|_| Error::Io("indexeddb task was dropped before completing".into()))
}

enum AppendOutcome {
    Ok,
    Js(String),
    CapacityExceeded,
    Duplicate,
}

/// IndexedDB-backed `RecordStore`. Only compiled for `target_arch = "wasm32"`;
/// every operation round-trips through the browser's IndexedDB, so no record
/// state survives only in Rust-side memory.
pub struct WasmStore {
    limit: usize,
}

impl WasmStore {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }
}

#[async_trait]
impl RecordStore for WasmStore {
    async fn append(&self, record: SignedRecord) -> Result<()> {
        let limit = self.limit;
        let hkey = hash_key(record.hash);
        let status = status_key(record.anchor_status.state);
        let created_at = record.created_at as f64;
        let parent_id = record.entry.parent_id.map(|id| id.to_string()).unwrap_or_default();
        let json = serde_json::to_string(&record).map_err(|e| Error::Io(e.to_string()))?;

        let outcome = bridge(move || async move {
            let count = match idb_count().await {
                Ok(v) => v.as_f64().unwrap_or(0.0) as usize,
                Err(e) => return AppendOutcome::Js(js_msg(e)),
            };
            if count >= limit {
                return AppendOutcome::CapacityExceeded;
            }
            match idb_get(hkey.clone()).await {
                Ok(existing) if !existing.is_null() && !existing.is_undefined() => return AppendOutcome::Duplicate,
                Err(e) => return AppendOutcome::Js(js_msg(e)),
                _ => {}
            }
            match idb_put(hkey, status, created_at, parent_id, json).await {
                Ok(_) => AppendOutcome::Ok,
                Err(e) => AppendOutcome::Js(js_msg(e)),
            }
        })
        .await?;

        match outcome {
            AppendOutcome::Ok => Ok(()),
            AppendOutcome::CapacityExceeded => Err(Error::CapacityExceeded { limit }),
            AppendOutcome::Duplicate => Err(Error::DuplicateHash(record.hash)),
            AppendOutcome::Js(msg) => Err(Error::Io(msg)),
        }
    }

    async fn get(&self, hash: H256) -> Result<Option<SignedRecord>> {
        let hkey = hash_key(hash);
        let json = bridge(move || async move {
            idb_get(hkey).await.map(|v| v.as_string()).map_err(|e| js_msg(e))
        })
        .await?
        .map_err(Error::Io)?;
        json.map(decode).transpose()
    }

    async fn get_all(&self) -> Result<Vec<SignedRecord>> {
        let jsons = bridge(move || async move {
            idb_get_all().await.map(|v| js_sys::Array::from(&v).iter().filter_map(|e| e.as_string()).collect::<Vec<_>>()).map_err(|e| js_msg(e))
        })
        .await?
        .map_err(Error::Io)?;
        jsons.into_iter().map(decode).collect()
    }

    async fn get_by_status(&self, state: AnchorState) -> Result<Vec<SignedRecord>> {
        let status = status_key(state);
        let jsons = bridge(move || async move {
            idb_get_by_status(status).await.map(|v| js_sys::Array::from(&v).iter().filter_map(|e| e.as_string()).collect::<Vec<_>>()).map_err(|e| js_msg(e))
        })
        .await?
        .map_err(Error::Io)?;
        jsons.into_iter().map(decode).collect()
    }

    async fn update_status(&self, hash: H256, status: AnchorStatus) -> Result<()> {
        let hkey = hash_key(hash);
        let existing = bridge({
            let hkey = hkey.clone();
            move || async move { idb_get(hkey).await.map(|v| v.as_string()).map_err(|e| js_msg(e)) }
        })
        .await?
        .map_err(Error::Io)?;
        let mut record = existing.map(decode).transpose()?.ok_or(Error::NotFound(hash))?;
        record.anchor_status = status;
        let new_status = status_key(record.anchor_status.state);
        let created_at = record.created_at as f64;
        let parent_id = record.entry.parent_id.map(|id| id.to_string()).unwrap_or_default();
        let json = serde_json::to_string(&record).map_err(|e| Error::Io(e.to_string()))?;

        bridge(move || async move { idb_put(hkey, new_status, created_at, parent_id, json).await.map(|_| ()).map_err(|e| js_msg(e)) })
            .await?
            .map_err(Error::Io)
    }

    async fn get_stats(&self) -> Result<StoreStats> {
        let records = self.get_all().await?;
        Ok(super::stats_from(&records, self.limit))
    }

    async fn clear(&self) -> Result<()> {
        bridge(move || async move { idb_clear().await.map(|_| ()).map_err(|e| js_msg(e)) }).await?.map_err(Error::Io)
    }

    fn limit(&self) -> usize {
        self.limit
    }
}
