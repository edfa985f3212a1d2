//! Composes C1–C7 into a user-facing handle plus the management surface
//! (C8, spec §4.8).

use crate::cache::{CacheManager, CallbackConfig};
use crate::clock::now_millis;
use crate::config::{Config, ConsistencyMode, KeySource};
use crate::consistency::{
    AnchorFn, AsyncStrategy, CacheStrategy, ConsistencyStrategy, GetRecordFn, SyncStrategy, TwoPhaseStrategy,
    UpdateStatusFn,
};
use crate::error::{Error, Result};
use crate::interceptor::Interceptor;
use crate::redact::Redactor;
use crate::signing::{SecretKey, SigningContext};
use crate::store::{self, StoreStats};
use crate::types::{AnchorStatus, SignedRecord};
use ethereum_types::H256;
use std::sync::Arc;

/// A fully wired capture-and-anchor facade: an `agent` to register
/// interceptable methods on, plus the management operations of spec §4.8.
pub struct Wrapper {
    cache: Arc<CacheManager>,
    signing: Arc<SigningContext>,
    consistency: Arc<dyn ConsistencyStrategy>,
    explorer_url_templates: std::collections::HashMap<u64, String>,
    chain_id: u64,
    /// The registration surface intercepted calls are recorded through
    /// (spec §4.8's "agent property").
    pub agent: Arc<Interceptor>,
}

impl Wrapper {
    /// Validate `config`, select backends and strategy, and wire the
    /// signing → persist → consistency pipeline behind `agent`.
    ///
    /// `anchor_fn` is the caller-supplied collaborator that actually
    /// submits a record to a ledger; `callbacks` are the cache manager's
    /// lifecycle hooks (spec §4.5).
    pub fn new(config: Config, anchor_fn: AnchorFn, callbacks: CallbackConfig) -> Result<Self> {
        let key = match config.key_source {
            KeySource::RawKey(bytes) => SecretKey::from_slice(&bytes.0)
                .map_err(|e| Error::Configuration(format!("invalid raw key: {e}")))?,
            KeySource::InjectedProvider | KeySource::ConnectOnDemand => {
                // TODO: wire an external-signer callback (see wallet::ConnectedWallet)
                // so these modes can sign through a provider instead of a local key.
                return Err(Error::Configuration(
                    "external wallet signing is not yet implemented; supply KeySource::RawKey".into(),
                ));
            }
        };
        let signing = Arc::new(SigningContext::new(key));
        let redactor = Arc::new(Redactor::new(config.redactor));
        let record_store = store::auto(config.store_path, config.capacity_limit);
        let cache = Arc::new(CacheManager::new(record_store, callbacks, config.warning_threshold));

        let get_record: GetRecordFn = {
            let cache = cache.clone();
            Arc::new(move |hash: H256| {
                let cache = cache.clone();
                Box::pin(async move { cache.get(hash).await })
            })
        };
        let update_status: UpdateStatusFn = {
            let cache = cache.clone();
            Arc::new(move |hash: H256, status: AnchorStatus| {
                let cache = cache.clone();
                Box::pin(async move { cache.update_status(hash, status).await })
            })
        };

        let consistency: Arc<dyn ConsistencyStrategy> = match config.consistency_mode {
            ConsistencyMode::Sync => {
                Arc::new(SyncStrategy::new(anchor_fn, get_record, update_status, config.max_retries))
            }
            ConsistencyMode::Async => {
                Arc::new(AsyncStrategy::new(anchor_fn, get_record, update_status, config.max_retries))
            }
            ConsistencyMode::Cache { flush_interval_ms } => Arc::new(CacheStrategy::new(
                anchor_fn,
                get_record,
                update_status,
                config.max_retries,
                flush_interval_ms,
            )),
            ConsistencyMode::TwoPhase => {
                Arc::new(TwoPhaseStrategy::new(anchor_fn, get_record, update_status, config.max_retries))
            }
        };

        // Sync must block the intercepted call on the anchor outcome and
        // surface a failure to the caller (spec §4.7 scenario S3); every
        // other mode anchors off the hot path and never re-raises.
        let blocking = matches!(config.consistency_mode, ConsistencyMode::Sync);

        let on_complete: crate::interceptor::OnCompleteFn = {
            let cache = cache.clone();
            let consistency = consistency.clone();
            let signing = signing.clone();
            Arc::new(move |entry: crate::types::TraceEntry| {
                let cache = cache.clone();
                let consistency = consistency.clone();
                let signing = signing.clone();
                Box::pin(async move {
                    let now = now_millis();
                    let record = signing.sign(entry, now)?;
                    if blocking {
                        let persisted = cache.persist(record).await?;
                        consistency.on_action_complete(persisted).await
                    } else {
                        tokio::spawn(async move {
                            match cache.persist(record).await {
                                Ok(persisted) => {
                                    if let Err(e) = consistency.on_action_complete(persisted).await {
                                        log::error!("consistency strategy failed: {e}");
                                    }
                                }
                                Err(e) => log::error!("failed to persist signed record: {e}"),
                            }
                        });
                        Ok(())
                    }
                })
            })
        };
        let agent = Arc::new(Interceptor::new(redactor, on_complete));

        Ok(Self {
            cache,
            signing,
            consistency,
            explorer_url_templates: config.explorer_url_templates,
            chain_id: config.chain_id,
            agent,
        })
    }

    /// Records with status `pending`, `submitted`, or `failed` (spec §4.5).
    pub async fn get_pending_records(&self) -> Result<Vec<SignedRecord>> {
        self.cache.get_pending().await
    }

    /// Manually retry anchoring a record.
    pub async fn retry_anchor(&self, hash: H256) -> Result<()> {
        self.consistency.retry_anchor(hash).await
    }

    /// Transition a record to `local-only`.
    pub async fn mark_locally_verified(&self, hash: H256) -> Result<()> {
        self.cache.mark_locally_verified(hash).await
    }

    /// Aggregate store counters.
    pub async fn get_storage_stats(&self) -> Result<StoreStats> {
        self.cache.get_stats().await
    }

    /// Force the pending buffer (if any) to anchor now, outside its
    /// periodic schedule. A no-op for strategies other than `Cache`.
    pub async fn flush_cache(&self) {
        if let Some(cache_strategy) = self.consistency.as_any().downcast_ref::<CacheStrategy>() {
            cache_strategy.flush_now().await;
        }
    }

    /// A record's current anchor status.
    pub async fn get_anchor_status(&self, hash: H256) -> Result<AnchorStatus> {
        self.cache.get(hash).await?.map(|r| r.anchor_status).ok_or(Error::NotFound(hash))
    }

    /// A block-explorer URL for a record's anchor transaction, if one has
    /// been assigned and a template is configured for the active chain.
    pub async fn get_explorer_url(&self, hash: H256) -> Result<Option<String>> {
        let record = self.cache.get(hash).await?.ok_or(Error::NotFound(hash))?;
        let Some(tx_id) = record.anchor_status.tx_id else { return Ok(None) };
        Ok(self.explorer_url_templates.get(&self.chain_id).map(|template| template.replace("{tx}", &tx_id)))
    }

    /// The signing context's current chain head.
    pub fn chain_head(&self) -> H256 {
        self.signing.previous_hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::consistency::AnchorResult;
    use crate::interceptor::RegisteredMethod;
    use crate::value::Value;

    fn confirming_anchor_fn(tx_id: &'static str) -> AnchorFn {
        Arc::new(move |_r| {
            Box::pin(async move {
                AnchorResult { success: true, tx_id: Some(tx_id.to_owned()), block_number: Some(7), error: None }
            })
        })
    }

    fn wrapper(mode: ConsistencyMode) -> Wrapper {
        let config = ConfigBuilder::new().raw_key([0x22; 32]).consistency_mode(mode).build().unwrap();
        Wrapper::new(config, confirming_anchor_fn("0xdead"), CallbackConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn rejects_unsupported_key_sources() {
        let config = ConfigBuilder::new().connect_on_demand().build().unwrap();
        let err = Wrapper::new(config, confirming_anchor_fn("0x0"), CallbackConfig::default());
        assert!(matches!(err, Err(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn intercepted_call_ends_up_signed_and_anchored() {
        let wrapper = wrapper(ConsistencyMode::Sync);
        wrapper
            .agent
            .register(
                "greet",
                RegisteredMethod::sync(|args| match &args[0] {
                    Value::String(name) => Ok(Value::String(format!("hi {name}"))),
                    _ => unreachable!(),
                }),
            )
            .unwrap();

        let result = wrapper.agent.call_sync_preserving("greet", vec![Value::String("Ada".into())]).await;
        assert_eq!(result, Ok(Value::String("hi Ada".into())));

        // Sync blocks the call on the anchor outcome, so the pipeline has
        // already finished by the time the call above returned.
        let pending = wrapper.get_pending_records().await.unwrap();
        assert!(pending.is_empty(), "sync strategy should confirm immediately: {pending:?}");
        let stats = wrapper.get_storage_stats().await.unwrap();
        assert_eq!(stats.total_records, 1);
    }

    #[tokio::test]
    async fn sync_mode_raises_an_error_when_anchoring_fails() {
        let anchor_fn: AnchorFn = Arc::new(|_r| {
            Box::pin(async {
                AnchorResult { success: false, tx_id: None, block_number: None, error: Some("rpc timeout".into()) }
            })
        });
        let config = ConfigBuilder::new().raw_key([0x44; 32]).consistency_mode(ConsistencyMode::Sync).build().unwrap();
        let wrapper = Wrapper::new(config, anchor_fn, CallbackConfig::default()).unwrap();
        wrapper.agent.register("greet", RegisteredMethod::sync(|_| Ok(Value::String("hi".into())))).unwrap();

        let result = wrapper.agent.call_sync_preserving("greet", vec![]).await;
        let err = result.expect_err("a failing anchor_fn must raise an error under Sync");
        assert_eq!(err.name, "AnchorFailure");
        assert!(err.message.contains("rpc timeout"));
        assert!(err.message.contains('1'), "message should include the retry count: {}", err.message);

        let pending = wrapper.get_pending_records().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].anchor_status.state, crate::types::AnchorState::Failed);
    }

    #[tokio::test]
    async fn flush_cache_is_a_no_op_for_non_cache_strategies() {
        let wrapper = wrapper(ConsistencyMode::Sync);
        wrapper.flush_cache().await;
    }

    #[tokio::test]
    async fn explorer_url_uses_configured_template() {
        let config = ConfigBuilder::new()
            .raw_key([0x33; 32])
            .consistency_mode(ConsistencyMode::Sync)
            .explorer_url_template(1, "https://etherscan.io/tx/{tx}")
            .build()
            .unwrap();
        let wrapper = Wrapper::new(config, confirming_anchor_fn("0xcafe"), CallbackConfig::default()).unwrap();

        let entry = crate::types::TraceEntry::new("noop", vec![], crate::types::Outcome::Result(Value::Null), now_millis(), 0, None);
        let record = wrapper.signing.sign(entry, now_millis()).unwrap();
        wrapper.cache.persist(record.clone()).await.unwrap();
        wrapper.consistency.on_action_complete(record.clone()).await.unwrap();

        let url = wrapper.get_explorer_url(record.hash).await.unwrap();
        assert_eq!(url, Some("https://etherscan.io/tx/0xcafe".to_owned()));
    }
}
