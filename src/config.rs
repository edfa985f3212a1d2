//! Validated construction options for a `Wrapper` (spec §6).

use crate::error::{Error, Result};
use crate::redact::RedactorConfig;
use crate::consistency::RetryPolicy;
use std::collections::HashMap;
use std::path::PathBuf;

/// Which `ConsistencyStrategy` a `Wrapper` should use (spec §4.7).
#[derive(Debug, Clone, PartialEq)]
pub enum ConsistencyMode {
    Sync,
    Async,
    Cache { flush_interval_ms: u64 },
    TwoPhase,
}

impl Default for ConsistencyMode {
    fn default() -> Self {
        ConsistencyMode::Sync
    }
}

impl ConsistencyMode {
    /// `Cache` with the spec's default flush interval (30s).
    pub fn cache_default() -> Self {
        ConsistencyMode::Cache { flush_interval_ms: 30_000 }
    }
}

/// How the anchor transaction's gas price is chosen. Out of scope for the
/// core model (spec.md explicitly pushes ledger schema specifics out of
/// scope); kept here only as a hint threaded through to the caller-supplied
/// `anchor_fn`, not interpreted by this crate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GasStrategy {
    Auto,
    Fixed { wei_per_gas: u64 },
    Percentile { percentile: u8 },
}

impl Default for GasStrategy {
    fn default() -> Self {
        GasStrategy::Auto
    }
}

/// A raw secp256k1 private key, held as plain bytes so `config.rs` does not
/// itself depend on the `signing` feature; parsing into a real key happens
/// where `SigningContext` is constructed.
#[derive(Clone)]
pub struct RawKeyBytes(pub [u8; 32]);

impl std::fmt::Debug for RawKeyBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RawKeyBytes(..)")
    }
}

/// Exactly one of these must be configured (spec §6, "Process-wide state" /
/// wallet key source).
#[derive(Debug, Clone)]
pub enum KeySource {
    /// A raw private key supplied directly.
    RawKey(RawKeyBytes),
    /// An already-connected external wallet/provider is used (spec §4.8's
    /// `wallet::ConnectedWallet`).
    InjectedProvider,
    /// No key is available yet; the wrapper connects a wallet on first use.
    ConnectOnDemand,
}

/// Validated, immutable configuration for a `Wrapper`.
#[derive(Debug)]
pub struct Config {
    pub key_source: KeySource,
    pub redactor: RedactorConfig,
    pub store_path: Option<PathBuf>,
    pub capacity_limit: usize,
    pub warning_threshold: f64,
    pub consistency_mode: ConsistencyMode,
    pub max_retries: u32,
    pub gas_strategy: GasStrategy,
    pub explorer_url_templates: HashMap<u64, String>,
    pub chain_id: u64,
}

/// Builds a `Config`, validating mutually exclusive and out-of-range
/// options at `build()` time rather than letting them surface later as
/// runtime errors.
pub struct ConfigBuilder {
    raw_key: Option<[u8; 32]>,
    injected_provider: bool,
    connect_on_demand: bool,
    redactor: RedactorConfig,
    store_path: Option<PathBuf>,
    capacity_limit: usize,
    warning_threshold: f64,
    consistency_mode: ConsistencyMode,
    max_retries: u32,
    gas_strategy: GasStrategy,
    explorer_url_templates: HashMap<u64, String>,
    chain_id: u64,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            raw_key: None,
            injected_provider: false,
            connect_on_demand: false,
            redactor: RedactorConfig::default(),
            store_path: None,
            capacity_limit: 10_000,
            warning_threshold: 0.8,
            consistency_mode: ConsistencyMode::default(),
            max_retries: RetryPolicy::DEFAULT_MAX_RETRIES,
            gas_strategy: GasStrategy::default(),
            explorer_url_templates: HashMap::new(),
            chain_id: 1,
        }
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw_key(mut self, key: [u8; 32]) -> Self {
        self.raw_key = Some(key);
        self
    }

    pub fn injected_provider(mut self) -> Self {
        self.injected_provider = true;
        self
    }

    pub fn connect_on_demand(mut self) -> Self {
        self.connect_on_demand = true;
        self
    }

    pub fn redactor(mut self, redactor: RedactorConfig) -> Self {
        self.redactor = redactor;
        self
    }

    pub fn store_path(mut self, path: PathBuf) -> Self {
        self.store_path = Some(path);
        self
    }

    pub fn capacity_limit(mut self, limit: usize) -> Self {
        self.capacity_limit = limit;
        self
    }

    pub fn warning_threshold(mut self, threshold: f64) -> Self {
        self.warning_threshold = threshold;
        self
    }

    pub fn consistency_mode(mut self, mode: ConsistencyMode) -> Self {
        self.consistency_mode = mode;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn gas_strategy(mut self, strategy: GasStrategy) -> Self {
        self.gas_strategy = strategy;
        self
    }

    pub fn explorer_url_template(mut self, chain_id: u64, template: impl Into<String>) -> Self {
        self.explorer_url_templates.insert(chain_id, template.into());
        self
    }

    /// The chain id used to select an explorer URL template (default 1,
    /// Ethereum mainnet).
    pub fn chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    /// Validate and freeze the configuration.
    pub fn build(self) -> Result<Config> {
        let key_sources_set =
            self.raw_key.is_some() as u8 + self.injected_provider as u8 + self.connect_on_demand as u8;
        if key_sources_set != 1 {
            return Err(Error::Configuration(
                "exactly one of raw_key, injected_provider, or connect_on_demand must be set".into(),
            ));
        }
        let key_source = if let Some(key) = self.raw_key {
            KeySource::RawKey(RawKeyBytes(key))
        } else if self.injected_provider {
            KeySource::InjectedProvider
        } else {
            KeySource::ConnectOnDemand
        };

        if self.capacity_limit == 0 {
            return Err(Error::Configuration("capacity_limit must be greater than zero".into()));
        }
        if !(0.0..=1.0).contains(&self.warning_threshold) {
            return Err(Error::Configuration("warning_threshold must be between 0.0 and 1.0".into()));
        }
        if let ConsistencyMode::Cache { flush_interval_ms } = self.consistency_mode {
            if flush_interval_ms == 0 {
                return Err(Error::Configuration("cache flush_interval_ms must be greater than zero".into()));
            }
        }

        Ok(Config {
            key_source,
            redactor: self.redactor,
            store_path: self.store_path,
            capacity_limit: self.capacity_limit,
            warning_threshold: self.warning_threshold,
            consistency_mode: self.consistency_mode,
            max_retries: self.max_retries,
            gas_strategy: self.gas_strategy,
            explorer_url_templates: self.explorer_url_templates,
            chain_id: self.chain_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_exactly_one_key_source() {
        let err = ConfigBuilder::new().build();
        assert!(matches!(err, Err(Error::Configuration(_))));

        let err = ConfigBuilder::new().raw_key([1; 32]).injected_provider().build();
        assert!(matches!(err, Err(Error::Configuration(_))));

        assert!(ConfigBuilder::new().raw_key([1; 32]).build().is_ok());
    }

    #[test]
    fn rejects_zero_capacity_limit() {
        let err = ConfigBuilder::new().connect_on_demand().capacity_limit(0).build();
        assert!(matches!(err, Err(Error::Configuration(_))));
    }

    #[test]
    fn rejects_out_of_range_warning_threshold() {
        let err = ConfigBuilder::new().connect_on_demand().warning_threshold(1.5).build();
        assert!(matches!(err, Err(Error::Configuration(_))));
    }

    #[test]
    fn rejects_zero_cache_flush_interval() {
        let err = ConfigBuilder::new()
            .connect_on_demand()
            .consistency_mode(ConsistencyMode::Cache { flush_interval_ms: 0 })
            .build();
        assert!(matches!(err, Err(Error::Configuration(_))));
    }

    #[test]
    fn accepts_valid_configuration() {
        let config = ConfigBuilder::new()
            .connect_on_demand()
            .capacity_limit(500)
            .warning_threshold(0.9)
            .explorer_url_template(1, "https://etherscan.io/tx/{tx}")
            .build()
            .unwrap();
        assert_eq!(config.capacity_limit, 500);
        assert_eq!(config.explorer_url_templates.get(&1).unwrap(), "https://etherscan.io/tx/{tx}");
    }
}
