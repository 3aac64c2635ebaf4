//! # Node Configuration
//!
//! Unified configuration for every subsystem.
//!
//! Values come from three layers, later ones winning:
//!
//! 1. `Default` impls (the documented defaults)
//! 2. A TOML file where every key is optional ([`NodeConfig::from_toml_file`])
//! 3. `BX_*` environment variables ([`NodeConfig::apply_env`])
//!
//! ```toml
//! [datastore]
//! backend = "file"
//! path = "./data/blocks.db"
//!
//! [exchange]
//! task_workers = 4
//! rebroadcast_interval_secs = 30
//!
//! [reprovider]
//! strategy = "pinned"
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use bx_01_blockstore::CacheOpts;
use bx_03_providers::{ProviderConfig, ReproviderConfig, ReproviderStrategy};
use bx_04_exchange::ExchangeConfig;
use serde::Deserialize;
use shared_types::Cid;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("malformed config: {0}")]
    Parse(String),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("datastore backend `{0}` is not compiled in")]
    BackendUnavailable(DatastoreBackend),

    #[error(transparent)]
    Cache(#[from] bx_01_blockstore::ConfigError),

    #[error(transparent)]
    Exchange(#[from] bx_04_exchange::ConfigError),
}

impl ConfigError {
    fn invalid(field: &str, reason: impl ToString) -> Self {
        Self::Invalid {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Complete node configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeConfig {
    pub datastore: DatastoreConfig,
    /// Cache layers over the blockstore.
    pub cache: CacheOpts,
    /// Verify block digests on every read.
    pub hash_on_read: bool,
    pub exchange: ExchangeConfig,
    pub providers: ProviderConfig,
    pub reprovider: ReproviderConfig,
    pub gc: GcConfig,
    /// Skip writes of blocks that are already stored.
    pub check_first: bool,
    /// Run without an exchange even when a network is supplied.
    pub offline: bool,
}

/// Datastore backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatastoreBackend {
    #[default]
    Memory,
    File,
    #[serde(rename = "rocksdb")]
    RocksDb,
}

impl FromStr for DatastoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            "rocksdb" => Ok(Self::RocksDb),
            other => Err(ConfigError::invalid("datastore.backend", format!("unknown backend {other}"))),
        }
    }
}

impl fmt::Display for DatastoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Memory => "memory",
            Self::File => "file",
            Self::RocksDb => "rocksdb",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatastoreConfig {
    pub backend: DatastoreBackend,
    /// Snapshot file for `file`, database directory for `rocksdb`.
    pub path: PathBuf,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            backend: DatastoreBackend::Memory,
            path: PathBuf::from("./data/blockswap"),
        }
    }
}

/// Garbage collection settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcConfig {
    /// Roots whose reachable blocks are kept when their links resolve.
    pub best_effort_roots: Vec<Cid>,
}

impl NodeConfig {
    /// Load a TOML file on top of the defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let mut config = Self::default();
        file.apply(&mut config)?;
        Ok(config)
    }

    /// Apply `BX_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply `BX_*` overrides read through `lookup`.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `BX_DATASTORE_BACKEND` | `datastore.backend` |
    /// | `BX_DATASTORE_PATH` | `datastore.path` |
    /// | `BX_HASH_ON_READ` | `hash_on_read` |
    /// | `BX_OFFLINE` | `offline` |
    /// | `BX_BLOOM_FILTER_SIZE` | `cache.has_bloom_filter_size` |
    /// | `BX_BLOCK_CACHE_SIZE` | `cache.block_cache_size` |
    /// | `BX_TASK_WORKERS` | `exchange.task_workers` |
    /// | `BX_PROVIDE_ENABLED` | `exchange.provide_enabled` |
    /// | `BX_REBROADCAST_INTERVAL_SECS` | `exchange.rebroadcast_interval` |
    /// | `BX_REPROVIDER_INTERVAL_SECS` | `reprovider.interval` |
    /// | `BX_REPROVIDER_STRATEGY` | `reprovider.strategy` |
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = lookup("BX_DATASTORE_BACKEND") {
            self.datastore.backend = v.parse()?;
        }
        if let Some(v) = lookup("BX_DATASTORE_PATH") {
            self.datastore.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("BX_HASH_ON_READ") {
            self.hash_on_read = parse_bool("BX_HASH_ON_READ", &v)?;
        }
        if let Some(v) = lookup("BX_OFFLINE") {
            self.offline = parse_bool("BX_OFFLINE", &v)?;
        }
        if let Some(v) = lookup("BX_BLOOM_FILTER_SIZE") {
            self.cache.has_bloom_filter_size = parse_num("BX_BLOOM_FILTER_SIZE", &v)?;
        }
        if let Some(v) = lookup("BX_BLOCK_CACHE_SIZE") {
            self.cache.block_cache_size = parse_num("BX_BLOCK_CACHE_SIZE", &v)?;
        }
        if let Some(v) = lookup("BX_TASK_WORKERS") {
            self.exchange.task_workers = parse_num("BX_TASK_WORKERS", &v)?;
        }
        if let Some(v) = lookup("BX_PROVIDE_ENABLED") {
            self.exchange.provide_enabled = parse_bool("BX_PROVIDE_ENABLED", &v)?;
        }
        if let Some(v) = lookup("BX_REBROADCAST_INTERVAL_SECS") {
            self.exchange.rebroadcast_interval =
                Duration::from_secs(parse_num("BX_REBROADCAST_INTERVAL_SECS", &v)?);
        }
        if let Some(v) = lookup("BX_REPROVIDER_INTERVAL_SECS") {
            self.reprovider.interval = Duration::from_secs(parse_num("BX_REPROVIDER_INTERVAL_SECS", &v)?);
        }
        if let Some(v) = lookup("BX_REPROVIDER_STRATEGY") {
            self.reprovider.strategy = parse_strategy("BX_REPROVIDER_STRATEGY", &v)?;
        }
        Ok(())
    }

    /// Check every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.datastore.backend == DatastoreBackend::RocksDb && !cfg!(feature = "rocksdb") {
            return Err(ConfigError::BackendUnavailable(DatastoreBackend::RocksDb));
        }
        if self.datastore.backend != DatastoreBackend::Memory
            && self.datastore.path.as_os_str().is_empty()
        {
            return Err(ConfigError::invalid("datastore.path", "empty path for a persistent backend"));
        }
        self.cache.validate()?;
        self.exchange.validate()?;
        if self.providers.lru_size == 0 {
            return Err(ConfigError::invalid("providers.lru_size", "must be greater than zero"));
        }
        if self.providers.provide_validity.is_zero() {
            return Err(ConfigError::invalid("providers.provide_validity", "must be greater than zero"));
        }
        if self.providers.cleanup_interval.is_zero() {
            return Err(ConfigError::invalid("providers.cleanup_interval", "must be greater than zero"));
        }
        if self.providers.batch_size == 0 {
            return Err(ConfigError::invalid("providers.batch_size", "must be greater than zero"));
        }
        Ok(())
    }
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(field, format!("not a boolean: {value}"))),
    }
}

fn parse_num<T: FromStr>(field: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::invalid(field, e))
}

fn parse_strategy(field: &str, value: &str) -> Result<ReproviderStrategy, ConfigError> {
    value.parse().map_err(|e: String| ConfigError::invalid(field, e))
}

// TOML layout. Every key is optional and overrides the default.

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    datastore: DatastoreSection,
    blockstore: BlockstoreSection,
    exchange: ExchangeSection,
    providers: ProvidersSection,
    reprovider: ReproviderSection,
    gc: GcSection,
    offline: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct DatastoreSection {
    backend: Option<DatastoreBackend>,
    path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct BlockstoreSection {
    bloom_filter_size: Option<usize>,
    bloom_filter_hashes: Option<usize>,
    has_arc_cache_size: Option<usize>,
    block_cache_size: Option<usize>,
    hash_on_read: Option<bool>,
    check_first: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ExchangeSection {
    task_workers: Option<usize>,
    outbox_capacity: Option<usize>,
    provide_workers: Option<usize>,
    provide_buffer: Option<usize>,
    provide_timeout_secs: Option<u64>,
    provide_enabled: Option<bool>,
    provider_search_timeout_secs: Option<u64>,
    max_providers_per_request: Option<usize>,
    rebroadcast_interval_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
    send_timeout_secs: Option<u64>,
    active_wants_limit: Option<usize>,
    session_base_tick_ms: Option<u64>,
    session_search_delay_ms: Option<u64>,
    dup_suppression_window_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ProvidersSection {
    lru_size: Option<usize>,
    provide_validity_secs: Option<u64>,
    cleanup_interval_secs: Option<u64>,
    batch_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ReproviderSection {
    interval_secs: Option<u64>,
    strategy: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct GcSection {
    best_effort_roots: Option<Vec<String>>,
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn set_secs(slot: &mut Duration, value: Option<u64>) {
    set(slot, value.map(Duration::from_secs));
}

fn set_millis(slot: &mut Duration, value: Option<u64>) {
    set(slot, value.map(Duration::from_millis));
}

impl FileConfig {
    fn apply(self, config: &mut NodeConfig) -> Result<(), ConfigError> {
        set(&mut config.datastore.backend, self.datastore.backend);
        set(&mut config.datastore.path, self.datastore.path);

        let b = self.blockstore;
        set(&mut config.cache.has_bloom_filter_size, b.bloom_filter_size);
        set(&mut config.cache.has_bloom_filter_hashes, b.bloom_filter_hashes);
        set(&mut config.cache.has_arc_cache_size, b.has_arc_cache_size);
        set(&mut config.cache.block_cache_size, b.block_cache_size);
        set(&mut config.hash_on_read, b.hash_on_read);
        set(&mut config.check_first, b.check_first);

        let e = self.exchange;
        let x = &mut config.exchange;
        set(&mut x.task_workers, e.task_workers);
        set(&mut x.outbox_capacity, e.outbox_capacity);
        set(&mut x.provide_workers, e.provide_workers);
        set(&mut x.provide_buffer, e.provide_buffer);
        set_secs(&mut x.provide_timeout, e.provide_timeout_secs);
        set(&mut x.provide_enabled, e.provide_enabled);
        set_secs(&mut x.provider_search_timeout, e.provider_search_timeout_secs);
        set(&mut x.max_providers_per_request, e.max_providers_per_request);
        set_secs(&mut x.rebroadcast_interval, e.rebroadcast_interval_secs);
        set_secs(&mut x.connect_timeout, e.connect_timeout_secs);
        set_secs(&mut x.send_timeout, e.send_timeout_secs);
        set(&mut x.active_wants_limit, e.active_wants_limit);
        set_millis(&mut x.session_base_tick, e.session_base_tick_ms);
        set_millis(&mut x.session_search_delay, e.session_search_delay_ms);
        set_millis(&mut x.dup_suppression_window, e.dup_suppression_window_ms);

        let p = self.providers;
        set(&mut config.providers.lru_size, p.lru_size);
        set_secs(&mut config.providers.provide_validity, p.provide_validity_secs);
        set_secs(&mut config.providers.cleanup_interval, p.cleanup_interval_secs);
        set(&mut config.providers.batch_size, p.batch_size);

        set_secs(&mut config.reprovider.interval, self.reprovider.interval_secs);
        if let Some(strategy) = self.reprovider.strategy {
            config.reprovider.strategy = parse_strategy("reprovider.strategy", &strategy)?;
        }

        if let Some(roots) = self.gc.best_effort_roots {
            config.gc.best_effort_roots = roots
                .iter()
                .map(|s| s.parse::<Cid>().map_err(|e| ConfigError::invalid("gc.best_effort_roots", e)))
                .collect::<Result<_, _>>()?;
        }

        set(&mut config.offline, self.offline);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.datastore.backend, DatastoreBackend::Memory);
        assert_eq!(config.exchange.task_workers, 8);
        assert_eq!(config.providers.lru_size, 256);
        assert!(!config.hash_on_read);
    }

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config = NodeConfig::from_toml_str("").unwrap();
        assert_eq!(config, NodeConfig::default());
    }

    #[test]
    fn test_toml_overrides() {
        let config = NodeConfig::from_toml_str(
            r#"
            offline = true

            [datastore]
            backend = "file"
            path = "/tmp/bx/blocks.db"

            [blockstore]
            bloom_filter_size = 0
            hash_on_read = true

            [exchange]
            task_workers = 2
            rebroadcast_interval_secs = 5
            session_base_tick_ms = 100

            [providers]
            provide_validity_secs = 60

            [reprovider]
            strategy = "roots"
            interval_secs = 0
            "#,
        )
        .unwrap();

        assert!(config.offline);
        assert_eq!(config.datastore.backend, DatastoreBackend::File);
        assert_eq!(config.datastore.path, PathBuf::from("/tmp/bx/blocks.db"));
        assert_eq!(config.cache.has_bloom_filter_size, 0);
        assert!(config.hash_on_read);
        assert_eq!(config.exchange.task_workers, 2);
        assert_eq!(config.exchange.rebroadcast_interval, Duration::from_secs(5));
        assert_eq!(config.exchange.session_base_tick, Duration::from_millis(100));
        assert_eq!(config.exchange.send_timeout, Duration::from_secs(300));
        assert_eq!(config.providers.provide_validity, Duration::from_secs(60));
        assert_eq!(config.reprovider.strategy, ReproviderStrategy::Roots);
        assert!(config.reprovider.interval.is_zero());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = NodeConfig::from_toml_str("[exchange]\nworkers = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_bad_strategy_rejected() {
        let err = NodeConfig::from_toml_str("[reprovider]\nstrategy = \"some\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_gc_roots_parsed() {
        let block = shared_types::test_utils::raw_block("root");
        let text = format!("[gc]\nbest_effort_roots = [\"{}\"]\n", block.cid());
        let config = NodeConfig::from_toml_str(&text).unwrap();
        assert_eq!(config.gc.best_effort_roots, vec![*block.cid()]);

        let err = NodeConfig::from_toml_str("[gc]\nbest_effort_roots = [\"nope\"]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(&path, "[exchange]\nactive_wants_limit = 4\n").unwrap();
        let config = NodeConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.exchange.active_wants_limit, 4);

        let missing = NodeConfig::from_toml_file(dir.path().join("absent.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = NodeConfig::default();
        config
            .apply_env_from(env(&[
                ("BX_DATASTORE_BACKEND", "file"),
                ("BX_DATASTORE_PATH", "/var/lib/bx"),
                ("BX_HASH_ON_READ", "1"),
                ("BX_TASK_WORKERS", "3"),
                ("BX_PROVIDE_ENABLED", "false"),
                ("BX_REPROVIDER_STRATEGY", "pinned"),
                ("BX_REPROVIDER_INTERVAL_SECS", "120"),
            ]))
            .unwrap();

        assert_eq!(config.datastore.backend, DatastoreBackend::File);
        assert_eq!(config.datastore.path, PathBuf::from("/var/lib/bx"));
        assert!(config.hash_on_read);
        assert_eq!(config.exchange.task_workers, 3);
        assert!(!config.exchange.provide_enabled);
        assert_eq!(config.reprovider.strategy, ReproviderStrategy::Pinned);
        assert_eq!(config.reprovider.interval, Duration::from_secs(120));
    }

    #[test]
    fn test_env_bad_number_rejected() {
        let mut config = NodeConfig::default();
        let err = config
            .apply_env_from(env(&[("BX_TASK_WORKERS", "many")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field, .. } if field == "BX_TASK_WORKERS"));
    }

    #[test]
    fn test_validate_catches_subsystem_errors() {
        let mut config = NodeConfig::default();
        config.exchange.task_workers = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Exchange(_))));

        let mut config = NodeConfig::default();
        config.cache.has_bloom_filter_hashes = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Cache(_))));

        let mut config = NodeConfig::default();
        config.providers.lru_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[cfg(not(feature = "rocksdb"))]
    #[test]
    fn test_rocksdb_requires_feature() {
        let mut config = NodeConfig::default();
        config.datastore.backend = DatastoreBackend::RocksDb;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BackendUnavailable(DatastoreBackend::RocksDb))
        ));
    }
}
