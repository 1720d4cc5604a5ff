//! Configuration for the strata proxy
//!
//! Loaded from a single TOML file (default `strata.toml`). Every section is
//! optional; missing values fall back to the defaults below.

use crate::search_after::SearchAfterStrategyKind;
use crate::table::FieldType;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub clickhouse: ClickhouseConfig,
    /// Enables forwarding to, and index listing from, an Elasticsearch cluster
    #[serde(default)]
    pub elasticsearch: Option<ElasticsearchConfig>,
    #[serde(default)]
    pub resolver: ResolverConfig,
    /// Per-index routing configuration keyed by index name
    #[serde(default)]
    pub indexes: BTreeMap<String, IndexConfig>,
    /// Statically declared ClickHouse tables keyed by table name
    #[serde(default)]
    pub tables: BTreeMap<String, TableConfig>,
    #[serde(default)]
    pub runner: RunnerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Maximum request body size in bytes (default: 100MB)
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_body_size() -> usize {
    100 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_body_size: default_max_body_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    /// Log output format: "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClickhouseConfig {
    #[serde(default = "default_clickhouse_url")]
    pub url: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_clickhouse_url() -> String {
    "http://localhost:8123".to_string()
}

fn default_database() -> String {
    "default".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for ClickhouseConfig {
    fn default() -> Self {
        Self {
            url: default_clickhouse_url(),
            database: default_database(),
            user: None,
            password: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ClickhouseConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ElasticsearchConfig {
    pub url: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Backend a pipeline may route an index to.
///
/// Unknown names are kept verbatim so routing can reject them with a
/// descriptive error instead of failing the whole config load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum Target {
    Clickhouse,
    Elasticsearch,
    Other(String),
}

impl From<String> for Target {
    fn from(s: String) -> Self {
        match s.as_str() {
            "clickhouse" => Target::Clickhouse,
            "elasticsearch" => Target::Elasticsearch,
            _ => Target::Other(s),
        }
    }
}

impl From<Target> for String {
    fn from(t: Target) -> Self {
        t.to_string()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Clickhouse => write!(f, "clickhouse"),
            Target::Elasticsearch => write!(f, "elasticsearch"),
            Target::Other(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolverConfig {
    /// Treat discovered ClickHouse tables as index candidates
    #[serde(default)]
    pub auto_discovery: bool,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_query_target")]
    pub default_query_target: Vec<Target>,
    #[serde(default = "default_ingest_target")]
    pub default_ingest_target: Vec<Target>,
    /// Route wildcard-only matches to the common table instead of a per-index table
    #[serde(default)]
    pub use_common_table_for_wildcard: bool,
    /// Optimizers applied to every index, e.g. `elastic_ab_testing`
    #[serde(default)]
    pub default_optimizers: BTreeMap<String, OptimizerConfig>,
}

fn default_refresh_interval_secs() -> u64 {
    30
}

fn default_query_target() -> Vec<Target> {
    vec![Target::Elasticsearch]
}

fn default_ingest_target() -> Vec<Target> {
    vec![Target::Elasticsearch]
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            auto_discovery: false,
            refresh_interval_secs: default_refresh_interval_secs(),
            default_query_target: default_query_target(),
            default_ingest_target: default_ingest_target(),
            use_common_table_for_wildcard: false,
            default_optimizers: BTreeMap::new(),
        }
    }
}

impl ResolverConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn optimizer_enabled(&self, name: &str) -> bool {
        self.default_optimizers.get(name).is_some_and(|o| !o.disabled)
    }
}

/// Routing configuration for a single index.
///
/// An index listed here with an empty target list for a pipeline is
/// considered disabled for that pipeline.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct IndexConfig {
    #[serde(default)]
    pub query_target: Vec<Target>,
    #[serde(default)]
    pub ingest_target: Vec<Target>,
    #[serde(default)]
    pub use_common_table: bool,
    /// Physical ClickHouse table name when it differs from the index name
    #[serde(default, rename = "override")]
    pub table_override: Option<String>,
    #[serde(default)]
    pub optimizers: BTreeMap<String, OptimizerConfig>,
}

impl IndexConfig {
    /// Physical table backing `index`
    pub fn table_name<'a>(&'a self, index: &'a str) -> &'a str {
        self.table_override.as_deref().unwrap_or(index)
    }

    /// Whether the named optimizer is configured and not switched off.
    pub fn optimizer_enabled(&self, name: &str) -> bool {
        self.optimizers.get(name).is_some_and(|o| !o.disabled)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct OptimizerConfig {
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TableConfig {
    /// Backed by the common table rather than a physical table of its own
    #[serde(default, rename = "virtual")]
    pub virtual_table: bool,
    #[serde(default)]
    pub primary_key: Option<String>,
    #[serde(default)]
    pub columns: Vec<ColumnConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ColumnConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: FieldType,
    /// Elasticsearch field name when it differs from the column name
    #[serde(default)]
    pub field: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunnerConfig {
    /// Process-wide ceiling on concurrently running sub-queries (0 = always sequential)
    #[serde(default = "default_max_parallel_queries")]
    pub max_parallel_queries: usize,
    #[serde(default = "default_async_queries_limit")]
    pub async_queries_limit: usize,
    #[serde(default = "default_async_queries_limit_bytes")]
    pub async_queries_limit_bytes: u64,
    #[serde(default)]
    pub search_after_strategy: SearchAfterStrategyKind,
    /// Drop one trailing cursor value that belongs to a client-side tiebreaker sort
    #[serde(default = "default_true")]
    pub strip_search_after_tiebreaker: bool,
    #[serde(default = "default_wait_for_completion_ms")]
    pub default_wait_for_completion_ms: u64,
    /// Upper bound on draining in-flight jobs after a failure
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    #[serde(default = "default_ab_testing_timeout_secs")]
    pub ab_testing_timeout_secs: u64,
}

fn default_max_parallel_queries() -> usize {
    25
}

fn default_async_queries_limit() -> usize {
    10_000
}

fn default_async_queries_limit_bytes() -> u64 {
    500 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

fn default_wait_for_completion_ms() -> u64 {
    1000
}

fn default_drain_timeout_ms() -> u64 {
    5000
}

fn default_ab_testing_timeout_secs() -> u64 {
    60
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_parallel_queries: default_max_parallel_queries(),
            async_queries_limit: default_async_queries_limit(),
            async_queries_limit_bytes: default_async_queries_limit_bytes(),
            search_after_strategy: SearchAfterStrategyKind::default(),
            strip_search_after_tiebreaker: true,
            default_wait_for_completion_ms: default_wait_for_completion_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            ab_testing_timeout_secs: default_ab_testing_timeout_secs(),
        }
    }
}

impl RunnerConfig {
    pub fn default_wait_for_completion(&self) -> Duration {
        Duration::from_millis(self.default_wait_for_completion_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn ab_testing_timeout(&self) -> Duration {
        Duration::from_secs(self.ab_testing_timeout_secs)
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Load config from file path, or fall back to defaults when it is missing
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::warn!("Config file {} not found, using defaults", path.display());
            Ok(Config::default())
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject index names that could never be matched literally
    pub fn validate(&self) -> Result<()> {
        if self.resolver.refresh_interval_secs == 0 {
            return Err(anyhow!("resolver.refresh_interval_secs must be at least 1"));
        }
        for name in self.indexes.keys() {
            if name.is_empty() || name.contains(',') || name.contains('*') {
                return Err(anyhow!("invalid index name in config: '{}'", name));
            }
            if name == crate::table::COMMON_TABLE_NAME {
                return Err(anyhow!(
                    "index name '{}' is reserved for the common table",
                    name
                ));
            }
        }
        for (name, table) in &self.tables {
            if let Some(pk) = &table.primary_key {
                if !table.columns.iter().any(|c| &c.name == pk) {
                    return Err(anyhow!(
                        "table '{}' declares primary key '{}' which is not a column",
                        name,
                        pk
                    ));
                }
            }
        }
        Ok(())
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }
}
