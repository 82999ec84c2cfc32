//! CLI configuration management.

use dispatch_cache::{CacheConfig, TtlPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "dispatch.yaml";
pub const ENV_PREFIX: &str = "DISPATCH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Effective configuration: defaults, then `dispatch.yaml`, then
/// `DISPATCH__SECTION__KEY` environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub ttl: TtlSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Entry limit before compaction.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Fraction of entries evicted per compaction.
    #[serde(default = "default_compaction_percentage")]
    pub compaction_percentage: f64,
    #[serde(default = "default_absolute_secs")]
    pub default_absolute_secs: u64,
    #[serde(default = "default_sliding_secs")]
    pub default_sliding_secs: u64,
    /// Background sweep period; 0 disables the sweep.
    #[serde(default = "default_sweep_secs")]
    pub sweep_interval_secs: u64,
}

fn default_max_entries() -> usize {
    10_000
}

fn default_compaction_percentage() -> f64 {
    0.25
}

fn default_absolute_secs() -> u64 {
    30 * 60
}

fn default_sliding_secs() -> u64 {
    5 * 60
}

fn default_sweep_secs() -> u64 {
    60
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            compaction_percentage: default_compaction_percentage(),
            default_absolute_secs: default_absolute_secs(),
            default_sliding_secs: default_sliding_secs(),
            sweep_interval_secs: default_sweep_secs(),
        }
    }
}

/// Per-kind lifetimes in seconds; 0 disables caching for that kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtlSettings {
    #[serde(default = "default_entity_secs")]
    pub entity_secs: u64,
    #[serde(default = "default_list_secs")]
    pub list_secs: u64,
    #[serde(default = "default_search_secs")]
    pub search_secs: u64,
    #[serde(default = "default_analytics_secs")]
    pub analytics_secs: u64,
}

fn default_entity_secs() -> u64 {
    10 * 60
}

fn default_list_secs() -> u64 {
    5 * 60
}

fn default_search_secs() -> u64 {
    2 * 60
}

fn default_analytics_secs() -> u64 {
    30 * 60
}

impl Default for TtlSettings {
    fn default() -> Self {
        Self {
            entity_secs: default_entity_secs(),
            list_secs: default_list_secs(),
            search_secs: default_search_secs(),
            analytics_secs: default_analytics_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// PostgreSQL URL. Falls back to `DATABASE_URL` when unset.
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    20
}

fn default_acquire_timeout() -> u64 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

impl DispatchConfig {
    /// Load from `path` (or `dispatch.yaml` if present) and the process
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, environment())
    }

    fn load_with(path: Option<&Path>, env: config::Environment) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let loaded: Self = config::Config::builder()
            .add_source(file)
            .add_source(env)
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.max_entries == 0 {
            return Err(ConfigError::Invalid("cache.max_entries must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.cache.compaction_percentage) {
            return Err(ConfigError::Invalid(format!(
                "cache.compaction_percentage must be between 0 and 1, got {}",
                self.cache.compaction_percentage
            )));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn cache_config(&self) -> CacheConfig {
        let sweep = match self.cache.sweep_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        CacheConfig::default()
            .with_max_entries(self.cache.max_entries)
            .with_compaction_percentage(self.cache.compaction_percentage)
            .with_default_expiration(
                Duration::from_secs(self.cache.default_absolute_secs),
                Duration::from_secs(self.cache.default_sliding_secs),
            )
            .with_sweep_interval(sweep)
    }

    pub fn ttl_policy(&self) -> TtlPolicy {
        TtlPolicy::default()
            .with_entity(Duration::from_secs(self.ttl.entity_secs))
            .with_list(Duration::from_secs(self.ttl.list_secs))
            .with_search(Duration::from_secs(self.ttl.search_secs))
            .with_analytics(Duration::from_secs(self.ttl.analytics_secs))
    }

    /// Configured database URL, or `DATABASE_URL`.
    pub fn database_url(&self) -> Option<String> {
        self.database
            .url
            .clone()
            .or_else(|| std::env::var("DATABASE_URL").ok())
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}
