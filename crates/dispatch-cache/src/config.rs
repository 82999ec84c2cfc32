//! Configuration for the tag cache and the cached repositories.

use std::time::Duration;

/// Configuration for [`TagCache`](crate::TagCache).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries before compaction runs.
    pub max_entries: usize,
    /// Fraction of entries (0.0-1.0) evicted by one compaction pass.
    pub compaction_percentage: f64,
    /// Absolute lifetime applied when an entry specifies no expiration.
    pub default_absolute_expiration: Duration,
    /// Sliding window applied when an entry specifies no expiration.
    pub default_sliding_expiration: Duration,
    /// Period of the background expiration sweep. `None` disables it.
    pub sweep_interval: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            compaction_percentage: 0.25,
            default_absolute_expiration: Duration::from_secs(30 * 60),
            default_sliding_expiration: Duration::from_secs(5 * 60),
            sweep_interval: Some(Duration::from_secs(60)),
        }
    }
}

impl CacheConfig {
    /// Set the entry limit.
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max.max(1);
        self
    }

    /// Set the fraction evicted per compaction, clamped to `0.0..=1.0`.
    pub fn with_compaction_percentage(mut self, fraction: f64) -> Self {
        self.compaction_percentage = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        self
    }

    /// Set the default expirations.
    pub fn with_default_expiration(mut self, absolute: Duration, sliding: Duration) -> Self {
        self.default_absolute_expiration = absolute;
        self.default_sliding_expiration = sliding;
        self
    }

    /// Set or disable the background sweep.
    pub fn with_sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.sweep_interval = interval;
        self
    }
}

/// Lifetimes used by the cached repositories, per kind of read.
///
/// A zero duration disables caching for that kind of read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    /// Single entities read by identity or unique key.
    pub entity: Duration,
    /// Collections, pages and counts.
    pub list: Duration,
    /// Free-text searches.
    pub search: Duration,
    /// Aggregates and reports.
    pub analytics: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            entity: Duration::from_secs(10 * 60),
            list: Duration::from_secs(5 * 60),
            search: Duration::from_secs(2 * 60),
            analytics: Duration::from_secs(30 * 60),
        }
    }
}

impl TtlPolicy {
    /// A policy that bypasses the cache for every read.
    pub fn disabled() -> Self {
        Self {
            entity: Duration::ZERO,
            list: Duration::ZERO,
            search: Duration::ZERO,
            analytics: Duration::ZERO,
        }
    }

    pub fn with_entity(mut self, ttl: Duration) -> Self {
        self.entity = ttl;
        self
    }

    pub fn with_list(mut self, ttl: Duration) -> Self {
        self.list = ttl;
        self
    }

    pub fn with_search(mut self, ttl: Duration) -> Self {
        self.search = ttl;
        self
    }

    pub fn with_analytics(mut self, ttl: Duration) -> Self {
        self.analytics = ttl;
        self
    }

    /// Names of the read kinds whose caching is disabled.
    pub fn disabled_kinds(&self) -> Vec<&'static str> {
        [
            ("entity", self.entity),
            ("list", self.list),
            ("search", self.search),
            ("analytics", self.analytics),
        ]
        .into_iter()
        .filter(|(_, ttl)| ttl.is_zero())
        .map(|(name, _)| name)
        .collect()
    }
}
