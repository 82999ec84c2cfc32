//! Cache entry options and statistics.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Eviction priority used when the cache is over capacity.
///
/// Lower priorities are evicted first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CachePriority {
    Low,
    #[default]
    Normal,
    High,
}

/// Per-entry expiration settings.
///
/// A missing `absolute_expiration` is replaced by the cache's default
/// absolute expiration, so every entry expires. `sliding_expiration` is only
/// defaulted when both fields are unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryOptions {
    pub absolute_expiration: Option<Duration>,
    pub sliding_expiration: Option<Duration>,
    pub priority: CachePriority,
}

impl EntryOptions {
    pub fn absolute(ttl: Duration) -> Self {
        Self {
            absolute_expiration: Some(ttl),
            ..Default::default()
        }
    }

    pub fn sliding(window: Duration) -> Self {
        Self {
            sliding_expiration: Some(window),
            ..Default::default()
        }
    }

    pub fn with_sliding(mut self, window: Duration) -> Self {
        self.sliding_expiration = Some(window);
        self
    }

    pub fn with_priority(mut self, priority: CachePriority) -> Self {
        self.priority = priority;
        self
    }
}

/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    Removed,
    Replaced,
    Expired,
    Capacity,
    TagInvalidated,
    Cleared,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagInfo {
    pub tag: String,
    pub key_count: usize,
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_keys: usize,
    pub estimated_memory_bytes: u64,
    pub estimated_memory: String,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub evictions: u64,
    pub tags: Vec<TagInfo>,
}

impl CacheStats {
    pub fn tag(&self, name: &str) -> Option<&TagInfo> {
        self.tags.iter().find(|t| t.tag == name)
    }
}
