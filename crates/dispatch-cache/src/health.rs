//! Cache self-check: write, read back and remove a throwaway key.

use chrono::Utc;
use dispatch_core::cache::{CachePriority, EntryOptions};
use dispatch_core::ports::CacheService;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;

static NEXT_CHECK: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheHealth {
    pub status: HealthStatus,
    pub message: String,
}

impl CacheHealth {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    fn degraded(message: &str) -> Self {
        warn!(message, "Cache self-check failed");
        Self {
            status: HealthStatus::Degraded,
            message: message.to_string(),
        }
    }
}

/// Round-trips a short-lived, low-priority entry through `cache`.
pub async fn check(cache: &dyn CacheService) -> CacheHealth {
    let key = format!(
        "health_check:{}:{}",
        std::process::id(),
        NEXT_CHECK.fetch_add(1, Ordering::Relaxed)
    );
    let written = format!(r#"{{"checked_at":"{}","status":"test"}}"#, Utc::now().to_rfc3339());
    let options = EntryOptions::absolute(Duration::from_secs(30)).with_priority(CachePriority::Low);

    cache.set_bytes(&key, written.clone().into_bytes(), &[], options).await;
    let read = cache.get_bytes(&key).await;
    cache.remove(&key).await;

    match read {
        Some(bytes) if *bytes == *written.as_bytes() => {}
        Some(_) => return CacheHealth::degraded("cache returned a different value"),
        None => return CacheHealth::degraded("cache did not keep a written value"),
    }
    if cache.get_bytes(&key).await.is_some() {
        return CacheHealth::degraded("cache kept a removed value");
    }
    CacheHealth {
        status: HealthStatus::Healthy,
        message: "read/write round trip succeeded".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TagCache;
    use async_trait::async_trait;
    use dispatch_core::cache::CacheStats;
    use std::sync::Arc;

    /// Accepts writes and forgets them.
    struct ForgetfulCache;

    #[async_trait]
    impl CacheService for ForgetfulCache {
        async fn get_bytes(&self, _key: &str) -> Option<Arc<[u8]>> {
            None
        }

        async fn set_bytes(&self, _: &str, _: Vec<u8>, _: &[String], _: EntryOptions) {}

        async fn tag_stamp(&self, _tags: &[String]) -> u64 {
            0
        }

        async fn set_bytes_if_fresh(
            &self,
            _: &str,
            _: Vec<u8>,
            _: &[String],
            _: EntryOptions,
            _: u64,
        ) -> bool {
            false
        }

        async fn remove(&self, _key: &str) {}

        async fn remove_by_pattern(&self, _pattern: &str) -> usize {
            0
        }

        async fn invalidate_tags(&self, _tags: &[String]) {}

        async fn invalidate_all(&self) {}

        async fn stats(&self) -> CacheStats {
            CacheStats::default()
        }
    }

    #[tokio::test]
    async fn test_healthy_cache_leaves_nothing_behind() {
        let cache = TagCache::default();
        let health = check(&cache).await;
        assert!(health.is_healthy(), "{}", health.message);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_forgetful_cache_is_degraded() {
        let health = check(&ForgetfulCache).await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.message, "cache did not keep a written value");
    }
}
