//! In-process tag-invalidated cache for Dispatch.
//!
//! [`TagCache`] stores serialized values with per-entry expiration and a
//! bounded size, and keeps a bidirectional key/tag index so that whole
//! groups of entries can be dropped with one tag invalidation.

pub mod config;
pub mod health;
pub mod index;
pub mod keys;
pub mod store;
pub mod typed;
pub mod wrappers;

pub use config::{CacheConfig, TtlPolicy};
pub use health::{CacheHealth, HealthStatus};
pub use index::TagIndex;
pub use store::{EvictionListener, TagCache, format_bytes};
pub use typed::TypedCache;
pub use wrappers::{
    AveragePriceWrapper, CountWrapper, IntervalCountsWrapper, PagedResultWrapper,
    PriceRangeWrapper,
};
