//! Envelope types for values stored by the cached repositories.
//!
//! Scalars and tuples are wrapped so every cached payload is a JSON object
//! with named fields. The wrappers exist only at the cache boundary; the
//! repository API returns the plain values.

use dispatch_core::paging::Page;
use dispatch_core::reports::IntervalCount;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountWrapper {
    pub count: u64,
}

impl From<u64> for CountWrapper {
    fn from(count: u64) -> Self {
        Self { count }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagedResultWrapper<T> {
    pub items: Vec<T>,
    pub total_count: u64,
}

impl<T> From<Page<T>> for PagedResultWrapper<T> {
    fn from(page: Page<T>) -> Self {
        Self {
            items: page.items,
            total_count: page.total_count,
        }
    }
}

impl<T> From<PagedResultWrapper<T>> for Page<T> {
    fn from(wrapper: PagedResultWrapper<T>) -> Self {
        Page {
            items: wrapper.items,
            total_count: wrapper.total_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AveragePriceWrapper {
    pub average_cents: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRangeWrapper {
    pub min_cents: Option<u64>,
    pub max_cents: Option<u64>,
}

impl From<Option<(u64, u64)>> for PriceRangeWrapper {
    fn from(range: Option<(u64, u64)>) -> Self {
        Self {
            min_cents: range.map(|(min, _)| min),
            max_cents: range.map(|(_, max)| max),
        }
    }
}

impl PriceRangeWrapper {
    pub fn into_range(self) -> Option<(u64, u64)> {
        self.min_cents.zip(self.max_cents)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalCountsWrapper {
    pub counts: Vec<IntervalCount>,
}
