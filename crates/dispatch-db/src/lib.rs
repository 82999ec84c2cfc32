//! Storage layer for Dispatch.
//!
//! Two [`DataContext`](dispatch_core::ports::DataContext) implementations
//! (an in-memory store and PostgreSQL), read-through cached repository
//! decorators, and the cache-invalidating unit of work that ties them
//! together.

pub mod cached;
pub mod memory;
pub mod postgres;
pub mod tracking;
pub mod unit_of_work;

pub use cached::{CachedCustomerRepository, CachedOrderRepository, CachedProductRepository};
pub use memory::{MemoryDataContext, MemoryDatabase};
pub use postgres::{Database, PgDataContext};
pub use tracking::ChangeTracker;
pub use unit_of_work::{CachingUnitOfWork, invalidation_tags};
