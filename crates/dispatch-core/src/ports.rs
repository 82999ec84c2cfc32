//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the core domain and the
//! storage and cache adapters.

use crate::cache::{CacheStats, EntryOptions};
use crate::changes::EntityChange;
use crate::customer::Customer;
use crate::entity::Entity;
use crate::ids::{CustomerId, OrderId};
use crate::order::{Order, OrderStatus};
use crate::paging::{Page, PageRequest};
use crate::product::Product;
use crate::reports::{
    CustomerIntervalCount, CustomerSummary, CustomerWithOrders, IntervalCount, OrderDetails,
    ProductSummary,
};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub type IdOf<E> = <E as Entity>::Id;
pub type FilterOf<E> = <E as Entity>::Filter;
pub type SortOf<E> = <E as Entity>::Sort;
pub type PageRequestOf<E> = PageRequest<FilterOf<E>, SortOf<E>>;

/// Generic repository contract shared by every entity.
///
/// `add`, `update`, `remove` and the range variants only record the change;
/// it is written by the next `save_changes`. `remove_by_id` deletes
/// immediately.
#[async_trait]
pub trait Repository: Send + Sync {
    type Entity: Entity;

    async fn get_by_id(&self, id: IdOf<Self::Entity>) -> Result<Option<Self::Entity>>;

    async fn get_all(&self) -> Result<Vec<Self::Entity>>;

    async fn find(&self, filter: &FilterOf<Self::Entity>) -> Result<Vec<Self::Entity>>;

    async fn first(&self, filter: &FilterOf<Self::Entity>) -> Result<Option<Self::Entity>>;

    async fn exists(&self, filter: &FilterOf<Self::Entity>) -> Result<bool>;

    async fn count(&self, filter: Option<&FilterOf<Self::Entity>>) -> Result<u64>;

    async fn get_paged(
        &self,
        request: &PageRequestOf<Self::Entity>,
    ) -> Result<Page<Self::Entity>>;

    async fn add(&self, entity: Self::Entity) -> Result<()>;

    async fn update(&self, entity: Self::Entity) -> Result<()>;

    async fn remove(&self, entity: &Self::Entity) -> Result<()>;

    /// Deletes the row directly. Returns whether a row existed.
    async fn remove_by_id(&self, id: IdOf<Self::Entity>) -> Result<bool>;

    async fn add_range(&self, entities: Vec<Self::Entity>) -> Result<()>;

    async fn update_range(&self, entities: Vec<Self::Entity>) -> Result<()>;

    async fn remove_range(&self, entities: &[Self::Entity]) -> Result<()>;
}

#[async_trait]
pub trait OrderRepository: Repository<Entity = Order> {
    async fn by_customer(&self, customer_id: CustomerId) -> Result<Vec<Order>>;

    async fn by_customer_with_details(&self, customer_id: CustomerId)
    -> Result<Vec<OrderDetails>>;

    /// Orders created within `[from, to]`.
    async fn by_date_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Order>>;

    async fn by_status(&self, status: OrderStatus) -> Result<Vec<Order>>;

    async fn with_details(&self) -> Result<Vec<OrderDetails>>;

    async fn with_full_details(&self, id: OrderId) -> Result<Option<OrderDetails>>;

    async fn count_by_distance_interval(&self) -> Result<Vec<IntervalCount>>;

    async fn count_by_distance_interval_for_customer(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<IntervalCount>>;

    async fn count_by_customer_and_interval(&self) -> Result<Vec<CustomerIntervalCount>>;

    async fn has_orders_in_progress_for_customer(&self, customer_id: CustomerId) -> Result<bool>;
}

#[async_trait]
pub trait CustomerRepository: Repository<Entity = Customer> {
    async fn get_by_email(&self, email: &str) -> Result<Option<Customer>>;

    async fn exists_by_email(&self, email: &str) -> Result<bool>;

    /// Customers that have at least one order, with their orders.
    async fn with_orders(&self) -> Result<Vec<CustomerWithOrders>>;

    async fn search_by_name(&self, term: &str) -> Result<Vec<Customer>>;

    async fn customer_list(&self) -> Result<Vec<CustomerSummary>>;
}

#[async_trait]
pub trait ProductRepository: Repository<Entity = Product> {
    async fn search_by_name(&self, term: &str) -> Result<Vec<Product>>;

    async fn active_products(&self) -> Result<Vec<Product>>;

    /// Products priced within `[min, max]` cents, cheapest first.
    async fn by_price_range(&self, min_cents: u64, max_cents: u64) -> Result<Vec<Product>>;

    async fn product_list(&self) -> Result<Vec<ProductSummary>>;

    /// Mean unit price in cents, `None` for an empty catalog.
    async fn average_price(&self) -> Result<Option<u64>>;

    /// `(min, max)` unit price in cents, `None` for an empty catalog.
    async fn price_range(&self) -> Result<Option<(u64, u64)>>;
}

/// A change-tracking session over durable storage.
///
/// Repositories obtained from a context share its change tracker and its
/// transaction.
#[async_trait]
pub trait DataContext: Send + Sync {
    fn orders(&self) -> Arc<dyn OrderRepository>;

    fn customers(&self) -> Arc<dyn CustomerRepository>;

    fn products(&self) -> Arc<dyn ProductRepository>;

    /// Snapshot of the changes the next `save_changes` will write.
    fn pending_changes(&self) -> Vec<EntityChange>;

    /// Writes all pending changes atomically. Returns the number of rows written.
    async fn save_changes(&self) -> Result<u64>;

    async fn begin_transaction(&self) -> Result<()>;

    async fn commit_transaction(&self) -> Result<()>;

    async fn rollback_transaction(&self) -> Result<()>;
}

/// Transactional facade used by application services.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    fn orders(&self) -> &dyn OrderRepository;

    fn customers(&self) -> &dyn CustomerRepository;

    fn products(&self) -> &dyn ProductRepository;

    async fn save_changes(&self) -> Result<u64>;

    async fn begin_transaction(&self) -> Result<()>;

    async fn commit_transaction(&self) -> Result<()>;

    async fn rollback_transaction(&self) -> Result<()>;

    fn in_transaction(&self) -> bool;
}

/// Tag-aware cache holding serialized values.
///
/// Implementations never fail: internal problems are logged and surface as
/// misses.
#[async_trait]
pub trait CacheService: Send + Sync {
    async fn get_bytes(&self, key: &str) -> Option<Arc<[u8]>>;

    async fn set_bytes(&self, key: &str, value: Vec<u8>, tags: &[String], options: EntryOptions);

    /// Opaque stamp that changes whenever any of `tags` is invalidated.
    async fn tag_stamp(&self, tags: &[String]) -> u64;

    /// Stores the value only if none of `tags` was invalidated since `stamp`
    /// was taken. Returns whether it was stored.
    async fn set_bytes_if_fresh(
        &self,
        key: &str,
        value: Vec<u8>,
        tags: &[String],
        options: EntryOptions,
        stamp: u64,
    ) -> bool;

    async fn remove(&self, key: &str);

    /// Removes every key containing `pattern` (case-insensitive).
    async fn remove_by_pattern(&self, pattern: &str) -> usize;

    async fn invalidate_tag(&self, tag: &str) {
        self.invalidate_tags(&[tag.to_string()]).await;
    }

    async fn invalidate_tags(&self, tags: &[String]);

    async fn invalidate_all(&self);

    async fn stats(&self) -> CacheStats;
}
