//! Unit of work that keeps the shared cache consistent with committed writes.
//!
//! [`CachingUnitOfWork`] wraps a [`DataContext`], hands out the cached
//! repository decorators and, after every successful save, drops the cache
//! tags covering what was written. A failed save leaves the cache untouched.

use crate::cached::{CachedCustomerRepository, CachedOrderRepository, CachedProductRepository};
use async_trait::async_trait;
use dispatch_cache::keys::tags;
use dispatch_cache::{TtlPolicy, TypedCache};
use dispatch_core::changes::{ChangeKind, EntityChange, TrackedEntity};
use dispatch_core::ports::{
    CacheService, CustomerRepository, DataContext, FilterOf, OrderRepository, ProductRepository,
    Repository, UnitOfWork,
};
use dispatch_core::{Error, Result};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Tags to invalidate after `changes` were written, deduplicated and sorted.
pub fn invalidation_tags(changes: &[EntityChange]) -> Vec<String> {
    let mut out = BTreeSet::new();
    for change in changes {
        match &change.entity {
            TrackedEntity::Order(order) => {
                out.insert(tags::ORDERS.to_string());
                out.insert(tags::ORDER_LISTS.to_string());
                out.insert(tags::customer_orders(order.customer_id()));
                out.insert(tags::product_orders(order.product_id()));
                out.insert(tags::REPORTS.to_string());
                if change.kind != ChangeKind::Added {
                    out.insert(tags::order(order.id()));
                }
            }
            TrackedEntity::Customer(customer) => {
                out.insert(tags::CUSTOMERS.to_string());
                out.insert(tags::CUSTOMER_LISTS.to_string());
                out.insert(tags::customer(customer.id()));
                out.insert(tags::customer_orders(customer.id()));
            }
            TrackedEntity::Product(product) => {
                out.insert(tags::PRODUCTS.to_string());
                out.insert(tags::PRODUCT_LISTS.to_string());
                out.insert(tags::product(product.id()));
                out.insert(tags::REPORTS.to_string());
                out.insert(tags::product_orders(product.id()));
            }
        }
    }
    out.into_iter().collect()
}

/// [`UnitOfWork`] over any [`DataContext`] with read-through caching.
///
/// Inside an explicit transaction the repositories read straight from
/// storage and write nothing to the shared cache, so uncommitted rows never
/// reach other sessions. The tags of each save are collected and invalidated
/// once at commit; a rollback drops them.
pub struct CachingUnitOfWork<C: DataContext> {
    context: C,
    cache: Arc<dyn CacheService>,
    orders: CachedOrderRepository,
    customers: CachedCustomerRepository,
    products: CachedProductRepository,
    in_transaction: Arc<AtomicBool>,
    deferred: Mutex<BTreeSet<String>>,
}

impl<C: DataContext> CachingUnitOfWork<C> {
    pub fn new(context: C, cache: Arc<dyn CacheService>, ttl: TtlPolicy) -> Self {
        let in_transaction = Arc::new(AtomicBool::new(false));
        let typed = TypedCache::new(cache.clone()).with_bypass(in_transaction.clone());
        Self {
            orders: CachedOrderRepository::new(context.orders(), typed.clone(), ttl),
            customers: CachedCustomerRepository::new(context.customers(), typed.clone(), ttl),
            products: CachedProductRepository::new(context.products(), typed, ttl),
            context,
            cache,
            in_transaction,
            deferred: Mutex::new(BTreeSet::new()),
        }
    }

    /// The wrapped context, for uncached access.
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Applies `apply` to every entity matching `filter` and saves.
    ///
    /// Nothing is tracked if `apply` fails for any entity. Returns the number
    /// of rows written.
    pub async fn bulk_update<R, F>(
        &self,
        repository: &R,
        filter: &FilterOf<R::Entity>,
        mut apply: F,
    ) -> Result<u64>
    where
        R: Repository + ?Sized,
        F: FnMut(&mut R::Entity) -> Result<()> + Send,
    {
        let mut matches = repository.find(filter).await?;
        if matches.is_empty() {
            return Ok(0);
        }
        for entity in &mut matches {
            apply(entity)?;
        }
        let count = matches.len();
        repository.update_range(matches).await?;
        let written = self.save_changes().await?;
        info!(matched = count, written, "Bulk update saved");
        Ok(written)
    }

    /// Removes every entity matching `filter` and saves.
    pub async fn bulk_delete<R>(&self, repository: &R, filter: &FilterOf<R::Entity>) -> Result<u64>
    where
        R: Repository + ?Sized,
    {
        let matches = repository.find(filter).await?;
        if matches.is_empty() {
            return Ok(0);
        }
        repository.remove_range(&matches).await?;
        let written = self.save_changes().await?;
        info!(matched = matches.len(), written, "Bulk delete saved");
        Ok(written)
    }

    fn deferred_tags(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        self.deferred.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn flush_deferred(&self) {
        let pending: Vec<String> = {
            let mut deferred = self.deferred_tags();
            std::mem::take(&mut *deferred).into_iter().collect()
        };
        if pending.is_empty() {
            return;
        }
        debug!(tags = pending.len(), "Flushing deferred invalidations");
        self.cache.invalidate_tags(&pending).await;
    }
}

#[async_trait]
impl<C: DataContext> UnitOfWork for CachingUnitOfWork<C> {
    fn orders(&self) -> &dyn OrderRepository {
        &self.orders
    }

    fn customers(&self) -> &dyn CustomerRepository {
        &self.customers
    }

    fn products(&self) -> &dyn ProductRepository {
        &self.products
    }

    async fn save_changes(&self) -> Result<u64> {
        let changes = self.context.pending_changes();
        let written = match self.context.save_changes().await {
            Ok(written) => written,
            Err(e) => {
                warn!(error = %e, pending = changes.len(), "Save failed, cache left untouched");
                return Err(e);
            }
        };

        let stale = invalidation_tags(&changes);
        if stale.is_empty() {
            return Ok(written);
        }
        if self.in_transaction() {
            debug!(tags = stale.len(), "Deferring invalidation until transaction ends");
            self.deferred_tags().extend(stale);
        } else {
            debug!(tags = ?stale, "Invalidating after save");
            self.cache.invalidate_tags(&stale).await;
        }
        Ok(written)
    }

    async fn begin_transaction(&self) -> Result<()> {
        if self.in_transaction() {
            return Err(Error::TransactionAlreadyActive);
        }
        self.context.begin_transaction().await?;
        self.in_transaction.store(true, Ordering::SeqCst);
        debug!("Transaction started");
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<()> {
        if !self.in_transaction() {
            return Err(Error::NoActiveTransaction("commit"));
        }
        let result = self.context.commit_transaction().await;
        if let Err(e) = &result {
            warn!(error = %e, "Commit failed, rolling back");
            if let Err(rollback) = self.context.rollback_transaction().await {
                debug!(error = %rollback, "Rollback after failed commit did not run");
            }
        }
        self.in_transaction.store(false, Ordering::SeqCst);
        self.flush_deferred().await;
        result
    }

    async fn rollback_transaction(&self) -> Result<()> {
        if !self.in_transaction() {
            return Err(Error::NoActiveTransaction("rollback"));
        }
        let result = self.context.rollback_transaction().await;
        let dropped = std::mem::take(&mut *self.deferred_tags()).len();
        self.in_transaction.store(false, Ordering::SeqCst);
        debug!(dropped, "Transaction rolled back");
        result
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }
}
