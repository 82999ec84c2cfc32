use super::{EntityCache, ReadKind};
use async_trait::async_trait;
use dispatch_cache::keys::{customers as keys, tags};
use dispatch_cache::{TtlPolicy, TypedCache};
use dispatch_core::Result;
use dispatch_core::customer::{Customer, CustomerFilter};
use dispatch_core::ids::CustomerId;
use dispatch_core::paging::Page;
use dispatch_core::ports::{CustomerRepository, PageRequestOf, Repository};
use dispatch_core::reports::{CustomerSummary, CustomerWithOrders};
use std::sync::Arc;

/// Caching decorator over a [`CustomerRepository`].
pub struct CachedCustomerRepository {
    inner: Arc<dyn CustomerRepository>,
    cache: EntityCache<Customer>,
}

impl CachedCustomerRepository {
    pub fn new(inner: Arc<dyn CustomerRepository>, cache: TypedCache, ttl: TtlPolicy) -> Self {
        Self {
            inner,
            cache: EntityCache::new(
                cache,
                ttl,
                keys::PLURAL,
                tags::CUSTOMERS,
                tags::CUSTOMER_LISTS,
                tags::customer,
            ),
        }
    }
}

#[async_trait]
impl Repository for CachedCustomerRepository {
    type Entity = Customer;

    async fn get_by_id(&self, id: CustomerId) -> Result<Option<Customer>> {
        self.cache
            .get_by_id(keys::by_id(id), id, || self.inner.get_by_id(id))
            .await
    }

    async fn get_all(&self) -> Result<Vec<Customer>> {
        self.cache.get_all(|| self.inner.get_all()).await
    }

    async fn find(&self, filter: &CustomerFilter) -> Result<Vec<Customer>> {
        self.cache.find(filter, || self.inner.find(filter)).await
    }

    async fn first(&self, filter: &CustomerFilter) -> Result<Option<Customer>> {
        self.cache.first(filter, || self.inner.first(filter)).await
    }

    async fn exists(&self, filter: &CustomerFilter) -> Result<bool> {
        self.inner.exists(filter).await
    }

    async fn count(&self, filter: Option<&CustomerFilter>) -> Result<u64> {
        self.cache.count(filter, || self.inner.count(filter)).await
    }

    async fn get_paged(&self, request: &PageRequestOf<Customer>) -> Result<Page<Customer>> {
        self.cache
            .get_paged(request, || self.inner.get_paged(request))
            .await
    }

    async fn add(&self, entity: Customer) -> Result<()> {
        self.inner.add(entity).await
    }

    async fn update(&self, entity: Customer) -> Result<()> {
        self.inner.update(entity).await
    }

    async fn remove(&self, entity: &Customer) -> Result<()> {
        self.inner.remove(entity).await
    }

    async fn remove_by_id(&self, id: CustomerId) -> Result<bool> {
        let removed = self.inner.remove_by_id(id).await?;
        self.cache.invalidate_entity(id).await;
        Ok(removed)
    }

    async fn add_range(&self, entities: Vec<Customer>) -> Result<()> {
        self.inner.add_range(entities).await
    }

    async fn update_range(&self, entities: Vec<Customer>) -> Result<()> {
        self.inner.update_range(entities).await
    }

    async fn remove_range(&self, entities: &[Customer]) -> Result<()> {
        self.inner.remove_range(entities).await
    }
}

#[async_trait]
impl CustomerRepository for CachedCustomerRepository {
    async fn get_by_email(&self, email: &str) -> Result<Option<Customer>> {
        // The id is unknown until loaded; any customer save drops the type tag.
        let tags = vec![tags::CUSTOMERS.to_string()];
        self.cache
            .read_optional(&keys::by_email(email), &tags, ReadKind::Entity, || {
                self.inner.get_by_email(email)
            })
            .await
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool> {
        self.inner.exists_by_email(email).await
    }

    async fn with_orders(&self) -> Result<Vec<CustomerWithOrders>> {
        let tags = self.cache.list_tags(&[tags::ORDERS.to_string()]);
        self.cache
            .read(keys::WITH_ORDERS, &tags, ReadKind::List, || {
                self.inner.with_orders()
            })
            .await
    }

    async fn search_by_name(&self, term: &str) -> Result<Vec<Customer>> {
        let tags = self.cache.list_tags(&[]);
        self.cache
            .read(&keys::search(term), &tags, ReadKind::Search, || {
                self.inner.search_by_name(term)
            })
            .await
    }

    async fn customer_list(&self) -> Result<Vec<CustomerSummary>> {
        let tags = self.cache.list_tags(&[]);
        self.cache
            .read(keys::LIST, &tags, ReadKind::List, || self.inner.customer_list())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cached::test_support::RecordingCache;
    use crate::memory::MemoryDatabase;
    use dispatch_core::ports::{CacheService, DataContext};

    async fn setup() -> (
        crate::memory::MemoryDataContext,
        Arc<RecordingCache>,
        CachedCustomerRepository,
    ) {
        let ctx = MemoryDatabase::new().context();
        ctx.customers()
            .add_range(vec![
                Customer::create("Bob", "bob@example.com", "2").unwrap(),
                Customer::create("Ana", "ana@example.com", "1").unwrap(),
            ])
            .await
            .unwrap();
        ctx.save_changes().await.unwrap();

        let cache = RecordingCache::new();
        let service: Arc<dyn CacheService> = cache.clone();
        let repo = CachedCustomerRepository::new(
            ctx.customers(),
            TypedCache::new(service),
            TtlPolicy::default(),
        );
        (ctx, cache, repo)
    }

    #[tokio::test]
    async fn test_email_lookup_is_cached_case_insensitively() {
        let (_ctx, cache, repo) = setup().await;
        let a = repo.get_by_email("Ana@Example.com").await.unwrap().unwrap();
        let b = repo.get_by_email("ana@example.com").await.unwrap().unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(cache.written_keys(), vec![keys::by_email("ana@example.com")]);
        assert_eq!(cache.inner.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_missing_email_is_not_cached() {
        let (_ctx, cache, repo) = setup().await;
        assert!(repo.get_by_email("nobody@example.com").await.unwrap().is_none());
        assert!(cache.written_keys().is_empty());
        assert!(!repo.exists_by_email("nobody@example.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_is_ordered_and_tagged() {
        let (_ctx, cache, repo) = setup().await;
        let names: Vec<String> = repo
            .customer_list()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Ana", "Bob"]);

        cache.invalidate_tag(tags::CUSTOMER_LISTS).await;
        assert!(cache.inner.is_empty());
    }

    #[tokio::test]
    async fn test_count_and_page_use_wrappers() {
        let (_ctx, cache, repo) = setup().await;
        assert_eq!(repo.count(None).await.unwrap(), 2);
        assert_eq!(repo.count(None).await.unwrap(), 2);

        let request = dispatch_core::paging::PageRequest::new(1, 1);
        let page = repo.get_paged(&request).await.unwrap();
        assert_eq!(page.total_count, 2);
        assert_eq!(page.items.len(), 1);

        let stats = cache.inner.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.total_keys, 2);
    }
}
