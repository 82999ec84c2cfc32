use super::{MemoryEntity, Session, Tables};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatch_core::changes::ChangeKind;
use dispatch_core::customer::Customer;
use dispatch_core::entity::{Entity, EntityFilter, EntitySort};
use dispatch_core::ids::{CustomerId, OrderId};
use dispatch_core::order::{Order, OrderStatus};
use dispatch_core::paging::{Page, paginate};
use dispatch_core::ports::{
    CustomerRepository, FilterOf, IdOf, OrderRepository, PageRequestOf, ProductRepository,
    Repository,
};
use dispatch_core::product::Product;
use dispatch_core::reports::{
    CustomerIntervalCount, CustomerSummary, CustomerWithOrders, IntervalCount, OrderDetails,
    ProductSummary,
};
use dispatch_core::Result;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// Repository over one table of a [`Session`].
pub(crate) struct MemoryRepository<E> {
    session: Arc<Session>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: MemoryEntity> MemoryRepository<E> {
    pub(crate) fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            _entity: PhantomData,
        }
    }

    /// Rows matching `filter` in the entity's default order.
    async fn select(&self, filter: Option<&FilterOf<E>>) -> Vec<E> {
        let sort = <E::Sort as Default>::default();
        self.session
            .read(|tables| {
                let mut rows: Vec<E> = E::table(tables)
                    .values()
                    .filter(|e| filter.is_none_or(|f| f.matches(e)))
                    .cloned()
                    .collect();
                rows.sort_by(|a, b| sort.compare(a, b));
                rows
            })
            .await
    }

    fn track(&self, entity: E, kind: ChangeKind) {
        self.session.tracker.track(entity.into_tracked(), kind);
    }
}

#[async_trait]
impl<E: MemoryEntity> Repository for MemoryRepository<E> {
    type Entity = E;

    async fn get_by_id(&self, id: IdOf<E>) -> Result<Option<E>> {
        Ok(self.session.read(|t| E::table(t).get(&id).cloned()).await)
    }

    async fn get_all(&self) -> Result<Vec<E>> {
        Ok(self.select(None).await)
    }

    async fn find(&self, filter: &FilterOf<E>) -> Result<Vec<E>> {
        Ok(self.select(Some(filter)).await)
    }

    async fn first(&self, filter: &FilterOf<E>) -> Result<Option<E>> {
        Ok(self.select(Some(filter)).await.into_iter().next())
    }

    async fn exists(&self, filter: &FilterOf<E>) -> Result<bool> {
        Ok(self
            .session
            .read(|t| E::table(t).values().any(|e| filter.matches(e)))
            .await)
    }

    async fn count(&self, filter: Option<&FilterOf<E>>) -> Result<u64> {
        Ok(self
            .session
            .read(|t| {
                E::table(t)
                    .values()
                    .filter(|e| filter.is_none_or(|f| f.matches(e)))
                    .count() as u64
            })
            .await)
    }

    async fn get_paged(&self, request: &PageRequestOf<E>) -> Result<Page<E>> {
        request.validate()?;
        let rows = self.session.read(|t| E::table(t).values().cloned().collect()).await;
        paginate(rows, request)
    }

    async fn add(&self, entity: E) -> Result<()> {
        self.track(entity, ChangeKind::Added);
        Ok(())
    }

    async fn update(&self, entity: E) -> Result<()> {
        self.track(entity, ChangeKind::Modified);
        Ok(())
    }

    async fn remove(&self, entity: &E) -> Result<()> {
        self.track(entity.clone(), ChangeKind::Deleted);
        Ok(())
    }

    async fn remove_by_id(&self, id: IdOf<E>) -> Result<bool> {
        let removed = self
            .session
            .write(move |tables| {
                if !E::table(tables).contains_key(&id) {
                    return Ok(0);
                }
                E::check_unreferenced(tables, id)?;
                E::table_mut(tables).remove(&id);
                Ok(1)
            })
            .await?;
        Ok(removed > 0)
    }

    async fn add_range(&self, entities: Vec<E>) -> Result<()> {
        for entity in entities {
            self.track(entity, ChangeKind::Added);
        }
        Ok(())
    }

    async fn update_range(&self, entities: Vec<E>) -> Result<()> {
        for entity in entities {
            self.track(entity, ChangeKind::Modified);
        }
        Ok(())
    }

    async fn remove_range(&self, entities: &[E]) -> Result<()> {
        for entity in entities {
            self.track(entity.clone(), ChangeKind::Deleted);
        }
        Ok(())
    }
}

// Newest first, like every order listing.
fn newest_first(orders: &mut [Order]) {
    orders.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
}

fn orders_where(tables: &Tables, keep: impl Fn(&Order) -> bool) -> Vec<Order> {
    let mut orders: Vec<Order> = tables.orders.values().filter(|o| keep(o)).cloned().collect();
    newest_first(&mut orders);
    orders
}

fn details(tables: &Tables, order: Order) -> OrderDetails {
    OrderDetails {
        customer: tables.customers.get(&order.customer_id()).cloned(),
        product: tables.products.get(&order.product_id()).cloned(),
        order,
    }
}

#[async_trait]
impl OrderRepository for MemoryRepository<Order> {
    async fn by_customer(&self, customer_id: CustomerId) -> Result<Vec<Order>> {
        Ok(self
            .session
            .read(|t| orders_where(t, |o| o.customer_id() == customer_id))
            .await)
    }

    async fn by_customer_with_details(&self, customer_id: CustomerId) -> Result<Vec<OrderDetails>> {
        Ok(self
            .session
            .read(|t| {
                orders_where(t, |o| o.customer_id() == customer_id)
                    .into_iter()
                    .map(|o| details(t, o))
                    .collect()
            })
            .await)
    }

    async fn by_date_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Order>> {
        Ok(self
            .session
            .read(|t| orders_where(t, |o| o.created_at() >= from && o.created_at() <= to))
            .await)
    }

    async fn by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        Ok(self
            .session
            .read(|t| orders_where(t, |o| o.status() == status))
            .await)
    }

    async fn with_details(&self) -> Result<Vec<OrderDetails>> {
        Ok(self
            .session
            .read(|t| {
                orders_where(t, |_| true)
                    .into_iter()
                    .map(|o| details(t, o))
                    .collect()
            })
            .await)
    }

    async fn with_full_details(&self, id: OrderId) -> Result<Option<OrderDetails>> {
        Ok(self
            .session
            .read(|t| t.orders.get(&id).cloned().map(|o| details(t, o)))
            .await)
    }

    async fn count_by_distance_interval(&self) -> Result<Vec<IntervalCount>> {
        Ok(self
            .session
            .read(|t| IntervalCount::tally(t.orders.values()))
            .await)
    }

    async fn count_by_distance_interval_for_customer(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<IntervalCount>> {
        Ok(self
            .session
            .read(|t| {
                IntervalCount::tally(t.orders.values().filter(|o| o.customer_id() == customer_id))
            })
            .await)
    }

    async fn count_by_customer_and_interval(&self) -> Result<Vec<CustomerIntervalCount>> {
        Ok(self
            .session
            .read(|t| {
                let mut groups = BTreeMap::new();
                for order in t.orders.values() {
                    *groups
                        .entry((order.customer_id(), order.distance_interval()))
                        .or_insert(0u64) += 1;
                }
                let mut rows: Vec<CustomerIntervalCount> = groups
                    .into_iter()
                    .filter_map(|((customer_id, interval), count)| {
                        let customer = t.customers.get(&customer_id)?;
                        Some(CustomerIntervalCount {
                            customer_id,
                            customer_name: customer.name().to_string(),
                            interval,
                            count,
                        })
                    })
                    .collect();
                rows.sort_by(|a, b| {
                    a.customer_name
                        .cmp(&b.customer_name)
                        .then(a.customer_id.cmp(&b.customer_id))
                        .then(a.interval.cmp(&b.interval))
                });
                rows
            })
            .await)
    }

    async fn has_orders_in_progress_for_customer(&self, customer_id: CustomerId) -> Result<bool> {
        Ok(self
            .session
            .read(|t| {
                t.orders.values().any(|o| {
                    o.customer_id() == customer_id
                        && matches!(o.status(), OrderStatus::Created | OrderStatus::InProgress)
                })
            })
            .await)
    }
}

fn customers_by_name(tables: &Tables, keep: impl Fn(&Customer) -> bool) -> Vec<Customer> {
    let mut customers: Vec<Customer> =
        tables.customers.values().filter(|c| keep(c)).cloned().collect();
    customers.sort_by(|a, b| a.name().cmp(b.name()));
    customers
}

#[async_trait]
impl CustomerRepository for MemoryRepository<Customer> {
    async fn get_by_email(&self, email: &str) -> Result<Option<Customer>> {
        let email = email.trim().to_lowercase();
        Ok(self
            .session
            .read(|t| t.customers.values().find(|c| c.email() == email).cloned())
            .await)
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool> {
        let email = email.trim().to_lowercase();
        Ok(self
            .session
            .read(|t| t.customers.values().any(|c| c.email() == email))
            .await)
    }

    async fn with_orders(&self) -> Result<Vec<CustomerWithOrders>> {
        Ok(self
            .session
            .read(|t| {
                customers_by_name(t, |_| true)
                    .into_iter()
                    .filter_map(|customer| {
                        let id = customer.id();
                        let orders = orders_where(t, |o| o.customer_id() == id);
                        (!orders.is_empty()).then_some(CustomerWithOrders { customer, orders })
                    })
                    .collect()
            })
            .await)
    }

    async fn search_by_name(&self, term: &str) -> Result<Vec<Customer>> {
        let term = term.trim().to_lowercase();
        Ok(self
            .session
            .read(|t| customers_by_name(t, |c| c.name().to_lowercase().contains(&term)))
            .await)
    }

    async fn customer_list(&self) -> Result<Vec<CustomerSummary>> {
        Ok(self
            .session
            .read(|t| {
                customers_by_name(t, |_| true)
                    .iter()
                    .map(CustomerSummary::from)
                    .collect()
            })
            .await)
    }
}

fn products_by_name(tables: &Tables, keep: impl Fn(&Product) -> bool) -> Vec<Product> {
    let mut products: Vec<Product> =
        tables.products.values().filter(|p| keep(p)).cloned().collect();
    products.sort_by(|a, b| a.name().cmp(b.name()));
    products
}

#[async_trait]
impl ProductRepository for MemoryRepository<Product> {
    async fn search_by_name(&self, term: &str) -> Result<Vec<Product>> {
        let term = term.trim().to_lowercase();
        Ok(self
            .session
            .read(|t| products_by_name(t, |p| p.name().to_lowercase().contains(&term)))
            .await)
    }

    async fn active_products(&self) -> Result<Vec<Product>> {
        Ok(self
            .session
            .read(|t| products_by_name(t, Product::is_active))
            .await)
    }

    async fn by_price_range(&self, min_cents: u64, max_cents: u64) -> Result<Vec<Product>> {
        Ok(self
            .session
            .read(|t| {
                let mut products: Vec<Product> = t
                    .products
                    .values()
                    .filter(|p| (min_cents..=max_cents).contains(&p.unit_price_cents()))
                    .cloned()
                    .collect();
                products.sort_by_key(Product::unit_price_cents);
                products
            })
            .await)
    }

    async fn product_list(&self) -> Result<Vec<ProductSummary>> {
        Ok(self
            .session
            .read(|t| {
                products_by_name(t, |_| true)
                    .iter()
                    .map(ProductSummary::from)
                    .collect()
            })
            .await)
    }

    async fn average_price(&self) -> Result<Option<u64>> {
        Ok(self
            .session
            .read(|t| {
                let count = t.products.len() as u64;
                if count == 0 {
                    return None;
                }
                let total: u64 = t.products.values().map(Product::unit_price_cents).sum();
                Some((total + count / 2) / count)
            })
            .await)
    }

    async fn price_range(&self) -> Result<Option<(u64, u64)>> {
        Ok(self
            .session
            .read(|t| {
                let prices = t.products.values().map(Product::unit_price_cents);
                prices.clone().min().zip(prices.max())
            })
            .await)
    }
}
