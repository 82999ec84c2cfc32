use super::PgSession;
use super::schema::{
    CUSTOMER_COLUMNS, DISTANCE_BAND, ORDER_COLUMNS, PRODUCT_COLUMNS, PgEntity, band, cents,
    column, contains_pattern,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatch_core::changes::ChangeKind;
use dispatch_core::customer::Customer;
use dispatch_core::entity::Entity;
use dispatch_core::ids::{CustomerId, OrderId, ProductId};
use dispatch_core::order::{Order, OrderStatus};
use dispatch_core::paging::Page;
use dispatch_core::ports::{
    CustomerRepository, FilterOf, IdOf, OrderRepository, PageRequestOf, ProductRepository,
    Repository,
};
use dispatch_core::product::Product;
use dispatch_core::reports::{
    CustomerIntervalCount, CustomerSummary, CustomerWithOrders, IntervalCount, OrderDetails,
    ProductSummary,
};
use dispatch_core::{Error, Result};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Postgres, QueryBuilder};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

/// Repository over one table of a [`PgSession`].
pub(crate) struct PgRepository<E> {
    session: Arc<PgSession>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: PgEntity> PgRepository<E> {
    pub(crate) fn new(session: Arc<PgSession>) -> Self {
        Self {
            session,
            _entity: PhantomData,
        }
    }

    fn select(filter: Option<&FilterOf<E>>) -> QueryBuilder<'static, Postgres> {
        let mut builder = QueryBuilder::new(format!(
            "SELECT {} FROM {} WHERE TRUE",
            E::COLUMNS,
            E::TABLE
        ));
        if let Some(filter) = filter {
            E::push_filter(&mut builder, filter);
        }
        builder
    }

    fn order_by(builder: &mut QueryBuilder<'static, Postgres>, sort: E::Sort, ascending: bool) {
        let direction = if ascending { "ASC" } else { "DESC" };
        builder.push(format!(
            " ORDER BY {} {direction}, id {direction}",
            E::sort_column(sort)
        ));
    }

    async fn rows(&self, query: Query<'_, Postgres, PgArguments>) -> Result<Vec<E>> {
        self.session
            .fetch_all(query)
            .await?
            .iter()
            .map(E::from_row)
            .collect()
    }

    async fn list(&self, filter: Option<&FilterOf<E>>, limit: Option<i64>) -> Result<Vec<E>> {
        let mut builder = Self::select(filter);
        Self::order_by(&mut builder, E::Sort::default(), true);
        if let Some(limit) = limit {
            builder.push(" LIMIT ").push_bind(limit);
        }
        self.rows(builder.build()).await
    }

    fn track(&self, entity: E, kind: ChangeKind) {
        self.session.tracker.track(entity.into_tracked(), kind);
    }
}

#[async_trait]
impl<E: PgEntity> Repository for PgRepository<E> {
    type Entity = E;

    async fn get_by_id(&self, id: IdOf<E>) -> Result<Option<E>> {
        let sql = format!("SELECT {} FROM {} WHERE id = $1", E::COLUMNS, E::TABLE);
        let row = self
            .session
            .fetch_optional(sqlx::query(&sql).bind(E::key(id)))
            .await?;
        row.as_ref().map(E::from_row).transpose()
    }

    async fn get_all(&self) -> Result<Vec<E>> {
        self.list(None, None).await
    }

    async fn find(&self, filter: &FilterOf<E>) -> Result<Vec<E>> {
        self.list(Some(filter), None).await
    }

    async fn first(&self, filter: &FilterOf<E>) -> Result<Option<E>> {
        Ok(self.list(Some(filter), Some(1)).await?.into_iter().next())
    }

    async fn exists(&self, filter: &FilterOf<E>) -> Result<bool> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE TRUE",
            E::TABLE
        ));
        E::push_filter(&mut builder, filter);
        builder.push(") AS found");
        let row = self.session.fetch_one(builder.build()).await?;
        column(&row, "found")
    }

    async fn count(&self, filter: Option<&FilterOf<E>>) -> Result<u64> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT COUNT(*) AS total FROM {} WHERE TRUE",
            E::TABLE
        ));
        if let Some(filter) = filter {
            E::push_filter(&mut builder, filter);
        }
        let row = self.session.fetch_one(builder.build()).await?;
        let total: i64 = column(&row, "total")?;
        Ok(total.max(0) as u64)
    }

    async fn get_paged(&self, request: &PageRequestOf<E>) -> Result<Page<E>> {
        request.validate()?;
        let total_count = self.count(request.filter.as_ref()).await?;

        let mut builder = Self::select(request.filter.as_ref());
        Self::order_by(&mut builder, request.sort.unwrap_or_default(), request.ascending);
        builder
            .push(" LIMIT ")
            .push_bind(i64::from(request.page_size))
            .push(" OFFSET ")
            .push_bind(i64::try_from(request.offset()).unwrap_or(i64::MAX));
        let items = self.rows(builder.build()).await?;

        Ok(Page { items, total_count })
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
        let sql = format!("DELETE FROM {} WHERE id = $1", E::TABLE);
        let affected = self
            .session
            .execute(sqlx::query(&sql).bind(E::key(id)))
            .await?;
        Ok(affected > 0)
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

fn decode_all<E: PgEntity>(rows: &[PgRow]) -> Result<Vec<E>> {
    rows.iter().map(E::from_row).collect()
}

impl PgRepository<Order> {
    async fn orders_where(
        &self,
        condition: &str,
        bind: impl FnOnce(&mut QueryBuilder<'static, Postgres>),
    ) -> Result<Vec<Order>> {
        let mut builder = QueryBuilder::new(format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE {condition}"
        ));
        bind(&mut builder);
        builder.push(" ORDER BY created_at DESC, id DESC");
        self.rows(builder.build()).await
    }

    /// Joins each order with its customer and product.
    async fn attach_details(&self, orders: Vec<Order>) -> Result<Vec<OrderDetails>> {
        if orders.is_empty() {
            return Ok(Vec::new());
        }
        let customer_ids: Vec<Uuid> = orders.iter().map(|o| *o.customer_id().as_uuid()).collect();
        let product_ids: Vec<Uuid> = orders.iter().map(|o| *o.product_id().as_uuid()).collect();

        let customer_sql = format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = ANY($1)");
        let customers: HashMap<CustomerId, Customer> = decode_all::<Customer>(
            &self
                .session
                .fetch_all(sqlx::query(&customer_sql).bind(customer_ids))
                .await?,
        )?
        .into_iter()
        .map(|c| (c.id(), c))
        .collect();

        let product_sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ANY($1)");
        let products: HashMap<ProductId, Product> = decode_all::<Product>(
            &self
                .session
                .fetch_all(sqlx::query(&product_sql).bind(product_ids))
                .await?,
        )?
        .into_iter()
        .map(|p| (p.id(), p))
        .collect();

        Ok(orders
            .into_iter()
            .map(|order| OrderDetails {
                customer: customers.get(&order.customer_id()).cloned(),
                product: products.get(&order.product_id()).cloned(),
                order,
            })
            .collect())
    }

    async fn interval_counts(&self, customer_id: Option<CustomerId>) -> Result<Vec<IntervalCount>> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {DISTANCE_BAND} AS band, COUNT(*) AS total FROM orders WHERE TRUE"
        ));
        if let Some(id) = customer_id {
            builder.push(" AND customer_id = ").push_bind(*id.as_uuid());
        }
        builder.push(" GROUP BY band");

        let mut counts: Vec<IntervalCount> = IntervalCount::tally(std::iter::empty::<&Order>());
        for row in self.session.fetch_all(builder.build()).await? {
            let interval = band(column(&row, "band")?)?;
            let total: i64 = column(&row, "total")?;
            if let Some(slot) = counts.iter_mut().find(|c| c.interval == interval) {
                slot.count = total.max(0) as u64;
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl OrderRepository for PgRepository<Order> {
    async fn by_customer(&self, customer_id: CustomerId) -> Result<Vec<Order>> {
        self.orders_where("customer_id = ", |b| {
            b.push_bind(*customer_id.as_uuid());
        })
        .await
    }

    async fn by_customer_with_details(&self, customer_id: CustomerId) -> Result<Vec<OrderDetails>> {
        let orders = self.by_customer(customer_id).await?;
        self.attach_details(orders).await
    }

    async fn by_date_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Order>> {
        self.orders_where("created_at >= ", |b| {
            b.push_bind(from).push(" AND created_at <= ").push_bind(to);
        })
        .await
    }

    async fn by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        self.orders_where("status = ", |b| {
            b.push_bind(status.as_str());
        })
        .await
    }

    async fn with_details(&self) -> Result<Vec<OrderDetails>> {
        let orders = self.orders_where("TRUE", |_| {}).await?;
        self.attach_details(orders).await
    }

    async fn with_full_details(&self, id: OrderId) -> Result<Option<OrderDetails>> {
        let Some(order) = self.get_by_id(id).await? else {
            return Ok(None);
        };
        Ok(self.attach_details(vec![order]).await?.into_iter().next())
    }

    async fn count_by_distance_interval(&self) -> Result<Vec<IntervalCount>> {
        self.interval_counts(None).await
    }

    async fn count_by_distance_interval_for_customer(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<IntervalCount>> {
        self.interval_counts(Some(customer_id)).await
    }

    async fn count_by_customer_and_interval(&self) -> Result<Vec<CustomerIntervalCount>> {
        let sql = format!(
            "SELECT c.id AS customer_id, c.name AS customer_name, o.band, COUNT(*) AS total \
             FROM (SELECT customer_id, {DISTANCE_BAND} AS band FROM orders) o \
             JOIN customers c ON c.id = o.customer_id \
             GROUP BY c.id, c.name, o.band \
             ORDER BY c.name, c.id, o.band"
        );
        self.session
            .fetch_all(sqlx::query(&sql))
            .await?
            .iter()
            .map(|row| {
                let total: i64 = column(row, "total")?;
                Ok(CustomerIntervalCount {
                    customer_id: CustomerId::from_uuid(column(row, "customer_id")?),
                    customer_name: column(row, "customer_name")?,
                    interval: band(column(row, "band")?)?,
                    count: total.max(0) as u64,
                })
            })
            .collect()
    }

    async fn has_orders_in_progress_for_customer(&self, customer_id: CustomerId) -> Result<bool> {
        let row = self
            .session
            .fetch_one(
                sqlx::query(
                    "SELECT EXISTS (SELECT 1 FROM orders WHERE customer_id = $1 AND status IN ($2, $3)) AS found",
                )
                .bind(customer_id.as_uuid())
                .bind(OrderStatus::Created.as_str())
                .bind(OrderStatus::InProgress.as_str()),
            )
            .await?;
        column(&row, "found")
    }
}

impl PgRepository<Customer> {
    async fn customers_where(
        &self,
        condition: &str,
        bind: impl FnOnce(&mut QueryBuilder<'static, Postgres>),
    ) -> Result<Vec<Customer>> {
        let mut builder = QueryBuilder::new(format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE {condition}"
        ));
        bind(&mut builder);
        builder.push(" ORDER BY name, id");
        self.rows(builder.build()).await
    }
}

#[async_trait]
impl CustomerRepository for PgRepository<Customer> {
    async fn get_by_email(&self, email: &str) -> Result<Option<Customer>> {
        let email = email.trim().to_lowercase();
        Ok(self
            .customers_where("email = ", |b| {
                b.push_bind(email);
            })
            .await?
            .into_iter()
            .next())
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool> {
        let row = self
            .session
            .fetch_one(
                sqlx::query("SELECT EXISTS (SELECT 1 FROM customers WHERE email = $1) AS found")
                    .bind(email.trim().to_lowercase()),
            )
            .await?;
        column(&row, "found")
    }

    async fn with_orders(&self) -> Result<Vec<CustomerWithOrders>> {
        let customers = self
            .customers_where(
                "EXISTS (SELECT 1 FROM orders o WHERE o.customer_id = customers.id)",
                |_| {},
            )
            .await?;
        if customers.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = customers.iter().map(|c| *c.id().as_uuid()).collect();
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE customer_id = ANY($1) ORDER BY created_at DESC, id DESC"
        );
        let rows = self.session.fetch_all(sqlx::query(&sql).bind(ids)).await?;
        let orders = decode_all::<Order>(&rows)?;

        let mut by_customer: HashMap<CustomerId, Vec<Order>> = HashMap::new();
        for order in orders {
            by_customer.entry(order.customer_id()).or_default().push(order);
        }
        Ok(customers
            .into_iter()
            .map(|customer| CustomerWithOrders {
                orders: by_customer.remove(&customer.id()).unwrap_or_default(),
                customer,
            })
            .collect())
    }

    async fn search_by_name(&self, term: &str) -> Result<Vec<Customer>> {
        let pattern = contains_pattern(term);
        self.customers_where("name ILIKE ", |b| {
            b.push_bind(pattern);
        })
        .await
    }

    async fn customer_list(&self) -> Result<Vec<CustomerSummary>> {
        Ok(self
            .customers_where("TRUE", |_| {})
            .await?
            .iter()
            .map(CustomerSummary::from)
            .collect())
    }
}

impl PgRepository<Product> {
    async fn products_where(
        &self,
        condition: &str,
        bind: impl FnOnce(&mut QueryBuilder<'static, Postgres>),
        order: &str,
    ) -> Result<Vec<Product>> {
        let mut builder = QueryBuilder::new(format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE {condition}"
        ));
        bind(&mut builder);
        builder.push(format!(" ORDER BY {order}, id"));
        self.rows(builder.build()).await
    }
}

#[async_trait]
impl ProductRepository for PgRepository<Product> {
    async fn search_by_name(&self, term: &str) -> Result<Vec<Product>> {
        let pattern = contains_pattern(term);
        self.products_where(
            "name ILIKE ",
            |b| {
                b.push_bind(pattern);
            },
            "name",
        )
        .await
    }

    async fn active_products(&self) -> Result<Vec<Product>> {
        self.products_where("active", |_| {}, "name").await
    }

    async fn by_price_range(&self, min_cents: u64, max_cents: u64) -> Result<Vec<Product>> {
        self.products_where(
            "unit_price_cents >= ",
            |b| {
                b.push_bind(cents(min_cents))
                    .push(" AND unit_price_cents <= ")
                    .push_bind(cents(max_cents));
            },
            "unit_price_cents",
        )
        .await
    }

    async fn product_list(&self) -> Result<Vec<ProductSummary>> {
        Ok(self
            .products_where("TRUE", |_| {}, "name")
            .await?
            .iter()
            .map(ProductSummary::from)
            .collect())
    }

    async fn average_price(&self) -> Result<Option<u64>> {
        let row = self
            .session
            .fetch_one(sqlx::query(
                "SELECT ROUND(AVG(unit_price_cents))::BIGINT AS average FROM products",
            ))
            .await?;
        let average: Option<i64> = column(&row, "average")?;
        average
            .map(|cents| {
                u64::try_from(cents)
                    .map_err(|_| Error::Database(format!("negative average price {cents}")))
            })
            .transpose()
    }

    async fn price_range(&self) -> Result<Option<(u64, u64)>> {
        let row = self
            .session
            .fetch_one(sqlx::query(
                "SELECT MIN(unit_price_cents) AS low, MAX(unit_price_cents) AS high FROM products",
            ))
            .await?;
        let low: Option<i64> = column(&row, "low")?;
        let high: Option<i64> = column(&row, "high")?;
        Ok(low
            .zip(high)
            .map(|(low, high)| (low.max(0) as u64, high.max(0) as u64)))
    }
}
