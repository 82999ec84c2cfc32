//! Order dispatch use cases.

use chrono::Utc;
use dispatch_cache::TypedCache;
use dispatch_cache::keys::{orders as keys, tags};
use dispatch_core::cache::CachePriority;
use dispatch_core::cost::Quantity;
use dispatch_core::customer::Customer;
use dispatch_core::geo::Coordinate;
use dispatch_core::ids::{CustomerId, OrderId, ProductId};
use dispatch_core::metrics::{MetricsRange, OrdersMetrics};
use dispatch_core::order::{Order, OrderStatus};
use dispatch_core::ports::UnitOfWork;
use dispatch_core::product::Product;
use dispatch_core::reports::{IntervalCount, OrderDetails};
use dispatch_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct NewCustomer {
    pub name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewProduct {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub unit_price_cents: i64,
    pub unit: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewOrder {
    pub customer_id: CustomerId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub origin: Coordinate,
    pub destination: Coordinate,
}

/// Order counts per distance band, for everyone or one customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrdersReport {
    pub customer_id: Option<CustomerId>,
    pub counts: Vec<IntervalCount>,
    pub total: u64,
}

/// Application service over a [`UnitOfWork`].
pub struct DispatchService<U: UnitOfWork> {
    uow: U,
    metrics_cache: Option<(TypedCache, Duration)>,
}

impl<U: UnitOfWork> DispatchService<U> {
    pub fn new(uow: U) -> Self {
        Self {
            uow,
            metrics_cache: None,
        }
    }

    /// Caches [`orders_metrics`](Self::orders_metrics) results for `ttl`.
    pub fn with_metrics_cache(mut self, cache: TypedCache, ttl: Duration) -> Self {
        self.metrics_cache = Some((cache, ttl));
        self
    }

    pub fn unit_of_work(&self) -> &U {
        &self.uow
    }

    pub async fn create_customer(&self, cmd: NewCustomer) -> Result<Customer> {
        let customer = Customer::create(&cmd.name, &cmd.email, &cmd.phone)?;
        if self.uow.customers().exists_by_email(customer.email()).await? {
            return Err(Error::Validation(format!(
                "email '{}' is already registered",
                customer.email()
            )));
        }
        self.uow.customers().add(customer.clone()).await?;
        self.uow.save_changes().await?;
        info!(customer_id = %customer.id(), "Customer created");
        Ok(customer)
    }

    pub async fn create_product(&self, cmd: NewProduct) -> Result<Product> {
        let product = Product::create(
            &cmd.name,
            cmd.description.as_deref(),
            cmd.unit_price_cents,
            &cmd.unit,
        )?;
        self.uow.products().add(product.clone()).await?;
        self.uow.save_changes().await?;
        info!(product_id = %product.id(), "Product created");
        Ok(product)
    }

    /// Creates an order for an existing customer and an active product.
    pub async fn create_order(&self, cmd: NewOrder) -> Result<Order> {
        let customer = self
            .uow
            .customers()
            .get_by_id(cmd.customer_id)
            .await?
            .ok_or_else(|| Error::not_found("customer", cmd.customer_id))?;
        let product = self
            .uow
            .products()
            .get_by_id(cmd.product_id)
            .await?
            .ok_or_else(|| Error::not_found("product", cmd.product_id))?;
        if !product.is_active() {
            return Err(Error::Validation(format!(
                "product '{}' is not available",
                product.name()
            )));
        }

        let order = Order::create(
            customer.id(),
            product.id(),
            Quantity::new(cmd.quantity)?,
            cmd.origin,
            cmd.destination,
        )?;
        self.uow.orders().add(order.clone()).await?;
        self.uow.save_changes().await?;
        info!(
            order_id = %order.id(),
            distance_km = order.distance().kilometers(),
            cost = %order.cost(),
            "Order created"
        );
        Ok(order)
    }

    /// Moves an order to `next` and returns it as stored.
    pub async fn update_order_status(&self, id: OrderId, next: OrderStatus) -> Result<Order> {
        let mut order = self.load_order(id).await?;
        let previous = order.status();
        order.update_status(next)?;
        self.uow.orders().update(order).await?;
        self.uow.save_changes().await?;
        info!(order_id = %id, from = %previous, to = %next, "Order status changed");
        self.load_order(id).await
    }

    pub async fn orders_report(&self, customer_id: Option<CustomerId>) -> Result<OrdersReport> {
        let counts = match customer_id {
            Some(id) => {
                if self.uow.customers().get_by_id(id).await?.is_none() {
                    return Err(Error::not_found("customer", id));
                }
                self.uow
                    .orders()
                    .count_by_distance_interval_for_customer(id)
                    .await?
            }
            None => self.uow.orders().count_by_distance_interval().await?,
        };
        let total = counts.iter().map(|c| c.count).sum();
        Ok(OrdersReport {
            customer_id,
            counts,
            total,
        })
    }

    /// Volume, revenue, operational, customer and trend metrics for orders
    /// created within `range`.
    ///
    /// Cached results carry the order, customer and report tags, so any saved
    /// order or customer change drops them. Inside a transaction nothing is
    /// cached.
    pub async fn orders_metrics(
        &self,
        range: MetricsRange,
        include_trends: bool,
    ) -> Result<OrdersMetrics> {
        range.validate()?;
        let load = || async {
            let orders = self.uow.orders().get_all().await?;
            let customers = self.uow.customers().get_all().await?;
            Ok::<_, Error>(OrdersMetrics::compute(
                &orders,
                &customers,
                &range,
                include_trends,
                Utc::now(),
            ))
        };

        let metrics = match &self.metrics_cache {
            Some((cache, ttl)) => {
                let ttl = if self.uow.in_transaction() {
                    Duration::ZERO
                } else {
                    *ttl
                };
                let tags = [tags::ORDERS, tags::CUSTOMERS, tags::REPORTS].map(String::from);
                cache
                    .read_through(
                        &keys::metrics(&range, include_trends),
                        &tags,
                        ttl,
                        CachePriority::Normal,
                        load,
                    )
                    .await?
            }
            None => load().await?,
        };
        info!(period = %metrics.period, orders = metrics.orders.total, "Orders metrics ready");
        Ok(metrics)
    }

    pub async fn order_details(&self, id: OrderId) -> Result<OrderDetails> {
        self.uow
            .orders()
            .with_full_details(id)
            .await?
            .ok_or_else(|| Error::not_found("order", id))
    }

    async fn load_order(&self, id: OrderId) -> Result<Order> {
        self.uow
            .orders()
            .get_by_id(id)
            .await?
            .ok_or_else(|| Error::not_found("order", id))
    }
}
