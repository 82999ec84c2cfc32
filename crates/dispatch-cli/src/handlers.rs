//! Command handlers.

use crate::config::DispatchConfig;
use anyhow::{Context, bail};
use dispatch_cache::{TagCache, TypedCache, health};
use dispatch_core::geo::Coordinate;
use dispatch_core::ids::{CustomerId, ProductId};
use dispatch_core::order::OrderStatus;
use dispatch_core::ports::UnitOfWork;
use dispatch_db::{CachingUnitOfWork, Database, MemoryDatabase};
use dispatch_service::{
    DispatchService, MetricsRange, NewCustomer, NewOrder, NewProduct, quote,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const DEPOT: (f64, f64) = (-12.046374, -77.042793);

/// Delivery points around the depot, one or more per distance band.
const DESTINATIONS: [(&str, f64, f64); 6] = [
    ("Callao", -12.066667, -77.116667),
    ("Chosica", -11.943100, -76.708900),
    ("Huacho", -11.106700, -77.605000),
    ("Ica", -14.067800, -75.728600),
    ("Trujillo", -8.111800, -79.028700),
    ("Arequipa", -16.409000, -71.537500),
];

pub fn quote_delivery(
    from: &Coordinate,
    to: &Coordinate,
    discount: Option<f64>,
) -> anyhow::Result<()> {
    let q = quote(from, to, discount)?;
    println!("{}", serde_json::to_string_pretty(&q)?);
    Ok(())
}

/// Scripted session: checks the cache, seeds customers and products, places
/// orders, reads reports twice, walks a few orders through their lifecycle
/// and prints the report, the metrics and cache statistics.
pub async fn demo(config: &DispatchConfig, orders: u32) -> anyhow::Result<()> {
    let cache = Arc::new(TagCache::new(config.cache_config()));
    if let Some(interval) = config.cache_config().sweep_interval {
        cache.spawn_sweeper(interval);
    }
    let health = health::check(cache.as_ref()).await;
    if !health.is_healthy() {
        bail!("cache self-check failed: {}", health.message);
    }
    let ttl = config.ttl_policy();
    let uow = CachingUnitOfWork::new(MemoryDatabase::new().context(), cache.clone(), ttl);
    let service = DispatchService::new(uow)
        .with_metrics_cache(TypedCache::new(cache.clone()), ttl.analytics);

    let customers = seed_customers(&service).await?;
    let products = seed_products(&service).await?;
    let depot = Coordinate::new(DEPOT.0, DEPOT.1)?;

    let mut placed = Vec::new();
    for i in 0..orders as usize {
        let (name, lat, lon) = DESTINATIONS[i % DESTINATIONS.len()];
        let order = service
            .create_order(NewOrder {
                customer_id: customers[i % customers.len()],
                product_id: products[i % products.len()],
                quantity: (i % 5 + 1) as u32,
                origin: depot,
                destination: Coordinate::new(lat, lon)?,
            })
            .await
            .with_context(|| format!("placing order {i} to {name}"))?;
        debug!(destination = name, cost = %order.cost(), "Order placed");
        placed.push(order.id());
    }

    // Second pass is served from the cache.
    for _ in 0..2 {
        service.orders_report(None).await?;
        for customer in &customers {
            service.orders_report(Some(*customer)).await?;
        }
        service.unit_of_work().customers().customer_list().await?;
        service.unit_of_work().products().average_price().await?;
    }

    for id in placed.iter().step_by(3) {
        service.update_order_status(*id, OrderStatus::InProgress).await?;
        service.order_details(*id).await?;
    }

    let report = service.orders_report(None).await?;
    let metrics = service.orders_metrics(MetricsRange::all_time(), true).await?;
    info!(orders = report.total, "Demo finished");
    println!("{}", serde_json::to_string_pretty(&report)?);
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    println!("{}", serde_json::to_string_pretty(&health)?);
    println!("{}", serde_json::to_string_pretty(&cache.stats())?);
    Ok(())
}

async fn seed_customers<U: UnitOfWork>(
    service: &DispatchService<U>,
) -> anyhow::Result<Vec<CustomerId>> {
    let mut ids = Vec::new();
    for (name, email) in [
        ("Ana Torres", "ana@example.com"),
        ("Luis Quispe", "luis@example.com"),
        ("Rosa Huamán", "rosa@example.com"),
    ] {
        let customer = service
            .create_customer(NewCustomer {
                name: name.into(),
                email: email.into(),
                phone: "+51 1 555 0100".into(),
            })
            .await?;
        ids.push(customer.id());
    }
    Ok(ids)
}

async fn seed_products<U: UnitOfWork>(
    service: &DispatchService<U>,
) -> anyhow::Result<Vec<ProductId>> {
    let mut ids = Vec::new();
    for (name, price, unit) in [
        ("Cement", 2_450, "bag"),
        ("Sand", 300, "kg"),
        ("Rebar", 1_890, "bar"),
    ] {
        let product = service
            .create_product(NewProduct {
                name: name.into(),
                description: None,
                unit_price_cents: price,
                unit: unit.into(),
            })
            .await?;
        ids.push(product.id());
    }
    Ok(ids)
}

pub async fn migrate(config: &DispatchConfig, database_url: Option<String>) -> anyhow::Result<()> {
    let Some(url) = database_url.or_else(|| config.database_url()) else {
        bail!("no database URL: set database.url, DISPATCH__DATABASE__URL or DATABASE_URL");
    };
    let db = Database::connect_with(
        &url,
        config.database.max_connections,
        Duration::from_secs(config.database.acquire_timeout_secs),
    )
    .await
    .context("connecting to PostgreSQL")?;
    db.migrate().await?;
    println!("Migrations applied");
    Ok(())
}

pub fn show_config(config: &DispatchConfig) -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(config)?);
    Ok(())
}
