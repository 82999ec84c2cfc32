//! Table mapping for each entity: row decoding, filters, ordering and writes.

use super::db_error;
use dispatch_core::changes::{ChangeKind, EntityChange, TrackedEntity};
use dispatch_core::customer::{Customer, CustomerFilter, CustomerRecord, CustomerSort};
use dispatch_core::entity::Entity;
use dispatch_core::geo::DistanceInterval;
use dispatch_core::ids::{CustomerId, OrderId, ProductId};
use dispatch_core::order::{Order, OrderFilter, OrderRecord, OrderSort, OrderStatus};
use dispatch_core::product::{Product, ProductFilter, ProductRecord, ProductSort};
use dispatch_core::{Error, Result};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Postgres, QueryBuilder, Row};
use uuid::Uuid;

pub(crate) fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name).map_err(db_error)
}

fn version(row: &PgRow) -> Result<u64> {
    let version: i64 = column(row, "version")?;
    u64::try_from(version).map_err(|_| Error::Database(format!("negative row version {version}")))
}

/// `ILIKE` pattern matching `term` anywhere, with wildcards escaped.
pub(crate) fn contains_pattern(term: &str) -> String {
    let escaped = term
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

/// `CASE` expression numbering the distance bands from zero.
pub(crate) const DISTANCE_BAND: &str = "CASE WHEN distance_km <= 50 THEN 0 \
     WHEN distance_km <= 200 THEN 1 \
     WHEN distance_km <= 500 THEN 2 \
     ELSE 3 END";

pub(crate) fn band(index: i32) -> Result<DistanceInterval> {
    usize::try_from(index)
        .ok()
        .and_then(|i| DistanceInterval::ALL.get(i).copied())
        .ok_or_else(|| Error::Database(format!("unknown distance band {index}")))
}

/// Mapping between an entity and its table.
pub(crate) trait PgEntity: Entity {
    const TABLE: &'static str;
    const COLUMNS: &'static str;

    fn key(id: Self::Id) -> Uuid;

    fn from_row(row: &PgRow) -> Result<Self>;

    /// Appends ` AND ...` conditions; the builder already holds a `WHERE`.
    fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &Self::Filter);

    fn sort_column(sort: Self::Sort) -> &'static str;
}

pub(crate) const ORDER_COLUMNS: &str = "id, customer_id, product_id, quantity, \
     origin_latitude, origin_longitude, destination_latitude, destination_longitude, \
     distance_km, cost_cents, currency, status, created_at, updated_at, version";

impl PgEntity for Order {
    const TABLE: &'static str = "orders";
    const COLUMNS: &'static str = ORDER_COLUMNS;

    fn key(id: OrderId) -> Uuid {
        *id.as_uuid()
    }

    fn from_row(row: &PgRow) -> Result<Self> {
        let status: String = column(row, "status")?;
        let quantity: i32 = column(row, "quantity")?;
        let record = OrderRecord {
            id: OrderId::from_uuid(column(row, "id")?),
            customer_id: CustomerId::from_uuid(column(row, "customer_id")?),
            product_id: ProductId::from_uuid(column(row, "product_id")?),
            quantity: u32::try_from(quantity)
                .map_err(|_| Error::Database(format!("negative quantity {quantity}")))?,
            origin_latitude: column(row, "origin_latitude")?,
            origin_longitude: column(row, "origin_longitude")?,
            destination_latitude: column(row, "destination_latitude")?,
            destination_longitude: column(row, "destination_longitude")?,
            distance_km: column(row, "distance_km")?,
            cost_cents: column(row, "cost_cents")?,
            currency: column(row, "currency")?,
            status: status.parse::<OrderStatus>()?,
            created_at: column(row, "created_at")?,
            updated_at: column(row, "updated_at")?,
            version: version(row)?,
        };
        Order::try_from(record)
    }

    fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &OrderFilter) {
        if let Some(id) = filter.customer_id {
            builder.push(" AND customer_id = ").push_bind(*id.as_uuid());
        }
        if let Some(id) = filter.product_id {
            builder.push(" AND product_id = ").push_bind(*id.as_uuid());
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(from) = filter.created_from {
            builder.push(" AND created_at >= ").push_bind(from);
        }
        if let Some(to) = filter.created_to {
            builder.push(" AND created_at <= ").push_bind(to);
        }
        if let Some(km) = filter.min_distance_km {
            builder.push(" AND distance_km >= ").push_bind(km);
        }
        if let Some(km) = filter.max_distance_km {
            builder.push(" AND distance_km <= ").push_bind(km);
        }
    }

    fn sort_column(sort: OrderSort) -> &'static str {
        match sort {
            OrderSort::CreatedAt => "created_at",
            OrderSort::UpdatedAt => "updated_at",
            OrderSort::Status => "status",
            OrderSort::Distance => "distance_km",
            OrderSort::Cost => "cost_cents",
            OrderSort::Quantity => "quantity",
        }
    }
}

pub(crate) const CUSTOMER_COLUMNS: &str = "id, name, email, phone, created_at, version";

impl PgEntity for Customer {
    const TABLE: &'static str = "customers";
    const COLUMNS: &'static str = CUSTOMER_COLUMNS;

    fn key(id: CustomerId) -> Uuid {
        *id.as_uuid()
    }

    fn from_row(row: &PgRow) -> Result<Self> {
        Customer::try_from(CustomerRecord {
            id: CustomerId::from_uuid(column(row, "id")?),
            name: column(row, "name")?,
            email: column(row, "email")?,
            phone: column(row, "phone")?,
            created_at: column(row, "created_at")?,
            version: version(row)?,
        })
    }

    fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &CustomerFilter) {
        if let Some(term) = &filter.name_contains {
            builder.push(" AND name ILIKE ").push_bind(contains_pattern(term));
        }
        if let Some(email) = &filter.email {
            builder
                .push(" AND email = ")
                .push_bind(email.trim().to_lowercase());
        }
        if let Some(from) = filter.created_from {
            builder.push(" AND created_at >= ").push_bind(from);
        }
    }

    fn sort_column(sort: CustomerSort) -> &'static str {
        match sort {
            CustomerSort::Name => "name",
            CustomerSort::Email => "email",
            CustomerSort::CreatedAt => "created_at",
        }
    }
}

pub(crate) const PRODUCT_COLUMNS: &str =
    "id, name, description, unit_price_cents, unit, active, created_at, version";

impl PgEntity for Product {
    const TABLE: &'static str = "products";
    const COLUMNS: &'static str = PRODUCT_COLUMNS;

    fn key(id: ProductId) -> Uuid {
        *id.as_uuid()
    }

    fn from_row(row: &PgRow) -> Result<Self> {
        Product::try_from(ProductRecord {
            id: ProductId::from_uuid(column(row, "id")?),
            name: column(row, "name")?,
            description: column(row, "description")?,
            unit_price_cents: column(row, "unit_price_cents")?,
            unit: column(row, "unit")?,
            active: column(row, "active")?,
            created_at: column(row, "created_at")?,
            version: version(row)?,
        })
    }

    fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &ProductFilter) {
        if let Some(term) = &filter.name_contains {
            builder.push(" AND name ILIKE ").push_bind(contains_pattern(term));
        }
        if let Some(active) = filter.active {
            builder.push(" AND active = ").push_bind(active);
        }
        if let Some(min) = filter.min_price_cents {
            builder.push(" AND unit_price_cents >= ").push_bind(cents(min));
        }
        if let Some(max) = filter.max_price_cents {
            builder.push(" AND unit_price_cents <= ").push_bind(cents(max));
        }
        if let Some(unit) = &filter.unit {
            builder.push(" AND unit = ").push_bind(unit.clone());
        }
    }

    fn sort_column(sort: ProductSort) -> &'static str {
        match sort {
            ProductSort::Name => "name",
            ProductSort::UnitPrice => "unit_price_cents",
            ProductSort::CreatedAt => "created_at",
        }
    }
}

/// Clamps to the BIGINT range.
pub(crate) fn cents(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn stored_version(entity: &impl Entity) -> i64 {
    i64::try_from(entity.version()).unwrap_or(i64::MAX)
}

fn conflict<E: Entity>(entity: &E) -> Error {
    Error::ConcurrencyConflict(format!(
        "{} {} was modified or deleted by another writer",
        E::NAME,
        entity.id()
    ))
}

async fn insert_order(conn: &mut PgConnection, order: &Order) -> Result<u64> {
    let r = OrderRecord::from(order);
    let result = sqlx::query(
        "INSERT INTO orders (id, customer_id, product_id, quantity, origin_latitude, origin_longitude, \
         destination_latitude, destination_longitude, distance_km, cost_cents, currency, status, \
         created_at, updated_at, version) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
    )
    .bind(r.id.as_uuid())
    .bind(r.customer_id.as_uuid())
    .bind(r.product_id.as_uuid())
    .bind(r.quantity as i32)
    .bind(r.origin_latitude)
    .bind(r.origin_longitude)
    .bind(r.destination_latitude)
    .bind(r.destination_longitude)
    .bind(r.distance_km)
    .bind(r.cost_cents)
    .bind(&r.currency)
    .bind(r.status.as_str())
    .bind(r.created_at)
    .bind(r.updated_at)
    .bind(stored_version(order))
    .execute(conn)
    .await
    .map_err(db_error)?;
    Ok(result.rows_affected())
}

async fn update_order(conn: &mut PgConnection, order: &Order) -> Result<u64> {
    let r = OrderRecord::from(order);
    let result = sqlx::query(
        "UPDATE orders SET customer_id = $2, product_id = $3, quantity = $4, \
         origin_latitude = $5, origin_longitude = $6, destination_latitude = $7, \
         destination_longitude = $8, distance_km = $9, cost_cents = $10, currency = $11, \
         status = $12, updated_at = $13, version = version + 1 \
         WHERE id = $1 AND version = $14",
    )
    .bind(r.id.as_uuid())
    .bind(r.customer_id.as_uuid())
    .bind(r.product_id.as_uuid())
    .bind(r.quantity as i32)
    .bind(r.origin_latitude)
    .bind(r.origin_longitude)
    .bind(r.destination_latitude)
    .bind(r.destination_longitude)
    .bind(r.distance_km)
    .bind(r.cost_cents)
    .bind(&r.currency)
    .bind(r.status.as_str())
    .bind(r.updated_at)
    .bind(stored_version(order))
    .execute(conn)
    .await
    .map_err(db_error)?;
    Ok(result.rows_affected())
}

async fn insert_customer(conn: &mut PgConnection, customer: &Customer) -> Result<u64> {
    let result = sqlx::query(
        "INSERT INTO customers (id, name, email, phone, created_at, version) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(customer.id().as_uuid())
    .bind(customer.name())
    .bind(customer.email())
    .bind(customer.phone())
    .bind(customer.created_at())
    .bind(stored_version(customer))
    .execute(conn)
    .await
    .map_err(db_error)?;
    Ok(result.rows_affected())
}

async fn update_customer(conn: &mut PgConnection, customer: &Customer) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE customers SET name = $2, email = $3, phone = $4, version = version + 1 \
         WHERE id = $1 AND version = $5",
    )
    .bind(customer.id().as_uuid())
    .bind(customer.name())
    .bind(customer.email())
    .bind(customer.phone())
    .bind(stored_version(customer))
    .execute(conn)
    .await
    .map_err(db_error)?;
    Ok(result.rows_affected())
}

async fn insert_product(conn: &mut PgConnection, product: &Product) -> Result<u64> {
    let result = sqlx::query(
        "INSERT INTO products (id, name, description, unit_price_cents, unit, active, created_at, version) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(product.id().as_uuid())
    .bind(product.name())
    .bind(product.description())
    .bind(cents(product.unit_price_cents()))
    .bind(product.unit())
    .bind(product.is_active())
    .bind(product.created_at())
    .bind(stored_version(product))
    .execute(conn)
    .await
    .map_err(db_error)?;
    Ok(result.rows_affected())
}

async fn update_product(conn: &mut PgConnection, product: &Product) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE products SET name = $2, description = $3, unit_price_cents = $4, unit = $5, \
         active = $6, version = version + 1 \
         WHERE id = $1 AND version = $7",
    )
    .bind(product.id().as_uuid())
    .bind(product.name())
    .bind(product.description())
    .bind(cents(product.unit_price_cents()))
    .bind(product.unit())
    .bind(product.is_active())
    .bind(stored_version(product))
    .execute(conn)
    .await
    .map_err(db_error)?;
    Ok(result.rows_affected())
}

async fn delete<E: PgEntity>(conn: &mut PgConnection, entity: &E) -> Result<u64> {
    let sql = format!("DELETE FROM {} WHERE id = $1 AND version = $2", E::TABLE);
    let result = sqlx::query(&sql)
        .bind(E::key(entity.id()))
        .bind(stored_version(entity))
        .execute(conn)
        .await
        .map_err(db_error)?;
    Ok(result.rows_affected())
}

async fn apply_change(conn: &mut PgConnection, change: &EntityChange) -> Result<()> {
    let affected = match (&change.entity, change.kind) {
        (TrackedEntity::Order(o), ChangeKind::Added) => insert_order(conn, o).await?,
        (TrackedEntity::Order(o), ChangeKind::Modified) => update_order(conn, o).await?,
        (TrackedEntity::Order(o), ChangeKind::Deleted) => delete(conn, o).await?,
        (TrackedEntity::Customer(c), ChangeKind::Added) => insert_customer(conn, c).await?,
        (TrackedEntity::Customer(c), ChangeKind::Modified) => update_customer(conn, c).await?,
        (TrackedEntity::Customer(c), ChangeKind::Deleted) => delete(conn, c).await?,
        (TrackedEntity::Product(p), ChangeKind::Added) => insert_product(conn, p).await?,
        (TrackedEntity::Product(p), ChangeKind::Modified) => update_product(conn, p).await?,
        (TrackedEntity::Product(p), ChangeKind::Deleted) => delete(conn, p).await?,
    };
    if affected == 0 {
        return Err(match &change.entity {
            TrackedEntity::Order(o) => conflict(o),
            TrackedEntity::Customer(c) => conflict(c),
            TrackedEntity::Product(p) => conflict(p),
        });
    }
    Ok(())
}

/// Writes `changes` in order on one connection. The caller owns the
/// transaction.
pub(crate) async fn apply_changes(conn: &mut PgConnection, changes: &[EntityChange]) -> Result<u64> {
    for change in changes {
        apply_change(&mut *conn, change).await?;
    }
    Ok(changes.len() as u64)
}
