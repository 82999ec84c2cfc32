//! Cache key and tag vocabulary.
//!
//! Keys identify one cached read; tags group keys for invalidation. Both are
//! built only here so the repositories and the unit of work agree on them.

use chrono::{DateTime, SecondsFormat, Utc};
use dispatch_core::ids::{CustomerId, OrderId, ProductId};
use dispatch_core::metrics::MetricsRange;
use dispatch_core::order::OrderStatus;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Short, stable fingerprint of a serializable query argument.
///
/// Equal values always produce the same fingerprint, across processes.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> String {
    let json = serde_json::to_vec(value).unwrap_or_default();
    let hash = Sha256::digest(&json);
    hex::encode(&hash[..8])
}

/// Tag names.
pub mod tags {
    use super::*;

    pub const ORDERS: &str = "orders";
    pub const ORDER_LISTS: &str = "order_lists";
    pub const CUSTOMERS: &str = "customers";
    pub const CUSTOMER_LISTS: &str = "customer_lists";
    pub const PRODUCTS: &str = "products";
    pub const PRODUCT_LISTS: &str = "product_lists";
    pub const REPORTS: &str = "reports";

    pub fn order(id: OrderId) -> String {
        format!("order:{id}")
    }

    pub fn customer(id: CustomerId) -> String {
        format!("customer:{id}")
    }

    pub fn product(id: ProductId) -> String {
        format!("product:{id}")
    }

    pub fn customer_orders(id: CustomerId) -> String {
        format!("customer_orders:{id}")
    }

    pub fn product_orders(id: ProductId) -> String {
        format!("product_orders:{id}")
    }
}

/// Generic keys shared by all entity kinds, namespaced by the entity's plural.
pub mod generic {
    use super::fingerprint;
    use serde::Serialize;

    pub fn all(plural: &str) -> String {
        format!("{plural}:all")
    }

    pub fn find<F: Serialize>(plural: &str, filter: &F) -> String {
        format!("{plural}:find:{}", fingerprint(filter))
    }

    pub fn first<F: Serialize>(plural: &str, filter: &F) -> String {
        format!("{plural}:first:{}", fingerprint(filter))
    }

    pub fn count<F: Serialize>(plural: &str, filter: Option<&F>) -> String {
        match filter {
            Some(filter) => format!("{plural}:count:{}", fingerprint(filter)),
            None => format!("{plural}:count"),
        }
    }

    pub fn paged<F: Serialize, S: Serialize>(
        plural: &str,
        page: u32,
        size: u32,
        filter: Option<&F>,
        sort: Option<&S>,
        ascending: bool,
    ) -> String {
        let filter = filter.map(fingerprint).unwrap_or_else(|| "none".into());
        let sort = sort.map(fingerprint).unwrap_or_else(|| "default".into());
        format!("{plural}:paged:{page}:{size}:{filter}:{sort}:{ascending}")
    }
}

pub mod orders {
    use super::*;

    pub const PLURAL: &str = "orders";
    pub const WITH_DETAILS: &str = "orders_with_details";
    pub const COUNT_BY_DISTANCE: &str = "order_count_by_distance";
    pub const COUNT_BY_CUSTOMER_INTERVAL: &str = "order_count_by_customer_interval";

    pub fn by_id(id: OrderId) -> String {
        format!("order:{id}")
    }

    pub fn full_details(id: OrderId) -> String {
        format!("order_full_details:{id}")
    }

    pub fn by_customer(id: CustomerId) -> String {
        format!("orders_by_customer:{id}")
    }

    pub fn by_customer_with_details(id: CustomerId) -> String {
        format!("orders_by_customer_details:{id}")
    }

    pub fn by_status(status: OrderStatus) -> String {
        format!("orders_by_status:{status}")
    }

    pub fn by_date_range(from: DateTime<Utc>, to: DateTime<Utc>) -> String {
        format!(
            "orders_by_date:{}_{}",
            from.to_rfc3339_opts(SecondsFormat::Nanos, true),
            to.to_rfc3339_opts(SecondsFormat::Nanos, true)
        )
    }

    pub fn metrics(range: &MetricsRange, include_trends: bool) -> String {
        let bound = |at: Option<DateTime<Utc>>| {
            at.map_or_else(
                || "open".to_string(),
                |at| at.to_rfc3339_opts(SecondsFormat::Nanos, true),
            )
        };
        format!(
            "orders_metrics:{}_{}:trends={include_trends}",
            bound(range.from),
            bound(range.to)
        )
    }

    pub fn count_by_distance_for_customer(id: CustomerId) -> String {
        format!("order_count_by_distance_customer:{id}")
    }
}

pub mod customers {
    use super::*;

    pub const PLURAL: &str = "customers";
    pub const WITH_ORDERS: &str = "customers_with_orders";
    pub const LIST: &str = "customer_list";

    pub fn by_id(id: CustomerId) -> String {
        format!("customer:{id}")
    }

    pub fn by_email(email: &str) -> String {
        format!("customer_by_email:{}", email.trim().to_lowercase())
    }

    pub fn search(term: &str) -> String {
        format!("customer_search:{}", term.trim().to_lowercase())
    }
}

pub mod products {
    use super::*;

    pub const PLURAL: &str = "products";
    pub const ACTIVE: &str = "active_products";
    pub const LIST: &str = "product_list";
    pub const AVERAGE_PRICE: &str = "product_average_price";
    pub const PRICE_RANGE: &str = "product_price_range";

    pub fn by_id(id: ProductId) -> String {
        format!("product:{id}")
    }

    pub fn search(term: &str) -> String {
        format!("product_search:{}", term.trim().to_lowercase())
    }

    pub fn by_price(min_cents: u64, max_cents: u64) -> String {
        format!("products_by_price:{min_cents}_{max_cents}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_core::order::{OrderFilter, OrderSort};

    #[test]
    fn test_fingerprint_is_stable() {
        let customer = CustomerId::new();
        let a = OrderFilter::for_customer(customer).with_status(OrderStatus::Created);
        let b = OrderFilter::for_customer(customer).with_status(OrderStatus::Created);
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert_eq!(fingerprint(&a).len(), 16);
        assert_ne!(fingerprint(&a), fingerprint(&OrderFilter::for_customer(customer)));
    }

    #[test]
    fn test_paged_key_includes_every_argument() {
        let filter = OrderFilter::default().with_status(OrderStatus::Sending);
        let asc = generic::paged(orders::PLURAL, 1, 20, Some(&filter), Some(&OrderSort::Cost), true);
        let desc = generic::paged(orders::PLURAL, 1, 20, Some(&filter), Some(&OrderSort::Cost), false);
        let page2 = generic::paged(orders::PLURAL, 2, 20, Some(&filter), Some(&OrderSort::Cost), true);
        assert!(asc.starts_with("orders:paged:1:20:"));
        assert_ne!(asc, desc);
        assert_ne!(asc, page2);
    }

    #[test]
    fn test_search_keys_are_case_insensitive() {
        assert_eq!(customers::search(" Ana "), customers::search("ana"));
        assert_eq!(customers::by_email("Ana@Example.com"), "customer_by_email:ana@example.com");
    }

    #[test]
    fn test_date_range_key_keeps_sub_second_bounds() {
        let start = DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let narrow = orders::by_date_range(start, start + chrono::Duration::milliseconds(10));
        let wide = orders::by_date_range(start, start + chrono::Duration::milliseconds(999));
        let nanos = orders::by_date_range(start, start + chrono::Duration::nanoseconds(1));
        assert_ne!(narrow, wide);
        assert_ne!(nanos, orders::by_date_range(start, start));
        assert_eq!(
            wide,
            "orders_by_date:2026-03-01T10:00:00.000000000Z_2026-03-01T10:00:00.999000000Z"
        );
    }

    #[test]
    fn test_metrics_key_covers_range_and_trends() {
        let start = DateTime::parse_from_rfc3339("2026-03-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let all = orders::metrics(&MetricsRange::all_time(), true);
        assert_eq!(all, "orders_metrics:open_open:trends=true");
        assert_ne!(all, orders::metrics(&MetricsRange::all_time(), false));
        let since = MetricsRange { from: Some(start), to: None };
        let until = MetricsRange { from: None, to: Some(start) };
        assert_ne!(orders::metrics(&since, true), orders::metrics(&until, true));
    }

    #[test]
    fn test_entity_tags() {
        let id = CustomerId::new();
        assert_eq!(tags::customer_orders(id), format!("customer_orders:{id}"));
        assert!(tags::customer(id).starts_with("customer:cus_"));
    }
}
