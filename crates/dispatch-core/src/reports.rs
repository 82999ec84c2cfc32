//! Read models returned by the entity-specific queries.

use crate::customer::Customer;
use crate::geo::DistanceInterval;
use crate::ids::{CustomerId, ProductId};
use crate::order::Order;
use crate::product::Product;
use serde::{Deserialize, Serialize};

/// An order together with the customer and product it references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetails {
    pub order: Order,
    pub customer: Option<Customer>,
    pub product: Option<Product>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerWithOrders {
    pub customer: Customer,
    pub orders: Vec<Order>,
}

/// Lightweight customer row for pickers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerSummary {
    pub id: CustomerId,
    pub name: String,
    pub email: String,
}

impl From<&Customer> for CustomerSummary {
    fn from(customer: &Customer) -> Self {
        Self {
            id: customer.id(),
            name: customer.name().to_string(),
            email: customer.email().to_string(),
        }
    }
}

/// Lightweight product row for pickers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSummary {
    pub id: ProductId,
    pub name: String,
    pub unit: String,
    pub unit_price_cents: u64,
}

impl From<&Product> for ProductSummary {
    fn from(product: &Product) -> Self {
        Self {
            id: product.id(),
            name: product.name().to_string(),
            unit: product.unit().to_string(),
            unit_price_cents: product.unit_price_cents(),
        }
    }
}

/// Number of orders in one distance band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalCount {
    pub interval: DistanceInterval,
    pub count: u64,
}

impl IntervalCount {
    /// Counts orders per band. Every band is present, in ascending order.
    pub fn tally<'a>(orders: impl IntoIterator<Item = &'a Order>) -> Vec<IntervalCount> {
        let mut counts = [0u64; 4];
        for order in orders {
            counts[order.distance_interval() as usize] += 1;
        }
        DistanceInterval::ALL
            .into_iter()
            .zip(counts)
            .map(|(interval, count)| IntervalCount { interval, count })
            .collect()
    }
}

/// Number of orders for one customer in one distance band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerIntervalCount {
    pub customer_id: CustomerId,
    pub customer_name: String,
    pub interval: DistanceInterval,
    pub count: u64,
}
