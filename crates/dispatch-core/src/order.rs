//! Order aggregate and its status lifecycle.

use crate::changes::TrackedEntity;
use crate::cost::{DeliveryCost, Quantity};
use crate::entity::{Entity, EntityFilter, EntitySort};
use crate::geo::{Coordinate, Distance, DistanceInterval, calculate_distance};
use crate::ids::{CustomerId, OrderId, ProductId};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    InProgress,
    Sending,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Created,
        OrderStatus::InProgress,
        OrderStatus::Sending,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        match self {
            OrderStatus::Created => {
                matches!(next, OrderStatus::InProgress | OrderStatus::Cancelled)
            }
            OrderStatus::InProgress => matches!(
                next,
                OrderStatus::Sending | OrderStatus::Delivered | OrderStatus::Cancelled
            ),
            OrderStatus::Sending => matches!(next, OrderStatus::Delivered),
            OrderStatus::Delivered | OrderStatus::Cancelled => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::InProgress => "in_progress",
            OrderStatus::Sending => "sending",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized || normalized == status.as_str().replace('_', ""))
            .ok_or_else(|| Error::Validation(format!("unknown order status '{s}'")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    customer_id: CustomerId,
    product_id: ProductId,
    quantity: Quantity,
    origin: Coordinate,
    destination: Coordinate,
    distance: Distance,
    cost: DeliveryCost,
    status: OrderStatus,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
}

impl Order {
    /// Creates a new order, computing distance and cost from the route.
    pub fn create(
        customer_id: CustomerId,
        product_id: ProductId,
        quantity: Quantity,
        origin: Coordinate,
        destination: Coordinate,
    ) -> Result<Self> {
        if origin == destination {
            return Err(Error::SameOriginAndDestination);
        }
        let distance = calculate_distance(&origin, &destination)?;
        let cost = DeliveryCost::for_distance(&distance);

        Ok(Self {
            id: OrderId::new(),
            customer_id,
            product_id,
            quantity,
            origin,
            destination,
            distance,
            cost,
            status: OrderStatus::Created,
            created_at: Utc::now(),
            updated_at: None,
            version: 0,
        })
    }

    /// Moves the order to `next`. Only the status and update time change.
    pub fn update_status(&mut self, next: OrderStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidStatusTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = Some(Utc::now());
        Ok(())
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn quantity(&self) -> Quantity {
        self.quantity
    }

    pub fn origin(&self) -> &Coordinate {
        &self.origin
    }

    pub fn destination(&self) -> &Coordinate {
        &self.destination
    }

    pub fn distance(&self) -> Distance {
        self.distance
    }

    pub fn distance_interval(&self) -> DistanceInterval {
        self.distance.interval()
    }

    pub fn cost(&self) -> &DeliveryCost {
        &self.cost
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

/// Flat representation of a stored order, used to rehydrate from storage.
#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub origin_latitude: f64,
    pub origin_longitude: f64,
    pub destination_latitude: f64,
    pub destination_longitude: f64,
    pub distance_km: f64,
    pub cost_cents: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl From<&Order> for OrderRecord {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            customer_id: order.customer_id,
            product_id: order.product_id,
            quantity: order.quantity.value(),
            origin_latitude: order.origin.latitude(),
            origin_longitude: order.origin.longitude(),
            destination_latitude: order.destination.latitude(),
            destination_longitude: order.destination.longitude(),
            distance_km: order.distance.kilometers(),
            cost_cents: order.cost.amount_cents() as i64,
            currency: order.cost.currency().to_string(),
            status: order.status,
            created_at: order.created_at,
            updated_at: order.updated_at,
            version: order.version,
        }
    }
}

impl TryFrom<OrderRecord> for Order {
    type Error = Error;

    fn try_from(record: OrderRecord) -> Result<Self> {
        Ok(Self {
            id: record.id,
            customer_id: record.customer_id,
            product_id: record.product_id,
            quantity: Quantity::new(record.quantity)?,
            origin: Coordinate::new(record.origin_latitude, record.origin_longitude)?,
            destination: Coordinate::new(record.destination_latitude, record.destination_longitude)?,
            distance: Distance::new(record.distance_km)?,
            cost: DeliveryCost::from_signed(record.cost_cents, record.currency)?,
            status: record.status,
            created_at: record.created_at,
            updated_at: record.updated_at,
            version: record.version,
        })
    }
}

impl Entity for Order {
    type Id = OrderId;
    type Filter = OrderFilter;
    type Sort = OrderSort;

    const NAME: &'static str = "order";

    fn id(&self) -> OrderId {
        self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    fn into_tracked(self) -> TrackedEntity {
        TrackedEntity::Order(self)
    }
}

/// Order query predicate. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<CustomerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<ProductId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_to: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_distance_km: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_distance_km: Option<f64>,
}

impl OrderFilter {
    pub fn for_customer(customer_id: CustomerId) -> Self {
        Self {
            customer_id: Some(customer_id),
            ..Default::default()
        }
    }

    pub fn for_product(product_id: ProductId) -> Self {
        Self {
            product_id: Some(product_id),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn created_between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.created_from = Some(from);
        self.created_to = Some(to);
        self
    }
}

impl EntityFilter<Order> for OrderFilter {
    fn matches(&self, order: &Order) -> bool {
        self.customer_id.is_none_or(|id| order.customer_id == id)
            && self.product_id.is_none_or(|id| order.product_id == id)
            && self.status.is_none_or(|s| order.status == s)
            && self.created_from.is_none_or(|from| order.created_at >= from)
            && self.created_to.is_none_or(|to| order.created_at <= to)
            && self
                .min_distance_km
                .is_none_or(|km| order.distance.kilometers() >= km)
            && self
                .max_distance_km
                .is_none_or(|km| order.distance.kilometers() <= km)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSort {
    #[default]
    CreatedAt,
    UpdatedAt,
    Status,
    Distance,
    Cost,
    Quantity,
}

impl EntitySort<Order> for OrderSort {
    fn compare(&self, a: &Order, b: &Order) -> Ordering {
        match self {
            OrderSort::CreatedAt => a.created_at.cmp(&b.created_at),
            OrderSort::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            OrderSort::Status => a.status.as_str().cmp(b.status.as_str()),
            OrderSort::Distance => a.distance.kilometers().total_cmp(&b.distance.kilometers()),
            OrderSort::Cost => a.cost.amount_cents().cmp(&b.cost.amount_cents()),
            OrderSort::Quantity => a.quantity.cmp(&b.quantity),
        }
    }
}
