//! Pending-change descriptions produced by data contexts.

use crate::customer::Customer;
use crate::order::Order;
use crate::product::Product;
use serde::{Deserialize, Serialize};

/// How a tracked entity will be written on the next save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

/// An entity of any kind held by a change tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "entity", rename_all = "snake_case")]
pub enum TrackedEntity {
    Order(Order),
    Customer(Customer),
    Product(Product),
}

impl TrackedEntity {
    pub fn kind_name(&self) -> &'static str {
        match self {
            TrackedEntity::Order(_) => "order",
            TrackedEntity::Customer(_) => "customer",
            TrackedEntity::Product(_) => "product",
        }
    }

    /// Identity that is unique across entity kinds.
    pub fn identity(&self) -> String {
        match self {
            TrackedEntity::Order(o) => o.id().to_string(),
            TrackedEntity::Customer(c) => c.id().to_string(),
            TrackedEntity::Product(p) => p.id().to_string(),
        }
    }
}

/// One pending write: the entity state and the kind of change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityChange {
    pub entity: TrackedEntity,
    pub kind: ChangeKind,
}

impl EntityChange {
    pub fn new(entity: TrackedEntity, kind: ChangeKind) -> Self {
        Self { entity, kind }
    }
}
