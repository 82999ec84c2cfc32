//! Product catalog aggregate.

use crate::changes::TrackedEntity;
use crate::entity::{Entity, EntityFilter, EntitySort, contains_ignore_case};
use crate::ids::ProductId;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    id: ProductId,
    name: String,
    description: String,
    unit_price_cents: u64,
    unit: String,
    active: bool,
    created_at: DateTime<Utc>,
    version: u64,
}

impl Product {
    pub fn create(
        name: &str,
        description: Option<&str>,
        unit_price_cents: i64,
        unit: &str,
    ) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Validation("product name is required".into()));
        }
        let unit = unit.trim();
        if unit.is_empty() {
            return Err(Error::Validation("product unit is required".into()));
        }
        Ok(Self {
            id: ProductId::new(),
            name: name.to_string(),
            description: description.map(str::trim).unwrap_or_default().to_string(),
            unit_price_cents: non_negative_price(unit_price_cents)?,
            unit: unit.to_string(),
            active: true,
            created_at: Utc::now(),
            version: 0,
        })
    }

    pub fn update_price(&mut self, unit_price_cents: i64) -> Result<()> {
        self.unit_price_cents = non_negative_price(unit_price_cents)?;
        Ok(())
    }

    pub fn activate(&mut self) {
        self.active = true;
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    pub fn id(&self) -> ProductId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn unit_price_cents(&self) -> u64 {
        self.unit_price_cents
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

fn non_negative_price(cents: i64) -> Result<u64> {
    u64::try_from(cents)
        .map_err(|_| Error::Validation(format!("unit price cannot be negative ({cents})")))
}

/// Flat representation of a stored product.
#[derive(Debug, Clone)]
pub struct ProductRecord {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    pub unit_price_cents: i64,
    pub unit: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

impl TryFrom<ProductRecord> for Product {
    type Error = Error;

    fn try_from(record: ProductRecord) -> Result<Self> {
        Ok(Self {
            id: record.id,
            name: record.name,
            description: record.description,
            unit_price_cents: non_negative_price(record.unit_price_cents)?,
            unit: record.unit,
            active: record.active,
            created_at: record.created_at,
            version: record.version,
        })
    }
}

impl Entity for Product {
    type Id = ProductId;
    type Filter = ProductFilter;
    type Sort = ProductSort;

    const NAME: &'static str = "product";

    fn id(&self) -> ProductId {
        self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    fn into_tracked(self) -> TrackedEntity {
        TrackedEntity::Product(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_price_cents: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price_cents: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl ProductFilter {
    pub fn name_contains(term: impl Into<String>) -> Self {
        Self {
            name_contains: Some(term.into()),
            ..Default::default()
        }
    }

    pub fn active() -> Self {
        Self {
            active: Some(true),
            ..Default::default()
        }
    }

    pub fn price_between(min_cents: u64, max_cents: u64) -> Self {
        Self {
            min_price_cents: Some(min_cents),
            max_price_cents: Some(max_cents),
            ..Default::default()
        }
    }
}

impl EntityFilter<Product> for ProductFilter {
    fn matches(&self, product: &Product) -> bool {
        self.name_contains
            .as_deref()
            .is_none_or(|term| contains_ignore_case(&product.name, term))
            && self.active.is_none_or(|active| product.active == active)
            && self
                .min_price_cents
                .is_none_or(|min| product.unit_price_cents >= min)
            && self
                .max_price_cents
                .is_none_or(|max| product.unit_price_cents <= max)
            && self
                .unit
                .as_deref()
                .is_none_or(|unit| product.unit.eq_ignore_ascii_case(unit))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductSort {
    #[default]
    Name,
    UnitPrice,
    CreatedAt,
}

impl EntitySort<Product> for ProductSort {
    fn compare(&self, a: &Product, b: &Product) -> Ordering {
        match self {
            ProductSort::Name => a.name.cmp(&b.name),
            ProductSort::UnitPrice => a.unit_price_cents.cmp(&b.unit_price_cents),
            ProductSort::CreatedAt => a.created_at.cmp(&b.created_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_product() {
        let product = Product::create(" Cement ", Some(" 42.5R bag "), 12_50, " kg ").unwrap();
        assert_eq!(product.name(), "Cement");
        assert_eq!(product.description(), "42.5R bag");
        assert_eq!(product.unit(), "kg");
        assert_eq!(product.unit_price_cents(), 12_50);
        assert!(product.is_active());
    }

    #[test]
    fn test_create_product_validates() {
        assert!(Product::create("", None, 1, "kg").is_err());
        assert!(Product::create("Sand", None, -1, "kg").is_err());
        assert!(Product::create("Sand", None, 1, "").is_err());
    }

    #[test]
    fn test_update_price_rejects_negative() {
        let mut product = Product::create("Sand", None, 5_00, "kg").unwrap();
        assert!(product.update_price(-5).is_err());
        assert_eq!(product.unit_price_cents(), 5_00);
        product.update_price(7_25).unwrap();
        assert_eq!(product.unit_price_cents(), 7_25);
    }

    #[test]
    fn test_filter() {
        let mut product = Product::create("Gravel", None, 9_00, "kg").unwrap();
        assert!(ProductFilter::price_between(5_00, 10_00).matches(&product));
        assert!(!ProductFilter::price_between(10_00, 20_00).matches(&product));
        assert!(ProductFilter::active().matches(&product));
        product.deactivate();
        assert!(!ProductFilter::active().matches(&product));
    }
}
