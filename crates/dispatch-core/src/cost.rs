//! Delivery pricing and order quantities.

use crate::geo::{Distance, DistanceInterval};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_CURRENCY: &str = "USD";

/// A non-negative delivery charge held in minor units (cents).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryCost {
    amount_cents: u64,
    currency: String,
}

impl DeliveryCost {
    pub fn new(amount_cents: u64) -> Self {
        Self::with_currency(amount_cents, DEFAULT_CURRENCY)
    }

    pub fn with_currency(amount_cents: u64, currency: impl Into<String>) -> Self {
        Self {
            amount_cents,
            currency: currency.into(),
        }
    }

    /// Builds a cost from a signed amount, rejecting negatives.
    pub fn from_signed(amount_cents: i64, currency: impl Into<String>) -> Result<Self> {
        let amount = u64::try_from(amount_cents).map_err(|_| {
            Error::InvalidCost(format!("delivery cost cannot be negative ({amount_cents})"))
        })?;
        Ok(Self::with_currency(amount, currency))
    }

    /// Tiered price for a distance.
    pub fn for_distance(distance: &Distance) -> Self {
        Self::new(interval_price_cents(distance.interval()))
    }

    /// Returns a new cost reduced by `percentage` (0-100), rounded to the cent.
    pub fn apply_discount(&self, percentage: f64) -> Result<Self> {
        if !(0.0..=100.0).contains(&percentage) {
            return Err(Error::InvalidDiscount(percentage));
        }
        let remaining = self.amount_cents as f64 * (100.0 - percentage) / 100.0;
        Ok(Self::with_currency(
            remaining.round() as u64,
            self.currency.clone(),
        ))
    }

    pub fn amount_cents(&self) -> u64 {
        self.amount_cents
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }
}

impl fmt::Display for DeliveryCost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:02} {}",
            self.amount_cents / 100,
            self.amount_cents % 100,
            self.currency
        )
    }
}

fn interval_price_cents(interval: DistanceInterval) -> u64 {
    match interval {
        DistanceInterval::UpTo50 => 100_00,
        DistanceInterval::UpTo200 => 300_00,
        DistanceInterval::UpTo500 => 1_000_00,
        DistanceInterval::UpTo1000 => 1_500_00,
    }
}

/// Label of the pricing band a distance falls in.
///
/// Uses the same band boundaries as [`DeliveryCost::for_distance`].
pub fn cost_interval(distance: &Distance) -> &'static str {
    distance.interval().label()
}

/// A strictly positive item count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Quantity(u32);

impl Quantity {
    pub fn new(value: u32) -> Result<Self> {
        if value == 0 {
            return Err(Error::InvalidQuantity(
                "quantity must be greater than zero".into(),
            ));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn add(&self, increment: u32) -> Result<Self> {
        if increment == 0 {
            return Err(Error::InvalidQuantity("increment must be positive".into()));
        }
        let value = self
            .0
            .checked_add(increment)
            .ok_or_else(|| Error::InvalidQuantity("quantity overflow".into()))?;
        Ok(Self(value))
    }

    pub fn subtract(&self, decrement: u32) -> Result<Self> {
        if decrement == 0 {
            return Err(Error::InvalidQuantity("decrement must be positive".into()));
        }
        if decrement >= self.0 {
            return Err(Error::InvalidQuantity(format!(
                "cannot subtract {decrement} from {}",
                self.0
            )));
        }
        Ok(Self(self.0 - decrement))
    }
}

impl TryFrom<u32> for Quantity {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        Quantity::new(value)
    }
}

impl From<Quantity> for u32 {
    fn from(quantity: Quantity) -> Self {
        quantity.0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
