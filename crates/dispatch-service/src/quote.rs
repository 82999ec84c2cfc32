//! Delivery price quotes.

use dispatch_core::Result;
use dispatch_core::cost::DeliveryCost;
use dispatch_core::geo::{Coordinate, DistanceInterval, calculate_distance};
use serde::Serialize;

/// Price for delivering between two points, before any order exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub distance_km: f64,
    pub interval: DistanceInterval,
    pub cost: DeliveryCost,
    pub discount_percent: Option<f64>,
}

/// Computes the distance, band and price, applying `discount_percent` if given.
pub fn quote(
    origin: &Coordinate,
    destination: &Coordinate,
    discount_percent: Option<f64>,
) -> Result<Quote> {
    let distance = calculate_distance(origin, destination)?;
    let mut cost = DeliveryCost::for_distance(&distance);
    if let Some(percent) = discount_percent {
        cost = cost.apply_discount(percent)?;
    }
    Ok(Quote {
        distance_km: distance.kilometers(),
        interval: distance.interval(),
        cost,
        discount_percent,
    })
}
