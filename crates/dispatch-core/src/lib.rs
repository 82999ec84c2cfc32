//! Dispatch Core
//!
//! Domain types, value objects, error handling and port traits for the
//! dispatch system. This crate has minimal dependencies and defines the
//! shared vocabulary used by the cache, storage and service crates.

pub mod cache;
pub mod changes;
pub mod cost;
pub mod customer;
pub mod entity;
pub mod error;
pub mod geo;
pub mod ids;
pub mod metrics;
pub mod order;
pub mod paging;
pub mod ports;
pub mod product;
pub mod reports;

pub use error::{Error, Result};
pub use ids::*;
