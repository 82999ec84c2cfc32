//! Application services for Dispatch.
//!
//! [`DispatchService`] runs the order use cases against any
//! [`UnitOfWork`](dispatch_core::ports::UnitOfWork); [`quote`] prices a
//! delivery without touching storage.

pub mod quote;
pub mod service;

pub use quote::{Quote, quote};
pub use dispatch_core::metrics::{MetricsRange, OrdersMetrics};
pub use service::{DispatchService, NewCustomer, NewOrder, NewProduct, OrdersReport};
