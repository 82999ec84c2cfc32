//! Integration test infrastructure for Dispatch.
//!
//! Starts PostgreSQL in a container and wires the caching unit of work over
//! it, so the same scenarios the in-memory store passes can be run against
//! real SQL.
//!
//! ```ignore
//! use dispatch_tests::TestContext;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let ctx = TestContext::start().await.unwrap();
//!     let uow = ctx.unit_of_work();
//! }
//! ```

pub mod containers;
pub mod context;
pub mod fixtures;

pub use context::TestContext;
pub use fixtures::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,dispatch_db=debug,dispatch_tests=debug")),
        )
        .with_test_writer()
        .try_init();
}
