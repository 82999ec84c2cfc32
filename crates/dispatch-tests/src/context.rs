//! Test context over a migrated PostgreSQL container.

use crate::containers::PostgresContainer;
use dispatch_cache::{TagCache, TtlPolicy, TypedCache};
use dispatch_db::{CachingUnitOfWork, Database, PgDataContext};
use dispatch_service::DispatchService;
use std::sync::Arc;

/// PostgreSQL plus one shared cache.
///
/// Drop this to stop the container.
pub struct TestContext {
    pub postgres: PostgresContainer,
    pub db: Database,
    pub cache: Arc<TagCache>,
}

impl TestContext {
    pub async fn start() -> anyhow::Result<Self> {
        crate::init_test_logging();

        let postgres = PostgresContainer::start().await?;
        let db = Database::connect(postgres.url()).await?;
        db.migrate().await?;

        Ok(Self {
            postgres,
            db,
            cache: Arc::new(TagCache::default()),
        })
    }

    /// A new unit of work with its own session, sharing the cache.
    pub fn unit_of_work(&self) -> CachingUnitOfWork<PgDataContext> {
        CachingUnitOfWork::new(self.db.context(), self.cache.clone(), TtlPolicy::default())
    }

    pub fn service(&self) -> DispatchService<CachingUnitOfWork<PgDataContext>> {
        DispatchService::new(self.unit_of_work())
            .with_metrics_cache(TypedCache::new(self.cache.clone()), TtlPolicy::default().analytics)
    }

    pub fn db_url(&self) -> &str {
        self.postgres.url()
    }
}
