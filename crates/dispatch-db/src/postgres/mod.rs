//! PostgreSQL store.

mod repository;
mod schema;

pub(crate) use repository::PgRepository;

use crate::tracking::ChangeTracker;
use async_trait::async_trait;
use dispatch_core::changes::EntityChange;
use dispatch_core::customer::Customer;
use dispatch_core::order::Order;
use dispatch_core::ports::{CustomerRepository, DataContext, OrderRepository, ProductRepository};
use dispatch_core::product::Product;
use dispatch_core::{Error, Result};
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub(crate) fn db_error(e: sqlx::Error) -> Error {
    Error::Database(e.to_string())
}

/// Database connection pool.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect with the default pool settings.
    pub async fn connect(database_url: &str) -> Result<Self> {
        Self::connect_with(database_url, 20, Duration::from_secs(5)).await
    }

    pub async fn connect_with(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await
            .map_err(db_error)?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        info!("Database migrations applied");
        Ok(())
    }

    /// Opens a new session with its own change tracker and transaction.
    pub fn context(&self) -> PgDataContext {
        PgDataContext::new(self.pool.clone())
    }
}

/// Connection state shared by a context and its repositories.
pub(crate) struct PgSession {
    pool: PgPool,
    pub(crate) tracker: ChangeTracker,
    transaction: Mutex<Option<Transaction<'static, Postgres>>>,
}

// Statements run on the open transaction when there is one, on the pool
// otherwise.
impl PgSession {
    pub(crate) async fn fetch_all(
        &self,
        query: Query<'_, Postgres, PgArguments>,
    ) -> Result<Vec<PgRow>> {
        let mut transaction = self.transaction.lock().await;
        if let Some(tx) = transaction.as_mut() {
            return query.fetch_all(&mut **tx).await.map_err(db_error);
        }
        drop(transaction);
        query.fetch_all(&self.pool).await.map_err(db_error)
    }

    pub(crate) async fn fetch_optional(
        &self,
        query: Query<'_, Postgres, PgArguments>,
    ) -> Result<Option<PgRow>> {
        let mut transaction = self.transaction.lock().await;
        if let Some(tx) = transaction.as_mut() {
            return query.fetch_optional(&mut **tx).await.map_err(db_error);
        }
        drop(transaction);
        query.fetch_optional(&self.pool).await.map_err(db_error)
    }

    pub(crate) async fn fetch_one(&self, query: Query<'_, Postgres, PgArguments>) -> Result<PgRow> {
        let mut transaction = self.transaction.lock().await;
        if let Some(tx) = transaction.as_mut() {
            return query.fetch_one(&mut **tx).await.map_err(db_error);
        }
        drop(transaction);
        query.fetch_one(&self.pool).await.map_err(db_error)
    }

    /// Returns the number of rows affected.
    pub(crate) async fn execute(&self, query: Query<'_, Postgres, PgArguments>) -> Result<u64> {
        let mut transaction = self.transaction.lock().await;
        let result = match transaction.as_mut() {
            Some(tx) => query.execute(&mut **tx).await,
            None => query.execute(&self.pool).await,
        };
        result.map(|r| r.rows_affected()).map_err(db_error)
    }

    async fn save(&self, changes: &[EntityChange]) -> Result<u64> {
        let mut transaction = self.transaction.lock().await;
        if let Some(tx) = transaction.as_mut() {
            return schema::apply_changes(&mut **tx, changes).await;
        }
        drop(transaction);

        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let written = schema::apply_changes(&mut *tx, changes).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(written)
    }

    async fn begin(&self) -> Result<()> {
        let mut transaction = self.transaction.lock().await;
        if transaction.is_some() {
            return Err(Error::TransactionAlreadyActive);
        }
        *transaction = Some(self.pool.begin().await.map_err(db_error)?);
        debug!("Transaction started");
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let tx = self
            .transaction
            .lock()
            .await
            .take()
            .ok_or(Error::NoActiveTransaction("commit"))?;
        tx.commit().await.map_err(db_error)?;
        debug!("Transaction committed");
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let tx = self
            .transaction
            .lock()
            .await
            .take()
            .ok_or(Error::NoActiveTransaction("rollback"))?;
        self.tracker.clear();
        if let Err(e) = tx.rollback().await {
            warn!(error = %e, "Rollback failed; the connection discards the transaction");
            return Err(db_error(e));
        }
        debug!("Transaction rolled back");
        Ok(())
    }
}

/// [`DataContext`] over a PostgreSQL pool.
pub struct PgDataContext {
    session: Arc<PgSession>,
    orders: Arc<PgRepository<Order>>,
    customers: Arc<PgRepository<Customer>>,
    products: Arc<PgRepository<Product>>,
}

impl PgDataContext {
    pub fn new(pool: PgPool) -> Self {
        let session = Arc::new(PgSession {
            pool,
            tracker: ChangeTracker::new(),
            transaction: Mutex::new(None),
        });
        Self {
            orders: Arc::new(PgRepository::new(session.clone())),
            customers: Arc::new(PgRepository::new(session.clone())),
            products: Arc::new(PgRepository::new(session.clone())),
            session,
        }
    }
}

#[async_trait]
impl DataContext for PgDataContext {
    fn orders(&self) -> Arc<dyn OrderRepository> {
        self.orders.clone()
    }

    fn customers(&self) -> Arc<dyn CustomerRepository> {
        self.customers.clone()
    }

    fn products(&self) -> Arc<dyn ProductRepository> {
        self.products.clone()
    }

    fn pending_changes(&self) -> Vec<EntityChange> {
        self.session.tracker.snapshot()
    }

    async fn save_changes(&self) -> Result<u64> {
        let changes = self.session.tracker.snapshot();
        if changes.is_empty() {
            return Ok(0);
        }
        let written = self.session.save(&changes).await?;
        self.session.tracker.clear();
        info!(written, "Saved changes");
        Ok(written)
    }

    async fn begin_transaction(&self) -> Result<()> {
        self.session.begin().await
    }

    async fn commit_transaction(&self) -> Result<()> {
        self.session.commit().await
    }

    async fn rollback_transaction(&self) -> Result<()> {
        self.session.rollback().await
    }
}
