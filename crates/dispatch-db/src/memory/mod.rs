//! In-memory transactional store.
//!
//! Behaves like the PostgreSQL adapter from the caller's point of view:
//! optimistic version checks, restrict-on-delete references, atomic saves and
//! explicit transactions. Used by the demo binary and by tests.

mod repository;

pub(crate) use repository::MemoryRepository;

use crate::tracking::ChangeTracker;
use async_trait::async_trait;
use dispatch_core::changes::{ChangeKind, EntityChange, TrackedEntity};
use dispatch_core::customer::Customer;
use dispatch_core::entity::Entity;
use dispatch_core::ids::{CustomerId, OrderId, ProductId};
use dispatch_core::order::Order;
use dispatch_core::ports::{CustomerRepository, DataContext, OrderRepository, ProductRepository};
use dispatch_core::product::Product;
use dispatch_core::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub(crate) struct Tables {
    pub orders: BTreeMap<OrderId, Order>,
    pub customers: BTreeMap<CustomerId, Customer>,
    pub products: BTreeMap<ProductId, Product>,
}

/// Access to the table holding one entity kind.
pub(crate) trait MemoryEntity: Entity {
    fn table(tables: &Tables) -> &BTreeMap<Self::Id, Self>;

    fn table_mut(tables: &mut Tables) -> &mut BTreeMap<Self::Id, Self>;

    /// Fails when another row still references this one.
    fn check_unreferenced(_tables: &Tables, _id: Self::Id) -> Result<()> {
        Ok(())
    }

    /// Fails when a row this one references is missing.
    fn check_references(&self, _tables: &Tables) -> Result<()> {
        Ok(())
    }
}

impl MemoryEntity for Order {
    fn table(tables: &Tables) -> &BTreeMap<OrderId, Order> {
        &tables.orders
    }

    fn table_mut(tables: &mut Tables) -> &mut BTreeMap<OrderId, Order> {
        &mut tables.orders
    }

    fn check_references(&self, tables: &Tables) -> Result<()> {
        if !tables.customers.contains_key(&self.customer_id()) {
            return Err(Error::Database(format!(
                "order {} references missing customer {}",
                self.id(),
                self.customer_id()
            )));
        }
        if !tables.products.contains_key(&self.product_id()) {
            return Err(Error::Database(format!(
                "order {} references missing product {}",
                self.id(),
                self.product_id()
            )));
        }
        Ok(())
    }
}

impl MemoryEntity for Customer {
    fn table(tables: &Tables) -> &BTreeMap<CustomerId, Customer> {
        &tables.customers
    }

    fn table_mut(tables: &mut Tables) -> &mut BTreeMap<CustomerId, Customer> {
        &mut tables.customers
    }

    fn check_unreferenced(tables: &Tables, id: CustomerId) -> Result<()> {
        if tables.orders.values().any(|o| o.customer_id() == id) {
            return Err(Error::Database(format!("customer {id} is referenced by orders")));
        }
        Ok(())
    }

    fn check_references(&self, tables: &Tables) -> Result<()> {
        let taken = tables
            .customers
            .values()
            .any(|c| c.id() != self.id() && c.email() == self.email());
        if taken {
            return Err(Error::Database(format!(
                "duplicate customer email {}",
                self.email()
            )));
        }
        Ok(())
    }
}

impl MemoryEntity for Product {
    fn table(tables: &Tables) -> &BTreeMap<ProductId, Product> {
        &tables.products
    }

    fn table_mut(tables: &mut Tables) -> &mut BTreeMap<ProductId, Product> {
        &mut tables.products
    }

    fn check_unreferenced(tables: &Tables, id: ProductId) -> Result<()> {
        if tables.orders.values().any(|o| o.product_id() == id) {
            return Err(Error::Database(format!("product {id} is referenced by orders")));
        }
        Ok(())
    }
}

fn apply_one<E: MemoryEntity>(tables: &mut Tables, entity: &E, kind: ChangeKind) -> Result<()> {
    let id = entity.id();
    let stored_version = E::table(tables).get(&id).map(Entity::version);

    match kind {
        ChangeKind::Added => {
            if stored_version.is_some() {
                return Err(Error::Database(format!("duplicate {} id {id}", E::NAME)));
            }
            entity.check_references(tables)?;
            E::table_mut(tables).insert(id, entity.clone());
        }
        ChangeKind::Modified => {
            if stored_version != Some(entity.version()) {
                return Err(conflict::<E>(id));
            }
            entity.check_references(tables)?;
            let mut next = entity.clone();
            next.set_version(entity.version() + 1);
            E::table_mut(tables).insert(id, next);
        }
        ChangeKind::Deleted => {
            if stored_version != Some(entity.version()) {
                return Err(conflict::<E>(id));
            }
            E::check_unreferenced(tables, id)?;
            E::table_mut(tables).remove(&id);
        }
    }
    Ok(())
}

fn conflict<E: Entity>(id: E::Id) -> Error {
    Error::ConcurrencyConflict(format!(
        "{} {id} was modified or deleted by another writer",
        E::NAME
    ))
}

/// Applies a batch of changes in order. Stops at the first failure.
pub(crate) fn apply_changes(tables: &mut Tables, changes: &[EntityChange]) -> Result<u64> {
    for change in changes {
        match &change.entity {
            TrackedEntity::Order(order) => apply_one(tables, order, change.kind)?,
            TrackedEntity::Customer(customer) => apply_one(tables, customer, change.kind)?,
            TrackedEntity::Product(product) => apply_one(tables, product, change.kind)?,
        }
    }
    Ok(changes.len() as u64)
}

type WriteOp = Box<dyn Fn(&mut Tables) -> Result<u64> + Send + Sync>;

struct PendingTransaction {
    working: Tables,
    log: Vec<WriteOp>,
}

/// Shared storage. Cheap to clone; every clone sees the same tables.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new session with its own change tracker and transaction.
    pub fn context(&self) -> MemoryDataContext {
        MemoryDataContext::new(self.clone())
    }

    pub async fn row_counts(&self) -> (usize, usize, usize) {
        let tables = self.tables.read().await;
        (tables.orders.len(), tables.customers.len(), tables.products.len())
    }
}

/// State shared by a context and the repositories it hands out.
pub(crate) struct Session {
    database: MemoryDatabase,
    pub(crate) tracker: ChangeTracker,
    transaction: Mutex<Option<PendingTransaction>>,
}

impl Session {
    /// Runs `f` against the rows visible to this session: the transaction's
    /// working copy when one is open, the committed tables otherwise.
    pub(crate) async fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        let transaction = self.transaction.lock().await;
        match transaction.as_ref() {
            Some(pending) => f(&pending.working),
            None => {
                let tables = self.database.tables.read().await;
                f(&tables)
            }
        }
    }

    /// Applies `op` atomically. Inside a transaction it only touches the
    /// working copy and is replayed onto the committed tables at commit.
    pub(crate) async fn write(
        &self,
        op: impl Fn(&mut Tables) -> Result<u64> + Send + Sync + 'static,
    ) -> Result<u64> {
        let mut transaction = self.transaction.lock().await;
        match transaction.as_mut() {
            Some(pending) => {
                let mut next = pending.working.clone();
                let written = op(&mut next)?;
                pending.working = next;
                pending.log.push(Box::new(op));
                Ok(written)
            }
            None => {
                let mut tables = self.database.tables.write().await;
                let mut next = tables.clone();
                let written = op(&mut next)?;
                *tables = next;
                Ok(written)
            }
        }
    }

    async fn begin(&self) -> Result<()> {
        let mut transaction = self.transaction.lock().await;
        if transaction.is_some() {
            return Err(Error::TransactionAlreadyActive);
        }
        let working = self.database.tables.read().await.clone();
        *transaction = Some(PendingTransaction {
            working,
            log: Vec::new(),
        });
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let mut transaction = self.transaction.lock().await;
        let pending = transaction
            .take()
            .ok_or(Error::NoActiveTransaction("commit"))?;

        let mut tables = self.database.tables.write().await;
        let mut next = tables.clone();
        for op in &pending.log {
            op(&mut next)?;
        }
        *tables = next;
        debug!(writes = pending.log.len(), "Committed in-memory transaction");
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let mut transaction = self.transaction.lock().await;
        if transaction.take().is_none() {
            return Err(Error::NoActiveTransaction("rollback"));
        }
        self.tracker.clear();
        Ok(())
    }
}

/// [`DataContext`] over a [`MemoryDatabase`].
pub struct MemoryDataContext {
    session: Arc<Session>,
    orders: Arc<MemoryRepository<Order>>,
    customers: Arc<MemoryRepository<Customer>>,
    products: Arc<MemoryRepository<Product>>,
}

impl MemoryDataContext {
    pub fn new(database: MemoryDatabase) -> Self {
        let session = Arc::new(Session {
            database,
            tracker: ChangeTracker::new(),
            transaction: Mutex::new(None),
        });
        Self {
            orders: Arc::new(MemoryRepository::new(session.clone())),
            customers: Arc::new(MemoryRepository::new(session.clone())),
            products: Arc::new(MemoryRepository::new(session.clone())),
            session,
        }
    }
}

#[async_trait]
impl DataContext for MemoryDataContext {
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
        let written = self
            .session
            .write(move |tables| apply_changes(tables, &changes))
            .await?;
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
