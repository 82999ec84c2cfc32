//! PostgreSQL integration tests.
//!
//! Run with: `cargo test -p dispatch-tests --test postgres_tests --features integration`

#![cfg(feature = "integration")]

use dispatch_cache::keys;
use dispatch_core::Error;
use dispatch_core::cache::EntryOptions;
use dispatch_core::entity::Entity;
use dispatch_core::geo::DistanceInterval;
use dispatch_core::order::{OrderFilter, OrderStatus};
use dispatch_core::paging::PageRequest;
use dispatch_core::ports::{CacheService, Repository, UnitOfWork};
use dispatch_db::Database;
use dispatch_service::{MetricsRange, NewCustomer, NewOrder, NewProduct};
use dispatch_tests::{
    context::TestContext,
    fixtures::{CustomerFixture, OrderFixture, ProductFixture, Routes},
};

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let ctx = TestContext::start()
        .await
        .expect("Failed to create context");

    let second = Database::connect(ctx.db_url())
        .await
        .expect("Failed to connect");
    second.migrate().await.expect("Re-running migrations failed");

    let uow = ctx.unit_of_work();
    assert_eq!(uow.customers().count(None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_customer_crud_bumps_version() {
    let ctx = TestContext::start()
        .await
        .expect("Failed to create context");
    let uow = ctx.unit_of_work();

    // Create
    let customer = CustomerFixture::numbered(1);
    uow.customers().add(customer.clone()).await.unwrap();
    assert_eq!(uow.save_changes().await.unwrap(), 1);

    // Read
    let mut found = uow
        .customers()
        .get_by_id(customer.id())
        .await
        .expect("Failed to get customer")
        .expect("Customer not found");
    assert_eq!(found.email(), "customer1@example.com");
    assert_eq!(found.version(), 0);

    // Update
    found
        .update_contact_info("new@example.com", "+51 1 555 0199")
        .unwrap();
    uow.customers().update(found).await.unwrap();
    uow.save_changes().await.unwrap();

    let updated = uow
        .customers()
        .get_by_email("NEW@example.com")
        .await
        .unwrap()
        .expect("Customer not found by email");
    assert_eq!(updated.version(), 1);

    // Delete
    assert!(uow.customers().remove_by_id(customer.id()).await.unwrap());
    uow.save_changes().await.unwrap();
    let gone = uow.customers().get_by_id(customer.id()).await.unwrap();
    assert!(gone.is_none());
}

#[tokio::test]
async fn test_stale_update_is_a_conflict() {
    let ctx = TestContext::start()
        .await
        .expect("Failed to create context");

    let product = ProductFixture::priced("Cement", 2_450);
    let first = ctx.unit_of_work();
    first.products().add(product.clone()).await.unwrap();
    first.save_changes().await.unwrap();

    // Two sessions load the same row.
    let second = ctx.unit_of_work();
    let mut mine = first.products().get_by_id(product.id()).await.unwrap().unwrap();
    let mut theirs = second.products().get_by_id(product.id()).await.unwrap().unwrap();

    mine.deactivate();
    first.products().update(mine).await.unwrap();
    first.save_changes().await.unwrap();

    let tags = [keys::tags::PRODUCTS.to_string()];
    ctx.cache
        .set_bytes("sentinel", b"1".to_vec(), &tags, EntryOptions::default())
        .await;

    theirs.deactivate();
    second.products().update(theirs).await.unwrap();
    let err = second.save_changes().await.unwrap_err();
    assert!(matches!(err, Error::ConcurrencyConflict(_)));
    assert!(err.is_retryable());

    // The failed save leaves the cache alone.
    assert!(ctx.cache.get_bytes("sentinel").await.is_some());
}

#[tokio::test]
async fn test_referenced_customer_cannot_be_deleted() {
    let ctx = TestContext::start()
        .await
        .expect("Failed to create context");
    let uow = ctx.unit_of_work();

    let customer = CustomerFixture::numbered(1);
    let product = ProductFixture::priced("Sand", 300);
    uow.customers().add(customer.clone()).await.unwrap();
    uow.products().add(product.clone()).await.unwrap();
    uow.orders()
        .add(OrderFixture::to(&customer, &product, Routes::short()))
        .await
        .unwrap();
    uow.save_changes().await.unwrap();

    let err = uow.customers().remove_by_id(customer.id()).await.unwrap_err();
    assert!(matches!(err, Error::Database(_)));

    uow.customers().remove(&customer).await.unwrap();
    let err = uow.save_changes().await.unwrap_err();
    assert!(matches!(err, Error::Database(_)));

    let still_there = ctx.unit_of_work().customers().get_by_id(customer.id()).await.unwrap();
    assert!(still_there.is_some());
}

#[tokio::test]
async fn test_transaction_commit_invalidates_once() {
    let ctx = TestContext::start()
        .await
        .expect("Failed to create context");
    let uow = ctx.unit_of_work();

    let customer = CustomerFixture::numbered(1);
    let product = ProductFixture::priced("Rebar", 1_890);
    uow.customers().add(customer.clone()).await.unwrap();
    uow.products().add(product.clone()).await.unwrap();
    uow.save_changes().await.unwrap();

    // Warm the report from another session.
    let observer = ctx.unit_of_work();
    let before = observer.orders().count_by_distance_interval().await.unwrap();
    assert!(before.iter().all(|c| c.count == 0));

    uow.begin_transaction().await.unwrap();
    for destination in [Routes::short(), Routes::medium(), Routes::long()] {
        uow.orders()
            .add(OrderFixture::to(&customer, &product, destination))
            .await
            .unwrap();
        uow.save_changes().await.unwrap();
    }

    // The transaction reads its own rows; the observer keeps committed state.
    let during = uow.orders().count_by_distance_interval().await.unwrap();
    assert_eq!(during.iter().map(|c| c.count).sum::<u64>(), 3);
    let outside = observer.orders().count_by_distance_interval().await.unwrap();
    assert!(outside.iter().all(|c| c.count == 0));

    uow.commit_transaction().await.unwrap();
    assert!(!uow.in_transaction());

    let after = observer.orders().count_by_distance_interval().await.unwrap();
    let count = |interval: DistanceInterval| {
        after
            .iter()
            .find(|c| c.interval == interval)
            .map(|c| c.count)
    };
    assert_eq!(count(DistanceInterval::UpTo50), Some(1));
    assert_eq!(count(DistanceInterval::UpTo200), Some(1));
    assert_eq!(count(DistanceInterval::UpTo500), Some(1));
}

#[tokio::test]
async fn test_transaction_rollback_discards_writes() {
    let ctx = TestContext::start()
        .await
        .expect("Failed to create context");
    let uow = ctx.unit_of_work();

    uow.begin_transaction().await.unwrap();
    let customer = CustomerFixture::numbered(7);
    uow.customers().add(customer.clone()).await.unwrap();
    uow.save_changes().await.unwrap();
    assert!(uow.customers().get_by_id(customer.id()).await.unwrap().is_some());

    uow.rollback_transaction().await.unwrap();

    let fresh = ctx.unit_of_work();
    assert!(fresh.customers().get_by_id(customer.id()).await.unwrap().is_none());
    assert!(uow.customers().get_by_id(customer.id()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_queries_and_paging() {
    let ctx = TestContext::start()
        .await
        .expect("Failed to create context");
    let uow = ctx.unit_of_work();

    let customers: Vec<_> = (0..5).map(CustomerFixture::numbered).collect();
    let product = ProductFixture::priced("Cement", 2_450);
    uow.customers().add_range(customers.clone()).await.unwrap();
    uow.products().add(product.clone()).await.unwrap();
    for customer in &customers[..2] {
        uow.orders()
            .add(OrderFixture::to(customer, &product, Routes::short()))
            .await
            .unwrap();
    }
    uow.save_changes().await.unwrap();

    let page = uow
        .customers()
        .get_paged(&PageRequest::new(2, 2))
        .await
        .expect("Failed to page customers");
    assert_eq!(page.total_count, 5);
    assert_eq!(page.items.len(), 2);

    let mine = uow.orders().by_customer(customers[0].id()).await.unwrap();
    assert_eq!(mine.len(), 1);

    let created = uow
        .orders()
        .count(Some(&OrderFilter::default().with_status(OrderStatus::Created)))
        .await
        .unwrap();
    assert_eq!(created, 2);

    let with_orders = uow.customers().with_orders().await.unwrap();
    assert_eq!(with_orders.len(), 2);
    assert!(with_orders.iter().all(|c| c.orders.len() == 1));

    let per_customer = uow.orders().count_by_customer_and_interval().await.unwrap();
    assert_eq!(per_customer.len(), 2);

    assert_eq!(uow.products().average_price().await.unwrap(), Some(2_450));
    assert_eq!(uow.products().price_range().await.unwrap(), Some((2_450, 2_450)));
}

#[tokio::test]
async fn test_service_flow_over_postgres() {
    let ctx = TestContext::start()
        .await
        .expect("Failed to create context");
    let service = ctx.service();

    let customer = service
        .create_customer(NewCustomer {
            name: "Ana Torres".into(),
            email: "ana@example.com".into(),
            phone: "+51 999 000 111".into(),
        })
        .await
        .unwrap();
    let product = service
        .create_product(NewProduct {
            name: "Cement".into(),
            description: None,
            unit_price_cents: 2_450,
            unit: "bag".into(),
        })
        .await
        .unwrap();

    let order = service
        .create_order(NewOrder {
            customer_id: customer.id(),
            product_id: product.id(),
            quantity: 4,
            origin: Routes::depot(),
            destination: Routes::medium(),
        })
        .await
        .unwrap();
    assert_eq!(order.distance_interval(), DistanceInterval::UpTo200);

    let updated = service
        .update_order_status(order.id(), OrderStatus::InProgress)
        .await
        .unwrap();
    assert_eq!(updated.status(), OrderStatus::InProgress);
    assert_eq!(updated.version(), 1);

    let details = service.order_details(order.id()).await.unwrap();
    assert_eq!(details.order.status(), OrderStatus::InProgress);
    assert_eq!(details.customer.map(|c| c.id()), Some(customer.id()));

    let report = service.orders_report(Some(customer.id())).await.unwrap();
    assert_eq!(report.total, 1);

    let metrics = service
        .orders_metrics(MetricsRange::all_time(), true)
        .await
        .unwrap();
    assert_eq!(metrics.orders.in_progress, 1);
    assert_eq!(metrics.customers.total, 1);

    // A second service shares the cache and sees the same state.
    let other = ctx.service();
    assert!(
        other
            .unit_of_work()
            .orders()
            .has_orders_in_progress_for_customer(customer.id())
            .await
            .unwrap()
    );
    service.update_order_status(order.id(), OrderStatus::Sending).await.unwrap();
    let refreshed = other
        .orders_metrics(MetricsRange::all_time(), true)
        .await
        .unwrap();
    assert_eq!(refreshed.orders.sending, 1);
    assert_eq!(refreshed.orders.in_progress, 0);
}
