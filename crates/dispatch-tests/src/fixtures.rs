//! Sample data for integration tests.

use dispatch_core::cost::Quantity;
use dispatch_core::customer::Customer;
use dispatch_core::geo::Coordinate;
use dispatch_core::order::Order;
use dispatch_core::product::Product;

/// Routes from the Lima depot, one per distance band.
pub struct Routes;

impl Routes {
    pub fn depot() -> Coordinate {
        point(-12.046374, -77.042793)
    }

    /// About 8 km.
    pub fn short() -> Coordinate {
        point(-12.066667, -77.116667)
    }

    /// About 120 km.
    pub fn medium() -> Coordinate {
        point(-11.106700, -77.605000)
    }

    /// About 490 km.
    pub fn long() -> Coordinate {
        point(-8.111800, -79.028700)
    }
}

fn point(latitude: f64, longitude: f64) -> Coordinate {
    Coordinate::new(latitude, longitude).expect("fixture coordinate")
}

pub struct CustomerFixture;

impl CustomerFixture {
    pub fn numbered(n: usize) -> Customer {
        Customer::create(
            &format!("Customer {n:02}"),
            &format!("customer{n}@example.com"),
            "+51 1 555 0100",
        )
        .expect("fixture customer")
    }
}

pub struct ProductFixture;

impl ProductFixture {
    pub fn priced(name: &str, cents: i64) -> Product {
        Product::create(name, None, cents, "unit").expect("fixture product")
    }
}

pub struct OrderFixture;

impl OrderFixture {
    pub fn to(customer: &Customer, product: &Product, destination: Coordinate) -> Order {
        Order::create(
            customer.id(),
            product.id(),
            Quantity::new(1).expect("fixture quantity"),
            Routes::depot(),
            destination,
        )
        .expect("fixture order")
    }
}
