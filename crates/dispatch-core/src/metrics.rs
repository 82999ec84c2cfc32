//! Order metrics: volume, revenue, operations, customers and trends.

use crate::customer::Customer;
use crate::ids::CustomerId;
use crate::order::{Order, OrderStatus};
use crate::reports::IntervalCount;
use crate::{Error, Result};
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const DEFAULT_CURRENCY: &str = "USD";

/// Creation-time window for metrics. Both ends are inclusive and optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl MetricsRange {
    pub fn all_time() -> Self {
        Self::default()
    }

    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match (self.from, self.to) {
            (Some(from), Some(to)) if from > to => Err(Error::Validation(format!(
                "metrics range starts after it ends ({from} > {to})"
            ))),
            _ => Ok(()),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| at >= from) && self.to.is_none_or(|to| at <= to)
    }

    /// `"2026-03-01 to 2026-03-31"`, `"since ..."`, `"until ..."` or `"all time"`.
    pub fn label(&self) -> String {
        let day = |at: DateTime<Utc>| at.format("%Y-%m-%d").to_string();
        match (self.from, self.to) {
            (Some(from), Some(to)) => format!("{} to {}", day(from), day(to)),
            (Some(from), None) => format!("since {}", day(from)),
            (None, Some(to)) => format!("until {}", day(to)),
            (None, None) => "all time".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrdersMetrics {
    pub generated_at: DateTime<Utc>,
    pub period: String,
    pub orders: OrderCountMetrics,
    pub financial: FinancialMetrics,
    pub operational: OperationalMetrics,
    pub customers: CustomerMetrics,
    pub trends: Option<TrendMetrics>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderCountMetrics {
    pub total: u64,
    pub today: u64,
    pub this_week: u64,
    pub this_month: u64,
    pub created: u64,
    pub in_progress: u64,
    pub sending: u64,
    pub delivered: u64,
    pub cancelled: u64,
    /// Delivered share of finished orders, in percent.
    pub delivery_success_rate: f64,
    /// Cancelled share of all orders, in percent.
    pub cancellation_rate: f64,
}

/// Revenue figures in cents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialMetrics {
    pub currency: String,
    pub total_revenue_cents: u64,
    pub today_revenue_cents: u64,
    pub week_revenue_cents: u64,
    pub month_revenue_cents: u64,
    pub average_order_value_cents: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationalMetrics {
    pub average_distance_km: f64,
    pub total_distance_km: f64,
    pub by_interval: Vec<IntervalCount>,
    /// Orders per day, over the days that had any.
    pub average_orders_per_day: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerMetrics {
    pub total: u64,
    pub new_today: u64,
    pub new_this_week: u64,
    pub new_this_month: u64,
    /// Customers with an order in the last 30 days.
    pub active: u64,
    pub average_orders_per_customer: f64,
}

/// Month-over-month growth (percent) and recent history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendMetrics {
    pub order_growth_rate: f64,
    pub revenue_growth_rate: f64,
    pub customer_growth_rate: f64,
    pub last_7_days: Vec<DailyMetric>,
    pub last_6_months: Vec<MonthlyMetric>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyMetric {
    pub date: NaiveDate,
    pub order_count: u64,
    pub revenue_cents: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyMetric {
    pub year: i32,
    pub month: u32,
    /// e.g. `"Mar 2026"`.
    pub label: String,
    pub order_count: u64,
    pub revenue_cents: u64,
    pub new_customers: u64,
}

/// Day boundaries relative to a point in time. Weeks start on Sunday.
struct Calendar {
    today: NaiveDate,
    week_start: NaiveDate,
    month_start: NaiveDate,
}

impl Calendar {
    fn at(now: DateTime<Utc>) -> Self {
        let today = now.date_naive();
        let week_start = today - Duration::days(i64::from(today.weekday().num_days_from_sunday()));
        Self {
            today,
            week_start,
            month_start: first_of_month(today),
        }
    }
}

impl OrdersMetrics {
    /// Metrics over `orders` created within `range`, as seen at `now`.
    ///
    /// Customer totals cover every customer; trends cover every order
    /// regardless of `range`.
    pub fn compute(
        orders: &[Order],
        customers: &[Customer],
        range: &MetricsRange,
        include_trends: bool,
        now: DateTime<Utc>,
    ) -> Self {
        let calendar = Calendar::at(now);
        let selected: Vec<&Order> = orders
            .iter()
            .filter(|o| range.contains(o.created_at()))
            .collect();

        Self {
            generated_at: now,
            period: range.label(),
            orders: order_counts(&selected, &calendar),
            financial: financial(&selected, &calendar),
            operational: operational(&selected),
            customers: customer_metrics(customers, &selected, &calendar),
            trends: include_trends.then(|| trends(orders, customers, &calendar)),
        }
    }
}

fn order_counts(orders: &[&Order], calendar: &Calendar) -> OrderCountMetrics {
    let with_status = |status: OrderStatus| count(orders.iter().filter(|o| o.status() == status));
    let total = orders.len() as u64;
    let delivered = with_status(OrderStatus::Delivered);
    let cancelled = with_status(OrderStatus::Cancelled);

    OrderCountMetrics {
        total,
        today: count(orders.iter().filter(|o| day_of(o) == calendar.today)),
        this_week: count(orders.iter().filter(|o| day_of(o) >= calendar.week_start)),
        this_month: count(orders.iter().filter(|o| day_of(o) >= calendar.month_start)),
        created: with_status(OrderStatus::Created),
        in_progress: with_status(OrderStatus::InProgress),
        sending: with_status(OrderStatus::Sending),
        delivered,
        cancelled,
        delivery_success_rate: percent(delivered, delivered + cancelled),
        cancellation_rate: percent(cancelled, total),
    }
}

fn financial(orders: &[&Order], calendar: &Calendar) -> FinancialMetrics {
    let revenue = |keep: &dyn Fn(&Order) -> bool| -> u64 {
        orders
            .iter()
            .filter(|o| keep(**o))
            .map(|o| o.cost().amount_cents())
            .sum()
    };
    let total = revenue(&|_| true);

    FinancialMetrics {
        currency: orders
            .first()
            .map_or(DEFAULT_CURRENCY, |o| o.cost().currency())
            .to_string(),
        total_revenue_cents: total,
        today_revenue_cents: revenue(&|o| day_of(o) == calendar.today),
        week_revenue_cents: revenue(&|o| day_of(o) >= calendar.week_start),
        month_revenue_cents: revenue(&|o| day_of(o) >= calendar.month_start),
        average_order_value_cents: if orders.is_empty() {
            0
        } else {
            (total as f64 / orders.len() as f64).round() as u64
        },
    }
}

fn operational(orders: &[&Order]) -> OperationalMetrics {
    if orders.is_empty() {
        return OperationalMetrics {
            by_interval: IntervalCount::tally(std::iter::empty()),
            ..Default::default()
        };
    }
    let total_km: f64 = orders.iter().map(|o| o.distance().kilometers()).sum();
    let days: HashSet<NaiveDate> = orders.iter().map(|o| day_of(o)).collect();

    OperationalMetrics {
        average_distance_km: round2(total_km / orders.len() as f64),
        total_distance_km: round2(total_km),
        by_interval: IntervalCount::tally(orders.iter().copied()),
        average_orders_per_day: round2(orders.len() as f64 / days.len() as f64),
    }
}

fn customer_metrics(customers: &[Customer], orders: &[&Order], calendar: &Calendar) -> CustomerMetrics {
    let joined = |keep: &dyn Fn(NaiveDate) -> bool| {
        count(customers.iter().filter(|c| keep(c.created_at().date_naive())))
    };
    let active_since = calendar.today - Duration::days(30);
    let active: HashSet<CustomerId> = orders
        .iter()
        .filter(|o| day_of(o) >= active_since)
        .map(|o| o.customer_id())
        .collect();

    CustomerMetrics {
        total: customers.len() as u64,
        new_today: joined(&|day| day == calendar.today),
        new_this_week: joined(&|day| day >= calendar.week_start),
        new_this_month: joined(&|day| day >= calendar.month_start),
        active: active.len() as u64,
        average_orders_per_customer: if customers.is_empty() {
            0.0
        } else {
            round2(orders.len() as f64 / customers.len() as f64)
        },
    }
}

fn trends(orders: &[Order], customers: &[Customer], calendar: &Calendar) -> TrendMetrics {
    let this_month = calendar.month_start;
    let last_month = this_month
        .checked_sub_months(Months::new(1))
        .unwrap_or(this_month);

    let current = MonthWindow::new(this_month, orders, customers);
    let previous = MonthWindow::new(last_month, orders, customers);

    let last_7_days = (0..7)
        .rev()
        .map(|back| {
            let date = calendar.today - Duration::days(back);
            let on_day: Vec<&Order> = orders.iter().filter(|o| day_of(o) == date).collect();
            DailyMetric {
                date,
                order_count: on_day.len() as u64,
                revenue_cents: on_day.iter().map(|o| o.cost().amount_cents()).sum(),
            }
        })
        .collect();

    let last_6_months = (0..6)
        .rev()
        .filter_map(|back| this_month.checked_sub_months(Months::new(back)))
        .map(|start| {
            let window = MonthWindow::new(start, orders, customers);
            MonthlyMetric {
                year: start.year(),
                month: start.month(),
                label: start.format("%b %Y").to_string(),
                order_count: window.orders,
                revenue_cents: window.revenue_cents,
                new_customers: window.customers,
            }
        })
        .collect();

    TrendMetrics {
        order_growth_rate: growth_rate(current.orders as f64, previous.orders as f64),
        revenue_growth_rate: growth_rate(current.revenue_cents as f64, previous.revenue_cents as f64),
        customer_growth_rate: growth_rate(current.customers as f64, previous.customers as f64),
        last_7_days,
        last_6_months,
    }
}

/// Totals for the calendar month starting at `start`.
struct MonthWindow {
    orders: u64,
    revenue_cents: u64,
    customers: u64,
}

impl MonthWindow {
    fn new(start: NaiveDate, orders: &[Order], customers: &[Customer]) -> Self {
        let end = start.checked_add_months(Months::new(1));
        let inside = |day: NaiveDate| day >= start && end.is_none_or(|end| day < end);
        let in_month: Vec<&Order> = orders.iter().filter(|o| inside(day_of(o))).collect();
        Self {
            orders: in_month.len() as u64,
            revenue_cents: in_month.iter().map(|o| o.cost().amount_cents()).sum(),
            customers: count(customers.iter().filter(|c| inside(c.created_at().date_naive()))),
        }
    }
}

fn day_of(order: &Order) -> NaiveDate {
    order.created_at().date_naive()
}

fn first_of_month(day: NaiveDate) -> NaiveDate {
    day.with_day(1).unwrap_or(day)
}

fn count<T>(items: impl Iterator<Item = T>) -> u64 {
    items.count() as u64
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round2(part as f64 / whole as f64 * 100.0)
}

/// Percent change from `previous` to `current`; 100 when starting from zero.
fn growth_rate(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        return if current > 0.0 { 100.0 } else { 0.0 };
    }
    round2((current - previous) / previous * 100.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::Quantity;
    use crate::geo::{Coordinate, DistanceInterval};
    use crate::ids::ProductId;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        // A Wednesday.
        Utc.with_ymd_and_hms(2026, 3, 18, 15, 0, 0).unwrap()
    }

    fn customer_at(n: u32, at: DateTime<Utc>) -> Customer {
        let customer =
            Customer::create(&format!("Customer {n}"), &format!("c{n}@example.com"), "555").unwrap();
        let mut json = serde_json::to_value(&customer).unwrap();
        json["created_at"] = serde_json::to_value(at).unwrap();
        serde_json::from_value(json).unwrap()
    }

    /// Order created at `at`, about 8 km long (first band, 100.00 USD).
    fn order_at(customer: &Customer, at: DateTime<Utc>, status: OrderStatus) -> Order {
        let order = Order::create(
            customer.id(),
            ProductId::new(),
            Quantity::new(1).unwrap(),
            Coordinate::new(-12.046374, -77.042793).unwrap(),
            Coordinate::new(-12.066667, -77.116667).unwrap(),
        )
        .unwrap();
        let mut json = serde_json::to_value(&order).unwrap();
        json["created_at"] = serde_json::to_value(at).unwrap();
        json["status"] = serde_json::to_value(status).unwrap();
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_counts_and_revenue_by_calendar_window() {
        let ana = customer_at(1, now() - Duration::days(40));
        let orders = vec![
            order_at(&ana, now(), OrderStatus::Created),
            // Sunday of the same week.
            order_at(&ana, now() - Duration::days(3), OrderStatus::Delivered),
            // Earlier this month, previous week.
            order_at(&ana, now() - Duration::days(10), OrderStatus::Cancelled),
            // Last month.
            order_at(&ana, now() - Duration::days(20), OrderStatus::Delivered),
        ];

        let metrics =
            OrdersMetrics::compute(&orders, &[ana], &MetricsRange::all_time(), false, now());

        assert_eq!(metrics.period, "all time");
        assert_eq!(metrics.orders.total, 4);
        assert_eq!(metrics.orders.today, 1);
        assert_eq!(metrics.orders.this_week, 2);
        assert_eq!(metrics.orders.this_month, 3);
        assert_eq!(metrics.orders.delivered, 2);
        assert_eq!(metrics.orders.delivery_success_rate, 66.67);
        assert_eq!(metrics.orders.cancellation_rate, 25.0);

        assert_eq!(metrics.financial.currency, "USD");
        assert_eq!(metrics.financial.total_revenue_cents, 400_00);
        assert_eq!(metrics.financial.today_revenue_cents, 100_00);
        assert_eq!(metrics.financial.week_revenue_cents, 200_00);
        assert_eq!(metrics.financial.month_revenue_cents, 300_00);
        assert_eq!(metrics.financial.average_order_value_cents, 100_00);
        assert!(metrics.trends.is_none());
    }

    #[test]
    fn test_range_filters_orders_but_not_customers() {
        let ana = customer_at(1, now());
        let luis = customer_at(2, now() - Duration::days(2));
        let orders = vec![
            order_at(&ana, now(), OrderStatus::Created),
            order_at(&luis, now() - Duration::days(2), OrderStatus::InProgress),
            order_at(&luis, now() - Duration::days(45), OrderStatus::Delivered),
        ];
        let range = MetricsRange::between(now() - Duration::days(7), now());

        let metrics = OrdersMetrics::compute(&orders, &[ana, luis], &range, false, now());

        assert_eq!(metrics.period, "2026-03-11 to 2026-03-18");
        assert_eq!(metrics.orders.total, 2);
        assert_eq!(metrics.customers.total, 2);
        assert_eq!(metrics.customers.new_today, 1);
        assert_eq!(metrics.customers.new_this_week, 2);
        assert_eq!(metrics.customers.active, 2);
        assert_eq!(metrics.customers.average_orders_per_customer, 1.0);
        assert_eq!(metrics.operational.average_orders_per_day, 1.0);
        let first_band = &metrics.operational.by_interval[0];
        assert_eq!(first_band.interval, DistanceInterval::UpTo50);
        assert_eq!(first_band.count, 2);
    }

    #[test]
    fn test_trends_cover_every_order() {
        let ana = customer_at(1, now() - Duration::days(20));
        let orders = vec![
            order_at(&ana, now(), OrderStatus::Created),
            order_at(&ana, now() - Duration::days(1), OrderStatus::Created),
            order_at(&ana, now() - Duration::days(20), OrderStatus::Created),
        ];
        let range = MetricsRange::between(now() - Duration::hours(1), now());

        let metrics = OrdersMetrics::compute(&orders, &[ana], &range, true, now());
        let trends = metrics.trends.unwrap();

        // Two orders this month against one last month.
        assert_eq!(trends.order_growth_rate, 100.0);
        assert_eq!(trends.customer_growth_rate, -100.0);
        assert_eq!(trends.last_7_days.len(), 7);
        assert_eq!(trends.last_7_days[6].date, now().date_naive());
        assert_eq!(trends.last_7_days[6].order_count, 1);
        assert_eq!(trends.last_7_days[5].order_count, 1);

        let months: Vec<_> = trends.last_6_months.iter().map(|m| m.label.as_str()).collect();
        assert_eq!(
            months,
            vec!["Oct 2025", "Nov 2025", "Dec 2025", "Jan 2026", "Feb 2026", "Mar 2026"]
        );
        assert_eq!(trends.last_6_months[4].order_count, 1);
        assert_eq!(trends.last_6_months[4].new_customers, 1);
        assert_eq!(trends.last_6_months[5].revenue_cents, 200_00);
    }

    #[test]
    fn test_empty_input() {
        let metrics = OrdersMetrics::compute(&[], &[], &MetricsRange::all_time(), true, now());
        assert_eq!(metrics.orders, OrderCountMetrics::default());
        assert_eq!(metrics.financial.currency, "USD");
        assert_eq!(metrics.operational.by_interval.len(), 4);
        assert_eq!(metrics.customers.average_orders_per_customer, 0.0);
        assert_eq!(metrics.trends.unwrap().order_growth_rate, 0.0);
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        let range = MetricsRange::between(now(), now() - Duration::days(1));
        assert!(matches!(range.validate(), Err(Error::Validation(_))));
        assert!(MetricsRange::all_time().validate().is_ok());
        assert_eq!(
            MetricsRange { from: Some(now()), to: None }.label(),
            "since 2026-03-18"
        );
    }
}
