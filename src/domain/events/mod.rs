//! Domain events
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Order(OrderEvent),
    Product(ProductEvent),
    Account(AccountEvent),
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrderEvent {
    Placed { order_id: i64, user_id: Option<i64>, total: Decimal },
    Accepted { order_id: i64, total: Decimal },
    Paid { order_id: i64 },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProductEvent {
    Reviewed { product_id: i64, rate: u8, rating: Decimal },
    SaleStarted { product_id: i64, price: Decimal, sale_price: Decimal },
    StockSynced { product_id: i64, count: i32 },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AccountEvent {
    Registered { user_id: i64 },
}

impl DomainEvent {
    /// NATS subject the event is published on.
    pub fn subject(&self) -> String {
        let name = match self {
            Self::Order(OrderEvent::Placed { .. }) => "order.placed",
            Self::Order(OrderEvent::Accepted { .. }) => "order.accepted",
            Self::Order(OrderEvent::Paid { .. }) => "order.paid",
            Self::Product(ProductEvent::Reviewed { .. }) => "product.reviewed",
            Self::Product(ProductEvent::SaleStarted { .. }) => "product.sale_started",
            Self::Product(ProductEvent::StockSynced { .. }) => "product.stock_synced",
            Self::Account(AccountEvent::Registered { .. }) => "account.registered",
        };
        format!("shop.{name}")
    }
}
