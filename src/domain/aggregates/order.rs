//! Order Aggregate

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use validator::Validate;

use crate::domain::value_objects::{digits_only, DeliveryType, ParseEnumError, PaymentCard, PaymentError, PaymentType};

/// Flat surcharge for express delivery.
pub const EXPRESS_DELIVERY_FEE: i64 = 500;
/// Ordinary delivery fee, charged only below the free-delivery threshold.
pub const ORDINARY_DELIVERY_FEE: i64 = 200;
pub const FREE_DELIVERY_THRESHOLD: i64 = 2000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Created,
    Accepted,
    Paid,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Created => "created", Self::Accepted => "accepted", Self::Paid => "paid" }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for OrderStatus {
    type Err = ParseEnumError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "accepted" => Ok(Self::Accepted),
            "paid" => Ok(Self::Paid),
            _ => Err(ParseEnumError::new("order status", s)),
        }
    }
}

/// One basket line frozen into an order, priced at placement time.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LineItem { pub product_id: i64, pub price: Decimal, pub count: i32 }

impl LineItem {
    pub fn total(&self) -> Decimal { self.price * Decimal::from(self.count) }
}

/// Checkout contact details; limits follow the orders table columns.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    #[validate(length(min = 1, max = 100))]
    pub full_name: Option<String>,
    #[validate(email, length(max = 254))]
    pub email: Option<String>,
    #[validate(custom = "digits_only")]
    pub phone: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub city: Option<String>,
    pub address: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Order {
    pub id: i64,
    pub user_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub contact: Contact,
    pub delivery_type: DeliveryType,
    pub payment_type: PaymentType,
    pub total_cost: Decimal,
    pub status: OrderStatus,
    pub lines: Vec<LineItem>,
}

/// Checkout form submitted against a placed order.
#[derive(Clone, Debug, Default)]
pub struct Confirmation {
    pub contact: Contact,
    pub delivery_type: Option<DeliveryType>,
    pub payment_type: Option<PaymentType>,
    /// Stock count to write back per product on acceptance.
    pub counts: BTreeMap<i64, i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockSync { pub product_id: i64, pub count: i32 }

impl Order {
    /// Builds an unsaved order (id 0) from a basket snapshot.
    pub fn place(user_id: Option<i64>, lines: Vec<LineItem>) -> Result<Self, OrderError> {
        if lines.is_empty() { return Err(OrderError::NoItems); }
        if let Some(bad) = lines.iter().find(|l| l.count <= 0 || l.price <= Decimal::ZERO) {
            return Err(OrderError::InvalidLine(bad.product_id));
        }
        let now = Utc::now();
        let total_cost = lines.iter().map(LineItem::total).sum();
        Ok(Self {
            id: 0, user_id, created_at: now, updated_at: now, contact: Contact::default(),
            delivery_type: DeliveryType::Ordinary, payment_type: PaymentType::Online,
            total_cost, status: OrderStatus::Created, lines,
        })
    }

    /// Applies the delivery surcharge rules as a pair of inverse adjustments.
    pub fn change_delivery(&mut self, to: DeliveryType) {
        if to == self.delivery_type { return; }
        let express = Decimal::from(EXPRESS_DELIVERY_FEE);
        let ordinary = Decimal::from(ORDINARY_DELIVERY_FEE);
        let threshold = Decimal::from(FREE_DELIVERY_THRESHOLD);
        match to {
            DeliveryType::Express => {
                let before = self.total_cost;
                self.total_cost += express;
                if before < threshold + ordinary { self.total_cost -= ordinary; }
            }
            DeliveryType::Ordinary => {
                self.total_cost -= express;
                if self.total_cost < threshold { self.total_cost += ordinary; }
            }
        }
        self.delivery_type = to;
    }

    /// Records checkout details. Returns the stock overwrites to apply; empty unless this call accepted the order.
    pub fn confirm(&mut self, confirmation: Confirmation) -> Result<Vec<StockSync>, OrderError> {
        if let Some((&product_id, &count)) = confirmation.counts.iter().find(|(_, c)| **c < 0) {
            return Err(OrderError::NegativeStock { product_id, count });
        }
        self.contact = confirmation.contact;
        if let Some(payment_type) = confirmation.payment_type { self.payment_type = payment_type; }
        if let Some(delivery_type) = confirmation.delivery_type { self.change_delivery(delivery_type); }
        self.touch();

        if self.status != OrderStatus::Created { return Ok(vec![]); }
        self.status = OrderStatus::Accepted;

        let mut syncs: Vec<StockSync> = Vec::new();
        for line in &self.lines {
            if syncs.iter().any(|s| s.product_id == line.product_id) { continue; }
            if let Some(&count) = confirmation.counts.get(&line.product_id) {
                syncs.push(StockSync { product_id: line.product_id, count });
            }
        }
        Ok(syncs)
    }

    pub fn pay(&mut self, card: &PaymentCard, today: NaiveDate) -> Result<(), OrderError> {
        if self.status != OrderStatus::Accepted {
            return Err(OrderError::InvalidTransition { order_id: self.id, from: self.status, to: OrderStatus::Paid });
        }
        card.check(today)?;
        self.status = OrderStatus::Paid;
        self.touch();
        Ok(())
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("order has no items")]
    NoItems,
    #[error("invalid price or count for product {0}")]
    InvalidLine(i64),
    #[error("stock count for product {product_id} cannot be {count}")]
    NegativeStock { product_id: i64, count: i32 },
    #[error("order {order_id} is {from}, cannot move to {to}")]
    InvalidTransition { order_id: i64, from: OrderStatus, to: OrderStatus },
    #[error(transparent)]
    Payment(#[from] PaymentError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_with_total(total: i64) -> Order {
        Order::place(None, vec![LineItem { product_id: 1, price: Decimal::from(total), count: 1 }]).unwrap()
    }

    fn card(number: &str) -> PaymentCard {
        PaymentCard { number: number.into(), name: "A".into(), month: "12".into(), year: "2099".into(), code: "1".into() }
    }

    #[test]
    fn test_place_totals_snapshot_prices() {
        let order = Order::place(Some(7), vec![
            LineItem { product_id: 1, price: Decimal::new(1050, 2), count: 2 },
            LineItem { product_id: 2, price: Decimal::from(100), count: 3 },
        ]).unwrap();
        assert_eq!(order.total_cost, Decimal::from(321));
        assert_eq!(order.status, OrderStatus::Created);
        assert_eq!(order.delivery_type, DeliveryType::Ordinary);
    }

    #[test]
    fn test_place_rejects_bad_lines() {
        assert_eq!(Order::place(None, vec![]).unwrap_err(), OrderError::NoItems);
        let bad = vec![LineItem { product_id: 4, price: Decimal::ONE, count: 0 }];
        assert_eq!(Order::place(None, bad).unwrap_err(), OrderError::InvalidLine(4));
    }

    #[test]
    fn test_delivery_round_trip() {
        for total in [100, 1900, 1999, 2000, 2100, 2199, 2200, 2500, 10_000] {
            let mut order = order_with_total(total);
            order.change_delivery(DeliveryType::Express);
            order.change_delivery(DeliveryType::Ordinary);
            assert_eq!(order.total_cost, Decimal::from(total), "total {total}");
        }
    }

    #[test]
    fn test_express_surcharge() {
        let mut cheap = order_with_total(1000);
        cheap.change_delivery(DeliveryType::Express);
        assert_eq!(cheap.total_cost, Decimal::from(1300));
        let mut big = order_with_total(3000);
        big.change_delivery(DeliveryType::Express);
        assert_eq!(big.total_cost, Decimal::from(3500));
        big.change_delivery(DeliveryType::Express);
        assert_eq!(big.total_cost, Decimal::from(3500));
    }

    #[test]
    fn test_confirm_is_idempotent_for_stock() {
        let mut order = order_with_total(1000);
        let confirmation = Confirmation {
            delivery_type: Some(DeliveryType::Express),
            counts: BTreeMap::from([(1, 4), (99, 1)]),
            ..Default::default()
        };
        let syncs = order.confirm(confirmation.clone()).unwrap();
        assert_eq!(syncs, vec![StockSync { product_id: 1, count: 4 }]);
        assert_eq!(order.status, OrderStatus::Accepted);
        assert_eq!(order.total_cost, Decimal::from(1300));

        assert!(order.confirm(confirmation).unwrap().is_empty());
        assert_eq!(order.total_cost, Decimal::from(1300));
    }

    #[test]
    fn test_confirm_rejects_negative_stock() {
        let mut order = order_with_total(1000);
        let confirmation = Confirmation { counts: BTreeMap::from([(1, -2)]), ..Default::default() };
        assert!(matches!(order.confirm(confirmation), Err(OrderError::NegativeStock { .. })));
        assert_eq!(order.status, OrderStatus::Created);
    }

    #[test]
    fn test_payment_flow() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let mut order = order_with_total(1000);
        assert!(matches!(order.pay(&card("13"), today), Err(OrderError::InvalidTransition { .. })));
        order.confirm(Confirmation::default()).unwrap();
        assert_eq!(order.pay(&card("12"), today), Err(OrderError::Payment(PaymentError::EvenNumber)));
        assert_eq!(order.status, OrderStatus::Accepted);
        order.pay(&card("13"), today).unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        assert!(order.pay(&card("13"), today).is_err());
    }

    #[test]
    fn test_contact_validation() {
        let contact = Contact {
            full_name: Some("Ann Smith".into()),
            email: Some("ann@example.com".into()),
            phone: Some("79001234567".into()),
            city: Some("Moscow".into()),
            address: Some("Red Square 1".into()),
        };
        assert!(contact.validate().is_ok());
        assert!(Contact::default().validate().is_ok());

        let errors = Contact { phone: Some("9".repeat(21)), email: Some("not-an-email".into()), ..contact.clone() }
            .validate()
            .unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("phone") && fields.contains_key("email"));
        assert!(Contact { phone: Some("+7 900".into()), ..contact.clone() }.validate().is_err());
        assert!(Contact { city: Some("x".repeat(101)), ..contact }.validate().is_err());
    }
}
