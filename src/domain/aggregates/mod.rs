//! Aggregates module
pub mod basket;
pub mod order;
pub mod product;

pub use basket::{Basket, BasketError, BasketItem};
pub use order::{Confirmation, Contact, LineItem, Order, OrderError, OrderStatus, StockSync};
pub use product::{Product, ProductError, ProductSale, SaleDraft};
