//! Product Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::catalog::Image;
use crate::domain::value_objects::{Rating, RatingError, ReviewRate};

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct Product {
    pub id: i64,
    pub subcategory_id: i64,
    pub price: Decimal,
    pub count: i32,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub description: String,
    pub full_description: Option<String>,
    pub free_delivery: bool,
    pub rating: Decimal,
}

/// Request to put a product on sale.
#[derive(Clone, Debug)]
pub struct SaleDraft {
    pub sale_price: Decimal,
    pub date_from: DateTime<Utc>,
    pub date_to: DateTime<Utc>,
}

/// Time-boxed discount. Holds the only copy of the pre-sale price.
#[derive(Clone, Debug, PartialEq)]
pub struct ProductSale {
    pub product_id: i64,
    pub price: Decimal,
    pub sale_price: Decimal,
    pub date_from: DateTime<Utc>,
    pub date_to: DateTime<Utc>,
    pub title: String,
    pub images: Vec<Image>,
}

impl Product {
    /// Updates the rolling rating and returns the new value.
    pub fn apply_review(&mut self, rate: ReviewRate) -> Result<Decimal, ProductError> {
        let rating = Rating::new(self.rating)?.apply(rate);
        self.rating = rating.value();
        Ok(self.rating)
    }

    /// Snapshots price, title and images into a sale and switches the live price to the sale price.
    pub fn start_sale(&mut self, draft: SaleDraft, images: Vec<Image>) -> Result<ProductSale, ProductError> {
        if draft.sale_price <= Decimal::ZERO { return Err(ProductError::InvalidPrice(draft.sale_price)); }
        if draft.date_from > draft.date_to { return Err(ProductError::InvalidSalePeriod); }
        let sale = ProductSale {
            product_id: self.id,
            price: self.price,
            sale_price: draft.sale_price,
            date_from: draft.date_from,
            date_to: draft.date_to,
            title: self.title.clone(),
            images,
        };
        self.price = draft.sale_price;
        Ok(sale)
    }

    /// Overwrites live stock with the count agreed at order acceptance.
    pub fn sync_stock(&mut self, count: i32) -> Result<(), ProductError> {
        if count < 0 { return Err(ProductError::NegativeStock(count)); }
        self.count = count;
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
pub enum ProductError {
    #[error(transparent)]
    Rating(#[from] RatingError),
    #[error("price must be positive, got {0}")]
    InvalidPrice(Decimal),
    #[error("sale must start before it ends")]
    InvalidSalePeriod,
    #[error("stock count cannot be negative, got {0}")]
    NegativeStock(i32),
}
