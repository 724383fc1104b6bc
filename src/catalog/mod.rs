//! Catalog read models as served to the storefront.

pub mod query;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, Serializer};

use crate::domain::aggregates::ProductSale;

pub use query::{CatalogPage, CatalogQuery, PageRequest, SortDirection, SortField};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Image {
    pub src: String,
    pub alt: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Specification {
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct SubcategoryNode {
    pub id: i64,
    pub title: String,
    pub image: Option<Image>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CategoryNode {
    pub id: i64,
    pub title: String,
    pub image: Option<Image>,
    pub subcategories: Vec<SubcategoryNode>,
}

/// Listing entry used by the catalog, basket, banners and orders.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductCard {
    pub id: i64,
    pub category: i64,
    pub price: Decimal,
    pub count: i32,
    pub date: DateTime<Utc>,
    pub title: String,
    pub description: String,
    pub free_delivery: bool,
    pub images: Vec<Image>,
    pub tags: Vec<Tag>,
    pub reviews: i64,
    pub rating: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, sqlx::FromRow)]
pub struct Review {
    pub author: String,
    pub email: String,
    pub text: Option<String>,
    pub rate: i16,
    #[serde(serialize_with = "minutes")]
    pub date: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDetail {
    pub id: i64,
    pub category: i64,
    pub price: Decimal,
    pub count: i32,
    pub date: DateTime<Utc>,
    pub title: String,
    pub description: String,
    pub full_description: Option<String>,
    pub free_delivery: bool,
    pub images: Vec<Image>,
    pub tags: Vec<Tag>,
    pub reviews: Vec<Review>,
    pub specifications: Vec<Specification>,
    pub rating: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleCard {
    pub id: i64,
    pub price: Decimal,
    pub sale_price: Decimal,
    #[serde(serialize_with = "month_day")]
    pub date_from: DateTime<Utc>,
    #[serde(serialize_with = "month_day")]
    pub date_to: DateTime<Utc>,
    pub title: String,
    pub images: Vec<Image>,
}

impl From<ProductSale> for SaleCard {
    fn from(s: ProductSale) -> Self {
        Self {
            id: s.product_id,
            price: s.price,
            sale_price: s.sale_price,
            date_from: s.date_from,
            date_to: s.date_to,
            title: s.title,
            images: s.images,
        }
    }
}

/// `2026-10-18 14:05`
pub fn minutes<S: Serializer>(date: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&date.format("%Y-%m-%d %H:%M"))
}

/// `10-18`
pub fn month_day<S: Serializer>(date: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&date.format("%m-%d"))
}
