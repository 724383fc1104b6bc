//! Repository traits over the relational store.
//!
//! Every mutating method is one atomic unit: the Postgres store runs it in a
//! transaction with the touched rows locked, the memory store under a single
//! write lock. Business rules live in the domain aggregates; stores only load,
//! call them and persist the result.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;

use crate::accounts::{NewUser, Profile, ProfileUpdate, UserAccount};
use crate::catalog::{CatalogPage, CatalogQuery, CategoryNode, Image, PageRequest, ProductCard, ProductDetail, Review, SaleCard, Tag};
use crate::domain::aggregates::{Confirmation, Order, ProductSale, SaleDraft, StockSync};
use crate::domain::value_objects::{PasswordHash, PaymentCard, ReviewRate};
use crate::Result;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Clone, Debug)]
pub struct NewReview {
    pub author: String,
    pub email: String,
    pub text: Option<String>,
    pub rate: ReviewRate,
}

/// Result of appending a review.
#[derive(Clone, Debug)]
pub struct ReviewOutcome {
    pub review: Review,
    pub rating: rust_decimal::Decimal,
}

/// Result of confirming an order.
#[derive(Clone, Debug)]
pub struct ConfirmOutcome {
    pub order: Order,
    pub stock: Vec<StockSync>,
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn categories(&self) -> Result<Vec<CategoryNode>>;
    /// All tags, or only those used by products of one subcategory.
    async fn tags(&self, category: Option<i64>) -> Result<Vec<Tag>>;
    async fn product(&self, id: i64) -> Result<ProductDetail>;
    /// Cards for the given ids; unknown ids are skipped.
    async fn product_cards(&self, ids: &[i64]) -> Result<Vec<ProductCard>>;
    async fn search(&self, query: &CatalogQuery) -> Result<CatalogPage<ProductCard>>;
    async fn popular(&self, limit: i64) -> Result<Vec<ProductCard>>;
    async fn limited(&self, threshold: i32, limit: i64) -> Result<Vec<ProductCard>>;
    /// Best rated product of every category that has one.
    async fn banner_candidates(&self) -> Result<Vec<ProductCard>>;
    async fn sales(&self, page: PageRequest) -> Result<CatalogPage<SaleCard>>;
    async fn create_sale(&self, product_id: i64, draft: SaleDraft) -> Result<ProductSale>;
    async fn add_review(&self, product_id: i64, review: NewReview) -> Result<ReviewOutcome>;
    /// Live stock per product; unknown ids are absent from the map.
    async fn stock_levels(&self, ids: &[i64]) -> Result<HashMap<i64, i32>>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Creates the user together with its profile. Duplicate usernames are a conflict.
    async fn create_user(&self, user: NewUser) -> Result<i64>;
    async fn user_by_name(&self, username: &str) -> Result<Option<UserAccount>>;
    async fn user(&self, id: i64) -> Result<UserAccount>;
    async fn set_password(&self, user_id: i64, hash: PasswordHash) -> Result<()>;
    async fn profile(&self, user_id: i64) -> Result<Profile>;
    async fn update_profile(&self, user_id: i64, update: ProfileUpdate) -> Result<Profile>;
    async fn replace_avatar(&self, user_id: i64, image: Image) -> Result<Profile>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists a placed order and its lines; fails with not found if a product is missing.
    async fn place_order(&self, order: Order) -> Result<Order>;
    async fn order(&self, id: i64) -> Result<Order>;
    async fn orders_for_user(&self, user_id: i64) -> Result<Vec<Order>>;
    async fn orders_by_ids(&self, ids: &[i64]) -> Result<Vec<Order>>;
    async fn confirm_order(&self, id: i64, confirmation: Confirmation) -> Result<ConfirmOutcome>;
    async fn pay_order(&self, id: i64, card: &PaymentCard, today: NaiveDate) -> Result<Order>;
    /// Hands anonymous orders over to a user that just signed in.
    async fn assign_orders(&self, ids: &[i64], user_id: i64) -> Result<()>;
}

pub trait Store: CatalogStore + AccountStore + OrderStore {}

impl<T: CatalogStore + AccountStore + OrderStore> Store for T {}
