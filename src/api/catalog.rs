use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;
use validator::Validate;

use super::AppState;
use crate::catalog::{CatalogPage, CatalogQuery, CategoryNode, PageRequest, ProductCard, ProductDetail, Review, SaleCard, Tag};
use crate::domain::aggregates::SaleDraft;
use crate::domain::events::{DomainEvent, ProductEvent};
use crate::domain::value_objects::ReviewRate;
use crate::session::RequestContext;
use crate::store::NewReview;
use crate::{Result, ShopError};

pub const BANNER_COUNT: usize = 3;

#[derive(Debug, Deserialize)]
pub struct TagParams {
    pub category: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesParams {
    pub current_page: Option<u32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReviewForm {
    #[validate(length(min = 1, max = 100))]
    pub author: String,
    #[validate(email)]
    pub email: String,
    pub text: Option<String>,
    pub rate: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleForm {
    pub id: i64,
    pub sale_price: Decimal,
    pub date_from: DateTime<Utc>,
    pub date_to: DateTime<Utc>,
}

pub async fn categories(State(state): State<AppState>) -> Result<Json<Vec<CategoryNode>>> {
    Ok(Json(state.store.categories().await?))
}

pub async fn tags(State(state): State<AppState>, Query(params): Query<TagParams>) -> Result<Json<Vec<Tag>>> {
    Ok(Json(state.store.tags(params.category).await?))
}

pub async fn product(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<ProductDetail>> {
    Ok(Json(state.store.product(id).await?))
}

pub async fn add_review(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(form): Json<ReviewForm>,
) -> Result<Json<Review>> {
    form.validate()?;
    let rate = ReviewRate::new(form.rate).map_err(|_| ShopError::Validation(format!("rate must be 1..=5, got {}", form.rate)))?;
    let outcome = state.store.add_review(id, NewReview { author: form.author, email: form.email, text: form.text, rate }).await?;
    info!(product_id = id, rate = rate.value(), rating = %outcome.rating, "review added");
    state.events.publish(DomainEvent::Product(ProductEvent::Reviewed { product_id: id, rate: rate.value(), rating: outcome.rating })).await;
    Ok(Json(outcome.review))
}

/// Filtered listing. Takes raw pairs so `tags[]` may repeat.
pub async fn catalog(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<CatalogPage<ProductCard>>> {
    let query = CatalogQuery::from_pairs(&pairs, state.catalog.page_size)?;
    Ok(Json(state.store.search(&query).await?))
}

pub async fn popular(State(state): State<AppState>) -> Result<Json<Vec<ProductCard>>> {
    Ok(Json(state.store.popular(state.catalog.popular_limit).await?))
}

pub async fn limited(State(state): State<AppState>) -> Result<Json<Vec<ProductCard>>> {
    let settings = state.catalog;
    Ok(Json(state.store.limited(settings.limited_stock_threshold, settings.limited_limit).await?))
}

pub async fn sales(State(state): State<AppState>, Query(params): Query<SalesParams>) -> Result<Json<CatalogPage<SaleCard>>> {
    let page = PageRequest::new(params.current_page.unwrap_or(1), state.catalog.page_size);
    Ok(Json(state.store.sales(page).await?))
}

pub async fn create_sale(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(form): Json<SaleForm>,
) -> Result<(StatusCode, Json<SaleCard>)> {
    let user = state.store.user(ctx.require_user()?).await?;
    if !user.is_staff { return Err(ShopError::Forbidden); }

    let draft = SaleDraft { sale_price: form.sale_price, date_from: form.date_from, date_to: form.date_to };
    let sale = state.store.create_sale(form.id, draft).await?;
    info!(product_id = sale.product_id, price = %sale.price, sale_price = %sale.sale_price, "sale created");
    state.events.publish(DomainEvent::Product(ProductEvent::SaleStarted {
        product_id: sale.product_id,
        price: sale.price,
        sale_price: sale.sale_price,
    })).await;
    Ok((StatusCode::CREATED, Json(SaleCard::from(sale))))
}

/// Best rated product of up to three random categories.
pub async fn banners(State(state): State<AppState>) -> Result<Json<Vec<ProductCard>>> {
    let candidates = state.store.banner_candidates().await?;
    let picked: Vec<ProductCard> = candidates.choose_multiple(&mut rand::thread_rng(), BANNER_COUNT).cloned().collect();
    Ok(Json(picked))
}
