use axum::{extract::State, Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use super::AppState;
use crate::catalog::ProductCard;
use crate::session::RequestContext;
use crate::{Result, ShopError};

#[derive(Debug, Deserialize)]
pub struct BasketLine {
    pub id: i64,
    pub count: i64,
}

/// Reconciles the stored basket with live stock and renders it as product cards.
async fn basket_view(state: &AppState, session_id: Uuid) -> Result<Vec<ProductCard>> {
    let ids = state.sessions.get(session_id).await.basket.product_ids();
    if ids.is_empty() { return Ok(vec![]); }
    let stock = state.store.stock_levels(&ids).await?;
    let basket = state.sessions.update(session_id, |s| {
        s.basket.reconcile(&ids, &stock);
        s.basket.clone()
    }).await;

    let cards = state.store.product_cards(&basket.product_ids()).await?;
    Ok(basket.items().iter().filter_map(|item| {
        let card = cards.iter().find(|c| c.id == item.product_id && c.count > 0)?;
        let count = i32::try_from(item.count).unwrap_or(i32::MAX).min(card.count);
        Some(ProductCard { count, ..card.clone() })
    }).collect())
}

pub async fn get_basket(State(state): State<AppState>, Extension(ctx): Extension<RequestContext>) -> Result<Json<Vec<ProductCard>>> {
    Ok(Json(basket_view(&state, ctx.session_id).await?))
}

pub async fn add_to_basket(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(line): Json<BasketLine>,
) -> Result<Json<Vec<ProductCard>>> {
    if !state.store.stock_levels(&[line.id]).await?.contains_key(&line.id) {
        return Err(ShopError::not_found("product", line.id));
    }
    state.sessions.update(ctx.session_id, |s| s.basket.add(line.id, line.count)).await?;
    Ok(Json(basket_view(&state, ctx.session_id).await?))
}

pub async fn remove_from_basket(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(line): Json<BasketLine>,
) -> Result<Json<Vec<ProductCard>>> {
    state.sessions.update(ctx.session_id, |s| s.basket.remove(line.id, line.count)).await?;
    Ok(Json(basket_view(&state, ctx.session_id).await?))
}
