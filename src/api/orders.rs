use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};
use validator::Validate;

use super::AppState;
use crate::catalog::{minutes, ProductCard};
use crate::domain::aggregates::{Confirmation, Contact, LineItem, Order, OrderStatus};
use crate::domain::events::{DomainEvent, OrderEvent, ProductEvent};
use crate::domain::value_objects::{DeliveryType, PaymentCard, PaymentType};
use crate::session::RequestContext;
use crate::{Result, ShopError};

/// Basket line as posted by the storefront; extra card fields are ignored.
#[derive(Debug, Deserialize)]
pub struct OrderLineForm {
    pub id: i64,
    pub price: Decimal,
    pub count: i32,
}

#[derive(Debug, Deserialize)]
pub struct StockLine {
    pub id: i64,
    pub count: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmForm {
    #[serde(flatten)]
    pub contact: Contact,
    pub delivery_type: Option<DeliveryType>,
    pub payment_type: Option<PaymentType>,
    #[serde(default)]
    pub products: Vec<StockLine>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    pub order_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub id: i64,
    #[serde(serialize_with = "minutes")]
    pub created_at: DateTime<Utc>,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub delivery_type: DeliveryType,
    pub payment_type: PaymentType,
    pub total_cost: Decimal,
    pub status: OrderStatus,
    pub city: Option<String>,
    pub address: Option<String>,
    pub products: Vec<ProductCard>,
}

/// Renders an order with its lines as product cards carrying the frozen price and count.
async fn order_view(state: &AppState, order: Order) -> Result<OrderView> {
    let ids: Vec<i64> = order.lines.iter().map(|l| l.product_id).collect();
    let cards = state.store.product_cards(&ids).await?;
    let products = order.lines.iter().filter_map(|line| {
        let card = cards.iter().find(|c| c.id == line.product_id)?;
        Some(ProductCard { price: line.price, count: line.count, ..card.clone() })
    }).collect();
    Ok(OrderView {
        id: order.id,
        created_at: order.created_at,
        full_name: order.contact.full_name,
        email: order.contact.email,
        phone: order.contact.phone,
        delivery_type: order.delivery_type,
        payment_type: order.payment_type,
        total_cost: order.total_cost,
        status: order.status,
        city: order.contact.city,
        address: order.contact.address,
        products,
    })
}

/// Loads an order the caller may see: their own, or one placed anonymously in this session.
async fn visible_order(state: &AppState, ctx: &RequestContext, id: i64) -> Result<Order> {
    let order = state.store.order(id).await?;
    let visible = match (order.user_id, ctx.user_id) {
        (Some(owner), Some(user)) => owner == user,
        (None, _) => state.sessions.get(ctx.session_id).await.orders.contains(&id),
        (Some(_), None) => false,
    };
    if visible { Ok(order) } else { Err(ShopError::not_found("order", id)) }
}

pub async fn list_orders(State(state): State<AppState>, Extension(ctx): Extension<RequestContext>) -> Result<Json<Vec<OrderView>>> {
    let orders = match ctx.user_id {
        Some(user_id) => state.store.orders_for_user(user_id).await?,
        None => {
            let ids = state.sessions.get(ctx.session_id).await.orders;
            state.store.orders_by_ids(&ids).await?
        }
    };
    let mut views = Vec::with_capacity(orders.len());
    for order in orders {
        views.push(order_view(&state, order).await?);
    }
    Ok(Json(views))
}

pub async fn place_order(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(lines): Json<Vec<OrderLineForm>>,
) -> Result<Json<OrderCreated>> {
    let lines = lines.into_iter().map(|l| LineItem { product_id: l.id, price: l.price, count: l.count }).collect();
    let order = state.store.place_order(Order::place(ctx.user_id, lines)?).await?;
    state.sessions.update(ctx.session_id, |s| {
        s.basket.clear();
        if ctx.user_id.is_none() { s.orders.push(order.id); }
    }).await;

    info!(order_id = order.id, user_id = ?order.user_id, total = %order.total_cost, "order placed");
    state.events.publish(DomainEvent::Order(OrderEvent::Placed { order_id: order.id, user_id: order.user_id, total: order.total_cost })).await;
    Ok(Json(OrderCreated { order_id: order.id }))
}

pub async fn get_order(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
) -> Result<Json<OrderView>> {
    let order = visible_order(&state, &ctx, id).await?;
    Ok(Json(order_view(&state, order).await?))
}

pub async fn confirm_order(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
    Json(form): Json<ConfirmForm>,
) -> Result<Json<OrderCreated>> {
    let before = visible_order(&state, &ctx, id).await?;
    form.contact.validate()?;
    let confirmation = Confirmation {
        contact: form.contact,
        delivery_type: form.delivery_type,
        payment_type: form.payment_type,
        counts: form.products.iter().map(|l| (l.id, l.count)).collect::<BTreeMap<_, _>>(),
    };
    let outcome = state.store.confirm_order(id, confirmation).await?;

    if before.status == OrderStatus::Created && outcome.order.status == OrderStatus::Accepted {
        info!(order_id = id, total = %outcome.order.total_cost, "order accepted");
        state.events.publish(DomainEvent::Order(OrderEvent::Accepted { order_id: id, total: outcome.order.total_cost })).await;
    }
    for sync in &outcome.stock {
        state.events.publish(DomainEvent::Product(ProductEvent::StockSynced { product_id: sync.product_id, count: sync.count })).await;
    }
    Ok(Json(OrderCreated { order_id: id }))
}

pub async fn pay(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
    Json(card): Json<PaymentCard>,
) -> Result<StatusCode> {
    visible_order(&state, &ctx, id).await?;
    match state.store.pay_order(id, &card, Utc::now().date_naive()).await {
        Ok(order) => {
            info!(order_id = order.id, "order paid");
            state.events.publish(DomainEvent::Order(OrderEvent::Paid { order_id: order.id })).await;
            Ok(StatusCode::OK)
        }
        Err(e) => {
            warn!(order_id = id, error = %e, "payment rejected");
            Err(e)
        }
    }
}
