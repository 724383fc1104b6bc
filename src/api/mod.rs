//! HTTP surface: router, shared state and error mapping.

pub mod auth;
pub mod basket;
pub mod catalog;
pub mod orders;
pub mod profile;

use axum::{
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use crate::config::CatalogSettings;
use crate::domain::aggregates::OrderError;
use crate::events::EventPublisher;
use crate::media::MediaStorage;
use crate::session::{session_layer, SessionStore};
use crate::store::Store;
use crate::ShopError;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub sessions: SessionStore,
    pub events: EventPublisher,
    pub media: MediaStorage,
    pub catalog: CatalogSettings,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, events: EventPublisher, media: MediaStorage, catalog: CatalogSettings) -> Self {
        Self { store, sessions: SessionStore::new(), events, media, catalog }
    }

    pub fn with_sessions(mut self, sessions: SessionStore) -> Self {
        self.sessions = sessions;
        self
    }
}

impl ShopError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Validation(_) | Self::InvalidInput(_) | Self::PaymentValidation(_) => StatusCode::BAD_REQUEST,
            Self::InvalidCredentials | Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::PasswordMismatch | Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Conflict(_) | Self::Order(OrderError::InvalidTransition { .. }) => StatusCode::CONFLICT,
            Self::Order(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) | Self::Storage(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ShopError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy", "service": "furniture-store" }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/auth/sign-in", post(auth::sign_in))
        .route("/auth/sign-up", post(auth::sign_up))
        .route("/auth/sign-out", post(auth::sign_out))
        .route("/profile", get(profile::get_profile).post(profile::update_profile))
        .route("/profile/password", post(profile::change_password))
        .route("/profile/avatar", post(profile::upload_avatar))
        .route("/categories", get(catalog::categories))
        .route("/tags", get(catalog::tags))
        .route("/product/:id", get(catalog::product))
        .route("/product/:id/reviews", post(catalog::add_review))
        .route("/catalog", get(catalog::catalog))
        .route("/products/popular", get(catalog::popular))
        .route("/products/limited", get(catalog::limited))
        .route("/sales", get(catalog::sales).post(catalog::create_sale))
        .route("/banners", get(catalog::banners))
        .route("/basket", get(basket::get_basket).post(basket::add_to_basket).delete(basket::remove_from_basket))
        .route("/orders", get(orders::list_orders).post(orders::place_order))
        .route("/order/:id", get(orders::get_order).post(orders::confirm_order))
        .route("/payment/:id", post(orders::pay))
        .layer(middleware::from_fn_with_state(state.sessions.clone(), session_layer))
        .with_state(state)
}
