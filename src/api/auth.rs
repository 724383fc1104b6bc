use axum::{extract::State, http::StatusCode, Extension, Json};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use super::AppState;
use crate::accounts::NewUser;
use crate::domain::events::{AccountEvent, DomainEvent};
use crate::domain::value_objects::Password;
use crate::session::{CookieUpdate, RequestContext};
use crate::{Result, ShopError};

#[derive(Debug, Deserialize)]
pub struct SignIn {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SignUp {
    #[validate(length(min = 1, max = 40))]
    pub name: String,
    #[validate(length(min = 1, max = 150))]
    pub username: String,
    pub password: String,
}

/// Hands over orders placed anonymously and moves the session to a fresh id bound to the user.
async fn bind_user(state: &AppState, ctx: &RequestContext, user_id: i64) -> Result<Uuid> {
    let store = state.store.clone();
    state.sessions.bind_user(ctx.session_id, user_id, |orders| async move {
        store.assign_orders(&orders, user_id).await
    }).await
}

pub async fn sign_in(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<SignIn>,
) -> Result<(Extension<CookieUpdate>, StatusCode)> {
    let user = state.store.user_by_name(&body.username).await?
        .filter(|u| u.password_hash.verify(&body.password));
    let Some(user) = user else {
        warn!(username = %body.username, "sign-in rejected");
        return Err(ShopError::InvalidCredentials);
    };
    let session_id = bind_user(&state, &ctx, user.id).await?;
    info!(user_id = user.id, "signed in");
    Ok((Extension(CookieUpdate::Issue(session_id)), StatusCode::OK))
}

pub async fn sign_up(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<SignUp>,
) -> Result<(Extension<CookieUpdate>, StatusCode)> {
    body.validate()?;
    let password = Password::new(body.password)?;
    let user_id = state.store.create_user(NewUser {
        username: body.username,
        full_name: body.name,
        password_hash: password.hash()?,
    }).await?;
    let session_id = bind_user(&state, &ctx, user_id).await?;
    state.events.publish(DomainEvent::Account(AccountEvent::Registered { user_id })).await;
    Ok((Extension(CookieUpdate::Issue(session_id)), StatusCode::OK))
}

pub async fn sign_out(State(state): State<AppState>, Extension(ctx): Extension<RequestContext>) -> (Extension<CookieUpdate>, StatusCode) {
    state.sessions.remove(ctx.session_id).await;
    (Extension(CookieUpdate::Clear), StatusCode::OK)
}
