use axum::{
    extract::{FromRequest, Multipart, Request, State},
    http::{header, StatusCode},
    Extension, Json,
};
use serde::Deserialize;
use tracing::{info, warn};
use validator::Validate;

use super::AppState;
use crate::accounts::{Profile, ProfileUpdate};
use crate::catalog::Image;
use crate::domain::value_objects::Password;
use crate::session::RequestContext;
use crate::{Result, ShopError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordChange {
    pub current_password: String,
    pub new_password: String,
}

pub async fn get_profile(State(state): State<AppState>, Extension(ctx): Extension<RequestContext>) -> Result<Json<Profile>> {
    let user_id = ctx.require_user()?;
    Ok(Json(state.store.profile(user_id).await?))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<Profile>> {
    let user_id = ctx.require_user()?;
    update.validate()?;
    Ok(Json(state.store.update_profile(user_id, update).await?))
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<PasswordChange>,
) -> Result<StatusCode> {
    let user_id = ctx.require_user()?;
    let user = state.store.user(user_id).await?;
    if !user.password_hash.verify(&body.current_password) {
        warn!(user_id, "password change rejected");
        return Err(ShopError::PasswordMismatch);
    }
    let password = Password::new(body.new_password)?;
    state.store.set_password(user_id, password.hash()?).await?;
    info!(user_id, "password changed");
    Ok(StatusCode::OK)
}

/// Accepts a multipart `avatar` file or a JSON `{ "src", "alt" }` reference.
pub async fn upload_avatar(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    request: Request,
) -> Result<Json<Profile>> {
    let user_id = ctx.require_user()?;
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));

    let image = if is_multipart {
        let multipart = Multipart::from_request(request, &state).await.map_err(|e| ShopError::Validation(e.body_text()))?;
        save_upload(&state, multipart).await?
    } else {
        let Json(image) = Json::<Image>::from_request(request, &state).await.map_err(|e| ShopError::Validation(e.body_text()))?;
        if image.src.trim().is_empty() {
            return Err(ShopError::Validation("avatar src must not be empty".into()));
        }
        image
    };
    let profile = state.store.replace_avatar(user_id, image).await?;
    info!(user_id, "avatar replaced");
    Ok(Json(profile))
}

async fn save_upload(state: &AppState, mut multipart: Multipart) -> Result<Image> {
    while let Some(field) = multipart.next_field().await.map_err(|e| ShopError::Validation(e.body_text()))? {
        if field.name() != Some("avatar") { continue; }
        let file_name = field.file_name().unwrap_or("avatar").to_string();
        let bytes = field.bytes().await.map_err(|e| ShopError::Validation(e.body_text()))?;
        if bytes.is_empty() { break; }
        let src = state.media.save_image(&file_name, &bytes).await?;
        return Ok(Image { src, alt: Some(file_name) });
    }
    Err(ShopError::Validation("avatar file is required".into()))
}
