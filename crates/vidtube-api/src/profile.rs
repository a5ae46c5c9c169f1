use axum::{
    Extension, Json,
    extract::{Multipart, State},
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use tracing::info;
use uuid::Uuid;

use vidtube_db::is_unique_violation;
use vidtube_media::MediaFile;
use vidtube_types::api::{ApiResponse, UpdateAccountRequest};
use vidtube_types::models::PublicUser;

use crate::error::ApiError;
use crate::form::FormParts;
use crate::middleware::AuthUser;
use crate::state::{AppState, db_call};
use crate::sweeper::discard_media;

pub async fn update_account_details(
    state: &AppState,
    user_id: Uuid,
    req: UpdateAccountRequest,
) -> Result<PublicUser, ApiError> {
    let full_name = req.full_name.map(|v| v.trim().to_string()).unwrap_or_default();
    let email = req.email.map(|v| v.trim().to_string()).unwrap_or_default();
    if full_name.is_empty() || email.is_empty() {
        return Err(ApiError::invalid("All fields are required"));
    }

    let id = user_id.to_string();
    let updated = match db_call(state, move |db| db.update_account(&id, &full_name, &email)).await {
        Ok(row) => row,
        Err(e) if is_unique_violation(&e) => {
            return Err(ApiError::Conflict("Email is already in use".into()));
        }
        Err(e) => return Err(e.into()),
    };
    let user = updated.ok_or_else(|| ApiError::not_found("User does not exist"))?;

    Ok(user.to_public()?)
}

/// Upload the new avatar, swap it in, then discard the old asset in the
/// background. The swap is not rolled back if the discard fails.
pub async fn update_avatar(
    state: &AppState,
    user_id: Uuid,
    file: Option<MediaFile>,
) -> Result<PublicUser, ApiError> {
    let file = file.ok_or_else(|| ApiError::invalid("Avatar file is missing"))?;
    let uploaded = state.media.upload(file).await?;

    let id = user_id.to_string();
    let url = uploaded.url.clone();
    let swapped = db_call(state, move |db| db.replace_avatar(&id, &url)).await;
    let (user, previous) = match swapped {
        Ok(Some(pair)) => pair,
        Ok(None) => {
            discard_media(state, uploaded.url);
            return Err(ApiError::not_found("User does not exist"));
        }
        Err(e) => {
            discard_media(state, uploaded.url);
            return Err(e.into());
        }
    };

    if previous != uploaded.url && !previous.is_empty() {
        discard_media(state, previous);
    }

    info!("User {} changed avatar", user_id);
    Ok(user.to_public()?)
}

pub async fn update_cover_image(
    state: &AppState,
    user_id: Uuid,
    file: Option<MediaFile>,
) -> Result<PublicUser, ApiError> {
    let file = file.ok_or_else(|| ApiError::invalid("Cover image file is missing"))?;
    let uploaded = state.media.upload(file).await?;

    let id = user_id.to_string();
    let url = uploaded.url.clone();
    let user = match db_call(state, move |db| db.update_cover_image(&id, &url)).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            discard_media(state, uploaded.url);
            return Err(ApiError::not_found("User does not exist"));
        }
        Err(e) => {
            discard_media(state, uploaded.url);
            return Err(e.into());
        }
    };

    info!("User {} changed cover image", user_id);
    Ok(user.to_public()?)
}

// -- Handlers --

/// PATCH /api/v1/users/update-account
pub async fn patch_account(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    WithRejection(Json(req), _): WithRejection<Json<UpdateAccountRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let user = update_account_details(&state, user.id, req).await?;
    Ok(Json(ApiResponse::new(200, user, "Account details updated successfully")))
}

/// PATCH /api/v1/users/avatar (multipart field `avatar`)
pub async fn patch_avatar(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    WithRejection(multipart, _): WithRejection<Multipart, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let mut form = FormParts::read(multipart).await?;
    let user = update_avatar(&state, user.id, form.take_file("avatar")).await?;
    Ok(Json(ApiResponse::new(200, user, "Avatar updated successfully")))
}

/// PATCH /api/v1/users/cover-image (multipart field `coverImage`)
pub async fn patch_cover_image(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    WithRejection(multipart, _): WithRejection<Multipart, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let mut form = FormParts::read(multipart).await?;
    let user = update_cover_image(&state, user.id, form.take_file("coverImage")).await?;
    Ok(Json(ApiResponse::new(200, user, "Cover image updated successfully")))
}
