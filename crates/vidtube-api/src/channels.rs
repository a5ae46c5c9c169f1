use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use tracing::info;
use uuid::Uuid;

use vidtube_types::api::{ApiResponse, SubscriptionToggleResponse};
use vidtube_types::models::{ChannelProfile, WatchedVideo};

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::state::{AppState, db_call};

/// Channel statistics for `channel_username` (case-insensitive) as seen by `viewer_id`.
pub async fn get_channel_profile(
    state: &AppState,
    viewer_id: Uuid,
    channel_username: &str,
) -> Result<ChannelProfile, ApiError> {
    let username = channel_username.trim().to_lowercase();
    if username.is_empty() {
        return Err(ApiError::invalid("username is missing"));
    }

    let viewer = viewer_id.to_string();
    db_call(state, move |db| db.get_channel_profile(&username, &viewer))
        .await?
        .ok_or_else(|| ApiError::not_found("Channel does not exist"))
}

pub async fn get_watch_history(state: &AppState, viewer_id: Uuid) -> Result<Vec<WatchedVideo>, ApiError> {
    let viewer = viewer_id.to_string();
    Ok(db_call(state, move |db| db.get_watch_history(&viewer)).await?)
}

pub async fn record_watch(state: &AppState, viewer_id: Uuid, video_id: Uuid) -> Result<(), ApiError> {
    let (viewer, video) = (viewer_id.to_string(), video_id.to_string());
    let recorded = db_call(state, move |db| db.push_watch_history(&viewer, &video)).await?;
    if !recorded {
        return Err(ApiError::not_found("Video does not exist"));
    }
    Ok(())
}

/// Subscribe to `channel_id`, or unsubscribe if already subscribed.
/// Returns whether the viewer is subscribed afterwards.
pub async fn toggle_subscription(
    state: &AppState,
    subscriber_id: Uuid,
    channel_id: Uuid,
) -> Result<bool, ApiError> {
    if subscriber_id == channel_id {
        return Err(ApiError::invalid("Cannot subscribe to your own channel"));
    }

    let channel = channel_id.to_string();
    let subscriber = subscriber_id.to_string();
    let subscribed = db_call(state, move |db| {
        if db.get_user_by_id(&channel)?.is_none() {
            return Ok(None);
        }
        let edge_id = Uuid::new_v4().to_string();
        db.toggle_subscription(&edge_id, &subscriber, &channel).map(Some)
    })
    .await?
    .ok_or_else(|| ApiError::not_found("Channel does not exist"))?;

    info!(
        "User {} {} channel {}",
        subscriber_id,
        if subscribed { "subscribed to" } else { "unsubscribed from" },
        channel_id
    );
    Ok(subscribed)
}

// -- Handlers --

/// GET /api/v1/users/c/{username}
pub async fn channel_profile(
    State(state): State<AppState>,
    Extension(AuthUser(viewer)): Extension<AuthUser>,
    WithRejection(Path(username), _): WithRejection<Path<String>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = get_channel_profile(&state, viewer.id, &username).await?;
    Ok(Json(ApiResponse::new(200, channel, "User channel fetched successfully")))
}

/// GET /api/v1/users/history
pub async fn watch_history(
    State(state): State<AppState>,
    Extension(AuthUser(viewer)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let history = get_watch_history(&state, viewer.id).await?;
    Ok(Json(ApiResponse::new(200, history, "Watch history fetched successfully")))
}

/// POST /api/v1/users/history/{video_id}
pub async fn add_to_history(
    State(state): State<AppState>,
    Extension(AuthUser(viewer)): Extension<AuthUser>,
    WithRejection(Path(video_id), _): WithRejection<Path<Uuid>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    record_watch(&state, viewer.id, video_id).await?;
    Ok(Json(ApiResponse::new(200, serde_json::json!({}), "Added to watch history")))
}

/// POST /api/v1/subscriptions/c/{channel_id}
pub async fn subscription_toggle(
    State(state): State<AppState>,
    Extension(AuthUser(viewer)): Extension<AuthUser>,
    WithRejection(Path(channel_id), _): WithRejection<Path<Uuid>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let subscribed = toggle_subscription(&state, viewer.id, channel_id).await?;
    Ok(Json(ApiResponse::new(
        200,
        SubscriptionToggleResponse {
            channel_id,
            subscribed,
        },
        if subscribed { "Subscribed" } else { "Unsubscribed" },
    )))
}
