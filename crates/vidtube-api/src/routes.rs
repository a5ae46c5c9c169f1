use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post},
};
use serde_json::{Value, json};

use crate::middleware::require_auth;
use crate::state::AppState;
use crate::{auth, channels, profile};

/// All API routes. `max_upload_bytes` caps request bodies (multipart uploads).
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    let public_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/refresh-token", post(auth::refresh));

    let protected_routes = Router::new()
        .route("/logout", post(auth::logout))
        .route("/change-password", post(auth::change_current_password))
        .route("/current-user", get(auth::current_user))
        .route("/update-account", patch(profile::patch_account))
        .route("/avatar", patch(profile::patch_avatar))
        .route("/cover-image", patch(profile::patch_cover_image))
        .route("/c/{username}", get(channels::channel_profile))
        .route("/history", get(channels::watch_history))
        .route("/history/{video_id}", post(channels::add_to_history))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let subscription_routes = Router::new()
        .route("/c/{channel_id}", post(channels::subscription_toggle))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .nest("/api/v1/users", public_routes.merge(protected_routes))
        .nest("/api/v1/subscriptions", subscription_routes)
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
