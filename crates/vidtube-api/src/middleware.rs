use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;

use vidtube_types::models::PublicUser;

use crate::auth::ACCESS_COOKIE;
use crate::error::ApiError;
use crate::state::{AppState, db_call};

/// The signed-in user, attached to the request by [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthUser(pub PublicUser);

/// Resolve the access token (cookie first, then `Authorization: Bearer`) to a
/// live user record.
pub async fn require_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = jar
        .get(ACCESS_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| {
            req.headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
                .filter(|t| !t.is_empty())
                .map(str::to_string)
        })
        .ok_or_else(|| ApiError::unauthorized("Unauthorized request"))?;

    let claims = state.tokens.verify_access(&token)?;

    let id = claims.sub.to_string();
    let user = db_call(&state, move |db| db.get_user_by_id(&id))
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid access token"))?;

    req.extensions_mut().insert(AuthUser(user.to_public()?));
    Ok(next.run(req).await)
}
