use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use axum_extra::extract::cookie::{Cookie, CookieJar};
use tracing::{info, warn};
use uuid::Uuid;

use vidtube_db::is_unique_violation;
use vidtube_db::models::NewUser;
use vidtube_media::MediaFile;
use vidtube_types::api::{
    ApiResponse, ChangePasswordRequest, LoginRequest, LoginResponse, RefreshRequest, TokenPair,
};
use vidtube_types::models::PublicUser;

use crate::error::ApiError;
use crate::form::FormParts;
use crate::middleware::AuthUser;
use crate::password::{hash_password, verify_password};
use crate::state::{AppState, db_call};
use crate::sweeper::discard_media;
use crate::tokens::{issue_token_pair, rotate_token_pair, verify_refresh_token};

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

#[derive(Debug, Default)]
pub struct RegisterInput {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub avatar: Option<MediaFile>,
    pub cover_image: Option<MediaFile>,
}

fn required(value: Option<String>) -> Result<String, ApiError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::invalid("All fields are required"))
}

/// Create an account. Nothing is written unless the avatar upload succeeded.
pub async fn register_user(state: &AppState, input: RegisterInput) -> Result<PublicUser, ApiError> {
    let full_name = required(input.full_name)?;
    let email = required(input.email)?;
    let username = required(input.username)?.to_lowercase();
    // Blank passwords are rejected, but the password itself is kept verbatim.
    let password = input
        .password
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ApiError::invalid("All fields are required"))?;

    let (u, e) = (username.clone(), email.clone());
    if db_call(state, move |db| db.find_user_by_login(Some(&u), Some(&e)))
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict(
            "User with email or username already exists".into(),
        ));
    }

    let avatar_file = input
        .avatar
        .ok_or_else(|| ApiError::invalid("Avatar file is required"))?;
    let avatar = state.media.upload(avatar_file).await?;

    let cover_image = match input.cover_image {
        Some(file) => match state.media.upload(file).await {
            Ok(uploaded) => Some(uploaded.url),
            Err(e) => {
                warn!("Cover image upload failed for {}, continuing without: {}", username, e);
                None
            }
        },
        None => None,
    };

    let new_user = NewUser {
        id: Uuid::new_v4(),
        username,
        email,
        full_name,
        password_hash: hash_password(&password)?,
        avatar: avatar.url,
        cover_image,
    };

    let uploaded: Vec<String> = std::iter::once(new_user.avatar.clone())
        .chain(new_user.cover_image.clone())
        .collect();

    let created = match db_call(state, move |db| db.create_user(&new_user)).await {
        Ok(row) => row,
        Err(e) => {
            for url in uploaded {
                discard_media(state, url);
            }
            if is_unique_violation(&e) {
                return Err(ApiError::Conflict(
                    "User with email or username already exists".into(),
                ));
            }
            return Err(e.into());
        }
    };

    info!("User {} registered as {}", created.id, created.username);
    Ok(created.to_public()?)
}

/// Check credentials and open a session. Returns the user and a fresh pair.
pub async fn login_user(
    state: &AppState,
    req: LoginRequest,
) -> Result<(PublicUser, TokenPair), ApiError> {
    let username = req
        .username
        .map(|u| u.trim().to_lowercase())
        .filter(|u| !u.is_empty());
    let email = req
        .email
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty());
    if username.is_none() && email.is_none() {
        return Err(ApiError::invalid("username or email is required"));
    }

    let user = db_call(state, move |db| {
        db.find_user_by_login(username.as_deref(), email.as_deref())
    })
    .await?
    .ok_or_else(|| ApiError::not_found("User does not exist"))?;

    if !verify_password(&req.password, &user.password)? {
        warn!("Failed login for {}", user.username);
        return Err(ApiError::unauthorized("Invalid user credentials"));
    }

    let tokens = issue_token_pair(state, &user).await?;

    info!("User {} logged in", user.username);
    Ok((user.to_public()?, tokens))
}

/// Drop the stored refresh token so no further refresh succeeds.
pub async fn logout_user(state: &AppState, user_id: Uuid) -> Result<(), ApiError> {
    let id = user_id.to_string();
    db_call(state, move |db| db.set_refresh_token(&id, None)).await?;
    info!("User {} logged out", user_id);
    Ok(())
}

/// Trade a refresh token for a new pair; the presented token stops working.
pub async fn refresh_access_token(
    state: &AppState,
    incoming: Option<String>,
) -> Result<TokenPair, ApiError> {
    let incoming = incoming
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Unauthorized request"))?;

    let user = verify_refresh_token(state, &incoming).await?;
    let tokens = rotate_token_pair(state, &user, &incoming).await?;

    info!("Rotated session tokens for {}", user.username);
    Ok(tokens)
}

pub async fn change_password(
    state: &AppState,
    user_id: Uuid,
    old_password: &str,
    new_password: &str,
) -> Result<(), ApiError> {
    if new_password.trim().is_empty() {
        return Err(ApiError::invalid("New password is required"));
    }

    let id = user_id.to_string();
    let user = db_call(state, move |db| db.get_user_by_id(&id))
        .await?
        .ok_or_else(|| ApiError::not_found("User does not exist"))?;

    if !verify_password(old_password, &user.password)? {
        return Err(ApiError::invalid("Invalid old password"));
    }

    let hash = hash_password(new_password)?;
    db_call(state, move |db| db.update_password(&user.id, &hash)).await?;

    info!("Password changed for user {}", user_id);
    Ok(())
}

fn session_cookie(name: &'static str, value: String) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(true)
        .path("/")
        .build()
}

// Sent unconditionally; `CookieJar::remove` only clears cookies the request carried.
fn expired_cookie(name: &'static str) -> Cookie<'static> {
    let mut cookie = session_cookie(name, String::new());
    cookie.make_removal();
    cookie
}

fn with_session_cookies(jar: CookieJar, tokens: &TokenPair) -> CookieJar {
    jar.add(session_cookie(ACCESS_COOKIE, tokens.access_token.clone()))
        .add(session_cookie(REFRESH_COOKIE, tokens.refresh_token.clone()))
}

// -- Handlers --

/// POST /api/v1/users/register (multipart)
pub async fn register(
    State(state): State<AppState>,
    WithRejection(multipart, _): WithRejection<Multipart, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let mut form = FormParts::read(multipart).await?;
    let input = RegisterInput {
        full_name: form.take_field("fullName"),
        email: form.take_field("email"),
        username: form.take_field("username"),
        password: form.take_field("password"),
        avatar: form.take_file("avatar"),
        cover_image: form.take_file("coverImage"),
    };

    let user = register_user(&state, input).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(201, user, "User registered successfully")),
    ))
}

/// POST /api/v1/users/login
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    WithRejection(Json(req), _): WithRejection<Json<LoginRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let (user, tokens) = login_user(&state, req).await?;

    let jar = with_session_cookies(jar, &tokens);
    Ok((
        jar,
        Json(ApiResponse::new(
            200,
            LoginResponse {
                user,
                access_token: tokens.access_token,
                refresh_token: tokens.refresh_token,
            },
            "User logged in successfully",
        )),
    ))
}

/// POST /api/v1/users/logout
pub async fn logout(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    jar: CookieJar,
) -> Result<impl IntoResponse, ApiError> {
    logout_user(&state, user.id).await?;

    let jar = jar
        .add(expired_cookie(ACCESS_COOKIE))
        .add(expired_cookie(REFRESH_COOKIE));
    Ok((
        jar,
        Json(ApiResponse::new(200, serde_json::json!({}), "User logged out")),
    ))
}

/// POST /api/v1/users/refresh-token
///
/// Token from the cookie, else the JSON body.
pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let from_body = || {
        serde_json::from_slice::<RefreshRequest>(&body)
            .ok()
            .and_then(|r| r.refresh_token)
    };
    let incoming = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty())
        .or_else(from_body);

    let tokens = refresh_access_token(&state, incoming).await?;

    let jar = with_session_cookies(jar, &tokens);
    Ok((
        jar,
        Json(ApiResponse::new(200, tokens, "Access token refreshed")),
    ))
}

/// POST /api/v1/users/change-password
pub async fn change_current_password(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    WithRejection(Json(req), _): WithRejection<Json<ChangePasswordRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    change_password(&state, user.id, &req.old_password, &req.new_password).await?;
    Ok(Json(ApiResponse::new(
        200,
        serde_json::json!({}),
        "Password changed successfully",
    )))
}

/// GET /api/v1/users/current-user
pub async fn current_user(Extension(AuthUser(user)): Extension<AuthUser>) -> impl IntoResponse {
    Json(ApiResponse::new(200, user, "Current user fetched successfully"))
}
