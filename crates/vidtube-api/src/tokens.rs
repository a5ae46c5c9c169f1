use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::{debug, warn};
use uuid::Uuid;

use vidtube_db::models::UserRow;
use vidtube_types::api::{AccessClaims, RefreshClaims, TokenPair};

use crate::error::ApiError;
use crate::state::{AppState, db_call};

/// Longest accepted token lifetime.
pub const MAX_TTL_DAYS: i64 = 365;

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub access_secret: String,
    pub access_ttl: Duration,
    pub refresh_secret: String,
    pub refresh_ttl: Duration,
}

/// Signs and verifies the two token kinds. Each kind has its own secret, so
/// a refresh token is never accepted where an access token is expected.
pub struct TokenService {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(config: &TokenConfig) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(config.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(config.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            access_ttl: config.access_ttl,
            refresh_ttl: config.refresh_ttl,
        }
    }

    pub fn sign_access(&self, user: &UserRow) -> Result<String> {
        let now = Utc::now();
        let claims = AccessClaims {
            sub: user.id.parse()?,
            email: user.email.clone(),
            username: user.username.clone(),
            full_name: user.full_name.clone(),
            iat: now.timestamp() as usize,
            exp: expiry(now, self.access_ttl)?,
        };
        Ok(encode(&Header::default(), &claims, &self.access_encoding)?)
    }

    pub fn sign_refresh(&self, user_id: Uuid) -> Result<String> {
        let now = Utc::now();
        let claims = RefreshClaims {
            sub: user_id,
            jti: Uuid::new_v4(),
            iat: now.timestamp() as usize,
            exp: expiry(now, self.refresh_ttl)?,
        };
        Ok(encode(&Header::default(), &claims, &self.refresh_encoding)?)
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, ApiError> {
        decode::<AccessClaims>(token, &self.access_decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| {
                debug!("Rejected access token: {}", e);
                ApiError::unauthorized("Invalid access token")
            })
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, ApiError> {
        decode::<RefreshClaims>(token, &self.refresh_decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| {
                debug!("Rejected refresh token: {}", e);
                ApiError::unauthorized("Invalid refresh token")
            })
    }

    fn sign_pair(&self, user: &UserRow) -> Result<TokenPair> {
        Ok(TokenPair {
            access_token: self.sign_access(user)?,
            refresh_token: self.sign_refresh(user.id.parse()?)?,
        })
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> Result<usize> {
    let exp = now
        .checked_add_signed(ttl)
        .ok_or_else(|| anyhow!("token lifetime {} is out of range", ttl))?;
    Ok(exp.timestamp().max(0) as usize)
}

/// Sign a fresh pair for `user` and store the refresh token on the user,
/// replacing whatever session was active before.
pub async fn issue_token_pair(state: &AppState, user: &UserRow) -> Result<TokenPair, ApiError> {
    let pair = state.tokens.sign_pair(user).map_err(|e| {
        anyhow!("something went wrong while generating tokens: {}", e)
    })?;

    let id = user.id.clone();
    let refresh = pair.refresh_token.clone();
    let stored = db_call(state, move |db| db.set_refresh_token(&id, Some(&refresh))).await?;
    if !stored {
        return Err(ApiError::not_found("User does not exist"));
    }

    Ok(pair)
}

/// Resolve a presented refresh token to its user. Fails if the token does not
/// verify or is no longer the value stored on the user.
pub async fn verify_refresh_token(state: &AppState, token: &str) -> Result<UserRow, ApiError> {
    let claims = state.tokens.verify_refresh(token)?;

    let id = claims.sub.to_string();
    let user = db_call(state, move |db| db.get_user_by_id(&id))
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid refresh token"))?;

    if user.refresh_token.as_deref() != Some(token) {
        warn!("Superseded refresh token presented for user {}", user.id);
        return Err(ApiError::unauthorized("Refresh token is expired or used"));
    }

    Ok(user)
}

/// Exchange `presented` for a new pair. The swap only lands if `presented` is
/// still the stored value, so of two racing refreshes at most one wins.
pub async fn rotate_token_pair(
    state: &AppState,
    user: &UserRow,
    presented: &str,
) -> Result<TokenPair, ApiError> {
    let pair = state.tokens.sign_pair(user).map_err(|e| {
        anyhow!("something went wrong while generating tokens: {}", e)
    })?;

    let id = user.id.clone();
    let expected = presented.to_string();
    let replacement = pair.refresh_token.clone();
    let swapped = db_call(state, move |db| {
        db.rotate_refresh_token(&id, &expected, &replacement)
    })
    .await?;
    if !swapped {
        return Err(ApiError::unauthorized("Refresh token is expired or used"));
    }

    Ok(pair)
}

/// Parse an expiry such as `900`, `15m`, `1h` or `10d`.
pub fn parse_ttl(value: &str) -> Result<Duration> {
    let value = value.trim();
    let (digits, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        Some(i) => value.split_at(i),
        None => (value, "s"),
    };
    let n: i64 = digits
        .parse()
        .map_err(|_| anyhow!("invalid duration {:?}", value))?;
    if n == 0 {
        bail!("duration {:?} must be positive", value);
    }

    let ttl = match unit {
        "s" => Duration::try_seconds(n),
        "m" => Duration::try_minutes(n),
        "h" => Duration::try_hours(n),
        "d" => Duration::try_days(n),
        _ => bail!("unknown duration unit in {:?}", value),
    };
    match ttl {
        Some(ttl) if ttl <= Duration::days(MAX_TTL_DAYS) => Ok(ttl),
        _ => bail!("duration {:?} exceeds {} days", value, MAX_TTL_DAYS),
    }
}
