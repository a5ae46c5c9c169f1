use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use vidtube_api::tokens::{TokenConfig, parse_ttl};
use vidtube_media::MediaConfig;

/// Placeholder secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "secret",
];

/// Everything the server needs, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub cors_origin: Option<String>,
    pub max_upload_bytes: usize,
    pub tokens: TokenConfig,
    pub media: MediaConfig,
    pub orphan_sweep_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let get_or = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let access_secret = secret(&var, "ACCESS_TOKEN_SECRET")?;
        let refresh_secret = secret(&var, "REFRESH_TOKEN_SECRET")?;
        if access_secret == refresh_secret {
            bail!("ACCESS_TOKEN_SECRET and REFRESH_TOKEN_SECRET must differ");
        }
        let tokens = TokenConfig {
            access_secret,
            access_ttl: parse_ttl(&get_or("ACCESS_TOKEN_EXPIRY", "1d"))
                .context("ACCESS_TOKEN_EXPIRY")?,
            refresh_secret,
            refresh_ttl: parse_ttl(&get_or("REFRESH_TOKEN_EXPIRY", "10d"))
                .context("REFRESH_TOKEN_EXPIRY")?,
        };

        let port: u16 = get_or("VIDTUBE_PORT", "8000").parse().context("VIDTUBE_PORT")?;

        let media = match (
            var("CLOUDINARY_CLOUD_NAME"),
            var("CLOUDINARY_API_KEY"),
            var("CLOUDINARY_API_SECRET"),
        ) {
            (Some(cloud_name), Some(api_key), Some(api_secret)) => MediaConfig::Cloudinary {
                cloud_name,
                api_key,
                api_secret,
            },
            (None, None, None) => MediaConfig::Disk {
                dir: get_or("VIDTUBE_MEDIA_DIR", "./media").into(),
                public_url: format!(
                    "{}/media",
                    get_or("VIDTUBE_PUBLIC_URL", &format!("http://localhost:{}", port))
                        .trim_end_matches('/')
                ),
            },
            _ => bail!("CLOUDINARY_CLOUD_NAME, CLOUDINARY_API_KEY and CLOUDINARY_API_SECRET must be set together"),
        };

        let orphan_sweep_secs: u64 = get_or("VIDTUBE_ORPHAN_SWEEP_SECS", "300")
            .parse()
            .context("VIDTUBE_ORPHAN_SWEEP_SECS")?;
        if orphan_sweep_secs == 0 {
            bail!("VIDTUBE_ORPHAN_SWEEP_SECS must be at least 1");
        }

        let max_upload_mb: usize = get_or("VIDTUBE_MAX_UPLOAD_MB", "16")
            .parse()
            .context("VIDTUBE_MAX_UPLOAD_MB")?;

        Ok(Self {
            host: get_or("VIDTUBE_HOST", "0.0.0.0"),
            port,
            db_path: get_or("VIDTUBE_DB_PATH", "vidtube.db").into(),
            cors_origin: var("VIDTUBE_CORS_ORIGIN"),
            max_upload_bytes: max_upload_mb * 1024 * 1024,
            tokens,
            media,
            orphan_sweep_secs,
        })
    }
}

fn secret(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    match var(key) {
        Some(value) if !PLACEHOLDER_SECRETS.contains(&value.as_str()) => Ok(value),
        _ => bail!("{} is unset or still a placeholder", key),
    }
}
