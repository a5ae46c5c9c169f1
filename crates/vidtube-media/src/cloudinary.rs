use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha1::{Digest, Sha1};
use tracing::{debug, info, warn};

use crate::{MediaError, MediaFile, MediaRelay, UploadedMedia};

const API_BASE: &str = "https://api.cloudinary.com/v1_1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Relay backed by Cloudinary's signed upload API.
pub struct CloudinaryRelay {
    client: reqwest::Client,
    api_base: String,
    cloud_name: String,
    api_key: String,
    api_secret: String,
}

#[derive(Debug, Deserialize)]
struct UploadResult {
    secure_url: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DestroyResult {
    result: String,
}

impl CloudinaryRelay {
    pub fn new(cloud_name: &str, api_key: &str, api_secret: &str) -> anyhow::Result<Self> {
        Self::with_api_base(API_BASE, cloud_name, api_key, api_secret)
    }

    pub fn with_api_base(
        api_base: &str,
        cloud_name: &str,
        api_key: &str,
        api_secret: &str,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            cloud_name: cloud_name.to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
        })
    }

    fn signed_form(&self, params: &[(&str, String)]) -> Form {
        let signature = sign(params, &self.api_secret);
        let mut form = Form::new()
            .text("api_key", self.api_key.clone())
            .text("signature", signature);
        for (key, value) in params {
            form = form.text(key.to_string(), value.clone());
        }
        form
    }
}

#[async_trait]
impl MediaRelay for CloudinaryRelay {
    async fn upload(&self, file: MediaFile) -> Result<UploadedMedia, MediaError> {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let mut part = Part::bytes(file.bytes.to_vec()).file_name(file.file_name.clone());
        if let Some(content_type) = &file.content_type {
            part = part
                .mime_str(content_type)
                .map_err(|e| MediaError::Upload(format!("bad content type: {}", e)))?;
        }
        let form = self
            .signed_form(&[("timestamp", timestamp)])
            .part("file", part);

        let url = format!("{}/{}/auto/upload", self.api_base, self.cloud_name);
        let resp = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| MediaError::Upload(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(MediaError::Upload(format!("store answered {}", resp.status())));
        }

        let body: UploadResult = resp
            .json()
            .await
            .map_err(|e| MediaError::Upload(e.to_string()))?;
        let url = body
            .secure_url
            .or(body.url)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| MediaError::Upload("store returned no url".into()))?;

        info!("Uploaded {} to Cloudinary", file.file_name);
        Ok(UploadedMedia { url })
    }

    async fn delete(&self, url: &str) -> Result<(), MediaError> {
        let (resource_type, public_id) =
            parse_asset_url(url).ok_or_else(|| MediaError::ForeignUrl(url.to_string()))?;
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let form = self.signed_form(&[("public_id", public_id.clone()), ("timestamp", timestamp)]);

        let endpoint = format!("{}/{}/{}/destroy", self.api_base, self.cloud_name, resource_type);
        let resp = self
            .client
            .post(&endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| MediaError::Delete(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(MediaError::Delete(format!("store answered {}", resp.status())));
        }

        let body: DestroyResult = resp
            .json()
            .await
            .map_err(|e| MediaError::Delete(e.to_string()))?;
        match body.result.as_str() {
            "ok" => {
                debug!("Deleted {} from Cloudinary", public_id);
                Ok(())
            }
            "not found" => {
                warn!("Asset {} already gone", public_id);
                Ok(())
            }
            other => Err(MediaError::Delete(format!("unexpected result {}", other))),
        }
    }
}

/// Cloudinary request signature: SHA-1 over the `&`-joined, key-sorted
/// `key=value` pairs with the API secret appended.
fn sign(params: &[(&str, String)], api_secret: &str) -> String {
    let mut sorted: Vec<_> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let to_sign = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha1::new();
    hasher.update(to_sign.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Split a delivery URL such as
/// `https://res.cloudinary.com/demo/image/upload/v1712/folder/pic.png`
/// into its resource type (`image`) and public id (`folder/pic`).
fn parse_asset_url(url: &str) -> Option<(String, String)> {
    let path = url.split(['?', '#']).next()?;
    let (before, after) = path.split_once("/upload/")?;
    let resource_type = before.rsplit('/').next().filter(|s| !s.is_empty())?;

    let mut segments: Vec<&str> = after.split('/').filter(|s| !s.is_empty()).collect();
    if segments
        .first()
        .is_some_and(|s| s.len() > 1 && s.starts_with('v') && s[1..].bytes().all(|b| b.is_ascii_digit()))
    {
        segments.remove(0);
    }
    let last = segments.pop()?;
    let stem = match last.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => stem,
        _ => last,
    };
    segments.push(stem);

    Some((resource_type.to_string(), segments.join("/")))
}
