//! Media relay: pushes user media (avatars, cover images) to an object store
//! and removes it again by URL.

pub mod cloudinary;
pub mod disk;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use cloudinary::CloudinaryRelay;
pub use disk::DiskRelay;

/// An uploaded file held in memory, as received from a multipart form.
#[derive(Debug, Clone)]
pub struct MediaFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadedMedia {
    pub url: String,
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("upload failed: {0}")]
    Upload(String),

    #[error("delete failed: {0}")]
    Delete(String),

    #[error("not a url managed by this relay: {0}")]
    ForeignUrl(String),
}

#[async_trait]
pub trait MediaRelay: Send + Sync {
    async fn upload(&self, file: MediaFile) -> Result<UploadedMedia, MediaError>;

    /// Delete the asset behind `url`. Deleting an asset that is already gone succeeds.
    async fn delete(&self, url: &str) -> Result<(), MediaError>;
}

/// Which object store backs the relay.
#[derive(Debug, Clone)]
pub enum MediaConfig {
    Cloudinary {
        cloud_name: String,
        api_key: String,
        api_secret: String,
    },
    Disk {
        dir: PathBuf,
        /// Public URL prefix the directory is served under, e.g. `http://host/media`.
        public_url: String,
    },
}

pub async fn relay_from_config(config: &MediaConfig) -> anyhow::Result<Arc<dyn MediaRelay>> {
    let relay: Arc<dyn MediaRelay> = match config {
        MediaConfig::Cloudinary {
            cloud_name,
            api_key,
            api_secret,
        } => Arc::new(CloudinaryRelay::new(cloud_name, api_key, api_secret)?),
        MediaConfig::Disk { dir, public_url } => {
            Arc::new(DiskRelay::new(dir.clone(), public_url).await?)
        }
    };
    Ok(relay)
}
