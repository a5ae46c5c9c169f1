use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{MediaError, MediaFile, MediaRelay, UploadedMedia};

/// Relay that keeps media in a local directory.
///
/// Each asset is stored flat at `{dir}/{uuid}.{ext}` and is reachable at
/// `{public_url}/{uuid}.{ext}` once the HTTP layer serves `dir`.
pub struct DiskRelay {
    dir: PathBuf,
    public_url: String,
}

impl DiskRelay {
    pub async fn new(dir: PathBuf, public_url: &str) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Media storage directory: {}", dir.display());
        Ok(Self {
            dir,
            public_url: public_url.trim_end_matches('/').to_string(),
        })
    }

    /// Map a public URL back to the stored file name, refusing anything that
    /// is not `{uuid}` or `{uuid}.{ext}` so deletes cannot escape `dir`.
    fn file_name_for(&self, url: &str) -> Option<String> {
        let name = url.strip_prefix(&self.public_url)?.strip_prefix('/')?;
        let stem = name.split_once('.').map_or(name, |(stem, _)| stem);
        stem.parse::<Uuid>().ok()?;
        if name.contains('/') || name.contains("..") {
            return None;
        }
        Some(name.to_string())
    }
}

fn extension_of(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 8 || !ext.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[async_trait]
impl MediaRelay for DiskRelay {
    async fn upload(&self, file: MediaFile) -> Result<UploadedMedia, MediaError> {
        if file.bytes.is_empty() {
            return Err(MediaError::Upload("empty file".into()));
        }

        let id = Uuid::new_v4();
        let name = match extension_of(&file.file_name) {
            Some(ext) => format!("{}.{}", id, ext),
            None => id.to_string(),
        };

        let path = self.dir.join(&name);
        fs::write(&path, &file.bytes)
            .await
            .map_err(|e| MediaError::Upload(format!("write {}: {}", path.display(), e)))?;

        info!("Stored {} ({} bytes) as {}", file.file_name, file.bytes.len(), name);
        Ok(UploadedMedia {
            url: format!("{}/{}", self.public_url, name),
        })
    }

    async fn delete(&self, url: &str) -> Result<(), MediaError> {
        let name = self
            .file_name_for(url)
            .ok_or_else(|| MediaError::ForeignUrl(url.to_string()))?;

        match fs::remove_file(self.dir.join(&name)).await {
            Ok(()) => {
                info!("Deleted media {}", name);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Media {} already gone", name);
                Ok(())
            }
            Err(e) => Err(MediaError::Delete(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn file(name: &str, body: &'static [u8]) -> MediaFile {
        MediaFile {
            file_name: name.to_string(),
            content_type: Some("image/png".to_string()),
            bytes: Bytes::from_static(body),
        }
    }

    #[tokio::test]
    async fn upload_then_delete() {
        let dir = tempfile::tempdir().unwrap();
        let relay = DiskRelay::new(dir.path().to_path_buf(), "http://localhost:8000/media/")
            .await
            .unwrap();

        let uploaded = relay.upload(file("me.PNG", b"pixels")).await.unwrap();
        assert!(uploaded.url.starts_with("http://localhost:8000/media/"));
        assert!(uploaded.url.ends_with(".png"));

        let name = relay.file_name_for(&uploaded.url).unwrap();
        let stored = std::fs::read(dir.path().join(&name)).unwrap();
        assert_eq!(stored, b"pixels");

        relay.delete(&uploaded.url).await.unwrap();
        assert!(!dir.path().join(&name).exists());

        // second delete is a no-op
        relay.delete(&uploaded.url).await.unwrap();
    }

    #[tokio::test]
    async fn empty_upload_fails() {
        let dir = tempfile::tempdir().unwrap();
        let relay = DiskRelay::new(dir.path().to_path_buf(), "http://h/media").await.unwrap();
        assert!(matches!(
            relay.upload(file("a.png", b"")).await,
            Err(MediaError::Upload(_))
        ));
    }

    #[tokio::test]
    async fn delete_refuses_urls_outside_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let relay = DiskRelay::new(dir.path().to_path_buf(), "http://h/media").await.unwrap();

        for url in [
            "http://other/media/3f2504e0-4f89-11d3-9a0c-0305e82c3301.png",
            "http://h/media/../secrets",
            "http://h/media/not-a-uuid.png",
        ] {
            assert!(matches!(relay.delete(url).await, Err(MediaError::ForeignUrl(_))));
        }
    }

    #[test]
    fn odd_extensions_are_dropped() {
        assert_eq!(extension_of("clip.MP4").as_deref(), Some("mp4"));
        assert_eq!(extension_of("noext"), None);
        assert_eq!(extension_of("evil.p/ng"), None);
    }
}
