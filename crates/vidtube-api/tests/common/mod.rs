#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::TempDir;

use vidtube_api::auth::{RegisterInput, register_user};
use vidtube_api::tokens::{TokenConfig, TokenService};
use vidtube_api::{AppState, AppStateInner};
use vidtube_db::Database;
use vidtube_media::{MediaError, MediaFile, MediaRelay, UploadedMedia};
use vidtube_types::models::PublicUser;

type UploadHook = Box<dyn FnOnce() + Send>;

/// In-memory stand-in for the object store.
#[derive(Default)]
pub struct FakeRelay {
    pub fail_uploads: AtomicBool,
    /// 1-based index of a single upload that fails; 0 fails none.
    pub failing_upload: AtomicUsize,
    /// Runs once, during the next upload.
    pub before_upload: Mutex<Option<UploadHook>>,
    /// Number of upcoming deletes that fail.
    pub failing_deletes: AtomicUsize,
    pub uploaded: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
    counter: AtomicUsize,
}

impl FakeRelay {
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn uploaded(&self) -> Vec<String> {
        self.uploaded.lock().unwrap().clone()
    }

    pub fn on_next_upload(&self, hook: impl FnOnce() + Send + 'static) {
        *self.before_upload.lock().unwrap() = Some(Box::new(hook));
    }
}

#[async_trait]
impl MediaRelay for FakeRelay {
    async fn upload(&self, file: MediaFile) -> Result<UploadedMedia, MediaError> {
        let hook = self.before_upload.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        if self.fail_uploads.load(Ordering::SeqCst)
            || self.failing_upload.load(Ordering::SeqCst) == n + 1
        {
            return Err(MediaError::Upload("store unavailable".into()));
        }
        let url = format!("https://media.test/{}-{}", n, file.file_name);
        self.uploaded.lock().unwrap().push(url.clone());
        Ok(UploadedMedia { url })
    }

    async fn delete(&self, url: &str) -> Result<(), MediaError> {
        let failing = self.failing_deletes.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_deletes.store(failing - 1, Ordering::SeqCst);
            return Err(MediaError::Delete("store unavailable".into()));
        }
        self.deleted.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

pub struct TestApp {
    dir: TempDir,
    pub state: AppState,
    pub relay: Arc<FakeRelay>,
}

impl TestApp {
    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("vidtube.db")
    }
}

pub fn token_config() -> TokenConfig {
    TokenConfig {
        access_secret: "test-access-secret".into(),
        access_ttl: chrono::Duration::minutes(15),
        refresh_secret: "test-refresh-secret".into(),
        refresh_ttl: chrono::Duration::days(10),
    }
}

pub fn setup() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(&dir.path().join("vidtube.db")).unwrap();
    let relay = Arc::new(FakeRelay::default());
    let state = Arc::new(AppStateInner {
        db,
        media: relay.clone(),
        tokens: TokenService::new(&token_config()),
    });
    TestApp {
        dir,
        state,
        relay,
    }
}

pub fn image(name: &str) -> MediaFile {
    MediaFile {
        file_name: name.to_string(),
        content_type: Some("image/png".to_string()),
        bytes: Bytes::from_static(b"\x89PNG fake"),
    }
}

pub fn registration(full_name: &str, email: &str, username: &str, password: &str) -> RegisterInput {
    RegisterInput {
        full_name: Some(full_name.to_string()),
        email: Some(email.to_string()),
        username: Some(username.to_string()),
        password: Some(password.to_string()),
        avatar: Some(image("avatar.png")),
        cover_image: None,
    }
}

pub async fn register(state: &AppState, username: &str) -> PublicUser {
    register_user(
        state,
        registration(
            &format!("{} Person", username),
            &format!("{}@x.com", username),
            username,
            "pw",
        ),
    )
    .await
    .unwrap()
}

/// Wait for background deletes to reach the fake relay.
pub async fn wait_for_deletes(relay: &FakeRelay, count: usize) -> Vec<String> {
    for _ in 0..100 {
        let deleted = relay.deleted();
        if deleted.len() >= count {
            return deleted;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    relay.deleted()
}
