use std::sync::Arc;

use tracing::error;

use vidtube_db::Database;
use vidtube_media::MediaRelay;

use crate::tokens::TokenService;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub media: Arc<dyn MediaRelay>,
    pub tokens: TokenService,
}

/// Run a blocking DB call off the async runtime.
pub async fn db_call<F, T>(state: &AppState, f: F) -> anyhow::Result<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            anyhow::anyhow!("database task failed: {}", e)
        })?
}
