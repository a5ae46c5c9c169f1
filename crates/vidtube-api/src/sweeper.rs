use std::time::Duration;

use tracing::{error, info, warn};

use crate::state::{AppState, db_call};

/// Deletions are retried this many times in total before the entry is left
/// in `orphaned_media` for an operator.
pub const MAX_DELETE_ATTEMPTS: u32 = 5;

/// Delete a media asset in the background. A failed delete is recorded in
/// `orphaned_media` for [`run_orphan_sweep`] to retry.
pub fn discard_media(state: &AppState, url: String) {
    let state = state.clone();
    tokio::spawn(async move {
        match state.media.delete(&url).await {
            Ok(()) => info!("Discarded media {}", url),
            Err(e) => {
                warn!("Failed to delete media {}: {}", url, e);
                let reason = e.to_string();
                if let Err(e) =
                    db_call(&state, move |db| db.record_orphaned_media(&url, &reason)).await
                {
                    error!("Failed to record orphaned media: {}", e);
                }
            }
        }
    });
}

/// Background task that retries failed media deletions.
pub async fn run_orphan_sweep(state: AppState, interval_secs: u64) {
    // A zero period panics in `interval`.
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        interval.tick().await;

        match sweep_orphans(&state).await {
            Ok(count) => {
                if count > 0 {
                    info!("Sweep: deleted {} orphaned media assets", count);
                }
            }
            Err(e) => {
                warn!("Sweep error: {}", e);
            }
        }
    }
}

/// One retry pass. Returns how many assets were deleted.
pub async fn sweep_orphans(state: &AppState) -> anyhow::Result<usize> {
    let pending = db_call(state, |db| db.list_orphaned_media(MAX_DELETE_ATTEMPTS)).await?;

    let mut deleted = 0;
    for orphan in pending {
        let url = orphan.url;
        match state.media.delete(&url).await {
            Ok(()) => {
                db_call(state, move |db| db.clear_orphaned_media(&url)).await?;
                deleted += 1;
            }
            Err(e) => {
                if orphan.attempts + 1 >= MAX_DELETE_ATTEMPTS {
                    error!("Giving up on deleting {} after {} attempts: {}", url, orphan.attempts + 1, e);
                }
                let reason = e.to_string();
                db_call(state, move |db| db.record_orphaned_media(&url, &reason)).await?;
            }
        }
    }

    Ok(deleted)
}
