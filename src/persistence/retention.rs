//! Retention service for notification files.
//!
//! Runs as a background task deleting notification files older than
//! `retention_days`, once at startup and then hourly. Each purge runs on
//! the blocking pool since it takes the store lock and walks the directory.

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::notification_repo::NotificationRepo;
use crate::Result;

const PURGE_INTERVAL: Duration = Duration::from_secs(3600);

/// Spawn the retention purge background task.
///
/// The first tick fires immediately; the task exits when `cancel` fires.
#[must_use]
pub fn spawn_retention_task(
    repo: NotificationRepo,
    retention_days: u32,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("retention task shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let store = repo.clone();
                    match tokio::task::spawn_blocking(move || purge(&store, retention_days)).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(err)) => error!(%err, "notification retention purge failed"),
                        Err(err) => error!(%err, "notification retention task panicked"),
                    }
                }
            }
        }
    })
}

/// Delete notifications older than `retention_days`. Returns how many went.
///
/// # Errors
///
/// Returns `AppError::Persistence` if the store lock cannot be acquired.
pub fn purge(repo: &NotificationRepo, retention_days: u32) -> Result<usize> {
    let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
    let removed = repo.cleanup_older_than(cutoff)?;
    info!(retention_days, removed, "retention purge completed");
    Ok(removed)
}
