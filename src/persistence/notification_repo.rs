//! Notification store: one JSON file per notification.
//!
//! Files are named `{worker_name}_{worker_id}_{timestamp}.json` and are only
//! ever created, rewritten in place to flag delivery, or deleted by the
//! retention purge. A sidecar `.lock` file in the directory serializes
//! writers across processes.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use regex::Regex;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::models::notification::{Notification, NotificationFilter};
use crate::{AppError, Result};

use super::lock::{LockMode, StoreLock};

const LOCK_FILE: &str = ".lock";

/// How a staged file lands on its final path.
#[derive(Debug, Clone, Copy)]
enum WriteMode {
    /// Fail instead of replacing an existing file.
    CreateNew,
    /// Atomically replace whatever is there.
    Replace,
}

/// Directory-backed notification store.
#[derive(Debug, Clone)]
pub struct NotificationRepo {
    dir: PathBuf,
}

impl NotificationRepo {
    /// Create a store rooted at `dir` (created lazily on first write).
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the notification files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name a notification is stored under.
    #[must_use]
    pub fn file_name(notification: &Notification) -> String {
        let stamp = notification.created_at.format("%Y%m%d_%H%M%S_%6f");
        let worker = if notification.worker_name.is_empty() {
            "unknown"
        } else {
            notification.worker_name.as_str()
        };
        format!(
            "{}_{}_{stamp}.json",
            sanitize(worker),
            sanitize(&notification.worker_id)
        )
    }

    /// Persist a new notification and return its path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the directory or file cannot be
    /// written.
    pub fn save(&self, notification: &Notification) -> Result<PathBuf> {
        let _lock = self.lock(LockMode::Exclusive)?;
        let path = self.dir.join(Self::file_name(notification));
        self.write_file(&path, notification, WriteMode::CreateNew)?;
        debug!(path = %path.display(), worker_id = %notification.worker_id, "notification saved");
        Ok(path)
    }

    /// Flag the notification stored at `path` as delivered.
    ///
    /// Returns `false` if the file is missing or unparseable.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the rewrite fails.
    pub fn mark_delivered(&self, path: &Path) -> Result<bool> {
        let _lock = self.lock(LockMode::Exclusive)?;
        let Some(mut notification) = load_file(path) else {
            return Ok(false);
        };
        notification.delivered = true;
        notification.delivered_at = Some(Utc::now());
        self.write_file(path, &notification, WriteMode::Replace)?;
        Ok(true)
    }

    /// Flag the notification with `id` as delivered.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the store cannot be read or written.
    pub fn mark_delivered_by_id(&self, id: &str) -> Result<bool> {
        match self.get_by_id(id)? {
            Some((path, _)) => self.mark_delivered(&path),
            None => Ok(false),
        }
    }

    /// Notifications passing `filter`, newest first, at most `limit`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the lock cannot be acquired.
    pub fn list(&self, filter: &NotificationFilter, limit: usize) -> Result<Vec<Notification>> {
        let _lock = self.lock(LockMode::Shared)?;
        let mut found: Vec<Notification> = self
            .files()
            .iter()
            .filter_map(|path| load_file(path))
            .filter(|n| filter.matches(n))
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        found.truncate(limit);
        Ok(found)
    }

    /// Locate a notification by id, returning its path alongside it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the lock cannot be acquired.
    pub fn get_by_id(&self, id: &str) -> Result<Option<(PathBuf, Notification)>> {
        let _lock = self.lock(LockMode::Shared)?;
        Ok(self.files().into_iter().find_map(|path| {
            load_file(&path)
                .filter(|n| n.id == id)
                .map(|n| (path, n))
        }))
    }

    /// Delete notification files last modified before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the lock cannot be acquired.
    pub fn cleanup_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let _lock = self.lock(LockMode::Exclusive)?;
        let cutoff = SystemTime::from(cutoff);
        let mut removed = 0;

        for path in self.files() {
            let modified = fs::metadata(&path).and_then(|m| m.modified());
            match modified {
                Ok(mtime) if mtime < cutoff => match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(err) => warn!(path = %path.display(), %err, "failed to delete notification"),
                },
                Ok(_) => {}
                Err(err) => debug!(path = %path.display(), %err, "cannot stat notification"),
            }
        }

        if removed > 0 {
            info!(removed, "expired notifications deleted");
        }
        Ok(removed)
    }

    fn lock(&self, mode: LockMode) -> Result<StoreLock> {
        StoreLock::acquire(&self.dir.join(LOCK_FILE), mode)
    }

    fn files(&self) -> Vec<PathBuf> {
        let pattern = format!(
            "{}/*.json",
            glob::Pattern::escape(&self.dir.to_string_lossy())
        );
        match glob::glob(&pattern) {
            Ok(paths) => paths.filter_map(std::result::Result::ok).collect(),
            Err(err) => {
                warn!(%err, "invalid notification glob");
                Vec::new()
            }
        }
    }

    fn write_file(&self, path: &Path, notification: &Notification, mode: WriteMode) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|err| {
            AppError::Persistence(format!("failed to create {}: {err}", self.dir.display()))
        })?;
        let json = serde_json::to_string_pretty(notification)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)
            .map_err(|err| AppError::Persistence(format!("failed to stage notification: {err}")))?;
        tmp.write_all(json.as_bytes())
            .map_err(|err| AppError::Persistence(format!("failed to write notification: {err}")))?;
        let stored = match mode {
            WriteMode::CreateNew => tmp.persist_noclobber(path).map(drop),
            WriteMode::Replace => tmp.persist(path).map(drop),
        };
        stored.map_err(|err| {
            AppError::Persistence(format!(
                "failed to store notification {}: {}",
                path.display(),
                err.error
            ))
        })

    }
}

fn load_file(path: &Path) -> Option<Notification> {
    let raw = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(n) => Some(n),
        Err(err) => {
            debug!(path = %path.display(), %err, "skipping unparseable notification");
            None
        }
    }
}

#[allow(clippy::expect_used)]
static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_\-]").expect("valid pattern"));

/// Replace every character outside `[A-Za-z0-9_-]` with `_`.
fn sanitize(raw: &str) -> String {
    UNSAFE_CHARS.replace_all(raw, "_").into_owned()
}
