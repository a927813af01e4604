//! Worker-to-primary notification model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome a worker reports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    /// Task finished successfully.
    Success,
    /// Task failed.
    Failure,
    /// Informational update.
    Info,
}

/// One-way message from a worker instance to the primary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Notification {
    /// Unique record identifier.
    pub id: String,
    /// Short id of the sending instance.
    pub worker_id: String,
    /// Name of the sending instance (or its id when unnamed).
    pub worker_name: String,
    /// Reported outcome.
    pub status: NotificationStatus,
    /// Free-text body.
    pub message: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Whether a consumer has picked it up.
    #[serde(default)]
    pub delivered: bool,
    /// When it was marked delivered.
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
}

impl Notification {
    /// Construct an undelivered notification stamped now.
    #[must_use]
    pub fn new(
        worker_id: String,
        worker_name: String,
        status: NotificationStatus,
        message: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            worker_id,
            worker_name,
            status,
            message,
            created_at: Utc::now(),
            delivered: false,
            delivered_at: None,
        }
    }
}

/// Selection criteria for listing notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationFilter {
    /// Only notifications from this worker id.
    pub worker_id: Option<String>,
    /// Skip notifications already delivered.
    pub undelivered_only: bool,
}

impl NotificationFilter {
    /// Whether `notification` passes the filter.
    #[must_use]
    pub fn matches(&self, notification: &Notification) -> bool {
        if let Some(ref worker) = self.worker_id {
            if &notification.worker_id != worker {
                return false;
            }
        }
        !(self.undelivered_only && notification.delivered)
    }
}
