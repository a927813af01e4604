//! Normalized conversation-log entries and the activity classification
//! derived from them.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::instance::InstanceStatus;

/// Maximum characters kept from a thinking block.
pub const THINKING_MAX_CHARS: usize = 300;
/// Maximum characters kept from a tool result.
pub const TOOL_RESULT_MAX_CHARS: usize = 500;
/// Maximum characters kept from an assistant text response.
pub const TEXT_RESPONSE_MAX_CHARS: usize = 1500;

/// Speaker of a log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// User turn (typed prompt or tool result).
    User,
    /// Assistant turn (thinking, tool call, text).
    Assistant,
    /// Any other record type, kept verbatim.
    Other(String),
}

impl EntryKind {
    /// Map the raw `type` field of a log record.
    #[must_use]
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "user" => Self::User,
            "assistant" => Self::Assistant,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// One parsed conversation-log record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    /// Speaker.
    pub kind: EntryKind,
    /// Record timestamp, if it parsed.
    pub timestamp: Option<DateTime<Utc>>,
    /// Record UUID (empty when absent).
    pub uuid: String,
    /// Thinking text, truncated.
    pub thinking: Option<String>,
    /// Name of the tool the assistant invoked.
    pub tool_name: Option<String>,
    /// Raw tool input object.
    pub tool_input: Option<serde_json::Value>,
    /// Tool output, truncated.
    pub tool_result: Option<String>,
    /// Whether the tool result reported an error.
    pub is_error: bool,
    /// Assistant text, truncated.
    pub text_response: Option<String>,
    /// Plain user prompt.
    pub user_message: Option<String>,
}

impl LogEntry {
    /// Empty entry of the given kind.
    #[must_use]
    pub fn new(kind: EntryKind, timestamp: Option<DateTime<Utc>>, uuid: String) -> Self {
        Self {
            kind,
            timestamp,
            uuid,
            thinking: None,
            tool_name: None,
            tool_input: None,
            tool_result: None,
            is_error: false,
            text_response: None,
            user_message: None,
        }
    }

    fn has_thinking(&self) -> bool {
        self.thinking.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// Coarse liveness derived from the freshest log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    /// Latest entry is a thinking block.
    Thinking,
    /// Latest entry is a tool call or tool result.
    ToolUse,
    /// Recent activity without a more specific signal.
    Running,
    /// Nothing new within the idle threshold.
    Idle,
    /// No log entries at all.
    Unknown,
}

impl ActivityStatus {
    /// Lowercase label.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Thinking => "thinking",
            Self::ToolUse => "tool_use",
            Self::Running => "running",
            Self::Idle => "idle",
            Self::Unknown => "unknown",
        }
    }
}

impl From<ActivityStatus> for InstanceStatus {
    /// `Running` and `Unknown` both persist as `Running`.
    fn from(status: ActivityStatus) -> Self {
        match status {
            ActivityStatus::Thinking => Self::Thinking,
            ActivityStatus::ToolUse => Self::ToolUse,
            ActivityStatus::Idle => Self::Idle,
            ActivityStatus::Running | ActivityStatus::Unknown => Self::Running,
        }
    }
}

/// Result of activity detection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityState {
    /// Classified status.
    pub status: ActivityStatus,
    /// Tool being used, when `status` is `ToolUse` from a tool call.
    pub tool_name: Option<String>,
    /// Seconds since the latest entry's timestamp.
    pub seconds_since_activity: f64,
}

impl ActivityState {
    /// State for a log with no entries.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            status: ActivityStatus::Unknown,
            tool_name: None,
            seconds_since_activity: 0.0,
        }
    }

    /// Classify `entries` (oldest first) as of `now`.
    ///
    /// Only the latest entry decides. An unparseable timestamp counts as
    /// fresh. Precedence once fresh: thinking, tool call, tool result,
    /// running.
    #[must_use]
    pub fn classify(entries: &[LogEntry], now: DateTime<Utc>, idle_threshold: Duration) -> Self {
        let Some(latest) = entries.last() else {
            return Self::unknown();
        };

        #[allow(clippy::cast_precision_loss)]
        let seconds = latest
            .timestamp
            .map_or(0.0, |ts| (now - ts).num_milliseconds().max(0) as f64 / 1000.0);

        let state = |status, tool_name| Self {
            status,
            tool_name,
            seconds_since_activity: seconds,
        };

        if seconds >= idle_threshold.as_secs_f64() {
            return state(ActivityStatus::Idle, None);
        }
        if latest.has_thinking() {
            return state(ActivityStatus::Thinking, None);
        }
        if let Some(ref tool) = latest.tool_name {
            return state(ActivityStatus::ToolUse, Some(tool.clone()));
        }
        if latest.tool_result.is_some() {
            return state(ActivityStatus::ToolUse, None);
        }
        state(ActivityStatus::Running, None)
    }
}

/// Truncate `text` to at most `max` characters on a char boundary.
#[must_use]
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_owned(),
        None => text.to_owned(),
    }
}
