//! Reader for the agent's append-only conversation logs.
//!
//! Logs live under `{log_root}/{encoded working dir}/{session uuid}.jsonl`,
//! where the working directory is encoded by replacing `/` with `-`. The
//! most recently modified UUID-named file is the current session.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::models::activity::{
    truncate_chars, ActivityState, EntryKind, LogEntry, TEXT_RESPONSE_MAX_CHARS,
    THINKING_MAX_CHARS, TOOL_RESULT_MAX_CHARS,
};

/// Record types that carry no conversation content.
const HOUSEKEEPING_TYPES: &[&str] = &["file-history-snapshot", "summary"];

/// Entries inspected by [`ConversationLogReader::detect_activity_state`].
const ACTIVITY_WINDOW: usize = 5;

/// Reads the conversation logs belonging to one working directory.
#[derive(Debug, Clone)]
pub struct ConversationLogReader {
    project_dir: PathBuf,
}

impl ConversationLogReader {
    /// Reader for sessions started in `working_dir`.
    #[must_use]
    pub fn new(log_root: &Path, working_dir: &Path) -> Self {
        Self {
            project_dir: log_root.join(encode_project_dir(working_dir)),
        }
    }

    /// Directory holding this working directory's session logs.
    #[must_use]
    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Most recently modified session log, if any.
    #[must_use]
    pub fn find_latest_session(&self) -> Option<PathBuf> {
        let entries = fs::read_dir(&self.project_dir).ok()?;

        entries
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| is_session_log(path))
            .filter_map(|path| {
                let modified = fs::metadata(&path).and_then(|m| m.modified()).ok()?;
                Some((modified, path))
            })
            .max_by_key(|(modified, _)| *modified)
            .map(|(_, path)| path)
    }

    /// UUID of the current session.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.find_latest_session()
            .and_then(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
    }

    /// Parse the last `last_n` lines of the current session log.
    ///
    /// Returns an empty list when no session log exists.
    #[must_use]
    pub fn read_entries(&self, last_n: usize) -> Vec<LogEntry> {
        match self.find_latest_session() {
            Some(path) => read_log_tail(&path, last_n),
            None => Vec::new(),
        }
    }

    /// Classify the session's current activity from its latest entries.
    #[must_use]
    pub fn detect_activity_state(&self, idle_threshold: Duration) -> ActivityState {
        let entries = self.read_entries(ACTIVITY_WINDOW);
        ActivityState::classify(&entries, Utc::now(), idle_threshold)
    }
}

/// Directory name a working directory's logs are stored under.
#[must_use]
pub fn encode_project_dir(working_dir: &Path) -> String {
    working_dir.to_string_lossy().replace('/', "-")
}

fn is_session_log(path: &Path) -> bool {
    if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
        return false;
    }
    path.file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|stem| stem.len() == 36 && Uuid::parse_str(stem).is_ok())
}

/// Parse the last `last_n` lines of the log at `path`.
///
/// Blank lines, lines that are not UTF-8 or not JSON, and housekeeping
/// records are skipped.
#[must_use]
pub fn read_log_tail(path: &Path, last_n: usize) -> Vec<LogEntry> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) => {
            debug!(path = %path.display(), %err, "conversation log unreadable");
            return Vec::new();
        }
    };

    let body = raw.strip_suffix(b"\n").unwrap_or(&raw);
    let lines: Vec<&[u8]> = body.split(|b| *b == b'\n').collect();
    let start = lines.len().saturating_sub(last_n);

    lines[start..]
        .iter()
        .filter_map(|bytes| match std::str::from_utf8(bytes) {
            Ok(line) => Some(line.trim()),
            Err(err) => {
                debug!(path = %path.display(), %err, "skipping non-UTF-8 log line");
                None
            }
        })
        .filter(|line| !line.is_empty())
        .filter_map(|line| match serde_json::from_str::<Value>(line) {
            Ok(record) => parse_entry(&record),
            Err(err) => {
                debug!(path = %path.display(), %err, "skipping malformed log line");
                None
            }
        })
        .collect()
}

/// Normalize one raw log record. Housekeeping records yield `None`.
#[must_use]
pub fn parse_entry(record: &Value) -> Option<LogEntry> {
    let raw_type = record.get("type").and_then(Value::as_str).unwrap_or("unknown");
    if HOUSEKEEPING_TYPES.contains(&raw_type) {
        return None;
    }

    let timestamp = record
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.with_timezone(&Utc));
    let uuid = str_field(record, "uuid").unwrap_or_default();

    let mut entry = LogEntry::new(EntryKind::from_raw(raw_type), timestamp, uuid);
    let content = record.get("message").and_then(|m| m.get("content"));

    match raw_type {
        "user" => parse_user(&mut entry, record, content),
        "assistant" => parse_assistant(&mut entry, content),
        _ => {}
    }
    Some(entry)
}

fn parse_user(entry: &mut LogEntry, record: &Value, content: Option<&Value>) {
    match content {
        Some(Value::String(text)) => entry.user_message = Some(text.clone()),
        Some(Value::Array(items)) => {
            for item in items.iter().filter(|i| item_type(i) == Some("tool_result")) {
                let result = match item.get("content") {
                    Some(Value::String(text)) => text.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                entry.tool_result = Some(truncate_chars(&result, TOOL_RESULT_MAX_CHARS));
                entry.is_error = item.get("is_error").and_then(Value::as_bool).unwrap_or(false);

                // Shell tools report richer output alongside the message.
                if let Some(detail) = record.get("toolUseResult") {
                    let stderr = str_field(detail, "stderr").unwrap_or_default();
                    let stdout = str_field(detail, "stdout").unwrap_or_default();
                    if !stderr.is_empty() {
                        entry.is_error = true;
                        entry.tool_result = Some(truncate_chars(&stderr, TOOL_RESULT_MAX_CHARS));
                    } else if !stdout.is_empty() {
                        entry.tool_result = Some(truncate_chars(&stdout, TOOL_RESULT_MAX_CHARS));
                    }
                }
            }
        }
        _ => {}
    }
}

fn parse_assistant(entry: &mut LogEntry, content: Option<&Value>) {
    let Some(Value::Array(items)) = content else {
        return;
    };
    for item in items {
        match item_type(item) {
            Some("thinking") => {
                let text = str_field(item, "thinking").unwrap_or_default();
                entry.thinking = Some(truncate_chars(&text, THINKING_MAX_CHARS));
            }
            Some("tool_use") => {
                entry.tool_name = str_field(item, "name");
                entry.tool_input = item.get("input").cloned();
            }
            Some("text") => {
                let text = str_field(item, "text").unwrap_or_default();
                entry.text_response = Some(truncate_chars(&text, TEXT_RESPONSE_MAX_CHARS));
            }
            _ => {}
        }
    }
}

fn item_type(item: &Value) -> Option<&str> {
    item.get("type").and_then(Value::as_str)
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_owned)
}

