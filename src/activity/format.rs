//! One-line rendering of conversation-log entries.

use serde_json::Value;

use crate::models::activity::LogEntry;

const THINKING_PREVIEW: usize = 100;
const RESULT_PREVIEW: usize = 80;
const RESPONSE_PREVIEW: usize = 200;
const USER_PREVIEW: usize = 100;
const COMMAND_PREVIEW: usize = 60;

/// Render `entry` as a single display line, or `None` if it has nothing
/// worth showing.
#[must_use]
pub fn format_entry(entry: &LogEntry) -> Option<String> {
    if let Some(thinking) = entry.thinking.as_deref().filter(|t| !t.is_empty()) {
        let first_line = thinking.lines().next().unwrap_or_default();
        return Some(format!("🤔 {}", preview(first_line, thinking, THINKING_PREVIEW)));
    }

    if let Some(ref tool) = entry.tool_name {
        return Some(format_tool_call(tool, entry.tool_input.as_ref()));
    }

    if let Some(ref result) = entry.tool_result {
        let icon = if entry.is_error { "✗" } else { "✓" };
        let first_line = result.lines().next().unwrap_or_default();
        return Some(format!("   {icon} {}", preview(first_line, result, RESULT_PREVIEW)));
    }

    if let Some(text) = entry.text_response.as_deref().filter(|t| !t.is_empty()) {
        return Some(format!("💬 {}", preview(text, text, RESPONSE_PREVIEW)));
    }

    if let Some(message) = entry.user_message.as_deref().filter(|m| !m.is_empty()) {
        return Some(format!("👤 {}", preview(message, message, USER_PREVIEW)));
    }

    None
}

/// Render every displayable entry, one per line.
#[must_use]
pub fn format_activity(entries: &[LogEntry]) -> String {
    entries
        .iter()
        .filter_map(format_entry)
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_tool_call(tool: &str, input: Option<&Value>) -> String {
    let field = |key: &str| {
        input
            .and_then(|i| i.get(key))
            .and_then(Value::as_str)
            .unwrap_or_default()
    };

    let description = field("description");
    if !description.is_empty() {
        return format!("🔧 {tool}: {description}");
    }

    match tool {
        "Read" | "Write" | "Edit" => format!("🔧 {tool}: {}", field("file_path")),
        "Glob" | "Grep" => format!("🔧 {tool}: {}", field("pattern")),
        "Bash" => {
            let command = field("command");
            format!("🔧 Bash: {}", preview(command, command, COMMAND_PREVIEW))
        }
        _ => format!("🔧 {tool}"),
    }
}

/// First `max` chars of `shown`, with an ellipsis when `full` is longer.
fn preview(shown: &str, full: &str, max: usize) -> String {
    let mut out: String = shown.chars().take(max).collect();
    if full.chars().count() > max {
        out.push_str("...");
    }
    out
}
