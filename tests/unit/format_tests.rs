use serde_json::json;

use rushd::activity::format::{format_activity, format_entry};
use rushd::models::activity::{EntryKind, LogEntry};

fn entry() -> LogEntry {
    LogEntry::new(EntryKind::Assistant, None, String::new())
}

#[test]
fn thinking_shows_first_line_with_ellipsis() {
    let mut e = entry();
    e.thinking = Some(format!("first line\n{}", "more ".repeat(40)));
    assert_eq!(format_entry(&e).as_deref(), Some("🤔 first line..."));
}

#[test]
fn tool_call_prefers_description() {
    let mut e = entry();
    e.tool_name = Some("Bash".into());
    e.tool_input = Some(json!({"command": "cargo test", "description": "Run the test suite"}));
    assert_eq!(format_entry(&e).as_deref(), Some("🔧 Bash: Run the test suite"));
}

#[test]
fn tool_call_previews_known_inputs() {
    let cases = [
        ("Read", json!({"file_path": "/src/main.rs"}), "🔧 Read: /src/main.rs"),
        ("Edit", json!({"file_path": "/src/lib.rs"}), "🔧 Edit: /src/lib.rs"),
        ("Grep", json!({"pattern": "fn main"}), "🔧 Grep: fn main"),
        ("Glob", json!({"pattern": "**/*.rs"}), "🔧 Glob: **/*.rs"),
        ("Bash", json!({"command": "ls"}), "🔧 Bash: ls"),
        ("WebFetch", json!({"url": "https://example.com"}), "🔧 WebFetch"),
    ];
    for (tool, input, expected) in cases {
        let mut e = entry();
        e.tool_name = Some(tool.into());
        e.tool_input = Some(input);
        assert_eq!(format_entry(&e).as_deref(), Some(expected));
    }
}

#[test]
fn long_bash_command_is_cut() {
    let mut e = entry();
    e.tool_name = Some("Bash".into());
    e.tool_input = Some(json!({"command": "x".repeat(100)}));
    let line = format_entry(&e).unwrap();
    assert_eq!(line, format!("🔧 Bash: {}...", "x".repeat(60)));
}

#[test]
fn tool_results_carry_status_icon() {
    let mut ok = entry();
    ok.kind = EntryKind::User;
    ok.tool_result = Some("3 passed\nsummary".into());
    assert_eq!(format_entry(&ok).as_deref(), Some("   ✓ 3 passed"));

    let mut failed = ok.clone();
    failed.is_error = true;
    failed.tool_result = Some("boom".into());
    assert_eq!(format_entry(&failed).as_deref(), Some("   ✗ boom"));
}

#[test]
fn text_and_user_messages_render() {
    let mut reply = entry();
    reply.text_response = Some("All done.".into());
    assert_eq!(format_entry(&reply).as_deref(), Some("💬 All done."));

    let mut prompt = LogEntry::new(EntryKind::User, None, String::new());
    prompt.user_message = Some("add logging".into());
    assert_eq!(format_entry(&prompt).as_deref(), Some("👤 add logging"));
}

#[test]
fn empty_entries_are_skipped() {
    let mut reply = entry();
    reply.text_response = Some("ok".into());
    let rendered = format_activity(&[entry(), reply, entry()]);
    assert_eq!(rendered, "💬 ok");
    assert!(format_entry(&entry()).is_none());
}
