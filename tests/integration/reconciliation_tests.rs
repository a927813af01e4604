//! Status refresh, session discovery and pane verification.

use chrono::{Duration, Utc};
use serde_json::json;

use rushd::models::activity::ActivityStatus;
use rushd::models::instance::{Instance, InstanceStatus};
use rushd::orchestrator::manager::{InstanceManager, StartRequest, StatusTransition};
use rushd::AppError;

use super::test_helpers::{test_manager, write_conversation_log};

const SESSION_UUID: &str = "0b6f7a52-94d4-4c1e-9d3b-5f0e2a7c1d88";

async fn start(manager: &InstanceManager, name: &str, dir: &std::path::Path) -> Instance {
    manager
        .start(StartRequest {
            name: Some(name.to_owned()),
            working_dir: Some(dir.to_path_buf()),
            ..StartRequest::default()
        })
        .await
        .unwrap()
}

fn thinking_record(seconds_ago: i64) -> serde_json::Value {
    json!({
        "type": "assistant",
        "uuid": "e1",
        "timestamp": (Utc::now() - Duration::seconds(seconds_ago)).to_rfc3339(),
        "message": {"content": [{"type": "thinking", "thinking": "planning the refactor"}]}
    })
}

#[tokio::test]
async fn refresh_without_changes_reports_nothing() {
    let state = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let (manager, _mux) = test_manager(state.path());
    start(&manager, "alpha", work.path()).await;

    // No conversation log: the detector reports unknown, stored as running.
    assert!(manager.refresh_statuses().await.unwrap().is_empty());
    assert!(manager.refresh_statuses().await.unwrap().is_empty());
    assert_eq!(
        manager.get("alpha").await.unwrap().unwrap().status,
        InstanceStatus::Running
    );
}

#[tokio::test]
async fn refresh_marks_closed_window_stopped() {
    let state = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let (manager, mux) = test_manager(state.path());
    let alpha = start(&manager, "alpha", work.path()).await;
    mux.close_window(&alpha.window_ref);

    let transitions = manager.refresh_statuses().await.unwrap();
    assert_eq!(
        transitions,
        [StatusTransition {
            instance_id: alpha.id.clone(),
            from: InstanceStatus::Running,
            to: InstanceStatus::Stopped,
        }]
    );

    // Stopped records are out of scope for later passes.
    assert!(manager.refresh_statuses().await.unwrap().is_empty());
}

#[tokio::test]
async fn refresh_adopts_log_activity() {
    let state = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let (manager, _mux) = test_manager(state.path());
    let alpha = start(&manager, "alpha", work.path()).await;
    write_conversation_log(
        state.path(),
        &alpha.working_dir,
        SESSION_UUID,
        &[thinking_record(1)],
    );

    let transitions = manager.refresh_statuses().await.unwrap();
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].to, InstanceStatus::Thinking);

    let state = manager.get_activity_state("alpha").await.unwrap();
    assert_eq!(state.status, ActivityStatus::Thinking);
}

#[tokio::test]
async fn stale_log_counts_as_idle() {
    let state = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let (manager, _mux) = test_manager(state.path());
    let alpha = start(&manager, "alpha", work.path()).await;
    write_conversation_log(
        state.path(),
        &alpha.working_dir,
        SESSION_UUID,
        &[thinking_record(600)],
    );

    manager.refresh_statuses().await.unwrap();
    assert_eq!(
        manager.get("alpha").await.unwrap().unwrap().status,
        InstanceStatus::Idle
    );
}

#[tokio::test]
async fn get_activity_records_session_ref_once() {
    let state = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let (manager, _mux) = test_manager(state.path());
    let alpha = start(&manager, "alpha", work.path()).await;
    assert!(alpha.session_ref.is_none());

    assert!(manager.get_activity("alpha", 10).await.unwrap().is_empty());
    assert!(manager.get("alpha").await.unwrap().unwrap().session_ref.is_none());

    write_conversation_log(
        state.path(),
        &alpha.working_dir,
        SESSION_UUID,
        &[
            json!({"type": "user", "uuid": "u1", "message": {"content": "add a test"}}),
            thinking_record(1),
        ],
    );

    let entries = manager.get_activity("alpha", 10).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].user_message.as_deref(), Some("add a test"));
    assert_eq!(
        manager.get("alpha").await.unwrap().unwrap().session_ref.as_deref(),
        Some(SESSION_UUID)
    );

    assert!(matches!(
        manager.get_activity("ghost", 10).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn verify_panes_corrects_drifted_references() {
    let state = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let (manager, mux) = test_manager(state.path());
    let alpha = start(&manager, "alpha", work.path()).await;
    let beta = start(&manager, "beta", work.path()).await;
    mux.move_pane(&alpha.window_ref, "%42");

    assert_eq!(manager.verify_panes().await.unwrap(), 1);
    assert_eq!(manager.get("alpha").await.unwrap().unwrap().pane_ref, "%42");
    assert_eq!(manager.get("beta").await.unwrap().unwrap().pane_ref, beta.pane_ref);

    assert_eq!(manager.verify_panes().await.unwrap(), 0);
}
