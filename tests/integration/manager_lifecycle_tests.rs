//! Start, stop, messaging and cleanup through `InstanceManager`.

use std::path::PathBuf;

use rushd::models::instance::{DisplayMode, InstanceStatus, SHORT_ID_LEN};
use rushd::orchestrator::manager::StartRequest;
use rushd::AppError;

use super::test_helpers::{test_manager, Sent};

fn named(name: &str, dir: &std::path::Path) -> StartRequest {
    StartRequest {
        name: Some(name.to_owned()),
        working_dir: Some(dir.to_path_buf()),
        ..StartRequest::default()
    }
}

#[tokio::test]
async fn start_alpha_then_list_shows_running() {
    let state = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let (manager, mux) = test_manager(state.path());

    let instance = manager.start(named("alpha", work.path())).await.unwrap();

    assert_eq!(instance.status, InstanceStatus::Starting);
    assert_eq!(instance.id.len(), SHORT_ID_LEN);
    assert_eq!(instance.name.as_deref(), Some("alpha"));
    assert_eq!(instance.working_dir, work.path().canonicalize().unwrap());

    let window = mux.window(&instance.window_ref).expect("window created");
    assert_eq!(window.name, "alpha");
    assert_eq!(
        window.working_dir,
        work.path().canonicalize().unwrap().to_string_lossy()
    );

    let listed = manager.list(false).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, instance.id);
    assert_eq!(listed[0].status, InstanceStatus::Running);
    assert!(listed[0].last_activity.is_some());
}

#[tokio::test]
async fn nonexistent_working_dir_is_kept_verbatim() {
    let state = tempfile::tempdir().unwrap();
    let (manager, _mux) = test_manager(state.path());
    let dir = PathBuf::from("/nonexistent/rushd/work");

    let instance = manager.start(named("alpha", &dir)).await.unwrap();
    assert_eq!(instance.working_dir, dir);
}

#[tokio::test]
async fn launch_command_carries_requested_flags() {
    let state = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let (manager, mux) = test_manager(state.path());

    let instance = manager
        .start(StartRequest {
            model: Some("opus".into()),
            initial_prompt: Some("fix \"flaky\" test".into()),
            auto_approve: false,
            ..named("beta", work.path())
        })
        .await
        .unwrap();

    let window = mux.window(&instance.window_ref).unwrap();
    assert_eq!(window.command, r#"claude --model opus -p "fix \"flaky\" test""#);
    assert_eq!(instance.model.as_deref(), Some("opus"));
    assert!(!instance.auto_approve);
}

#[tokio::test]
async fn unnamed_instance_window_uses_short_id() {
    let state = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let (manager, mux) = test_manager(state.path());

    let instance = manager
        .start(StartRequest {
            working_dir: Some(work.path().to_path_buf()),
            ..StartRequest::default()
        })
        .await
        .unwrap();

    assert!(instance.name.is_none());
    assert_eq!(mux.window(&instance.window_ref).unwrap().name, instance.id);
}

#[tokio::test]
async fn duplicate_name_fails_without_creating_window() {
    let state = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let (manager, mux) = test_manager(state.path());
    manager.start(named("alpha", work.path())).await.unwrap();
    let registry = manager.repo().path().to_path_buf();
    let before = std::fs::read(&registry).unwrap();

    let err = manager
        .start(named("alpha", work.path()))
        .await
        .expect_err("duplicate name must fail");

    assert!(matches!(err, AppError::AlreadyExists(_)), "got {err}");
    assert_eq!(mux.window_count(), 1);
    assert_eq!(std::fs::read(&registry).unwrap(), before);
}

#[tokio::test]
async fn window_creation_failure_propagates() {
    let state = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let (manager, mux) = test_manager(state.path());
    mux.fail_next_create();

    let err = manager
        .start(named("alpha", work.path()))
        .await
        .expect_err("create failure must surface");

    assert!(matches!(err, AppError::ProcessControl(_)), "got {err}");
    assert!(manager.list(true).await.unwrap().is_empty());
}

#[tokio::test]
async fn graceful_stop_interrupts_then_kills() {
    let state = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let (manager, mux) = test_manager(state.path());
    let instance = manager.start(named("alpha", work.path())).await.unwrap();

    assert!(manager.stop("alpha", false).await.unwrap());

    assert_eq!(mux.sent_to(&instance.window_ref), [Sent::Interrupt]);
    assert!(mux.window(&instance.window_ref).is_none());
    let stored = manager.get(&instance.id).await.unwrap().unwrap();
    assert_eq!(stored.status, InstanceStatus::Stopped);
}

#[tokio::test]
async fn forced_stop_skips_interrupt() {
    let state = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let (manager, mux) = test_manager(state.path());
    let instance = manager.start(named("alpha", work.path())).await.unwrap();

    assert!(manager.stop(&instance.id, true).await.unwrap());
    assert!(mux.sent_to(&instance.window_ref).is_empty());
    assert_eq!(mux.window_count(), 0);
}

#[tokio::test]
async fn stop_with_dead_window_still_succeeds() {
    let state = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let (manager, mux) = test_manager(state.path());
    let instance = manager.start(named("alpha", work.path())).await.unwrap();
    mux.close_window(&instance.window_ref);

    assert!(manager.stop("alpha", false).await.unwrap());

    let stored = manager.get("alpha").await.unwrap().unwrap();
    assert_eq!(stored.status, InstanceStatus::Stopped);
}

#[tokio::test]
async fn stop_unknown_identifier_is_false() {
    let state = tempfile::tempdir().unwrap();
    let (manager, _mux) = test_manager(state.path());
    assert!(!manager.stop("ghost", true).await.unwrap());
}

#[tokio::test]
async fn stop_all_counts_live_instances_only() {
    let state = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let (manager, _mux) = test_manager(state.path());
    for name in ["one", "two", "three"] {
        manager.start(named(name, work.path())).await.unwrap();
    }
    manager.stop("two", true).await.unwrap();

    assert_eq!(manager.stop_all(true).await.unwrap(), 2);
    assert!(manager.list(false).await.unwrap().is_empty());
    assert_eq!(manager.list(true).await.unwrap().len(), 3);
}

#[tokio::test]
async fn list_marks_vanished_windows_stopped() {
    let state = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let (manager, mux) = test_manager(state.path());
    let alpha = manager.start(named("alpha", work.path())).await.unwrap();
    manager.start(named("beta", work.path())).await.unwrap();
    mux.close_window(&alpha.window_ref);

    let live = manager.list(false).await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].name.as_deref(), Some("beta"));
    assert_eq!(
        manager.get("alpha").await.unwrap().unwrap().status,
        InstanceStatus::Stopped
    );
}

#[tokio::test]
async fn messages_press_enter_and_keys_do_not() {
    let state = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let (manager, mux) = test_manager(state.path());
    let instance = manager.start(named("alpha", work.path())).await.unwrap();

    assert!(manager.send_message("alpha", "run the tests").await.unwrap());
    assert!(manager.send_key("alpha", "Escape").await.unwrap());
    assert!(!manager.send_message("ghost", "hello").await.unwrap());
    assert!(!manager.send_key("ghost", "Up").await.unwrap());

    assert_eq!(
        mux.sent_to(&instance.window_ref),
        [
            Sent::Text {
                text: "run the tests".into(),
                enter: true
            },
            Sent::Key("Escape".into()),
        ]
    );
}

#[tokio::test]
async fn attach_selects_instance_window() {
    let state = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let (manager, mux) = test_manager(state.path());
    let instance = manager.start(named("alpha", work.path())).await.unwrap();

    assert!(manager.attach("alpha").await.unwrap());
    assert!(!manager.attach("ghost").await.unwrap());
    assert_eq!(mux.attached(), [Some(instance.window_ref)]);
}

#[tokio::test]
async fn remove_forgets_record_but_keeps_window() {
    let state = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let (manager, mux) = test_manager(state.path());
    manager.start(named("alpha", work.path())).await.unwrap();

    assert!(manager.remove("alpha").await.unwrap());
    assert!(!manager.remove("alpha").await.unwrap());
    assert!(manager.get("alpha").await.unwrap().is_none());
    assert_eq!(mux.window_count(), 1);
}

#[tokio::test]
async fn cleanup_stops_everything_and_clears_registry() {
    let state = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let (manager, mux) = test_manager(state.path());
    manager.start(named("alpha", work.path())).await.unwrap();
    manager.start(named("beta", work.path())).await.unwrap();

    assert_eq!(manager.cleanup(true).await.unwrap(), 2);
    assert!(!mux.session_alive());
    assert!(manager.list(true).await.unwrap().is_empty());
}

#[tokio::test]
async fn display_mode_round_trips_and_defaults() {
    let state = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let (manager, _mux) = test_manager(state.path());
    manager.start(named("alpha", work.path())).await.unwrap();

    assert_eq!(manager.get_display_mode("alpha").await.unwrap(), DisplayMode::Activity);
    assert!(manager.set_display_mode("alpha", DisplayMode::Raw).await.unwrap());
    assert_eq!(manager.get_display_mode("alpha").await.unwrap(), DisplayMode::Raw);

    assert!(!manager.set_display_mode("ghost", DisplayMode::Raw).await.unwrap());
    assert!(matches!(
        manager.get_display_mode("ghost").await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn capture_output_reads_pane() {
    let state = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let (manager, mux) = test_manager(state.path());
    let instance = manager.start(named("alpha", work.path())).await.unwrap();
    mux.script_captures(&instance.window_ref, &["> ready"]);

    assert_eq!(manager.capture_output("alpha", 100).await.unwrap(), "> ready");
    assert!(matches!(
        manager.capture_output("ghost", 100).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn primary_running_requires_live_window_and_process() {
    let state = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let (manager, mux) = test_manager(state.path());
    let primary = manager.start(named("primary", work.path())).await.unwrap();

    // No resolvable pid: window liveness is enough.
    assert!(manager.is_primary_running("primary").await.unwrap());

    mux.set_pid(&primary.window_ref, Some(std::process::id()));
    assert!(manager.is_primary_running("primary").await.unwrap());

    mux.close_window(&primary.window_ref);
    assert!(!manager.is_primary_running("primary").await.unwrap());
    assert!(!manager.is_primary_running("absent").await.unwrap());
}

#[tokio::test]
async fn stopped_record_leaves_reused_window_alone() {
    let state = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let (manager, mux) = test_manager(state.path());
    let alpha = manager.start(named("alpha", work.path())).await.unwrap();
    assert!(manager.stop("alpha", true).await.unwrap());

    // The freed window index goes to the next instance.
    let beta = manager.start(named("beta", work.path())).await.unwrap();
    assert_eq!(beta.window_ref, alpha.window_ref);

    assert!(manager.stop(&alpha.id, false).await.unwrap());
    assert!(!manager.send_message(&alpha.id, "hello").await.unwrap());
    assert!(!manager.send_key(&alpha.id, "Up").await.unwrap());
    assert!(!manager.attach(&alpha.id).await.unwrap());

    assert!(mux.window(&beta.window_ref).is_some());
    assert!(mux.sent_to(&beta.window_ref).is_empty());
    assert!(mux.attached().is_empty());
    assert_eq!(
        manager.get("beta").await.unwrap().unwrap().status,
        InstanceStatus::Running
    );
}
