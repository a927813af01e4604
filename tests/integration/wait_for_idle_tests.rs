//! Output-stability waiting.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use rushd::multiplexer::IdleWait;
use rushd::orchestrator::manager::StartRequest;
use rushd::AppError;

use super::test_helpers::test_manager;

fn quick(timeout_ms: u64) -> IdleWait {
    IdleWait {
        timeout: Duration::from_millis(timeout_ms),
        poll_interval: Duration::from_millis(10),
        stable_count: 3,
        capture_lines: 100,
    }
}

async fn started() -> (
    tempfile::TempDir,
    std::sync::Arc<rushd::orchestrator::manager::InstanceManager>,
    std::sync::Arc<super::test_helpers::FakeMultiplexer>,
    String,
) {
    let state = tempfile::tempdir().unwrap();
    let (manager, mux) = test_manager(state.path());
    let instance = manager
        .start(StartRequest {
            name: Some("alpha".into()),
            working_dir: Some(state.path().to_path_buf()),
            ..StartRequest::default()
        })
        .await
        .unwrap();
    (state, manager, mux, instance.window_ref)
}

#[tokio::test]
async fn settles_once_output_stops_changing() {
    let (_state, manager, mux, window) = started().await;
    mux.script_captures(&window, &["compiling", "compiling.", "done", "done"]);

    let idle = manager
        .wait_for_idle("alpha", quick(2_000), &CancellationToken::new())
        .await
        .unwrap();
    assert!(idle);
}

#[tokio::test]
async fn times_out_while_output_keeps_changing() {
    let (_state, manager, mux, window) = started().await;
    mux.keep_changing(&window);

    let idle = manager
        .wait_for_idle("alpha", quick(150), &CancellationToken::new())
        .await
        .unwrap();
    assert!(!idle);
}

#[tokio::test]
async fn cancellation_ends_the_wait() {
    let (_state, manager, mux, window) = started().await;
    mux.keep_changing(&window);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let idle = manager
        .wait_for_idle("alpha", quick(10_000), &cancel)
        .await
        .unwrap();
    assert!(!idle);
}

#[tokio::test]
async fn unknown_instance_is_not_found() {
    let (_state, manager, _mux, _window) = started().await;
    let result = manager
        .wait_for_idle("ghost", quick(100), &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}
