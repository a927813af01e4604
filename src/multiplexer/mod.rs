//! Terminal multiplexer control surface.
//!
//! The [`Multiplexer`] trait is the narrow seam between the orchestrator
//! and the external multiplexer binary. Apart from window creation, every
//! operation reports failure as `false`, `None` or an empty value; callers
//! decide whether that is user-visible.

pub mod tmux;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::Result;

/// Boxed future returned by [`Multiplexer`] methods.
pub type MuxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// References returned when a window is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowHandle {
    /// Window target (`session:index`).
    pub window_ref: String,
    /// Pane id (`%N`).
    pub pane_ref: String,
}

/// One row of a window listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    /// Window index within the session.
    pub index: String,
    /// Window name.
    pub name: String,
    /// Active pane id.
    pub pane_ref: String,
    /// Command currently running in the pane.
    pub command: String,
    /// Fully qualified target (`session:index`).
    pub target: String,
}

/// Control surface of a terminal multiplexer hosting instance windows.
pub trait Multiplexer: Send + Sync {
    /// Name of the managed session.
    fn session_name(&self) -> &str;

    /// Whether the managed session exists.
    fn session_exists(&self) -> MuxFuture<'_, bool>;

    /// Create the managed session if it is absent. Idempotent.
    fn ensure_session(&self) -> MuxFuture<'_, bool>;

    /// Create a window named `name` running `command` in `working_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ProcessControl`](crate::AppError::ProcessControl)
    /// if the multiplexer rejects the request.
    fn create_window(
        &self,
        name: &str,
        command: &str,
        working_dir: &str,
    ) -> MuxFuture<'_, Result<WindowHandle>>;

    /// Whether `window_ref` still exists.
    fn window_exists(&self, window_ref: &str) -> MuxFuture<'_, bool>;

    /// Kill the window.
    fn kill_window(&self, window_ref: &str) -> MuxFuture<'_, bool>;

    /// Type `text` literally, optionally followed by a separate Enter after
    /// a settling delay.
    fn send_keys(&self, window_ref: &str, text: &str, with_enter: bool) -> MuxFuture<'_, bool>;

    /// Send a named key such as `Up`, `Escape` or `C-d`.
    fn send_key(&self, window_ref: &str, key: &str) -> MuxFuture<'_, bool>;

    /// Send Ctrl-C.
    fn send_interrupt(&self, window_ref: &str) -> MuxFuture<'_, bool>;

    /// Visible contents plus up to `max_lines` of scrollback.
    fn capture_pane(&self, window_ref: &str, max_lines: usize) -> MuxFuture<'_, String>;

    /// Focus a window.
    fn select_window(&self, window_ref: &str) -> MuxFuture<'_, bool>;

    /// Hand the terminal to the multiplexer until the user detaches.
    fn attach_session(&self, window_ref: Option<&str>) -> MuxFuture<'_, bool>;

    /// Enumerate the managed session's windows.
    fn list_windows(&self) -> MuxFuture<'_, Vec<WindowInfo>>;

    /// Process id backing the window's pane.
    fn pane_pid(&self, window_ref: &str) -> MuxFuture<'_, Option<u32>>;

    /// Tear down the managed session.
    fn kill_session(&self) -> MuxFuture<'_, bool>;
}

/// Polling parameters for [`wait_for_idle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleWait {
    /// Give up after this long.
    pub timeout: Duration,
    /// Delay between captures.
    pub poll_interval: Duration,
    /// Consecutive unchanged captures required.
    pub stable_count: u32,
    /// Scrollback lines captured per poll.
    pub capture_lines: usize,
}

impl Default for IdleWait {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            stable_count: 3,
            capture_lines: 500,
        }
    }
}

/// Wait until a window's pane output stops changing.
///
/// Captures the pane every `poll_interval` and hashes it; returns `true`
/// once the hash has repeated `stable_count` times in a row, `false` on
/// timeout or cancellation.
pub async fn wait_for_idle(
    mux: &dyn Multiplexer,
    window_ref: &str,
    wait: IdleWait,
    cancel: &CancellationToken,
) -> bool {
    let started = Instant::now();
    let mut last_hash: Option<[u8; 32]> = None;
    let mut stable = 0_u32;

    while started.elapsed() < wait.timeout {
        let content = mux.capture_pane(window_ref, wait.capture_lines).await;
        let hash: [u8; 32] = Sha256::digest(content.as_bytes()).into();

        if last_hash == Some(hash) {
            stable += 1;
            if stable >= wait.stable_count {
                debug!(window = window_ref, polls = stable, "pane output settled");
                return true;
            }
        } else {
            stable = 0;
            last_hash = Some(hash);
        }

        tokio::select! {
            () = cancel.cancelled() => return false,
            () = tokio::time::sleep(wait.poll_interval) => {}
        }
    }

    debug!(window = window_ref, "pane output still changing at timeout");
    false
}

/// Whether a process with `pid` is alive.
#[cfg(unix)]
#[must_use]
pub fn process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Whether a process with `pid` is alive.
#[cfg(not(unix))]
#[must_use]
pub fn process_alive(_pid: u32) -> bool {
    true
}
