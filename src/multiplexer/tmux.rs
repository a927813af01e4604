//! [`Multiplexer`] backed by the `tmux` binary.
//!
//! Each operation is one `tmux` invocation whose exit status decides the
//! result. Stdout is captured and trimmed; stderr is only logged.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::{AppError, Result};

use super::{Multiplexer, MuxFuture, WindowHandle, WindowInfo};

const LIST_FORMAT: &str = "#{window_index}|#{window_name}|#{pane_id}|#{pane_current_command}";
const CREATE_FORMAT: &str = "#{window_index}:#{pane_id}";
const PLACEHOLDER_WINDOW: &str = "placeholder";

/// Output of one `tmux` invocation.
#[derive(Debug)]
struct TmuxOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

/// Drives a single tmux session through the `tmux` CLI.
#[derive(Debug, Clone)]
pub struct TmuxController {
    binary: String,
    session_name: String,
    enter_delay: Duration,
}

impl TmuxController {
    /// Controller for `session_name` using `binary`.
    ///
    /// `enter_delay` separates typed text from the Enter that submits it.
    #[must_use]
    pub fn new(binary: &str, session_name: &str, enter_delay: Duration) -> Self {
        Self {
            binary: binary.to_owned(),
            session_name: session_name.to_owned(),
            enter_delay,
        }
    }

    async fn run(&self, args: &[&str]) -> TmuxOutput {
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await;

        match output {
            Ok(out) => {
                let result = TmuxOutput {
                    success: out.status.success(),
                    stdout: String::from_utf8_lossy(&out.stdout).trim().to_owned(),
                    stderr: String::from_utf8_lossy(&out.stderr).trim().to_owned(),
                };
                if !result.success {
                    debug!(
                        command = args.first().copied().unwrap_or_default(),
                        stderr = %result.stderr,
                        "tmux command failed"
                    );
                }
                result
            }
            Err(err) => {
                warn!(binary = %self.binary, %err, "failed to run tmux");
                TmuxOutput {
                    success: false,
                    stdout: String::new(),
                    stderr: err.to_string(),
                }
            }
        }
    }

    async fn ok(&self, args: &[&str]) -> bool {
        self.run(args).await.success
    }

    async fn has_session(&self) -> bool {
        self.ok(&["has-session", "-t", &self.session_name]).await
    }

    async fn ensure(&self) -> bool {
        if self.has_session().await {
            return true;
        }
        debug!(session = %self.session_name, "creating tmux session");
        self.ok(&[
            "new-session",
            "-d",
            "-s",
            &self.session_name,
            "-n",
            PLACEHOLDER_WINDOW,
        ])
        .await
    }
}

impl Multiplexer for TmuxController {
    fn session_name(&self) -> &str {
        &self.session_name
    }

    fn session_exists(&self) -> MuxFuture<'_, bool> {
        Box::pin(self.has_session())
    }

    fn ensure_session(&self) -> MuxFuture<'_, bool> {
        Box::pin(self.ensure())
    }

    fn create_window(
        &self,
        name: &str,
        command: &str,
        working_dir: &str,
    ) -> MuxFuture<'_, Result<WindowHandle>> {
        let name = name.to_owned();
        let command = command.to_owned();
        let working_dir = working_dir.to_owned();
        Box::pin(async move {
            self.ensure().await;

            let mut args = vec![
                "new-window",
                "-t",
                self.session_name.as_str(),
                "-n",
                name.as_str(),
                "-P",
                "-F",
                CREATE_FORMAT,
            ];
            if !working_dir.is_empty() {
                args.extend(["-c", working_dir.as_str()]);
            }
            args.push(command.as_str());

            let out = self.run(&args).await;
            if !out.success {
                return Err(AppError::ProcessControl(format!(
                    "failed to create tmux window '{name}': {}",
                    out.stderr
                )));
            }
            Ok(parse_create_output(&self.session_name, &out.stdout))
        })
    }

    fn window_exists(&self, window_ref: &str) -> MuxFuture<'_, bool> {
        let target = window_ref.to_owned();
        Box::pin(async move {
            self.ok(&["display-message", "-t", &target, "-p", "#{window_index}"])
                .await
        })
    }

    fn kill_window(&self, window_ref: &str) -> MuxFuture<'_, bool> {
        let target = window_ref.to_owned();
        Box::pin(async move { self.ok(&["kill-window", "-t", &target]).await })
    }

    fn send_keys(&self, window_ref: &str, text: &str, with_enter: bool) -> MuxFuture<'_, bool> {
        let target = window_ref.to_owned();
        let text = text.to_owned();
        Box::pin(async move {
            if !self.ok(&["send-keys", "-t", &target, "-l", &text]).await {
                return false;
            }
            if !with_enter {
                return true;
            }
            tokio::time::sleep(self.enter_delay).await;
            self.ok(&["send-keys", "-t", &target, "Enter"]).await
        })
    }

    fn send_key(&self, window_ref: &str, key: &str) -> MuxFuture<'_, bool> {
        let target = window_ref.to_owned();
        let key = key.to_owned();
        Box::pin(async move { self.ok(&["send-keys", "-t", &target, &key]).await })
    }

    fn send_interrupt(&self, window_ref: &str) -> MuxFuture<'_, bool> {
        self.send_key(window_ref, "C-c")
    }

    fn capture_pane(&self, window_ref: &str, max_lines: usize) -> MuxFuture<'_, String> {
        let target = window_ref.to_owned();
        Box::pin(async move {
            let start = format!("-{max_lines}");
            let out = self
                .run(&["capture-pane", "-t", &target, "-p", "-S", &start])
                .await;
            if out.success {
                out.stdout
            } else {
                String::new()
            }
        })
    }

    fn select_window(&self, window_ref: &str) -> MuxFuture<'_, bool> {
        let target = window_ref.to_owned();
        Box::pin(async move { self.ok(&["select-window", "-t", &target]).await })
    }

    fn attach_session(&self, window_ref: Option<&str>) -> MuxFuture<'_, bool> {
        let target = window_ref.map(str::to_owned);
        Box::pin(async move {
            if let Some(ref target) = target {
                self.ok(&["select-window", "-t", target]).await;
            }

            let verb = if std::env::var_os("TMUX").is_some() {
                "switch-client"
            } else {
                "attach-session"
            };
            // Inherit the terminal so the user lands inside tmux.
            let status = Command::new(&self.binary)
                .args([verb, "-t", self.session_name.as_str()])
                .status()
                .await;
            match status {
                Ok(status) => status.success(),
                Err(err) => {
                    warn!(verb, %err, "failed to hand terminal to tmux");
                    false
                }
            }
        })
    }

    fn list_windows(&self) -> MuxFuture<'_, Vec<WindowInfo>> {
        Box::pin(async move {
            if !self.has_session().await {
                return Vec::new();
            }
            let out = self
                .run(&["list-windows", "-t", &self.session_name, "-F", LIST_FORMAT])
                .await;
            if !out.success {
                return Vec::new();
            }
            parse_window_list(&self.session_name, &out.stdout)
        })
    }

    fn pane_pid(&self, window_ref: &str) -> MuxFuture<'_, Option<u32>> {
        let target = window_ref.to_owned();
        Box::pin(async move {
            let out = self
                .run(&["display-message", "-t", &target, "-p", "#{pane_pid}"])
                .await;
            if !out.success {
                return None;
            }
            out.stdout.parse().ok()
        })
    }

    fn kill_session(&self) -> MuxFuture<'_, bool> {
        Box::pin(async move { self.ok(&["kill-session", "-t", &self.session_name]).await })
    }
}

/// Parse `new-window -P` output of the form `index:%pane`.
#[must_use]
pub fn parse_create_output(session_name: &str, output: &str) -> WindowHandle {
    let mut parts = output.splitn(2, ':');
    let index = parts.next().filter(|s| !s.is_empty()).unwrap_or("0");
    let pane_ref = parts.next().unwrap_or_default();
    WindowHandle {
        window_ref: format!("{session_name}:{index}"),
        pane_ref: pane_ref.to_owned(),
    }
}

/// Parse `list-windows` output in the `index|name|pane|command` format.
///
/// Lines with fewer than four fields are skipped.
#[must_use]
pub fn parse_window_list(session_name: &str, output: &str) -> Vec<WindowInfo> {
    output
        .lines()
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let parts: Vec<&str> = line.splitn(4, '|').collect();
            let [index, name, pane_ref, command] = parts.as_slice() else {
                return None;
            };
            Some(WindowInfo {
                index: (*index).to_owned(),
                name: (*name).to_owned(),
                pane_ref: (*pane_ref).to_owned(),
                command: (*command).to_owned(),
                target: format!("{session_name}:{index}"),
            })
        })
        .collect()
}
