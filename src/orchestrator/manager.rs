//! Instance lifecycle orchestration.
//!
//! [`InstanceManager`] composes the registry, the notification store, a
//! [`Multiplexer`] and the conversation-log reader into the operations
//! exposed to the CLI and other front ends. It is the boundary that decides
//! whether a collaborator's `false` becomes a user-visible error or a
//! silent transition to `stopped`.
//!
//! Registry, notification and conversation-log access is synchronous file
//! I/O behind advisory locks, so every such call hops onto the blocking
//! pool instead of parking a runtime worker.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::activity::ConversationLogReader;
use crate::config::GlobalConfig;
use crate::models::activity::{ActivityState, LogEntry};
use crate::models::instance::{
    DisplayMode, Instance, InstanceIds, InstanceStatus, InstanceUpdate, NewInstance,
};
use crate::models::notification::{Notification, NotificationFilter, NotificationStatus};
use crate::multiplexer::tmux::TmuxController;
use crate::multiplexer::{self, IdleWait, Multiplexer};
use crate::persistence::instance_repo::InstanceRepo;
use crate::persistence::notification_repo::NotificationRepo;
use crate::{AppError, Result};

use super::launch::{build_agent_command, LaunchOptions};

/// Tunables the manager needs beyond its collaborators.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Agent executable launched in each window.
    pub agent_binary: String,
    /// Root of the agent's conversation logs.
    pub log_root: PathBuf,
    /// Wait between interrupt and kill on a graceful stop.
    pub stop_grace: Duration,
    /// Log silence after which an instance counts as idle.
    pub idle_threshold: Duration,
}

impl ManagerSettings {
    /// Settings taken from the global configuration.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            agent_binary: config.agent_binary.clone(),
            log_root: config.log_root.clone(),
            stop_grace: config.stop_grace(),
            idle_threshold: config.idle_threshold(),
        }
    }
}

/// Parameters for [`InstanceManager::start`].
#[derive(Debug, Clone)]
pub struct StartRequest {
    /// Unique display name; the short id names the window when absent.
    pub name: Option<String>,
    /// Working directory; the current directory when absent.
    pub working_dir: Option<PathBuf>,
    /// Model override.
    pub model: Option<String>,
    /// Agent session UUID to resume.
    pub resume: Option<String>,
    /// Prompt handed to the agent on startup.
    pub initial_prompt: Option<String>,
    /// Skip the agent's permission prompts.
    pub auto_approve: bool,
}

impl Default for StartRequest {
    fn default() -> Self {
        Self {
            name: None,
            working_dir: None,
            model: None,
            resume: None,
            initial_prompt: None,
            auto_approve: true,
        }
    }
}

/// A status change applied by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTransition {
    /// Short id of the instance.
    pub instance_id: String,
    /// Status before reconciliation.
    pub from: InstanceStatus,
    /// Status after reconciliation.
    pub to: InstanceStatus,
}

/// Orchestrates agent instances hosted in multiplexer windows.
pub struct InstanceManager {
    repo: InstanceRepo,
    notifications: NotificationRepo,
    mux: Arc<dyn Multiplexer>,
    settings: ManagerSettings,
}

impl InstanceManager {
    /// Assemble a manager from explicit collaborators.
    #[must_use]
    pub fn new(
        repo: InstanceRepo,
        notifications: NotificationRepo,
        mux: Arc<dyn Multiplexer>,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            repo,
            notifications,
            mux,
            settings,
        }
    }

    /// Production manager driving tmux, with stores under `state_dir`.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        let mux = TmuxController::new(
            &config.tmux_binary,
            &config.session_name,
            config.enter_delay(),
        );
        Self::new(
            InstanceRepo::new(config.instances_path(), &config.session_name),
            NotificationRepo::new(config.notifications_dir()),
            Arc::new(mux),
            ManagerSettings::from_config(config),
        )
    }

    /// Underlying registry.
    #[must_use]
    pub fn repo(&self) -> &InstanceRepo {
        &self.repo
    }

    /// Underlying notification store.
    #[must_use]
    pub fn notification_repo(&self) -> &NotificationRepo {
        &self.notifications
    }

    /// Launch a new agent instance in its own window.
    ///
    /// The returned record has status `starting`; the stored record is
    /// immediately moved to `running` or `stopped` by a liveness check.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AlreadyExists` on a name collision (nothing is
    /// created), `AppError::ProcessControl` if the window cannot be created,
    /// or `AppError::Persistence` if the registry cannot be written.
    pub async fn start(&self, request: StartRequest) -> Result<Instance> {
        let span = info_span!("start_instance", name = request.name.as_deref().unwrap_or("-"));
        self.start_inner(request).instrument(span).await
    }

    async fn start_inner(&self, request: StartRequest) -> Result<Instance> {
        if let Some(ref name) = request.name {
            let lookup = name.clone();
            let existing = self.with_repo(move |repo| repo.find_by_name(&lookup)).await?;
            if let Some(existing) = existing {
                return Err(AppError::AlreadyExists(format!(
                    "instance named '{name}' already exists (id: {})",
                    existing.id
                )));
            }
        }

        let ids = InstanceIds::generate();
        let working_dir = resolve_working_dir(request.working_dir.as_deref())?;
        let window_name = request.name.clone().unwrap_or_else(|| ids.id.clone());

        let command = build_agent_command(
            &self.settings.agent_binary,
            &LaunchOptions {
                model: request.model.as_deref(),
                resume: request.resume.as_deref(),
                initial_prompt: request.initial_prompt.as_deref(),
                auto_approve: request.auto_approve,
            },
        );
        debug!(command, "launching agent");

        let handle = self
            .mux
            .create_window(&window_name, &command, &working_dir.to_string_lossy())
            .await?;

        let instance = Instance::new(NewInstance {
            ids,
            name: request.name,
            working_dir,
            window_ref: handle.window_ref,
            pane_ref: handle.pane_ref,
            model: request.model,
            auto_approve: request.auto_approve,
        });

        let record = instance.clone();
        if let Err(err) = self.with_repo(move |repo| repo.add(&record)).await {
            // Another process registered the name while the window spawned.
            self.mux.kill_window(&instance.window_ref).await;
            return Err(err);
        }

        let update = if self.mux.window_exists(&instance.window_ref).await {
            InstanceUpdate::status(InstanceStatus::Running).with_last_activity(Utc::now())
        } else {
            warn!(instance_id = instance.id, "window exited immediately after launch");
            InstanceUpdate::status(InstanceStatus::Stopped)
        };
        self.update(&instance.id, update).await?;

        info!(
            instance_id = instance.id,
            window = instance.window_ref,
            working_dir = %instance.working_dir.display(),
            "instance started"
        );
        Ok(instance)
    }

    /// Stop the instance matching `identifier`.
    ///
    /// Unless `force`, sends an interrupt and waits the grace period first.
    /// The window is then killed and the record marked `stopped` whether or
    /// not either multiplexer call succeeded. A record that is already
    /// `stopped` is left alone. Returns `false` if the identifier does not
    /// resolve.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the registry cannot be accessed.
    pub async fn stop(&self, identifier: &str, force: bool) -> Result<bool> {
        let span = info_span!("stop_instance", identifier, force);
        self.stop_inner(identifier, force).instrument(span).await
    }

    async fn stop_inner(&self, identifier: &str, force: bool) -> Result<bool> {
        let Some(instance) = self.find(identifier).await? else {
            return Ok(false);
        };
        if instance.status == InstanceStatus::Stopped {
            // Its window index may already belong to another instance.
            debug!(instance_id = instance.id, "already stopped");
            return Ok(true);
        }

        if !force {
            if self.mux.send_interrupt(&instance.window_ref).await {
                tokio::time::sleep(self.settings.stop_grace).await;
            } else {
                debug!(instance_id = instance.id, "nothing to interrupt");
            }
        }

        if !self.mux.kill_window(&instance.window_ref).await {
            debug!(instance_id = instance.id, "window already gone");
        }

        match self
            .update(&instance.id, InstanceUpdate::status(InstanceStatus::Stopped))
            .await
        {
            Ok(_) => {
                info!(instance_id = instance.id, "instance stopped");
                Ok(true)
            }
            Err(AppError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Stop every non-stopped instance; returns how many stops succeeded.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the registry cannot be accessed.
    pub async fn stop_all(&self, force: bool) -> Result<usize> {
        let mut stopped = 0;
        for instance in self.with_repo(|repo| repo.list(false)).await? {
            if self.stop(&instance.id, force).await? {
                stopped += 1;
            }
        }
        Ok(stopped)
    }

    /// Reconcile every live record against window and log state.
    ///
    /// A vanished window marks the record `stopped`; otherwise the activity
    /// detector's classification becomes the stored status and
    /// `last_activity` is stamped. Returns the status changes applied.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the registry cannot be accessed.
    pub async fn refresh_statuses(&self) -> Result<Vec<StatusTransition>> {
        self.refresh_inner().instrument(info_span!("refresh_statuses")).await
    }

    async fn refresh_inner(&self) -> Result<Vec<StatusTransition>> {
        let mut transitions = Vec::new();

        for instance in self.with_repo(|repo| repo.list(false)).await? {
            let update = if self.mux.window_exists(&instance.window_ref).await {
                let state = self.detect_state(&instance).await?;
                InstanceUpdate::status(state.status.into()).with_last_activity(Utc::now())
            } else {
                InstanceUpdate::status(InstanceStatus::Stopped)
            };

            let updated = match self.update(&instance.id, update).await {
                Ok(updated) => updated,
                // Removed by another process mid-pass.
                Err(AppError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            };

            if updated.status != instance.status {
                debug!(
                    instance_id = instance.id,
                    from = instance.status.label(),
                    to = updated.status.label(),
                    "status changed"
                );
                transitions.push(StatusTransition {
                    instance_id: instance.id,
                    from: instance.status,
                    to: updated.status,
                });
            }
        }

        Ok(transitions)
    }

    /// Registry contents after marking dead windows `stopped`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the registry cannot be accessed.
    pub async fn list(&self, include_stopped: bool) -> Result<Vec<Instance>> {
        for instance in self.with_repo(|repo| repo.list(false)).await? {
            if !self.mux.window_exists(&instance.window_ref).await {
                let stopped = InstanceUpdate::status(InstanceStatus::Stopped);
                match self.update(&instance.id, stopped).await {
                    Ok(_) | Err(AppError::NotFound(_)) => {}
                    Err(err) => return Err(err),
                }
            }
        }
        self.with_repo(move |repo| repo.list(include_stopped)).await
    }

    /// Resolve `identifier` to a record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the registry cannot be accessed.
    pub async fn get(&self, identifier: &str) -> Result<Option<Instance>> {
        self.find(identifier).await
    }

    /// Delete a record without touching its window.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the registry cannot be accessed.
    pub async fn remove(&self, identifier: &str) -> Result<bool> {
        let identifier = identifier.to_owned();
        self.with_repo(move |repo| match repo.find(&identifier)? {
            Some(instance) => repo.remove(&instance.id),
            None => Ok(false),
        })
        .await
    }

    /// Type `text` into the instance and press Enter.
    ///
    /// Stopped instances are never addressed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the registry cannot be accessed.
    pub async fn send_message(&self, identifier: &str, text: &str) -> Result<bool> {
        let Some(instance) = self.find_live(identifier).await? else {
            return Ok(false);
        };
        let sent = self.mux.send_keys(&instance.window_ref, text, true).await;
        if sent {
            let touched = InstanceUpdate {
                last_activity: Some(Utc::now()),
                ..InstanceUpdate::default()
            };
            self.update(&instance.id, touched).await?;
        }
        Ok(sent)
    }

    /// Send a single named key without Enter.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the registry cannot be accessed.
    pub async fn send_key(&self, identifier: &str, key: &str) -> Result<bool> {
        let Some(instance) = self.find_live(identifier).await? else {
            return Ok(false);
        };
        Ok(self.mux.send_key(&instance.window_ref, key).await)
    }

    /// Hand the terminal to the instance's window until the user detaches.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the registry cannot be accessed.
    pub async fn attach(&self, identifier: &str) -> Result<bool> {
        let Some(instance) = self.find_live(identifier).await? else {
            return Ok(false);
        };
        Ok(self.mux.attach_session(Some(&instance.window_ref)).await)
    }

    /// Stop everything, tear down the session and clear the registry.
    /// Returns how many instances were stopped.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the registry cannot be accessed.
    pub async fn cleanup(&self, force: bool) -> Result<usize> {
        let stopped = self.stop_all(force).await?;
        if !self.mux.kill_session().await {
            debug!(session = self.mux.session_name(), "session already gone");
        }
        self.with_repo(InstanceRepo::clear).await?;
        info!(stopped, "cleanup complete");
        Ok(stopped)
    }

    /// Last `last_n` conversation-log entries of the instance.
    ///
    /// Records the agent session UUID the first time one is found.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if `identifier` does not resolve.
    pub async fn get_activity(&self, identifier: &str, last_n: usize) -> Result<Vec<LogEntry>> {
        let instance = self.require(identifier).await?;
        let reader = self.reader_for(&instance);
        let (session_ref, entries) = blocking("conversation log", move || {
            (reader.session_id(), reader.read_entries(last_n))
        })
        .await?;

        if instance.session_ref.is_none() {
            if let Some(session_ref) = session_ref {
                let update = InstanceUpdate {
                    session_ref: Some(session_ref),
                    ..InstanceUpdate::default()
                };
                self.update(&instance.id, update).await?;
            }
        }

        Ok(entries)
    }

    /// Current activity classification of the instance.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if `identifier` does not resolve.
    pub async fn get_activity_state(&self, identifier: &str) -> Result<ActivityState> {
        let instance = self.require(identifier).await?;
        self.detect_state(&instance).await
    }

    /// Set how front ends render the instance.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the registry cannot be accessed.
    pub async fn set_display_mode(&self, identifier: &str, mode: DisplayMode) -> Result<bool> {
        let Some(instance) = self.find(identifier).await? else {
            return Ok(false);
        };
        let update = InstanceUpdate {
            display_mode: Some(mode),
            ..InstanceUpdate::default()
        };
        self.update(&instance.id, update).await?;
        Ok(true)
    }

    /// How front ends render the instance.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if `identifier` does not resolve.
    pub async fn get_display_mode(&self, identifier: &str) -> Result<DisplayMode> {
        Ok(self.require(identifier).await?.display_mode)
    }

    /// Visible pane text plus up to `lines` of scrollback.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if `identifier` does not resolve.
    pub async fn capture_output(&self, identifier: &str, lines: usize) -> Result<String> {
        let instance = self.require(identifier).await?;
        Ok(self.mux.capture_pane(&instance.window_ref, lines).await)
    }

    /// Whether the instance named `name` is live with a running process.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the registry cannot be accessed.
    pub async fn is_primary_running(&self, name: &str) -> Result<bool> {
        let lookup = name.to_owned();
        let Some(instance) = self.with_repo(move |repo| repo.find_by_name(&lookup)).await? else {
            return Ok(false);
        };
        if !instance.status.is_live() || !self.mux.window_exists(&instance.window_ref).await {
            return Ok(false);
        }
        Ok(match self.mux.pane_pid(&instance.window_ref).await {
            Some(pid) => multiplexer::process_alive(pid),
            None => true,
        })
    }

    /// Block until the instance's pane output stops changing.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if `identifier` does not resolve.
    pub async fn wait_for_idle(
        &self,
        identifier: &str,
        wait: IdleWait,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let instance = self.require(identifier).await?;
        Ok(multiplexer::wait_for_idle(self.mux.as_ref(), &instance.window_ref, wait, cancel).await)
    }

    /// Rewrite `pane_ref` of live records whose window now reports a
    /// different pane. Returns how many records were corrected.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the registry cannot be accessed.
    pub async fn verify_panes(&self) -> Result<usize> {
        let windows = self.mux.list_windows().await;
        let mut corrected = 0;

        for instance in self.with_repo(|repo| repo.list(false)).await? {
            let Some(window) = windows.iter().find(|w| w.target == instance.window_ref) else {
                continue;
            };
            if window.pane_ref.is_empty() || window.pane_ref == instance.pane_ref {
                continue;
            }
            let update = InstanceUpdate {
                pane_ref: Some(window.pane_ref.clone()),
                ..InstanceUpdate::default()
            };
            match self.update(&instance.id, update).await {
                Ok(_) => {
                    info!(
                        instance_id = instance.id,
                        old = instance.pane_ref,
                        new = window.pane_ref,
                        "pane reference corrected"
                    );
                    corrected += 1;
                }
                Err(AppError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }

        Ok(corrected)
    }

    /// Record a notification from the instance matching `identifier`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if `identifier` does not resolve, or
    /// `AppError::Persistence` if the notification cannot be written.
    pub async fn notify(
        &self,
        identifier: &str,
        status: NotificationStatus,
        message: &str,
    ) -> Result<Notification> {
        let instance = self.require(identifier).await?;
        let notification = Notification::new(
            instance.id.clone(),
            instance.label().to_owned(),
            status,
            message.to_owned(),
        );
        let store = self.notifications.clone();
        let record = notification.clone();
        blocking("notification store", move || store.save(&record)).await??;
        Ok(notification)
    }

    /// Notifications passing `filter`, newest first, at most `limit`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the store cannot be locked.
    pub async fn list_notifications(
        &self,
        filter: &NotificationFilter,
        limit: usize,
    ) -> Result<Vec<Notification>> {
        let store = self.notifications.clone();
        let filter = filter.clone();
        blocking("notification store", move || store.list(&filter, limit)).await?
    }

    /// Flag the notification with `id` as delivered.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the store cannot be written.
    pub async fn mark_notification_delivered(&self, id: &str) -> Result<bool> {
        let store = self.notifications.clone();
        let id = id.to_owned();
        blocking("notification store", move || store.mark_delivered_by_id(&id)).await?
    }

    /// Run `op` against the registry on the blocking pool.
    async fn with_repo<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&InstanceRepo) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let repo = self.repo.clone();
        blocking("registry", move || op(&repo)).await?
    }

    async fn find(&self, identifier: &str) -> Result<Option<Instance>> {
        let identifier = identifier.to_owned();
        self.with_repo(move |repo| repo.find(&identifier)).await
    }

    async fn update(&self, id: &str, update: InstanceUpdate) -> Result<Instance> {
        let id = id.to_owned();
        self.with_repo(move |repo| repo.update(&id, &update)).await
    }

    async fn require(&self, identifier: &str) -> Result<Instance> {
        self.find(identifier)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no instance matches '{identifier}'")))
    }

    async fn detect_state(&self, instance: &Instance) -> Result<ActivityState> {
        let reader = self.reader_for(instance);
        let threshold = self.settings.idle_threshold;
        blocking("conversation log", move || reader.detect_activity_state(threshold)).await
    }

    /// Resolve `identifier` to a record that still owns its window.
    async fn find_live(&self, identifier: &str) -> Result<Option<Instance>> {
        Ok(self
            .find(identifier)
            .await?
            .filter(|instance| instance.status != InstanceStatus::Stopped))
    }

    fn reader_for(&self, instance: &Instance) -> ConversationLogReader {
        ConversationLogReader::new(&self.settings.log_root, &instance.working_dir)
    }
}

/// Run synchronous file work on the blocking pool.
async fn blocking<T, F>(what: &'static str, op: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|err| AppError::Persistence(format!("{what} task panicked: {err}")))
}

/// Absolute, canonical form of `dir` (the current directory when `None`).
///
/// Paths that cannot be canonicalized are kept as absolute paths.
///
/// # Errors
///
/// Returns `AppError::Io` if the current directory cannot be determined.
pub fn resolve_working_dir(dir: Option<&Path>) -> Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    let joined = match dir {
        Some(dir) if dir.is_absolute() => dir.to_path_buf(),
        Some(dir) => cwd.join(dir),
        None => cwd,
    };
    Ok(fs::canonicalize(&joined).unwrap_or(joined))
}
