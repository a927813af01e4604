//! Global configuration parsing, validation, and path derivation.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{AppError, Result};

/// Defaults used when `rushd start` is invoked without a name or directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PrimaryConfig {
    /// Name registered for the primary instance.
    #[serde(default = "default_primary_name")]
    pub name: String,
    /// Working directory of the primary instance; falls back to the cwd.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Model passed to the agent on launch.
    #[serde(default)]
    pub model: Option<String>,
    /// Whether the primary skips permission prompts.
    #[serde(default = "default_true")]
    pub auto_approve: bool,
}

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            name: default_primary_name(),
            working_dir: None,
            model: None,
            auto_approve: true,
        }
    }
}

/// Reconciliation loop settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct MonitorConfig {
    /// Seconds between status refresh passes.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Seconds without a new log entry before an instance counts as idle.
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold_seconds: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval(),
            idle_threshold_seconds: default_idle_threshold(),
        }
    }
}

/// Delays applied around multiplexer input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimingConfig {
    /// Grace period between the interrupt and the kill on a graceful stop.
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
    /// Settling delay between typed text and the trailing Enter.
    #[serde(default = "default_enter_delay_ms")]
    pub enter_delay_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            stop_grace_ms: default_stop_grace_ms(),
            enter_delay_ms: default_enter_delay_ms(),
        }
    }
}

/// Notification store settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct NotificationConfig {
    /// Days a notification file is kept before the retention task deletes it.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_primary_name() -> String {
    "primary".into()
}

fn default_session_name() -> String {
    "rushd-instances".into()
}

fn default_agent_binary() -> String {
    "claude".into()
}

fn default_tmux_binary() -> String {
    "tmux".into()
}

fn default_state_dir() -> PathBuf {
    home_dir().join(".rushd")
}

fn default_log_root() -> PathBuf {
    home_dir().join(".claude").join("projects")
}

fn default_poll_interval() -> u64 {
    2
}

fn default_idle_threshold() -> u64 {
    5
}

fn default_stop_grace_ms() -> u64 {
    1000
}

fn default_enter_delay_ms() -> u64 {
    500
}

fn default_retention_days() -> u32 {
    7
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Multiplexer session that hosts every instance window.
    #[serde(default = "default_session_name")]
    pub session_name: String,
    /// Directory holding the registry file and notification store.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Agent CLI launched inside each window.
    #[serde(default = "default_agent_binary")]
    pub agent_binary: String,
    /// Multiplexer binary.
    #[serde(default = "default_tmux_binary")]
    pub tmux_binary: String,
    /// Root of the agent's per-project conversation logs.
    #[serde(default = "default_log_root")]
    pub log_root: PathBuf,
    /// Primary instance defaults.
    #[serde(default)]
    pub primary: PrimaryConfig,
    /// Reconciliation loop settings.
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Input and shutdown delays.
    #[serde(default)]
    pub timing: TimingConfig,
    /// Notification retention.
    #[serde(default)]
    pub notifications: NotificationConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            session_name: default_session_name(),
            state_dir: default_state_dir(),
            agent_binary: default_agent_binary(),
            tmux_binary: default_tmux_binary(),
            log_root: default_log_root(),
            primary: PrimaryConfig::default(),
            monitor: MonitorConfig::default(),
            timing: TimingConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Default location of the configuration file (`~/.rushd/config.toml`).
    #[must_use]
    pub fn default_path() -> PathBuf {
        default_state_dir().join("config.toml")
    }

    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file exists but cannot be read,
    /// contains invalid TOML, or fails validation.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "config file absent, using defaults");
            return Ok(Self::default());
        }
        Self::load_from_path(path)
    }

    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the effective configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if serialization fails.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|err| AppError::Config(format!("failed to render config: {err}")))
    }

    /// Write the default configuration to `path` unless a file is already
    /// there. Returns whether a file was written.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file or its directory cannot be
    /// created.
    pub fn init_file(path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                AppError::Config(format!("failed to create {}: {err}", parent.display()))
            })?;
        }
        let rendered = Self::default().to_toml_string()?;
        let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(err) => {
                return Err(AppError::Config(format!(
                    "failed to create {}: {err}",
                    path.display()
                )))
            }
        };
        file.write_all(rendered.as_bytes())
            .map_err(|err| AppError::Config(format!("failed to write config: {err}")))?;
        debug!(path = %path.display(), "default config written");
        Ok(true)
    }

    /// Path of the persisted instance registry.
    #[must_use]
    pub fn instances_path(&self) -> PathBuf {
        self.state_dir.join("instances.json")
    }

    /// Directory holding one JSON file per notification.
    #[must_use]
    pub fn notifications_dir(&self) -> PathBuf {
        self.state_dir.join("notifications")
    }

    /// Interval between reconciliation passes.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.monitor.poll_interval_seconds)
    }

    /// Log silence after which an instance is classified idle.
    #[must_use]
    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.monitor.idle_threshold_seconds)
    }

    /// Grace period between interrupt and kill.
    #[must_use]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.timing.stop_grace_ms)
    }

    /// Delay before the Enter that follows typed text.
    #[must_use]
    pub fn enter_delay(&self) -> Duration {
        Duration::from_millis(self.timing.enter_delay_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.session_name.trim().is_empty() {
            return Err(AppError::Config("session_name must not be empty".into()));
        }

        if self.monitor.poll_interval_seconds == 0 {
            return Err(AppError::Config(
                "monitor.poll_interval_seconds must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
