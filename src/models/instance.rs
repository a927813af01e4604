//! Instance model and the on-disk registry document.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Length of the short identifier derived from the full UUID.
pub const SHORT_ID_LEN: usize = 8;

/// Schema version written into the registry document.
pub const STORE_VERSION: &str = "1.0";

/// Lifecycle status for a managed agent instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Window created, liveness not yet confirmed.
    Starting,
    /// Window alive; no more specific activity signal.
    Running,
    /// Agent is producing a thinking block.
    Thinking,
    /// Agent invoked a tool or is digesting its result.
    ToolUse,
    /// No new log entries within the idle threshold.
    Idle,
    /// Window gone or explicitly stopped. Terminal for this id.
    Stopped,
    /// Failure reported by an external collaborator.
    Error,
}

impl InstanceStatus {
    /// Lowercase label used in CLI output and logs.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Thinking => "thinking",
            Self::ToolUse => "tool_use",
            Self::Idle => "idle",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }

    /// Whether the instance still has (or may have) a live window.
    #[must_use]
    pub fn is_live(self) -> bool {
        !matches!(self, Self::Stopped)
    }
}

impl Display for InstanceStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Presentation hint for consumers showing an instance's output.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    /// Structured activity parsed from the conversation log.
    #[default]
    Activity,
    /// Raw pane contents.
    Raw,
}

impl DisplayMode {
    /// Lowercase label used in CLI output.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Activity => "activity",
            Self::Raw => "raw",
        }
    }
}

/// One managed agent session, hosted in one multiplexer window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Instance {
    /// Short identifier; primary key, never reused.
    pub id: String,
    /// Full UUID the short id was cut from.
    pub full_id: String,
    /// Optional user label, unique among records at insert time.
    pub name: Option<String>,
    /// Current lifecycle status.
    pub status: InstanceStatus,
    /// Absolute working directory; locates the conversation log.
    pub working_dir: PathBuf,
    /// Multiplexer window target (`session:index`).
    pub window_ref: String,
    /// Multiplexer pane id (`%N`); may be corrected by pane verification.
    #[serde(default)]
    pub pane_ref: String,
    /// Creation timestamp; defines listing order.
    pub created_at: DateTime<Utc>,
    /// Last reconciliation or outbound message.
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
    /// Conversation session UUID, discovered once the log appears.
    #[serde(default)]
    pub session_ref: Option<String>,
    /// Model requested at launch.
    #[serde(default)]
    pub model: Option<String>,
    /// Presentation hint; never touched by reconciliation.
    #[serde(default)]
    pub display_mode: DisplayMode,
    /// Whether the agent was launched with permission prompts disabled.
    #[serde(default = "default_auto_approve")]
    pub auto_approve: bool,
}

fn default_auto_approve() -> bool {
    true
}

/// Identifier pair generated once per instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceIds {
    /// Short identifier (first [`SHORT_ID_LEN`] characters of `full_id`).
    pub id: String,
    /// Full hyphenated UUID.
    pub full_id: String,
}

impl InstanceIds {
    /// Generate a fresh identifier pair.
    #[must_use]
    pub fn generate() -> Self {
        let full_id = Uuid::new_v4().to_string();
        let id = full_id.chars().take(SHORT_ID_LEN).collect();
        Self { id, full_id }
    }
}

/// Launch-time facts about a new instance.
#[derive(Debug, Clone)]
pub struct NewInstance {
    /// Identifier pair.
    pub ids: InstanceIds,
    /// Optional user label.
    pub name: Option<String>,
    /// Absolute working directory.
    pub working_dir: PathBuf,
    /// Window target returned by the multiplexer.
    pub window_ref: String,
    /// Pane id returned by the multiplexer.
    pub pane_ref: String,
    /// Requested model.
    pub model: Option<String>,
    /// Permission-skip flag.
    pub auto_approve: bool,
}

impl Instance {
    /// Construct a record in the `Starting` state.
    #[must_use]
    pub fn new(launch: NewInstance) -> Self {
        Self {
            id: launch.ids.id,
            full_id: launch.ids.full_id,
            name: launch.name,
            status: InstanceStatus::Starting,
            working_dir: launch.working_dir,
            window_ref: launch.window_ref,
            pane_ref: launch.pane_ref,
            created_at: Utc::now(),
            last_activity: None,
            session_ref: None,
            model: launch.model,
            display_mode: DisplayMode::Activity,
            auto_approve: launch.auto_approve,
        }
    }

    /// Name if set, otherwise the short id.
    #[must_use]
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, update: &InstanceUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(ts) = update.last_activity {
            self.last_activity = Some(ts);
        }
        if let Some(ref pane) = update.pane_ref {
            self.pane_ref.clone_from(pane);
        }
        if let Some(ref session) = update.session_ref {
            self.session_ref = Some(session.clone());
        }
        if let Some(mode) = update.display_mode {
            self.display_mode = mode;
        }
    }
}

/// Partial update for the mutable fields of an [`Instance`].
///
/// Identity, working directory, window target and launch flags have no
/// field here and therefore cannot change after creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceUpdate {
    /// New status.
    pub status: Option<InstanceStatus>,
    /// New last-activity stamp.
    pub last_activity: Option<DateTime<Utc>>,
    /// Corrected pane id.
    pub pane_ref: Option<String>,
    /// Discovered conversation session.
    pub session_ref: Option<String>,
    /// New presentation hint.
    pub display_mode: Option<DisplayMode>,
}

impl InstanceUpdate {
    /// Update carrying only a status.
    #[must_use]
    pub fn status(status: InstanceStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Set the last-activity stamp.
    #[must_use]
    pub fn with_last_activity(mut self, at: DateTime<Utc>) -> Self {
        self.last_activity = Some(at);
        self
    }
}

/// Root document of `instances.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct InstanceStoreFile {
    /// Schema version.
    pub version: String,
    /// Multiplexer session hosting the instances.
    pub session_name: String,
    /// Records keyed by short id.
    #[serde(default)]
    pub instances: BTreeMap<String, Instance>,
}

impl InstanceStoreFile {
    /// Empty document for the given session.
    #[must_use]
    pub fn empty(session_name: &str) -> Self {
        Self {
            version: STORE_VERSION.to_owned(),
            session_name: session_name.to_owned(),
            instances: BTreeMap::new(),
        }
    }

    /// Records ordered by creation time, oldest first.
    #[must_use]
    pub fn ordered(&self) -> Vec<&Instance> {
        let mut all: Vec<&Instance> = self.instances.values().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }
}
