#![forbid(unsafe_code)]

//! Command-line front end for the instance manager.
//!
//! Every subcommand is a thin call into [`InstanceManager`]. The `monitor`
//! subcommand additionally runs the status monitor and the notification
//! retention task until interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use rushd::activity::format::format_activity;
use rushd::config::GlobalConfig;
use rushd::models::instance::{DisplayMode, Instance};
use rushd::models::notification::{NotificationFilter, NotificationStatus};
use rushd::multiplexer::IdleWait;
use rushd::orchestrator::manager::{InstanceManager, StartRequest};
use rushd::orchestrator::status_monitor::{spawn_status_monitor, StatusEvent};
use rushd::persistence::retention;
use rushd::{AppError, Result};

const FOLLOW_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum NotifyLevel {
    Success,
    Failure,
    Info,
}

impl From<NotifyLevel> for NotificationStatus {
    fn from(level: NotifyLevel) -> Self {
        match level {
            NotifyLevel::Success => Self::Success,
            NotifyLevel::Failure => Self::Failure,
            NotifyLevel::Info => Self::Info,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum ViewMode {
    Activity,
    Raw,
}

#[derive(Debug, Parser)]
#[command(name = "rushd", about = "Run and supervise coding-agent sessions in tmux", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Launch a new agent instance (the configured primary when no name or
    /// directory is given).
    Start {
        /// Unique instance name.
        #[arg(long, short)]
        name: Option<String>,
        /// Working directory.
        #[arg(long, short)]
        dir: Option<PathBuf>,
        /// Model override.
        #[arg(long, short)]
        model: Option<String>,
        /// Agent session UUID to resume.
        #[arg(long)]
        resume: Option<String>,
        /// Initial prompt.
        #[arg(long, short)]
        prompt: Option<String>,
        /// Keep the agent's permission prompts.
        #[arg(long)]
        interactive: bool,
    },

    /// Stop an instance, or all of them.
    Stop {
        /// Instance id or name (defaults to the primary).
        identifier: Option<String>,
        /// Kill immediately without an interrupt.
        #[arg(long, short)]
        force: bool,
        /// Stop every running instance.
        #[arg(long, conflicts_with = "identifier")]
        all: bool,
    },

    /// List instances.
    List {
        /// Include stopped instances.
        #[arg(long, short)]
        all: bool,
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Show an instance's record and current activity.
    Status {
        /// Instance id or name (defaults to the primary).
        identifier: Option<String>,
    },

    /// Type a message into an instance and press Enter.
    Send {
        /// Instance id or name.
        identifier: String,
        /// Message text.
        #[arg(num_args = 0.., required_unless_present = "file")]
        message: Vec<String>,
        /// Read the message from a file instead.
        #[arg(long, short, conflicts_with = "message")]
        file: Option<PathBuf>,
    },

    /// Send a named key (Up, Escape, C-d, ...) to an instance.
    Key {
        /// Instance id or name.
        identifier: String,
        /// Key name.
        key: String,
    },

    /// Attach the terminal to an instance's window.
    Attach {
        /// Instance id or name (defaults to the primary).
        identifier: Option<String>,
    },

    /// Print an instance's pane, or its activity feed.
    View {
        /// Instance id or name (defaults to the primary).
        identifier: Option<String>,
        /// Scrollback lines to capture.
        #[arg(long, short, default_value_t = 500)]
        lines: usize,
        /// Remember this rendering for the instance.
        #[arg(long, value_enum)]
        mode: Option<ViewMode>,
        /// Keep redrawing whenever the output changes, until interrupted.
        #[arg(long, short)]
        follow: bool,
    },

    /// Print the latest conversation-log entries of an instance.
    Activity {
        /// Instance id or name (defaults to the primary).
        identifier: Option<String>,
        /// Number of log lines to read.
        #[arg(long, short = 'n', default_value_t = 30)]
        last: usize,
    },

    /// Wait until an instance's output stops changing.
    Wait {
        /// Instance id or name (defaults to the primary).
        identifier: Option<String>,
        /// Give up after this many seconds.
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },

    /// Forget an instance whose window is already gone.
    Remove {
        /// Instance id or name.
        identifier: String,
    },

    /// Stop everything, kill the session and clear the registry.
    Cleanup {
        /// Kill immediately without interrupts.
        #[arg(long, short)]
        force: bool,
    },

    /// Reconcile statuses continuously and print every change.
    Monitor {
        /// Seconds between passes (defaults to the configured interval).
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Record a notification on behalf of an instance.
    Notify {
        /// Instance id or name.
        identifier: String,
        /// Outcome reported.
        #[arg(long, value_enum, default_value_t = NotifyLevel::Info)]
        status: NotifyLevel,
        /// Notification text.
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
    },

    /// List notifications, newest first.
    Notifications {
        /// Only notifications from this instance id.
        #[arg(long)]
        worker: Option<String>,
        /// Only undelivered notifications.
        #[arg(long)]
        undelivered: bool,
        /// Maximum notifications printed.
        #[arg(long, default_value_t = 50)]
        limit: usize,
        /// Mark the notification with this id delivered instead of listing.
        #[arg(long)]
        mark_delivered: Option<String>,
    },

    /// Re-sync stored pane references with the live session.
    VerifyPanes,

    /// Show the effective configuration or write a default file.
    Config {
        /// Print the effective configuration as TOML.
        #[arg(long)]
        show: bool,
        /// Write the defaults to the config path if no file exists there.
        #[arg(long)]
        init: bool,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config_path = args.config.unwrap_or_else(GlobalConfig::default_path);
    let config = GlobalConfig::load_or_default(&config_path)?;
    let manager = Arc::new(InstanceManager::from_config(&config));
    let primary = config.primary.name.clone();
    let or_primary = |identifier: Option<String>| identifier.unwrap_or_else(|| primary.clone());

    match args.command {
        Command::Start {
            name,
            dir,
            model,
            resume,
            prompt,
            interactive,
        } => {
            let request = if name.is_none() && dir.is_none() {
                info!(name = %config.primary.name, "using primary instance defaults");
                StartRequest {
                    name: Some(config.primary.name.clone()),
                    working_dir: config.primary.working_dir.clone(),
                    model: model.or_else(|| config.primary.model.clone()),
                    resume,
                    initial_prompt: prompt,
                    auto_approve: config.primary.auto_approve && !interactive,
                }
            } else {
                StartRequest {
                    name,
                    working_dir: dir,
                    model,
                    resume,
                    initial_prompt: prompt,
                    auto_approve: !interactive,
                }
            };
            let instance = manager.start(request).await?;
            println!(
                "started {} ({}) in {}",
                instance.label(),
                instance.id,
                instance.working_dir.display()
            );
        }

        Command::Stop {
            identifier,
            force,
            all,
        } => {
            if all {
                let stopped = manager.stop_all(force).await?;
                println!("stopped {stopped} instance(s)");
            } else {
                let identifier = or_primary(identifier);
                found(manager.stop(&identifier, force).await?, &identifier)?;
                println!("stopped {identifier}");
            }
        }

        Command::List { all, json } => {
            let instances = manager.list(all).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&instances)?);
            } else {
                print_table(&instances);
            }
        }

        Command::Status { identifier } => {
            let identifier = or_primary(identifier);
            let instance = manager
                .get(&identifier)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("no instance matches '{identifier}'")))?;
            let state = manager.get_activity_state(&identifier).await?;
            println!("{}", serde_json::to_string_pretty(&instance)?);
            match state.tool_name {
                Some(tool) => println!(
                    "activity: {} ({tool}), {:.1}s ago",
                    state.status.label(),
                    state.seconds_since_activity
                ),
                None => println!(
                    "activity: {}, {:.1}s ago",
                    state.status.label(),
                    state.seconds_since_activity
                ),
            }
        }

        Command::Send {
            identifier,
            message,
            file,
        } => {
            let text = match file {
                Some(path) => tokio::fs::read_to_string(&path).await.map_err(|err| {
                    AppError::Io(format!("failed to read {}: {err}", path.display()))
                })?,
                None => message.join(" "),
            };
            found(manager.send_message(&identifier, &text).await?, &identifier)?;
        }

        Command::Key { identifier, key } => {
            found(manager.send_key(&identifier, &key).await?, &identifier)?;
        }

        Command::Attach { identifier } => {
            let identifier = or_primary(identifier);
            found(manager.attach(&identifier).await?, &identifier)?;
        }

        Command::View {
            identifier,
            lines,
            mode,
            follow,
        } => {
            let identifier = or_primary(identifier);
            if let Some(mode) = mode {
                let mode = match mode {
                    ViewMode::Activity => DisplayMode::Activity,
                    ViewMode::Raw => DisplayMode::Raw,
                };
                found(manager.set_display_mode(&identifier, mode).await?, &identifier)?;
            }
            if follow {
                follow_view(&manager, &identifier, lines).await?;
            } else {
                println!("{}", render_view(&manager, &identifier, lines).await?);
            }
        }

        Command::Activity { identifier, last } => {
            println!("{}", render_activity(&manager, &or_primary(identifier), last).await?);
        }

        Command::Wait {
            identifier,
            timeout,
        } => {
            let identifier = or_primary(identifier);
            let wait = IdleWait {
                timeout: Duration::from_secs(timeout),
                ..IdleWait::default()
            };
            let cancel = CancellationToken::new();
            let idle = manager.wait_for_idle(&identifier, wait, &cancel).await?;
            println!("{}", if idle { "idle" } else { "still busy" });
        }

        Command::Remove { identifier } => {
            found(manager.remove(&identifier).await?, &identifier)?;
            println!("removed {identifier}");
        }

        Command::Cleanup { force } => {
            let stopped = manager.cleanup(force).await?;
            println!("stopped {stopped} instance(s), session cleared");
        }

        Command::Monitor { interval } => {
            let interval = interval.map_or_else(|| config.poll_interval(), Duration::from_secs);
            monitor(manager, &config, interval).await;
        }

        Command::Notify {
            identifier,
            status,
            message,
        } => {
            let notification = manager
                .notify(&identifier, status.into(), &message.join(" "))
                .await?;
            println!("recorded notification {}", notification.id);
        }

        Command::Notifications {
            worker,
            undelivered,
            limit,
            mark_delivered,
        } => {
            if let Some(id) = mark_delivered {
                if !manager.mark_notification_delivered(&id).await? {
                    return Err(AppError::NotFound(format!("notification {id} not found")));
                }
                println!("marked {id} delivered");
                return Ok(());
            }
            let filter = NotificationFilter {
                worker_id: worker,
                undelivered_only: undelivered,
            };
            for n in manager.list_notifications(&filter, limit).await? {
                println!(
                    "{} {} [{:?}] {}{}: {}",
                    n.created_at.format("%Y-%m-%d %H:%M:%S"),
                    n.id,
                    n.status,
                    n.worker_name,
                    if n.delivered { "" } else { " *" },
                    n.message
                );
            }
        }

        Command::VerifyPanes => {
            let corrected = manager.verify_panes().await?;
            println!("corrected {corrected} pane reference(s)");
        }

        Command::Config { show, init } => {
            if init {
                if GlobalConfig::init_file(&config_path)? {
                    println!("wrote default config to {}", config_path.display());
                } else {
                    println!("config already exists at {}", config_path.display());
                }
            }
            if show || !init {
                println!("# {}", config_path.display());
                print!("{}", config.to_toml_string()?);
            }
        }
    }

    Ok(())
}

fn found(ok: bool, identifier: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(AppError::NotFound(format!("no instance matches '{identifier}'")))
    }
}

fn print_table(instances: &[Instance]) {
    if instances.is_empty() {
        println!("no instances");
        return;
    }
    println!("{:<10} {:<20} {:<10} {:<22} DIRECTORY", "ID", "NAME", "STATUS", "WINDOW");
    for instance in instances {
        println!(
            "{:<10} {:<20} {:<10} {:<22} {}",
            instance.id,
            instance.name.as_deref().unwrap_or("-"),
            instance.status.label(),
            instance.window_ref,
            instance.working_dir.display()
        );
    }
}

async fn render_activity(
    manager: &InstanceManager,
    identifier: &str,
    last_n: usize,
) -> Result<String> {
    let entries = manager.get_activity(identifier, last_n).await?;
    if entries.is_empty() {
        Ok("[no activity yet]".to_owned())
    } else {
        Ok(format_activity(&entries))
    }
}

/// Pane text or activity feed, per the instance's display mode.
async fn render_view(
    manager: &InstanceManager,
    identifier: &str,
    lines: usize,
) -> Result<String> {
    match manager.get_display_mode(identifier).await? {
        DisplayMode::Raw => manager.capture_output(identifier, lines).await,
        DisplayMode::Activity => render_activity(manager, identifier, 30).await,
    }
}

/// Redraw the view whenever it changes until Ctrl-C or SIGTERM.
async fn follow_view(manager: &InstanceManager, identifier: &str, lines: usize) -> Result<()> {
    let mut ticker = tokio::time::interval(FOLLOW_INTERVAL);
    let mut last = String::new();
    let stop = shutdown_signal();
    tokio::pin!(stop);

    loop {
        tokio::select! {
            () = &mut stop => return Ok(()),
            _ = ticker.tick() => {}
        }
        let current = render_view(manager, identifier, lines).await?;
        if current != last {
            // Clear the screen and home the cursor.
            println!("\x1b[2J\x1b[H{current}");
            last = current;
        }
    }
}

async fn monitor(manager: Arc<InstanceManager>, config: &GlobalConfig, interval: Duration) {
    let ct = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel::<StatusEvent>(64);

    let monitor_handle = spawn_status_monitor(Arc::clone(&manager), interval, tx, ct.clone());
    let retention_handle = retention::spawn_retention_task(
        manager.notification_repo().clone(),
        config.notifications.retention_days,
        ct.clone(),
    );
    info!(interval_secs = interval.as_secs(), "status monitor started");

    let printer = tokio::spawn(async move {
        while let Some(StatusEvent::Changed {
            instance_id,
            from,
            to,
        }) = rx.recv().await
        {
            println!("{instance_id}: {from} -> {to}");
        }
    });

    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    let (monitor_res, retention_res, printer_res) =
        tokio::join!(monitor_handle, retention_handle, printer);
    for res in [monitor_res, retention_res, printer_res] {
        if let Err(err) = res {
            error!(%err, "background task panicked");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
