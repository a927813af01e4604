//! Periodic status reconciliation on a dedicated task.
//!
//! Runs [`InstanceManager::refresh_statuses`] every interval and forwards
//! each applied transition as a [`StatusEvent`] so front ends can react
//! without polling the registry themselves.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::instance::InstanceStatus;

use super::manager::InstanceManager;

/// Events emitted by the status monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// An instance's stored status changed.
    Changed {
        /// Short id of the instance.
        instance_id: String,
        /// Previous status.
        from: InstanceStatus,
        /// New status.
        to: InstanceStatus,
    },
}

/// Spawn the reconciliation loop.
///
/// The first pass runs immediately. The task exits when `cancel` fires or
/// the receiving side of `tx` is dropped.
#[must_use]
pub fn spawn_status_monitor(
    manager: Arc<InstanceManager>,
    interval: Duration,
    tx: mpsc::Sender<StatusEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("status monitor shutting down");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let transitions = match manager.refresh_statuses().await {
                Ok(transitions) => transitions,
                Err(err) => {
                    warn!(%err, "status refresh failed");
                    continue;
                }
            };

            for transition in transitions {
                let event = StatusEvent::Changed {
                    instance_id: transition.instance_id,
                    from: transition.from,
                    to: transition.to,
                };
                if tx.send(event).await.is_err() {
                    debug!("status event receiver dropped");
                    return;
                }
            }
        }
    })
}
