//! Per-epoch heartbeat task.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{trace, warn};

use crate::notify::connection::{ConnectionManager, Link};
use crate::notify::error::NotifyError;
use crate::notify::proto::Command;

/// Sends a heartbeat on `link` every heartbeat interval until the link's
/// token is cancelled or a write fails.
///
/// The first heartbeat goes out one full interval after the link is up.
pub(crate) fn spawn(manager: Arc<ConnectionManager>, link: Arc<Link>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = manager.options().heartbeat_interval;
        let mut ticks = interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = link.token().cancelled() => break,
                _ = ticks.tick() => {}
            }

            let command = Command::heartbeat(manager.api().next_request_id());
            match manager.send(&link, &command).await {
                Ok(()) => trace!(event = "notify_heartbeat_sent", epoch = link.epoch()),
                Err(NotifyError::Codec(err)) => {
                    warn!(event = "notify_heartbeat_encode_failed", error = %err);
                }
                Err(err) => {
                    warn!(event = "notify_heartbeat_failed", epoch = link.epoch(), error = %err);
                    break;
                }
            }
        }
    })
}
