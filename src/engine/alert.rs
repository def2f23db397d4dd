//! Alert task - owns the dispatcher state
//!
//! All dedup, history and maintenance-window state lives inside this task;
//! other tasks reach it through [`AlertHandle`]. A periodic sweep expires
//! old history, closed windows and stale dedup entries.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, instrument, warn};

use crate::alerts::{
    ActiveAlertEntry, Alert, AlertDispatcher, AlertKey, AlertStats, channels::AlertChannel,
};

use super::messages::AlertCommand;

/// Seconds between cleanup sweeps.
const CLEANUP_INTERVAL_SECS: u64 = 600;

pub struct AlertActor {
    dispatcher: AlertDispatcher,
    command_rx: mpsc::Receiver<AlertCommand>,
}

impl AlertActor {
    pub fn new(dispatcher: AlertDispatcher, command_rx: mpsc::Receiver<AlertCommand>) -> Self {
        Self {
            dispatcher,
            command_rx,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting alert task");

        let mut cleanup_ticker = interval(Duration::from_secs(CLEANUP_INTERVAL_SECS));

        loop {
            tokio::select! {
                _ = cleanup_ticker.tick() => {
                    self.dispatcher.cleanup(Utc::now());
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        AlertCommand::Dispatch { alert } => {
                            self.dispatcher.send(alert).await;
                        }

                        AlertCommand::Silence { service_id, duration_minutes, reason } => {
                            debug!("silencing {service_id} for {duration_minutes}m: {reason}");
                            self.dispatcher.silence(service_id, duration_minutes, reason);
                        }

                        AlertCommand::GetRecent { hours, respond_to } => {
                            let _ = respond_to.send(self.dispatcher.recent_alerts(hours));
                        }

                        AlertCommand::GetActive { respond_to } => {
                            let _ = respond_to.send(self.dispatcher.active_alerts());
                        }

                        AlertCommand::GetStats { hours, respond_to } => {
                            let _ = respond_to.send(self.dispatcher.stats(hours));
                        }

                        AlertCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("alert task stopped");
    }
}

/// Handle for the alert task.
#[derive(Clone)]
pub struct AlertHandle {
    sender: mpsc::Sender<AlertCommand>,
}

impl AlertHandle {
    /// Spawn the alert task with the given channels and dedup cooldown.
    pub fn spawn(channels: Vec<Box<dyn AlertChannel>>, cooldown: chrono::Duration) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        let actor = AlertActor::new(AlertDispatcher::new(channels, cooldown), cmd_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Queue one alert for dispatch. Dedup and silencing are applied by the
    /// task.
    pub async fn dispatch(&self, alert: Alert) {
        let _ = self.sender.send(AlertCommand::Dispatch { alert }).await;
    }

    pub async fn silence(
        &self,
        service_id: impl ToString,
        duration_minutes: i64,
        reason: impl ToString,
    ) {
        let _ = self
            .sender
            .send(AlertCommand::Silence {
                service_id: service_id.to_string(),
                duration_minutes,
                reason: reason.to_string(),
            })
            .await;
    }

    pub async fn recent_alerts(&self, hours: i64) -> Vec<Alert> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(AlertCommand::GetRecent {
                hours,
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    pub async fn active_alerts(&self) -> Vec<(AlertKey, ActiveAlertEntry)> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(AlertCommand::GetActive { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    pub async fn stats(&self, hours: i64) -> AlertStats {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(AlertCommand::GetStats {
                hours,
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return AlertStats::default();
        }

        rx.await.unwrap_or_default()
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(AlertCommand::Shutdown).await;
    }
}
