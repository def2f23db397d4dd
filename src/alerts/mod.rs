//! Alert taxonomy, deduplication and multi-channel dispatch
//!
//! The dispatcher owns all alerting state: the bounded history, the active
//! dedup entries and the maintenance windows. Delivery fans out to every
//! enabled channel concurrently; a failing channel is logged and recorded on
//! the alert, never propagated, so one dead webhook cannot block the rest.
//!
//! ## Dispatch pipeline
//!
//! ```text
//! send(alert)
//!   ├─ inside a maintenance window?   → dropped, no history entry
//!   ├─ same service+kind < cooldown?  → deduplicated, no history entry
//!   └─ otherwise                      → fan out to channels, record history,
//!                                       refresh the active entry
//! ```

use std::collections::{HashMap, VecDeque};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, instrument, trace, warn};
use uuid::Uuid;

use crate::ServiceStatus;
use crate::metrics::MetricKind;

pub mod channels;

use channels::{AlertChannel, ChannelError};

/// Alerts kept in history before the oldest is evicted.
pub const MAX_HISTORY: usize = 1000;

/// History entries older than this are removed by cleanup.
const HISTORY_RETENTION_DAYS: i64 = 7;

/// Dedup entries not refreshed within this window are expired.
const ACTIVE_ENTRY_EXPIRY_MINUTES: i64 = 60;

/// Upper bound on results from a recent-alerts query.
const RECENT_QUERY_CAP: usize = 100;

/// One channel send may not take longer than this.
const CHANNEL_SEND_TIMEOUT: StdDuration = StdDuration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertSeverity {
    /// Embed color for rich channels.
    pub fn color(&self) -> u32 {
        match self {
            AlertSeverity::Info => 5793266,      // Light blue
            AlertSeverity::Warning => 16753920,  // Orange
            AlertSeverity::Error => 15158332,    // Red
            AlertSeverity::Critical => 10038562, // Dark red
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "ℹ️",
            AlertSeverity::Warning => "⚠️",
            AlertSeverity::Error => "🔴",
            AlertSeverity::Critical => "🚨",
        }
    }

    /// Priority mapping for push channels.
    pub fn push_priority(&self) -> i8 {
        match self {
            AlertSeverity::Info => -1,
            AlertSeverity::Warning => 0,
            AlertSeverity::Error => 1,
            AlertSeverity::Critical => 2,
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Info => write!(f, "INFO"),
            AlertSeverity::Warning => write!(f, "WARNING"),
            AlertSeverity::Error => write!(f, "ERROR"),
            AlertSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// What an alert is about. Part of the dedup key: a transition to a
/// different status, or an anomaly on a different metric, is a different
/// alert and must not be suppressed by an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// A status transition, tagged with the status the service moved to.
    StatusChange(ServiceStatus),
    Anomaly(MetricKind),
    UnstableService,
    Forecast(MetricKind),
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertKind::StatusChange(status) => write!(f, "status_change_{status}"),
            AlertKind::Anomaly(kind) => write!(f, "anomaly_{kind}"),
            AlertKind::UnstableService => write!(f, "unstable_service"),
            AlertKind::Forecast(kind) => write!(f, "forecast_{kind}"),
        }
    }
}

/// Outcome of one channel delivery attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelResult {
    pub channel: String,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: Uuid,
    pub kind: AlertKind,
    pub severity: AlertSeverity,

    /// Canonical service identifier; the only service field an alert has.
    pub service_id: String,

    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub channel_results: Vec<ChannelResult>,
}

impl Alert {
    pub fn new(
        kind: AlertKind,
        severity: AlertSeverity,
        service_id: impl ToString,
        message: impl ToString,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            severity,
            service_id: service_id.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
            channel_results: Vec::new(),
        }
    }
}

/// Dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AlertKey {
    pub service_id: String,
    pub kind: AlertKind,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ActiveAlertEntry {
    pub last_sent_at: DateTime<Utc>,
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceWindow {
    pub service_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AlertStats {
    pub total: usize,
    pub by_kind: HashMap<String, usize>,
    pub by_severity: HashMap<String, usize>,
    pub by_service: HashMap<String, usize>,
}

/// What `send` did with an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// Same service+kind dispatched less than a cooldown ago.
    Deduplicated,
    /// The service is inside a maintenance window.
    Silenced,
}

pub struct AlertDispatcher {
    channels: Vec<Box<dyn AlertChannel>>,
    history: VecDeque<Alert>,
    active: HashMap<AlertKey, ActiveAlertEntry>,
    windows: Vec<MaintenanceWindow>,
    cooldown: Duration,
}

impl AlertDispatcher {
    pub fn new(channels: Vec<Box<dyn AlertChannel>>, cooldown: Duration) -> Self {
        Self {
            channels,
            history: VecDeque::new(),
            active: HashMap::new(),
            windows: Vec::new(),
            cooldown,
        }
    }

    /// Dispatch one alert through the pipeline described in the module doc.
    #[instrument(skip(self, alert), fields(service = %alert.service_id, kind = %alert.kind))]
    pub async fn send(&mut self, mut alert: Alert) -> DispatchOutcome {
        let now = Utc::now();

        if self.in_maintenance(&alert.service_id, now) {
            trace!("service is in maintenance, dropping alert");
            return DispatchOutcome::Silenced;
        }

        let key = AlertKey {
            service_id: alert.service_id.clone(),
            kind: alert.kind,
        };

        if let Some(entry) = self.active.get(&key) {
            if now - entry.last_sent_at < self.cooldown {
                trace!(
                    "deduplicated, last sent {}s ago",
                    (now - entry.last_sent_at).num_seconds()
                );
                return DispatchOutcome::Deduplicated;
            }
        }

        alert.channel_results = self.fan_out(&alert).await;

        self.history.push_back(alert);
        while self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }

        let entry = self.active.entry(key).or_insert(ActiveAlertEntry {
            last_sent_at: now,
            attempts: 0,
        });
        entry.last_sent_at = now;
        entry.attempts += 1;

        DispatchOutcome::Delivered
    }

    /// Deliver to every channel concurrently; each send is individually
    /// timeout-bounded and caught.
    async fn fan_out(&self, alert: &Alert) -> Vec<ChannelResult> {
        let sends = self.channels.iter().map(|channel| async {
            let name = channel.name().to_string();

            let outcome = tokio::time::timeout(CHANNEL_SEND_TIMEOUT, channel.send(alert))
                .await
                .unwrap_or(Err(ChannelError::Timeout));

            match outcome {
                Ok(()) => {
                    debug!("delivered alert via {name}");
                    ChannelResult {
                        channel: name,
                        success: true,
                        error: None,
                    }
                }
                Err(e) => {
                    warn!("failed to deliver alert via {name}: {e}");
                    ChannelResult {
                        channel: name,
                        success: false,
                        error: Some(e.to_string()),
                    }
                }
            }
        });

        join_all(sends).await
    }

    /// Open a maintenance window suppressing alerts for the service.
    pub fn silence(&mut self, service_id: impl ToString, duration_minutes: i64, reason: impl ToString) {
        let now = Utc::now();
        self.windows.push(MaintenanceWindow {
            service_id: service_id.to_string(),
            start: now,
            end: now + Duration::minutes(duration_minutes),
            reason: reason.to_string(),
        });
    }

    fn in_maintenance(&self, service_id: &str, now: DateTime<Utc>) -> bool {
        self.windows
            .iter()
            .any(|w| w.service_id == service_id && w.start <= now && now < w.end)
    }

    /// History from the last `hours`, newest first, capped at 100.
    pub fn recent_alerts(&self, hours: i64) -> Vec<Alert> {
        let cutoff = Utc::now() - Duration::hours(hours);

        let mut recent: Vec<Alert> = self
            .history
            .iter()
            .filter(|alert| alert.timestamp >= cutoff)
            .cloned()
            .collect();

        recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        recent.truncate(RECENT_QUERY_CAP);
        recent
    }

    /// Current dedup entries.
    pub fn active_alerts(&self) -> Vec<(AlertKey, ActiveAlertEntry)> {
        self.active
            .iter()
            .map(|(key, entry)| (key.clone(), *entry))
            .collect()
    }

    /// Tabulated counts over the recent window.
    pub fn stats(&self, hours: i64) -> AlertStats {
        let cutoff = Utc::now() - Duration::hours(hours);
        let mut stats = AlertStats::default();

        for alert in self.history.iter().filter(|a| a.timestamp >= cutoff) {
            stats.total += 1;
            *stats.by_kind.entry(alert.kind.to_string()).or_default() += 1;
            *stats
                .by_severity
                .entry(alert.severity.to_string())
                .or_default() += 1;
            *stats
                .by_service
                .entry(alert.service_id.clone())
                .or_default() += 1;
        }

        stats
    }

    /// Expire old history, closed maintenance windows and stale dedup
    /// entries.
    pub fn cleanup(&mut self, now: DateTime<Utc>) {
        let history_cutoff = now - Duration::days(HISTORY_RETENTION_DAYS);
        while self
            .history
            .front()
            .is_some_and(|a| a.timestamp < history_cutoff)
        {
            self.history.pop_front();
        }

        self.windows.retain(|w| w.end > now);

        let active_cutoff = now - Duration::minutes(ACTIVE_ENTRY_EXPIRY_MINUTES);
        self.active
            .retain(|_, entry| entry.last_sent_at >= active_cutoff);
    }
}
