//! Monitor task - owns the status table and the probe schedule
//!
//! One periodic tick fans out probes for every target concurrently, bounded
//! by a semaphore so a large fleet cannot open arbitrarily many sockets at
//! once. The tick completes when every probe has settled or timed out, so
//! its duration is bounded by the slowest single probe, not the sum.
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → concurrent probes → status table + metric store → alert task
//!     ↑
//!     └─── Commands (Start, Stop, CheckNow, UpdateTargets, queries, Shutdown)
//! ```
//!
//! Starting is idempotent and stopping only disarms the timer; a late probe
//! result still applies cleanly because status updates are keyed overwrites.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::Utc;
use futures::future::join_all;
use serde_json::json;
use tokio::sync::{RwLock, Semaphore, mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, instrument, trace, warn};

use crate::alerts::{Alert, AlertKind, AlertSeverity};
use crate::config::{MonitorSettings, ServiceTarget};
use crate::metrics::MetricStore;
use crate::probe::Prober;
use crate::{CheckResult, ServiceStatus, StatusRecord};

use super::alert::AlertHandle;
use super::messages::{ExportFormat, ExportPayload, MonitorCommand, MonitoringStats};

/// Seconds between retention sweeps over the metric store.
const STORE_CLEANUP_INTERVAL_SECS: u64 = 3600;

/// CSV header for exports. Consumers parse this verbatim.
const EXPORT_CSV_HEADER: &str = "Timestamp,Service,Status,Response Time,Uptime %";

pub struct MonitorActor {
    targets: Vec<ServiceTarget>,

    /// Per-service status table, keyed by service id.
    statuses: HashMap<String, StatusRecord>,

    prober: Arc<Prober>,

    store: Arc<RwLock<MetricStore>>,

    alerts: AlertHandle,

    command_rx: mpsc::Receiver<MonitorCommand>,

    /// Caps how many probes run at once within a tick.
    probe_permits: Arc<Semaphore>,

    interval_duration: Duration,

    running: bool,

    started_at: Instant,

    last_check: Option<chrono::DateTime<Utc>>,
}

impl MonitorActor {
    pub fn new(
        targets: Vec<ServiceTarget>,
        prober: Arc<Prober>,
        store: Arc<RwLock<MetricStore>>,
        alerts: AlertHandle,
        command_rx: mpsc::Receiver<MonitorCommand>,
        settings: &MonitorSettings,
    ) -> Self {
        let statuses = targets
            .iter()
            .map(|target| (target.id.clone(), StatusRecord::pending()))
            .collect();

        Self {
            targets,
            statuses,
            prober,
            store,
            alerts,
            command_rx,
            probe_permits: Arc::new(Semaphore::new(settings.max_concurrent_probes)),
            interval_duration: Duration::from_secs(settings.interval_secs),
            running: false,
            started_at: Instant::now(),
            last_check: None,
        }
    }

    /// Run the task's main loop until shutdown.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting monitor task for {} services", self.targets.len());

        let mut ticker = interval(self.interval_duration);
        let mut cleanup_ticker = interval(Duration::from_secs(STORE_CLEANUP_INTERVAL_SECS));

        loop {
            tokio::select! {
                _ = ticker.tick(), if self.running => {
                    self.run_tick().await;
                }

                _ = cleanup_ticker.tick() => {
                    let removed = self.store.write().await.cleanup(Utc::now());
                    if removed > 0 {
                        debug!("retention sweep removed {removed} points");
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        MonitorCommand::Start { interval: new_interval } => {
                            if self.running {
                                debug!("already running, ignoring start");
                            } else {
                                debug!("starting schedule with interval {new_interval:?}");
                                self.interval_duration = new_interval;
                                // A fresh ticker fires immediately: the
                                // first full pass happens right away.
                                ticker = interval(self.interval_duration);
                                self.running = true;
                            }
                        }

                        MonitorCommand::Stop => {
                            debug!("stopping schedule");
                            self.running = false;
                        }

                        MonitorCommand::CheckNow { service_id, respond_to } => {
                            let result = self.check_one(&service_id).await;
                            let _ = respond_to.send(result);
                        }

                        MonitorCommand::UpdateTargets { targets } => {
                            self.update_targets(targets).await;
                        }

                        MonitorCommand::GetStatuses { respond_to } => {
                            let _ = respond_to.send(self.statuses.clone());
                        }

                        MonitorCommand::GetStatus { service_id, respond_to } => {
                            let _ = respond_to.send(self.statuses.get(&service_id).cloned());
                        }

                        MonitorCommand::GetStats { respond_to } => {
                            let _ = respond_to.send(self.stats());
                        }

                        MonitorCommand::Export { format, timeframe, respond_to } => {
                            let _ = respond_to.send(self.export(format, &timeframe).await);
                        }

                        MonitorCommand::Shutdown => {
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

        debug!("monitor task stopped");
    }

    /// One full monitoring pass over every target.
    #[instrument(skip(self))]
    async fn run_tick(&mut self) {
        trace!("monitoring pass over {} services", self.targets.len());

        let checks = self.targets.iter().map(|target| {
            let prober = Arc::clone(&self.prober);
            let permits = Arc::clone(&self.probe_permits);
            let target = target.clone();

            async move {
                let _permit = permits.acquire_owned().await.ok();
                let result = prober.check(&target).await;
                (target.id.clone(), result)
            }
        });

        for (service_id, result) in join_all(checks).await {
            self.apply_result(&service_id, result).await;
        }

        self.record_health_sample().await;
        self.last_check = Some(Utc::now());
    }

    /// Merge one check result: overwrite the status record, append to the
    /// metric store, and raise a status-change alert on transitions.
    async fn apply_result(&mut self, service_id: &str, result: CheckResult) {
        let Some(target) = self.targets.iter().find(|t| t.id == service_id) else {
            trace!("late result for removed service {service_id}, ignoring");
            return;
        };

        let previous = self.statuses.get(service_id).map(|record| record.status);

        self.statuses
            .insert(service_id.to_string(), StatusRecord::from_check(&result));
        self.store.write().await.record_check(service_id, &result);

        let Some(previous) = previous else { return };
        if previous == result.status {
            return;
        }

        debug!(
            "{}: status changed {previous} -> {}",
            target.display_name(),
            result.status
        );

        let severity = match result.status {
            ServiceStatus::Offline | ServiceStatus::Error => AlertSeverity::Error,
            _ => AlertSeverity::Info,
        };

        let message = match &result.error {
            Some(error) => format!(
                "{} changed status: {previous} -> {} ({error})",
                target.display_name(),
                result.status
            ),
            None => format!(
                "{} changed status: {previous} -> {}",
                target.display_name(),
                result.status
            ),
        };

        self.alerts
            .dispatch(Alert::new(
                AlertKind::StatusChange(result.status),
                severity,
                service_id,
                message,
            ))
            .await;
    }

    /// Check one service on demand, bypassing the schedule.
    async fn check_one(&mut self, service_id: &str) -> anyhow::Result<StatusRecord> {
        let target = self
            .targets
            .iter()
            .find(|t| t.id == service_id)
            .cloned()
            .with_context(|| format!("unknown service '{service_id}'"))?;

        let result = self.prober.check(&target).await;
        self.apply_result(&target.id, result).await;

        self.statuses
            .get(service_id)
            .cloned()
            .context("status record missing after check")
    }

    /// Replace the working set. Removed services lose their status records
    /// and series; new ones are seeded pending.
    async fn update_targets(&mut self, targets: Vec<ServiceTarget>) {
        debug!(
            "replacing {} targets with {}",
            self.targets.len(),
            targets.len()
        );

        let new_ids: HashSet<&str> = targets.iter().map(|t| t.id.as_str()).collect();

        let removed: Vec<String> = self
            .statuses
            .keys()
            .filter(|id| !new_ids.contains(id.as_str()))
            .cloned()
            .collect();

        let mut store = self.store.write().await;
        for service_id in removed {
            self.statuses.remove(&service_id);
            store.remove_service(&service_id);
        }
        drop(store);

        for target in &targets {
            self.statuses
                .entry(target.id.clone())
                .or_insert_with(StatusRecord::pending);
        }

        self.targets = targets;
    }

    fn stats(&self) -> MonitoringStats {
        let count = |status: ServiceStatus| {
            self.statuses
                .values()
                .filter(|record| record.status == status)
                .count()
        };

        MonitoringStats {
            total_services: self.statuses.len(),
            online_services: count(ServiceStatus::Online),
            offline_services: count(ServiceStatus::Offline),
            errored_services: count(ServiceStatus::Error),
            pending_services: count(ServiceStatus::Pending),
            last_check: self.last_check,
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    /// Record the fleet-wide health score: percentage of checked services
    /// currently online.
    async fn record_health_sample(&self) {
        let checked: Vec<ServiceStatus> = self
            .statuses
            .values()
            .map(|record| record.status)
            .filter(|status| *status != ServiceStatus::Pending)
            .collect();

        if checked.is_empty() {
            return;
        }

        let online = checked
            .iter()
            .filter(|status| **status == ServiceStatus::Online)
            .count();
        let score = online as f64 / checked.len() as f64 * 100.0;

        self.store
            .write()
            .await
            .record_system_health(score, Utc::now());
    }

    /// Render the fleet's state over a timeframe as JSON or CSV. One row
    /// per service with a recorded (non-pending) status.
    async fn export(
        &self,
        format: ExportFormat,
        timeframe: &str,
    ) -> anyhow::Result<ExportPayload> {
        let store = self.store.read().await;
        let mut rows = Vec::new();

        for target in &self.targets {
            let Some(record) = self.statuses.get(&target.id) else {
                continue;
            };
            if record.status == ServiceStatus::Pending {
                continue;
            }

            let metrics = store.service_metrics(&target.id, timeframe)?;
            rows.push((target, record.clone(), metrics));
        }

        match format {
            ExportFormat::Csv => {
                let mut csv = String::from(EXPORT_CSV_HEADER);
                csv.push('\n');

                for (target, record, metrics) in rows {
                    let response_time = record
                        .response_time_ms
                        .map(|ms| ms.to_string())
                        .unwrap_or_default();

                    csv.push_str(&format!(
                        "{},{},{},{},{}\n",
                        record.timestamp.to_rfc3339(),
                        target.display_name(),
                        record.status,
                        response_time,
                        metrics.uptime_pct,
                    ));
                }

                Ok(ExportPayload::Csv(csv))
            }

            ExportFormat::Json => {
                let services: Vec<serde_json::Value> = rows
                    .into_iter()
                    .map(|(target, record, metrics)| {
                        json!({
                            "id": target.id,
                            "name": target.display_name(),
                            "status": record.status,
                            "response_time_ms": record.response_time_ms,
                            "last_check": record.timestamp,
                            "uptime_pct": metrics.uptime_pct,
                            "average_response_time": metrics.average_response_time,
                        })
                    })
                    .collect();

                Ok(ExportPayload::Json(json!({
                    "generated_at": Utc::now(),
                    "timeframe": timeframe,
                    "services": services,
                })))
            }
        }
    }
}

/// Handle for controlling the monitor task.
#[derive(Clone)]
pub struct MonitorHandle {
    sender: mpsc::Sender<MonitorCommand>,
}

impl MonitorHandle {
    /// Spawn the monitor task. The schedule stays disarmed until
    /// [`MonitorHandle::start`] is called.
    pub fn spawn(
        targets: Vec<ServiceTarget>,
        prober: Arc<Prober>,
        store: Arc<RwLock<MetricStore>>,
        alerts: AlertHandle,
        settings: &MonitorSettings,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        let actor = MonitorActor::new(targets, prober, store, alerts, cmd_rx, settings);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Begin scheduling passes; the first pass runs immediately. Calling
    /// this while running is a no-op.
    pub async fn start(&self, interval: Duration) {
        let _ = self.sender.send(MonitorCommand::Start { interval }).await;
    }

    /// Disarm the schedule without cancelling in-flight work.
    pub async fn stop(&self) {
        let _ = self.sender.send(MonitorCommand::Stop).await;
    }

    /// Check one service immediately and return its fresh record.
    pub async fn check_now(&self, service_id: impl ToString) -> anyhow::Result<StatusRecord> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::CheckNow {
                service_id: service_id.to_string(),
                respond_to: tx,
            })
            .await
            .context("monitor task is gone")?;

        rx.await.context("monitor task dropped the request")?
    }

    /// Replace the set of monitored services.
    pub async fn update_targets(&self, targets: Vec<ServiceTarget>) {
        let _ = self
            .sender
            .send(MonitorCommand::UpdateTargets { targets })
            .await;
    }

    pub async fn statuses(&self) -> HashMap<String, StatusRecord> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(MonitorCommand::GetStatuses { respond_to: tx })
            .await
            .is_err()
        {
            return HashMap::new();
        }

        rx.await.unwrap_or_default()
    }

    pub async fn status(&self, service_id: impl ToString) -> Option<StatusRecord> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::GetStatus {
                service_id: service_id.to_string(),
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok()?
    }

    pub async fn stats(&self) -> Option<MonitoringStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::GetStats { respond_to: tx })
            .await
            .ok()?;

        rx.await.ok()
    }

    pub async fn export(
        &self,
        format: ExportFormat,
        timeframe: impl ToString,
    ) -> anyhow::Result<ExportPayload> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::Export {
                format,
                timeframe: timeframe.to_string(),
                respond_to: tx,
            })
            .await
            .context("monitor task is gone")?;

        rx.await.context("monitor task dropped the request")?
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(MonitorCommand::Shutdown).await;
    }
}
