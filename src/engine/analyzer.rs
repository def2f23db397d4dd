//! Analyzer task - periodic statistics over the metric store
//!
//! Runs on its own timer, fully decoupled from probing: a slow analysis
//! pass can never delay a monitoring tick. Each pass works on a snapshot of
//! the store (copy-on-read), recomputes every service's report from
//! scratch, and forwards fresh anomalies to the alert task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, instrument, trace, warn};

use crate::alerts::{Alert, AlertKind, AlertSeverity};
use crate::analytics::{
    Anomaly, AnomalySeverity, Baseline, Forecast, MetricAssessment, Recommendation, Thresholds,
    TrendDirection, classify_trend, detect_outlier, detect_unstable, holt_forecast, recommend,
};
use crate::config::AnalyzerSettings;
use crate::metrics::{MetricKind, MetricStore, RAW_RETENTION_HOURS};

use super::alert::AlertHandle;
use super::messages::AnalyzerCommand;

/// Metric kinds the analyzer examines per service.
const ANALYZED_KINDS: [MetricKind; 5] = [
    MetricKind::ResponseTime,
    MetricKind::CpuUsage,
    MetricKind::MemoryUsage,
    MetricKind::DiskUsage,
    MetricKind::Uptime,
];

/// Everything the last analysis pass derived for one metric.
#[derive(Debug, Clone, Serialize)]
pub struct MetricReport {
    pub kind: MetricKind,
    pub baseline: Option<Baseline>,
    pub trend: TrendDirection,
    pub average: f64,
    pub forecast: Option<Forecast>,
}

/// Per-service result of one analysis pass. Recomputed wholesale, never
/// incrementally updated.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub service_id: String,
    pub generated_at: DateTime<Utc>,
    pub metrics: Vec<MetricReport>,
    pub anomalies: Vec<Anomaly>,
    pub recommendations: Vec<Recommendation>,
}

pub struct AnalyzerActor {
    store: Arc<RwLock<MetricStore>>,
    alerts: AlertHandle,
    command_rx: mpsc::Receiver<AnalyzerCommand>,
    reports: HashMap<String, AnalysisReport>,
    settings: AnalyzerSettings,
    thresholds: Thresholds,
}

impl AnalyzerActor {
    pub fn new(
        store: Arc<RwLock<MetricStore>>,
        alerts: AlertHandle,
        command_rx: mpsc::Receiver<AnalyzerCommand>,
        settings: AnalyzerSettings,
    ) -> Self {
        let thresholds = Thresholds {
            mad: settings.mad_threshold,
            z_score: settings.z_score_threshold,
            critical: settings.critical_score,
        };

        Self {
            store,
            alerts,
            command_rx,
            reports: HashMap::new(),
            settings,
            thresholds,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting analyzer task");

        let mut ticker = interval(Duration::from_secs(self.settings.interval_secs));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_pass().await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        AnalyzerCommand::RunNow { respond_to } => {
                            self.run_pass().await;
                            let _ = respond_to.send(());
                        }

                        AnalyzerCommand::GetReport { service_id, respond_to } => {
                            let _ = respond_to.send(self.reports.get(&service_id).cloned());
                        }

                        AnalyzerCommand::GetReports { respond_to } => {
                            let _ = respond_to.send(self.reports.values().cloned().collect());
                        }

                        AnalyzerCommand::Shutdown => {
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

        debug!("analyzer task stopped");
    }

    /// One analysis pass over a snapshot of every service's series.
    #[instrument(skip(self))]
    async fn run_pass(&mut self) {
        let snapshot = self.store.read().await.clone();
        let now = Utc::now();
        let retention_cutoff = now - chrono::Duration::hours(RAW_RETENTION_HOURS);
        let stability_cutoff = now - chrono::Duration::minutes(self.settings.window_minutes);

        for service_id in snapshot.service_ids() {
            let report = self
                .analyze_service(&snapshot, &service_id, retention_cutoff, stability_cutoff)
                .await;

            trace!(
                "{service_id}: {} anomalies, {} recommendations",
                report.anomalies.len(),
                report.recommendations.len()
            );

            self.reports.insert(service_id, report);
        }

        // Reports for removed services age out with their series.
        let known = snapshot.service_ids();
        self.reports.retain(|id, _| known.contains(id));
    }

    async fn analyze_service(
        &self,
        snapshot: &MetricStore,
        service_id: &str,
        retention_cutoff: DateTime<Utc>,
        stability_cutoff: DateTime<Utc>,
    ) -> AnalysisReport {
        let mut metrics = Vec::new();
        let mut anomalies = Vec::new();
        let mut assessments = Vec::new();

        for kind in ANALYZED_KINDS {
            let points = snapshot.points_since(service_id, kind, retention_cutoff);
            if points.is_empty() {
                continue;
            }

            let values: Vec<f64> = points.iter().map(|p| p.value).collect();
            let baseline = Baseline::compute(&values);
            let trend = classify_trend(&values, kind);
            let average = values.iter().sum::<f64>() / values.len() as f64;
            let forecast = holt_forecast(&values);

            if let (Some(baseline), Some(latest)) = (&baseline, values.last()) {
                if let Some(anomaly) = detect_outlier(*latest, baseline, &self.thresholds) {
                    self.raise_anomaly_alert(service_id, AlertKind::Anomaly(kind), &anomaly)
                        .await;
                    anomalies.push(anomaly);
                }
            }

            assessments.push(MetricAssessment {
                kind,
                trend,
                average,
                forecast,
            });

            metrics.push(MetricReport {
                kind,
                baseline,
                trend,
                average,
                forecast,
            });
        }

        let status_points =
            snapshot.points_since(service_id, MetricKind::Status, stability_cutoff);
        if let Some(anomaly) =
            detect_unstable(&status_points, self.settings.max_status_changes)
        {
            self.raise_anomaly_alert(service_id, AlertKind::UnstableService, &anomaly)
                .await;
            anomalies.push(anomaly);
        }

        AnalysisReport {
            service_id: service_id.to_string(),
            generated_at: Utc::now(),
            metrics,
            anomalies,
            recommendations: recommend(&assessments),
        }
    }

    async fn raise_anomaly_alert(&self, service_id: &str, kind: AlertKind, anomaly: &Anomaly) {
        let severity = match anomaly.severity {
            AnomalySeverity::Warning => AlertSeverity::Warning,
            AnomalySeverity::Critical => AlertSeverity::Critical,
        };

        self.alerts
            .dispatch(Alert::new(
                kind,
                severity,
                service_id,
                anomaly.description.clone(),
            ))
            .await;
    }
}

/// Handle for the analyzer task.
#[derive(Clone)]
pub struct AnalyzerHandle {
    sender: mpsc::Sender<AnalyzerCommand>,
}

impl AnalyzerHandle {
    pub fn spawn(
        store: Arc<RwLock<MetricStore>>,
        alerts: AlertHandle,
        settings: AnalyzerSettings,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = AnalyzerActor::new(store, alerts, cmd_rx, settings);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Run an analysis pass immediately and wait for it to finish.
    pub async fn run_now(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(AnalyzerCommand::RunNow { respond_to: tx })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    pub async fn report(&self, service_id: impl ToString) -> Option<AnalysisReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AnalyzerCommand::GetReport {
                service_id: service_id.to_string(),
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok()?
    }

    pub async fn reports(&self) -> Vec<AnalysisReport> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(AnalyzerCommand::GetReports { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(AnalyzerCommand::Shutdown).await;
    }
}
