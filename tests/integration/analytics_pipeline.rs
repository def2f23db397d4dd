//! Integration tests for the analyzer task
//!
//! The analyzer is driven against a hand-seeded metric store, so every
//! statistical path is exercised without waiting on real probes.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::RwLock;

use vigil::alerts::AlertKind;
use vigil::analytics::{ForecastTrend, TrendDirection};
use vigil::config::AnalyzerSettings;
use vigil::engine::{AlertHandle, AnalyzerHandle};
use vigil::metrics::{MetricKind, MetricStore};

fn seeded_store() -> Arc<RwLock<MetricStore>> {
    Arc::new(RwLock::new(MetricStore::new()))
}

fn spawn_analyzer(store: Arc<RwLock<MetricStore>>) -> (AnalyzerHandle, AlertHandle) {
    let alerts = AlertHandle::spawn(Vec::new(), chrono::Duration::minutes(5));
    let analyzer = AnalyzerHandle::spawn(store, alerts.clone(), AnalyzerSettings::default());
    (analyzer, alerts)
}

async fn seed_series(store: &RwLock<MetricStore>, kind: MetricKind, values: &[f64]) {
    let mut guard = store.write().await;
    let base = Utc::now() - Duration::minutes(values.len() as i64);

    for (i, value) in values.iter().enumerate() {
        guard.record_sample("svc", kind, *value, base + Duration::minutes(i as i64));
    }
}

#[tokio::test]
async fn test_report_covers_baseline_trend_and_forecast() {
    let store = seeded_store();
    let rising: Vec<f64> = (0..20).map(|i| 100.0 + 10.0 * i as f64).collect();
    seed_series(&store, MetricKind::ResponseTime, &rising).await;

    let (analyzer, _alerts) = spawn_analyzer(store);
    analyzer.run_now().await;

    let report = analyzer.report("svc").await.unwrap();
    let metric = report
        .metrics
        .iter()
        .find(|m| m.kind == MetricKind::ResponseTime)
        .unwrap();

    assert!(metric.baseline.is_some());
    assert_eq!(metric.trend, TrendDirection::Degrading);

    let forecast = metric.forecast.unwrap();
    assert_eq!(forecast.trend, ForecastTrend::Increasing);
    assert!(forecast.predicted > 290.0);

    analyzer.shutdown().await;
}

#[tokio::test]
async fn test_latest_spike_raises_anomaly_alert() {
    let store = seeded_store();
    let mut values = vec![100.0; 50];
    values.push(5000.0);
    seed_series(&store, MetricKind::ResponseTime, &values).await;

    let (analyzer, alerts) = spawn_analyzer(store);
    analyzer.run_now().await;

    let report = analyzer.report("svc").await.unwrap();
    assert_eq!(report.anomalies.len(), 1);
    assert_eq!(report.anomalies[0].value, 5000.0);

    let recent = alerts.recent_alerts(1).await;
    assert_eq!(recent.len(), 1);
    assert_eq!(
        recent[0].kind,
        AlertKind::Anomaly(MetricKind::ResponseTime)
    );

    analyzer.shutdown().await;
}

#[tokio::test]
async fn test_steady_series_raises_nothing() {
    let store = seeded_store();
    seed_series(&store, MetricKind::ResponseTime, &vec![100.0; 60]).await;

    let (analyzer, alerts) = spawn_analyzer(store);
    analyzer.run_now().await;

    let report = analyzer.report("svc").await.unwrap();
    assert!(report.anomalies.is_empty());
    assert!(report.recommendations.is_empty());
    assert!(alerts.recent_alerts(1).await.is_empty());

    analyzer.shutdown().await;
}

#[tokio::test]
async fn test_insufficient_data_is_a_gate_not_an_error() {
    let store = seeded_store();
    seed_series(&store, MetricKind::ResponseTime, &[100.0, 110.0, 105.0]).await;

    let (analyzer, _alerts) = spawn_analyzer(store);
    analyzer.run_now().await;

    let report = analyzer.report("svc").await.unwrap();
    let metric = &report.metrics[0];

    assert!(metric.baseline.is_none());
    assert!(metric.forecast.is_none());
    assert!(report.anomalies.is_empty());

    analyzer.shutdown().await;
}

#[tokio::test]
async fn test_flapping_status_flags_unstable_service() {
    let store = seeded_store();
    // 7 alternating states -> 6 transitions, above the default limit of 5.
    let flapping: Vec<f64> = (0..7).map(|i| (i % 2) as f64).collect();
    seed_series(&store, MetricKind::Status, &flapping).await;

    let (analyzer, alerts) = spawn_analyzer(store);
    analyzer.run_now().await;

    let recent = alerts.recent_alerts(1).await;
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].kind, AlertKind::UnstableService);

    analyzer.shutdown().await;
}

#[tokio::test]
async fn test_resource_pressure_recommendation() {
    let store = seeded_store();
    // CPU degrading above 80% while response time degrades too.
    let cpu: Vec<f64> = (0..20).map(|i| 80.0 + 0.5 * i as f64).collect();
    let response: Vec<f64> = (0..20).map(|i| 200.0 + 20.0 * i as f64).collect();
    seed_series(&store, MetricKind::CpuUsage, &cpu).await;
    seed_series(&store, MetricKind::ResponseTime, &response).await;

    let (analyzer, _alerts) = spawn_analyzer(store);
    analyzer.run_now().await;

    let report = analyzer.report("svc").await.unwrap();
    assert_eq!(report.recommendations.len(), 1);
    assert!(report.recommendations[0].message.contains("bottleneck"));

    analyzer.shutdown().await;
}

#[tokio::test]
async fn test_reports_follow_service_removal() {
    let store = seeded_store();
    seed_series(&store, MetricKind::ResponseTime, &vec![100.0; 10]).await;

    let (analyzer, _alerts) = spawn_analyzer(Arc::clone(&store));
    analyzer.run_now().await;
    assert!(analyzer.report("svc").await.is_some());

    store.write().await.remove_service("svc");
    analyzer.run_now().await;

    assert!(analyzer.report("svc").await.is_none());
    assert!(analyzer.reports().await.is_empty());

    analyzer.shutdown().await;
}
