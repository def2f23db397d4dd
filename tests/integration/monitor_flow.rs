//! Integration tests for the probe-to-status pipeline
//!
//! These tests verify that:
//! - Probes map protocol outcomes onto the right statuses
//! - On-demand checks update the status table and metric store
//! - Target replacement reseeds state correctly
//! - Stats and exports reflect the fleet

use assert_matches::assert_matches;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vigil::ServiceStatus;
use vigil::engine::Engine;
use vigil::engine::messages::{ExportFormat, ExportPayload};
use vigil::probe::Protocol;

use crate::helpers::{closed_port_url, config_with, http_target, target};

#[tokio::test]
async fn test_http_check_online() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .mount(&mock_server)
        .await;

    let engine = Engine::spawn(&config_with(vec![http_target(
        "web",
        &format!("{}/health", mock_server.uri()),
    )]));

    let record = engine.monitor.check_now("web").await.unwrap();

    assert_eq!(record.status, ServiceStatus::Online);
    assert!(record.response_time_ms.is_some());
    assert!(record.error.is_none());

    engine.shutdown().await;
}

#[tokio::test]
async fn test_http_check_unexpected_status_is_offline() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let engine = Engine::spawn(&config_with(vec![http_target("web", &mock_server.uri())]));

    let record = engine.monitor.check_now("web").await.unwrap();

    assert_eq!(record.status, ServiceStatus::Offline);
    assert!(record.error.unwrap().contains("500"));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_http_check_accepts_configured_status() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let mut service = http_target("web", &mock_server.uri());
    service.expected_status = Some(vec![404]);

    let engine = Engine::spawn(&config_with(vec![service]));

    let record = engine.monitor.check_now("web").await.unwrap();
    assert_eq!(record.status, ServiceStatus::Online);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_http_check_body_substring() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":"healthy"}"#))
        .mount(&mock_server)
        .await;

    let mut matching = http_target("good", &mock_server.uri());
    matching.body_contains = Some("healthy".to_string());

    let mut missing = http_target("bad", &mock_server.uri());
    missing.body_contains = Some("degraded".to_string());

    let engine = Engine::spawn(&config_with(vec![matching, missing]));

    let record = engine.monitor.check_now("good").await.unwrap();
    assert_eq!(record.status, ServiceStatus::Online);

    let record = engine.monitor.check_now("bad").await.unwrap();
    assert_eq!(record.status, ServiceStatus::Offline);
    assert!(record.error.unwrap().contains("degraded"));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_tcp_check_closed_port_is_offline() {
    let url = closed_port_url().await;
    let engine = Engine::spawn(&config_with(vec![target("db", Protocol::Tcp, &url)]));

    let record = engine.monitor.check_now("db").await.unwrap();

    assert_eq!(record.status, ServiceStatus::Offline);
    assert!(record.error.is_some());

    engine.shutdown().await;
}

#[tokio::test]
async fn test_check_unknown_service_fails() {
    let engine = Engine::spawn(&config_with(vec![]));

    let result = engine.monitor.check_now("ghost").await;
    assert!(result.is_err());

    engine.shutdown().await;
}

#[tokio::test]
async fn test_statuses_seeded_pending() {
    let engine = Engine::spawn(&config_with(vec![
        http_target("a", "http://localhost:1/"),
        http_target("b", "http://localhost:2/"),
    ]));

    let statuses = engine.monitor.statuses().await;

    assert_eq!(statuses.len(), 2);
    assert!(
        statuses
            .values()
            .all(|record| record.status == ServiceStatus::Pending)
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn test_update_targets_replaces_working_set() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let engine = Engine::spawn(&config_with(vec![http_target("old", &mock_server.uri())]));
    engine.monitor.check_now("old").await.unwrap();

    engine
        .monitor
        .update_targets(vec![http_target("new", &mock_server.uri())])
        .await;

    let statuses = engine.monitor.statuses().await;
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses["new"].status, ServiceStatus::Pending);
    assert!(engine.monitor.status("old").await.is_none());

    engine.shutdown().await;
}

#[tokio::test]
async fn test_monitoring_stats_aggregate() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let closed = closed_port_url().await;
    let engine = Engine::spawn(&config_with(vec![
        http_target("up", &mock_server.uri()),
        target("down", Protocol::Tcp, &closed),
        http_target("untouched", &mock_server.uri()),
    ]));

    engine.monitor.check_now("up").await.unwrap();
    engine.monitor.check_now("down").await.unwrap();

    let stats = engine.monitor.stats().await.unwrap();
    assert_eq!(stats.total_services, 3);
    assert_eq!(stats.online_services, 1);
    assert_eq!(stats.offline_services, 1);
    assert_eq!(stats.pending_services, 1);
    assert_eq!(stats.errored_services, 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_scheduled_pass_runs_immediately_and_start_is_idempotent() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let engine = Engine::spawn(&config_with(vec![http_target("web", &mock_server.uri())]));

    engine.start().await;
    // Second start must be a no-op, not a second schedule.
    engine.start().await;

    tokio::time::sleep(std::time::Duration::from_millis(500)).await;

    let statuses = engine.monitor.statuses().await;
    assert_eq!(statuses["web"].status, ServiceStatus::Online);

    // The pass fed the metric store and the fleet health score.
    let metrics = engine.service_metrics("web", "1h").await.unwrap();
    assert_eq!(metrics.uptime_pct, 100.0);
    assert!(metrics.average_response_time.is_some());
    assert_eq!(engine.system_health().await.current_health, 100.0);

    engine.monitor.stop().await;
    engine.shutdown().await;
}

#[tokio::test]
async fn test_export_csv_one_row_per_checked_service() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let engine = Engine::spawn(&config_with(vec![
        http_target("a", &mock_server.uri()),
        http_target("b", &mock_server.uri()),
        http_target("never-checked", &mock_server.uri()),
    ]));

    engine.monitor.check_now("a").await.unwrap();
    engine.monitor.check_now("b").await.unwrap();

    let payload = engine
        .monitor
        .export(ExportFormat::Csv, "1h")
        .await
        .unwrap();

    let csv = assert_matches!(payload, ExportPayload::Csv(csv) => csv);
    let lines: Vec<&str> = csv.trim_end().lines().collect();

    assert_eq!(lines[0], "Timestamp,Service,Status,Response Time,Uptime %");
    assert_eq!(lines.len(), 3); // header + 2 services with recorded status
    assert!(lines[1].contains("online"));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_export_json_shape() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let engine = Engine::spawn(&config_with(vec![http_target("web", &mock_server.uri())]));
    engine.monitor.check_now("web").await.unwrap();

    let payload = engine
        .monitor
        .export(ExportFormat::Json, "1h")
        .await
        .unwrap();

    let value = assert_matches!(payload, ExportPayload::Json(value) => value);
    let services = value["services"].as_array().unwrap();

    assert_eq!(services.len(), 1);
    assert_eq!(services[0]["id"], "web");
    assert_eq!(services[0]["status"], "online");
    assert_eq!(services[0]["uptime_pct"], 100.0);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_export_rejects_bad_timeframe() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let engine = Engine::spawn(&config_with(vec![http_target("web", &mock_server.uri())]));
    engine.monitor.check_now("web").await.unwrap();

    let result = engine.monitor.export(ExportFormat::Csv, "soon").await;
    assert!(result.is_err());

    engine.shutdown().await;
}
