//! Integration tests for alert dispatch
//!
//! These tests verify that:
//! - Every status transition dispatches exactly one alert
//! - Repeated identical transitions inside the cooldown are deduplicated
//! - Silenced services produce no alerts and no history
//! - A failing channel never blocks a healthy one

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vigil::ServiceStatus;
use vigil::alerts::AlertKind;
use vigil::config::{ChannelConfig, ChannelEntry};
use vigil::engine::Engine;

use crate::helpers::{config_with_channels, http_target};

fn webhook_entry(url: String) -> ChannelEntry {
    ChannelEntry {
        enabled: true,
        channel: ChannelConfig::Webhook { url },
    }
}

/// Mount a sequence of one-shot responses followed by a steady state, so
/// consecutive checks walk the service through status transitions.
async fn mount_sequence(server: &MockServer, statuses: &[u16], steady: u16) {
    for status in statuses {
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(*status))
            .up_to_n_times(1)
            .mount(server)
            .await;
    }

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(steady))
        .mount(server)
        .await;
}

async fn webhook_hits(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path() == "/hook")
        .count()
}

#[tokio::test]
async fn test_each_transition_dispatches_one_alert() {
    let services = MockServer::start().await;
    mount_sequence(&services, &[200, 500], 200).await;

    let hooks = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&hooks)
        .await;

    let mut config = config_with_channels(
        vec![http_target("web", &format!("{}/health", services.uri()))],
        vec![webhook_entry(format!("{}/hook", hooks.uri()))],
    );
    // Disable the cooldown so every transition is observable on its own.
    config.alerts.cooldown_minutes = 0;

    let engine = Engine::spawn(&config);

    // pending -> online -> offline -> online: three transitions.
    engine.monitor.check_now("web").await.unwrap();
    engine.monitor.check_now("web").await.unwrap();
    engine.monitor.check_now("web").await.unwrap();

    let recent = engine.alerts.recent_alerts(1).await;
    assert_eq!(recent.len(), 3);
    assert_eq!(webhook_hits(&hooks).await, 3);

    // Newest first: recovery, outage, initial online.
    assert_eq!(
        recent[0].kind,
        AlertKind::StatusChange(ServiceStatus::Online)
    );
    assert_eq!(
        recent[1].kind,
        AlertKind::StatusChange(ServiceStatus::Offline)
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn test_repeated_transition_is_deduplicated() {
    let services = MockServer::start().await;
    // offline, online, offline again: the second outage repeats the first
    // transition inside the cooldown.
    mount_sequence(&services, &[500, 200], 500).await;

    let hooks = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&hooks)
        .await;

    let config = config_with_channels(
        vec![http_target("web", &format!("{}/health", services.uri()))],
        vec![webhook_entry(format!("{}/hook", hooks.uri()))],
    );

    let engine = Engine::spawn(&config);

    engine.monitor.check_now("web").await.unwrap(); // pending -> offline
    engine.monitor.check_now("web").await.unwrap(); // offline -> online
    engine.monitor.check_now("web").await.unwrap(); // online -> offline, deduplicated

    let recent = engine.alerts.recent_alerts(1).await;
    assert_eq!(recent.len(), 2);
    assert_eq!(webhook_hits(&hooks).await, 2);

    let (_, entry) = &engine.alerts.active_alerts().await[0];
    assert_eq!(entry.attempts, 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_silenced_service_is_fully_suppressed() {
    let services = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&services)
        .await;

    let hooks = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&hooks)
        .await;

    let config = config_with_channels(
        vec![http_target("web", &services.uri())],
        vec![webhook_entry(format!("{}/hook", hooks.uri()))],
    );

    let engine = Engine::spawn(&config);

    engine.alerts.silence("web", 60, "maintenance").await;
    engine.monitor.check_now("web").await.unwrap(); // pending -> online, silenced

    let recent = engine.alerts.recent_alerts(1).await;
    assert!(recent.is_empty());
    assert_eq!(webhook_hits(&hooks).await, 0);
    assert_eq!(engine.alerts.stats(1).await.total, 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_failing_channel_does_not_block_others() {
    let services = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&services)
        .await;

    let hooks = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&hooks)
        .await;
    Mock::given(method("POST"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&hooks)
        .await;

    let config = config_with_channels(
        vec![http_target("web", &services.uri())],
        vec![
            webhook_entry(format!("{}/broken", hooks.uri())),
            webhook_entry(format!("{}/hook", hooks.uri())),
        ],
    );

    let engine = Engine::spawn(&config);
    engine.monitor.check_now("web").await.unwrap();

    let recent = engine.alerts.recent_alerts(1).await;
    assert_eq!(recent.len(), 1);

    let results = &recent[0].channel_results;
    assert_eq!(results.len(), 2);
    assert!(!results[0].success);
    assert!(results[0].error.as_deref().unwrap().contains("503"));
    assert!(results[1].success);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_disabled_channel_is_skipped() {
    let services = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&services)
        .await;

    let hooks = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&hooks)
        .await;

    let mut entry = webhook_entry(format!("{}/hook", hooks.uri()));
    entry.enabled = false;

    let config = config_with_channels(vec![http_target("web", &services.uri())], vec![entry]);

    let engine = Engine::spawn(&config);
    engine.monitor.check_now("web").await.unwrap();

    let recent = engine.alerts.recent_alerts(1).await;
    assert_eq!(recent.len(), 1);
    assert!(recent[0].channel_results.is_empty());
    assert_eq!(webhook_hits(&hooks).await, 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_alert_stats_tabulate_by_service() {
    let services = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&services)
        .await;

    let config = config_with_channels(
        vec![
            http_target("a", &services.uri()),
            http_target("b", &services.uri()),
        ],
        vec![],
    );

    let engine = Engine::spawn(&config);
    engine.monitor.check_now("a").await.unwrap();
    engine.monitor.check_now("b").await.unwrap();

    let stats = engine.alerts.stats(1).await;
    assert_eq!(stats.total, 2);
    assert_eq!(stats.by_service["a"], 1);
    assert_eq!(stats.by_service["b"], 1);
    assert_eq!(stats.by_severity["ERROR"], 2);

    engine.shutdown().await;
}
