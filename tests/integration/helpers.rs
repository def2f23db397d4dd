//! Shared helpers for integration tests

use vigil::config::{
    AlertSettings, AnalyzerSettings, ChannelEntry, Config, MonitorSettings, ServiceTarget,
};
use vigil::probe::Protocol;

pub fn target(id: &str, protocol: Protocol, url: &str) -> ServiceTarget {
    ServiceTarget {
        id: id.to_string(),
        name: None,
        url: url.to_string(),
        protocol,
        timeout_ms: 2000,
        critical: false,
        expected_status: None,
        body_contains: None,
    }
}

pub fn http_target(id: &str, url: &str) -> ServiceTarget {
    target(id, Protocol::Http, url)
}

pub fn config_with(services: Vec<ServiceTarget>) -> Config {
    Config {
        services: Some(services),
        monitor: MonitorSettings::default(),
        analyzer: AnalyzerSettings::default(),
        alerts: AlertSettings::default(),
    }
}

pub fn config_with_channels(services: Vec<ServiceTarget>, channels: Vec<ChannelEntry>) -> Config {
    let mut config = config_with(services);
    config.alerts.channels = channels;
    config
}

/// A bound-then-dropped listener leaves a port that refuses connections.
pub async fn closed_port_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("tcp://{addr}")
}
