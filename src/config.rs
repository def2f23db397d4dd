use serde::Deserialize;
use tracing::trace;

use crate::probe::Protocol;

/// A single service to monitor.
///
/// Targets are immutable for the duration of a monitoring cycle and are
/// replaced wholesale on config reload.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceTarget {
    /// Stable identifier, used as the key for status, metrics and alerts.
    pub id: String,

    /// Human-readable name (falls back to the id).
    pub name: Option<String>,

    pub url: String,

    pub protocol: Protocol,

    /// Per-check timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Marks services whose outage is fleet-critical.
    #[serde(default)]
    pub critical: bool,

    /// HTTP status codes treated as success (HTTP/HTTPS only).
    pub expected_status: Option<Vec<u16>>,

    /// Substring the response body must contain (HTTP/HTTPS only).
    pub body_contains: Option<String>,
}

impl ServiceTarget {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

fn default_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub services: Option<Vec<ServiceTarget>>,

    #[serde(default)]
    pub monitor: MonitorSettings,

    #[serde(default)]
    pub analyzer: AnalyzerSettings,

    #[serde(default)]
    pub alerts: AlertSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSettings {
    /// Seconds between full monitoring passes.
    #[serde(default = "default_monitor_interval")]
    pub interval_secs: u64,

    /// Upper bound on probes running at the same time within one pass.
    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_monitor_interval(),
            max_concurrent_probes: default_max_concurrent_probes(),
        }
    }
}

fn default_monitor_interval() -> u64 {
    30
}

fn default_max_concurrent_probes() -> usize {
    16
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzerSettings {
    /// Seconds between analysis passes.
    #[serde(default = "default_analyzer_interval")]
    pub interval_secs: u64,

    /// Robust MAD-score threshold for flagging a point.
    #[serde(default = "default_mad_threshold")]
    pub mad_threshold: f64,

    /// Z-score threshold for flagging a point.
    #[serde(default = "default_z_score_threshold")]
    pub z_score_threshold: f64,

    /// Either score above this escalates the anomaly to critical.
    #[serde(default = "default_critical_score")]
    pub critical_score: f64,

    /// Status changes inside the analysis window before a service counts
    /// as unstable.
    #[serde(default = "default_max_status_changes")]
    pub max_status_changes: usize,

    /// Width of the analysis window in minutes.
    #[serde(default = "default_window_minutes")]
    pub window_minutes: i64,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_analyzer_interval(),
            mad_threshold: default_mad_threshold(),
            z_score_threshold: default_z_score_threshold(),
            critical_score: default_critical_score(),
            max_status_changes: default_max_status_changes(),
            window_minutes: default_window_minutes(),
        }
    }
}

fn default_analyzer_interval() -> u64 {
    60
}

fn default_mad_threshold() -> f64 {
    3.5
}

fn default_z_score_threshold() -> f64 {
    3.0
}

fn default_critical_score() -> f64 {
    5.0
}

fn default_max_status_changes() -> usize {
    5
}

fn default_window_minutes() -> i64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertSettings {
    /// Minutes a service+kind pair stays deduplicated after a dispatch.
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: i64,

    #[serde(default)]
    pub channels: Vec<ChannelEntry>,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            cooldown_minutes: default_cooldown_minutes(),
            channels: Vec::new(),
        }
    }
}

fn default_cooldown_minutes() -> i64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelEntry {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(flatten)]
    pub channel: ChannelConfig,
}

fn default_enabled() -> bool {
    true
}

/// Delivery channel configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelConfig {
    /// HTTP mail gateway (the gateway relays to SMTP).
    Email {
        gateway_url: String,
        from: String,
        to: Vec<String>,
    },

    /// Generic JSON webhook.
    Webhook { url: String },

    Slack { webhook_url: String },

    Discord {
        webhook_url: String,
        user_id: Option<String>,
    },

    Pushover { token: String, user_key: String },
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|_| anyhow::anyhow!("Invalid configuration file provided!"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
