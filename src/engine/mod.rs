//! Task-based monitoring engine
//!
//! The engine is three long-running tokio tasks, each owning its state and
//! controlled through an mpsc command channel with oneshot replies:
//!
//! ```text
//!                  ┌─────────────────┐
//!                  │  Engine::spawn  │
//!                  └────────┬────────┘
//!                           │ spawns
//!          ┌────────────────┼────────────────┐
//!          │                │                │
//!  ┌───────▼───────┐ ┌──────▼───────┐ ┌──────▼──────┐
//!  │ MonitorActor  │ │ AnalyzerActor│ │ AlertActor  │
//!  │ probe tick,   │ │ stats pass,  │ │ dedup,      │
//!  │ status table  │ │ reports      │ │ channels    │
//!  └───────┬───────┘ └──────┬───────┘ └──────▲──────┘
//!          │   Arc<RwLock<MetricStore>>      │
//!          └────────────────┴────── alerts ──┘
//! ```
//!
//! The metric store is the only shared structure: the monitor writes it,
//! the analyzer snapshots it. Everything else moves over channels, so no
//! task can block another.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use chrono::Utc;

use crate::alerts::channels::build_channels;
use crate::config::Config;
use crate::metrics::{MetricKind, MetricStore, ServiceMetrics, SystemHealth};
use crate::probe::Prober;

pub mod alert;
pub mod analyzer;
pub mod messages;
pub mod monitor;

pub use alert::AlertHandle;
pub use analyzer::AnalyzerHandle;
pub use monitor::MonitorHandle;

/// Handles to the three engine tasks. Construct once and pass around;
/// there is no ambient global.
#[derive(Clone)]
pub struct Engine {
    pub monitor: MonitorHandle,
    pub analyzer: AnalyzerHandle,
    pub alerts: AlertHandle,

    store: Arc<RwLock<MetricStore>>,
    monitor_interval: Duration,
}

impl Engine {
    /// Spawn all tasks from config. The monitoring schedule stays disarmed
    /// until [`Engine::start`].
    pub fn spawn(config: &Config) -> Self {
        Self::spawn_with_prober(config, Prober::new())
    }

    /// Like [`Engine::spawn`], with a prober carrying custom check
    /// predicates.
    pub fn spawn_with_prober(config: &Config, prober: Prober) -> Self {
        let channels = build_channels(&config.alerts.channels);
        let alerts = AlertHandle::spawn(
            channels,
            chrono::Duration::minutes(config.alerts.cooldown_minutes),
        );

        let store = Arc::new(RwLock::new(MetricStore::new()));

        let monitor = MonitorHandle::spawn(
            config.services.clone().unwrap_or_default(),
            Arc::new(prober),
            Arc::clone(&store),
            alerts.clone(),
            &config.monitor,
        );

        let analyzer = AnalyzerHandle::spawn(
            Arc::clone(&store),
            alerts.clone(),
            config.analyzer.clone(),
        );

        Self {
            monitor,
            analyzer,
            alerts,
            store,
            monitor_interval: Duration::from_secs(config.monitor.interval_secs),
        }
    }

    /// Windowed uptime, response time and history for one service.
    pub async fn service_metrics(
        &self,
        service_id: &str,
        timeframe: &str,
    ) -> anyhow::Result<ServiceMetrics> {
        self.store.read().await.service_metrics(service_id, timeframe)
    }

    /// Latest fleet-wide health score.
    pub async fn system_health(&self) -> SystemHealth {
        self.store.read().await.system_health()
    }

    /// Record an externally collected resource sample (CPU/memory/disk)
    /// for a service.
    pub async fn record_sample(&self, service_id: &str, kind: MetricKind, value: f64) {
        self.store
            .write()
            .await
            .record_sample(service_id, kind, value, Utc::now());
    }

    /// Arm the monitoring schedule; the first full pass runs immediately.
    pub async fn start(&self) {
        self.monitor.start(self.monitor_interval).await;
    }

    /// Shut down all tasks. In-flight work completes; nothing new is
    /// scheduled.
    pub async fn shutdown(&self) {
        self.monitor.shutdown().await;
        self.analyzer.shutdown().await;
        self.alerts.shutdown().await;
    }
}
