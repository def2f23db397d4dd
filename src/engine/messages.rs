//! Command types for the engine tasks
//!
//! Each task owns its state and is controlled through an mpsc command
//! channel; queries carry a oneshot sender for the reply. Commands without
//! a reply channel are fire-and-forget.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::StatusRecord;
use crate::alerts::{ActiveAlertEntry, Alert, AlertKey, AlertStats};
use crate::config::ServiceTarget;
use crate::engine::analyzer::AnalysisReport;

/// Commands understood by the monitor task.
#[derive(Debug)]
pub enum MonitorCommand {
    /// Begin scheduling passes. A no-op while already running.
    Start { interval: Duration },

    /// Disarm the schedule. In-flight work completes normally.
    Stop,

    /// Check one service immediately, bypassing the schedule.
    CheckNow {
        service_id: String,
        respond_to: oneshot::Sender<anyhow::Result<StatusRecord>>,
    },

    /// Replace the working set of targets wholesale.
    UpdateTargets { targets: Vec<ServiceTarget> },

    GetStatuses {
        respond_to: oneshot::Sender<HashMap<String, StatusRecord>>,
    },

    GetStatus {
        service_id: String,
        respond_to: oneshot::Sender<Option<StatusRecord>>,
    },

    GetStats {
        respond_to: oneshot::Sender<MonitoringStats>,
    },

    Export {
        format: ExportFormat,
        timeframe: String,
        respond_to: oneshot::Sender<anyhow::Result<ExportPayload>>,
    },

    Shutdown,
}

/// Fleet-level aggregates for the query surface.
#[derive(Debug, Clone, Serialize)]
pub struct MonitoringStats {
    pub total_services: usize,
    pub online_services: usize,
    pub offline_services: usize,
    pub errored_services: usize,
    pub pending_services: usize,
    pub last_check: Option<DateTime<Utc>>,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl std::str::FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(anyhow::anyhow!("unknown export format '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ExportPayload {
    Json(serde_json::Value),
    Csv(String),
}

/// Commands understood by the alert task.
#[derive(Debug)]
pub enum AlertCommand {
    Dispatch { alert: Alert },

    /// Open a maintenance window for a service.
    Silence {
        service_id: String,
        duration_minutes: i64,
        reason: String,
    },

    GetRecent {
        hours: i64,
        respond_to: oneshot::Sender<Vec<Alert>>,
    },

    GetActive {
        respond_to: oneshot::Sender<Vec<(AlertKey, ActiveAlertEntry)>>,
    },

    GetStats {
        hours: i64,
        respond_to: oneshot::Sender<AlertStats>,
    },

    Shutdown,
}

/// Commands understood by the analyzer task.
#[derive(Debug)]
pub enum AnalyzerCommand {
    /// Run an analysis pass immediately and acknowledge when done.
    RunNow { respond_to: oneshot::Sender<()> },

    GetReport {
        service_id: String,
        respond_to: oneshot::Sender<Option<AnalysisReport>>,
    },

    GetReports {
        respond_to: oneshot::Sender<Vec<AnalysisReport>>,
    },

    Shutdown,
}
