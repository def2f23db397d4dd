pub mod alerts;
pub mod analytics;
pub mod config;
pub mod engine;
pub mod metrics;
pub mod probe;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health state of a monitored service.
///
/// Every service starts at `Pending` and moves to one of the other states
/// after its first check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Pending,
    Online,
    Offline,
    Error,
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceStatus::Pending => write!(f, "pending"),
            ServiceStatus::Online => write!(f, "online"),
            ServiceStatus::Offline => write!(f, "offline"),
            ServiceStatus::Error => write!(f, "error"),
        }
    }
}

/// Outcome of a single probe against one service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: ServiceStatus,

    /// Round-trip time of the check, when it completed at all.
    pub response_time_ms: Option<u64>,

    /// When the check settled.
    pub timestamp: DateTime<Utc>,

    /// Failure description for offline/error outcomes.
    pub error: Option<String>,
}

/// Last known state of a service, overwritten on every check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub status: ServiceStatus,
    pub response_time_ms: Option<u64>,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
}

impl StatusRecord {
    /// Seed record for a freshly registered service.
    pub fn pending() -> Self {
        Self {
            status: ServiceStatus::Pending,
            response_time_ms: None,
            timestamp: Utc::now(),
            error: None,
        }
    }

    pub fn from_check(result: &CheckResult) -> Self {
        Self {
            status: result.status,
            response_time_ms: result.response_time_ms,
            timestamp: result.timestamp,
            error: result.error.clone(),
        }
    }
}
