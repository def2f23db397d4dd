//! Bounded in-memory time series for check outcomes and resource samples
//!
//! Every series is keyed by [`SeriesKey`] (service id + metric kind), kept
//! in ascending timestamp order, and pruned to the raw retention window on
//! each append, so memory stays bounded without a dedicated eviction pass.
//! A separate periodic [`MetricStore::cleanup`] sweep catches series that
//! stopped receiving writes.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{CheckResult, ServiceStatus};

/// Raw points older than this are pruned.
pub const RAW_RETENTION_HOURS: i64 = 24;

/// Seconds per history bucket.
const BUCKET_SECS: i64 = 300;

/// Upper bound on buckets returned by a history query.
const MAX_HISTORY_BUCKETS: usize = 100;

/// Kind of value a series tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Binary availability, 1 = online.
    Status,
    /// Probe round-trip in milliseconds.
    ResponseTime,
    CpuUsage,
    MemoryUsage,
    DiskUsage,
    /// Binary availability scaled to percent, 100 = online.
    Uptime,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Status => write!(f, "status"),
            MetricKind::ResponseTime => write!(f, "response_time"),
            MetricKind::CpuUsage => write!(f, "cpu_usage"),
            MetricKind::MemoryUsage => write!(f, "memory_usage"),
            MetricKind::DiskUsage => write!(f, "disk_usage"),
            MetricKind::Uptime => write!(f, "uptime"),
        }
    }
}

/// Composite series key. A struct rather than a joined string so lookups
/// stay typo-proof and collision-free.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesKey {
    pub service_id: String,
    pub kind: MetricKind,
}

impl SeriesKey {
    pub fn new(service_id: impl ToString, kind: MetricKind) -> Self {
        Self {
            service_id: service_id.to_string(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// One 5-minute window of combined status and response-time data.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryBucket {
    pub timestamp: DateTime<Utc>,

    /// Majority status of the bucket's checks.
    pub status: ServiceStatus,

    pub average_response_time: Option<f64>,

    /// Number of checks that landed in the bucket.
    pub samples: usize,
}

/// Windowed summary returned to the query surface.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceMetrics {
    pub uptime_pct: f64,
    pub average_response_time: Option<f64>,
    pub history: Vec<HistoryBucket>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SystemHealth {
    pub current_health: f64,
    pub status: HealthLevel,
}

impl SystemHealth {
    fn classify(score: f64) -> Self {
        let status = if score >= 90.0 {
            HealthLevel::Healthy
        } else if score >= 70.0 {
            HealthLevel::Degraded
        } else {
            HealthLevel::Unhealthy
        };

        Self {
            current_health: score,
            status,
        }
    }
}

/// Per-service, per-metric bounded time series.
#[derive(Debug, Clone)]
pub struct MetricStore {
    series: HashMap<SeriesKey, VecDeque<MetricPoint>>,
    health: VecDeque<MetricPoint>,
    retention: Duration,
}

impl MetricStore {
    pub fn new() -> Self {
        Self::with_retention(Duration::hours(RAW_RETENTION_HOURS))
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            series: HashMap::new(),
            health: VecDeque::new(),
            retention,
        }
    }

    /// Record one check outcome as a status point (1/0), a response-time
    /// point when present, and an uptime point (100/0).
    pub fn record_check(&mut self, service_id: &str, result: &CheckResult) {
        let online = result.status == ServiceStatus::Online;

        self.append(
            SeriesKey::new(service_id, MetricKind::Status),
            MetricPoint {
                timestamp: result.timestamp,
                value: if online { 1.0 } else { 0.0 },
            },
        );

        if let Some(response_time) = result.response_time_ms {
            self.append(
                SeriesKey::new(service_id, MetricKind::ResponseTime),
                MetricPoint {
                    timestamp: result.timestamp,
                    value: response_time as f64,
                },
            );
        }

        self.append(
            SeriesKey::new(service_id, MetricKind::Uptime),
            MetricPoint {
                timestamp: result.timestamp,
                value: if online { 100.0 } else { 0.0 },
            },
        );
    }

    /// Record a resource sample (CPU/memory/disk) supplied at the engine
    /// boundary.
    pub fn record_sample(
        &mut self,
        service_id: &str,
        kind: MetricKind,
        value: f64,
        timestamp: DateTime<Utc>,
    ) {
        self.append(
            SeriesKey::new(service_id, kind),
            MetricPoint { timestamp, value },
        );
    }

    fn append(&mut self, key: SeriesKey, point: MetricPoint) {
        let cutoff = point.timestamp - self.retention;
        let series = self.series.entry(key).or_default();

        series.push_back(point);
        while series.front().is_some_and(|p| p.timestamp < cutoff) {
            series.pop_front();
        }
    }

    /// Points for one series at or after the cutoff, oldest first.
    pub fn points_since(
        &self,
        service_id: &str,
        kind: MetricKind,
        cutoff: DateTime<Utc>,
    ) -> Vec<MetricPoint> {
        self.series
            .get(&SeriesKey::new(service_id, kind))
            .map(|series| {
                series
                    .iter()
                    .filter(|p| p.timestamp >= cutoff)
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All service ids with at least one series, sorted.
    pub fn service_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .series
            .keys()
            .map(|key| key.service_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Windowed uptime, average response time and bucketed history for one
    /// service. `timeframe` accepts `"<n>m"`, `"<n>h"` and `"<n>d"`.
    pub fn service_metrics(
        &self,
        service_id: &str,
        timeframe: &str,
    ) -> anyhow::Result<ServiceMetrics> {
        let cutoff = Utc::now() - parse_timeframe(timeframe)?;

        let status_points = self.points_since(service_id, MetricKind::Status, cutoff);
        let response_points = self.points_since(service_id, MetricKind::ResponseTime, cutoff);

        let uptime_pct = if status_points.is_empty() {
            100.0
        } else {
            let online = status_points.iter().filter(|p| p.value >= 1.0).count();
            round2(online as f64 / status_points.len() as f64 * 100.0)
        };

        let average_response_time = if response_points.is_empty() {
            None
        } else {
            let sum: f64 = response_points.iter().map(|p| p.value).sum();
            Some(round2(sum / response_points.len() as f64))
        };

        Ok(ServiceMetrics {
            uptime_pct,
            average_response_time,
            history: build_history(&status_points, &response_points),
        })
    }

    /// Record one system-wide health sample (0-100).
    pub fn record_system_health(&mut self, score: f64, timestamp: DateTime<Utc>) {
        let cutoff = timestamp - self.retention;

        self.health.push_back(MetricPoint {
            timestamp,
            value: score,
        });
        while self.health.front().is_some_and(|p| p.timestamp < cutoff) {
            self.health.pop_front();
        }
    }

    /// Latest system-wide health score; a fleet with no data yet reports
    /// fully healthy.
    pub fn system_health(&self) -> SystemHealth {
        match self.health.back() {
            Some(point) => SystemHealth::classify(point.value),
            None => SystemHealth::classify(100.0),
        }
    }

    /// Drop points older than the retention window from every series.
    /// Returns the number of points removed.
    pub fn cleanup(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retention;
        let mut removed = 0;

        for series in self
            .series
            .values_mut()
            .chain(std::iter::once(&mut self.health))
        {
            let before = series.len();
            series.retain(|p| p.timestamp >= cutoff);
            removed += before - series.len();
        }

        self.series.retain(|_, series| !series.is_empty());
        removed
    }

    /// Drop every series belonging to a removed service.
    pub fn remove_service(&mut self, service_id: &str) {
        self.series.retain(|key, _| key.service_id != service_id);
    }
}

impl Default for MetricStore {
    fn default() -> Self {
        Self::new()
    }
}

fn build_history(
    status_points: &[MetricPoint],
    response_points: &[MetricPoint],
) -> Vec<HistoryBucket> {
    #[derive(Default)]
    struct Accum {
        online: usize,
        checks: usize,
        response_sum: f64,
        response_count: usize,
    }

    let mut buckets: BTreeMap<i64, Accum> = BTreeMap::new();

    for point in status_points {
        let accum = buckets
            .entry(point.timestamp.timestamp() / BUCKET_SECS)
            .or_default();
        accum.checks += 1;
        if point.value >= 1.0 {
            accum.online += 1;
        }
    }

    for point in response_points {
        let accum = buckets
            .entry(point.timestamp.timestamp() / BUCKET_SECS)
            .or_default();
        accum.response_sum += point.value;
        accum.response_count += 1;
    }

    let mut history: Vec<HistoryBucket> = buckets
        .into_iter()
        .map(|(bucket, accum)| HistoryBucket {
            timestamp: DateTime::from_timestamp(bucket * BUCKET_SECS, 0).unwrap_or_default(),
            status: if accum.checks == 0 || accum.online * 2 >= accum.checks {
                ServiceStatus::Online
            } else {
                ServiceStatus::Offline
            },
            average_response_time: (accum.response_count > 0)
                .then(|| round2(accum.response_sum / accum.response_count as f64)),
            samples: accum.checks,
        })
        .collect();

    if history.len() > MAX_HISTORY_BUCKETS {
        history.drain(..history.len() - MAX_HISTORY_BUCKETS);
    }
    history
}

/// Parse a `"<n>m" | "<n>h" | "<n>d"` timeframe into a duration.
pub fn parse_timeframe(timeframe: &str) -> anyhow::Result<Duration> {
    let (amount, unit) = timeframe.split_at(timeframe.len().saturating_sub(1));
    let amount: i64 = amount
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid timeframe '{timeframe}'"))?;

    if amount <= 0 {
        anyhow::bail!("invalid timeframe '{timeframe}'");
    }

    match unit {
        "m" => Ok(Duration::minutes(amount)),
        "h" => Ok(Duration::hours(amount)),
        "d" => Ok(Duration::days(amount)),
        _ => anyhow::bail!("invalid timeframe unit in '{timeframe}'"),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
