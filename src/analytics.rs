//! Statistical analysis over metric series
//!
//! Pure functions only: baselines, outlier scoring, stability, trend
//! classification, Holt-linear forecasting and the recommendation rules.
//! The driving task lives in `engine::analyzer`; keeping the math free of
//! channels and clocks makes every rule testable with plain slices.

use serde::Serialize;

use crate::metrics::{MetricKind, MetricPoint};

/// Points needed before a baseline is defined.
pub const MIN_BASELINE_SAMPLES: usize = 5;

/// Points needed before a forecast is attempted.
pub const MIN_FORECAST_SAMPLES: usize = 10;

/// Rescales MAD to be comparable with the standard deviation under
/// normality.
const MAD_NORMAL_SCALE: f64 = 1.4826;

/// Holt-linear smoothing factors.
const HOLT_ALPHA: f64 = 0.3;
const HOLT_BETA: f64 = 0.1;

/// Slopes inside this band classify as stable.
const TREND_SLOPE_EPSILON: f64 = 0.05;

/// Smoothed-trend band for the forecast label.
const FORECAST_TREND_EPSILON: f64 = 0.1;

/// Statistical summary of a series' recent history, the "expected"
/// reference for anomaly scoring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Baseline {
    pub mean: f64,
    pub std_dev: f64,
    pub median: f64,
    pub mad: f64,
}

impl Baseline {
    /// Compute a baseline, or `None` below the minimum sample count.
    pub fn compute(values: &[f64]) -> Option<Self> {
        if values.len() < MIN_BASELINE_SAMPLES {
            return None;
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        let median = median_of(values);
        let deviations: Vec<f64> = values.iter().map(|v| (v - median).abs()).collect();
        let mad = median_of(&deviations);

        Some(Self {
            mean,
            std_dev: variance.sqrt(),
            median,
            mad,
        })
    }

    /// Z-score and robust MAD-score of a value against this baseline.
    /// Both degrade to 0 when the dispersion term is 0.
    pub fn scores(&self, value: f64) -> (f64, f64) {
        let z = if self.std_dev == 0.0 {
            0.0
        } else {
            (value - self.mean).abs() / self.std_dev
        };

        let mad_score = if self.mad == 0.0 {
            0.0
        } else {
            (value - self.median).abs() / (self.mad * MAD_NORMAL_SCALE)
        };

        (z, mad_score)
    }
}

fn median_of(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Scoring thresholds for outlier detection.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub mad: f64,
    pub z_score: f64,
    /// Either score above this escalates to critical.
    pub critical: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            mad: 3.5,
            z_score: 3.0,
            critical: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// A point far outside the statistical baseline.
    Outlier,
    /// Too many status flips inside the analysis window.
    UnstableService,
}

#[derive(Debug, Clone, Serialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub severity: AnomalySeverity,
    pub value: f64,
    pub expected: f64,
    pub threshold: f64,
    pub deviation: Option<f64>,
    pub description: String,
}

/// Score one value against a baseline; `Some` when it breaches either
/// threshold.
pub fn detect_outlier(value: f64, baseline: &Baseline, thresholds: &Thresholds) -> Option<Anomaly> {
    let (z, mad_score) = baseline.scores(value);

    let mad_breach = mad_score > thresholds.mad;
    let z_breach = z > thresholds.z_score;
    if !mad_breach && !z_breach {
        return None;
    }

    let severity = if z > thresholds.critical || mad_score > thresholds.critical {
        AnomalySeverity::Critical
    } else {
        AnomalySeverity::Warning
    };

    Some(Anomaly {
        kind: AnomalyKind::Outlier,
        severity,
        value,
        expected: baseline.mean,
        threshold: if mad_breach {
            thresholds.mad
        } else {
            thresholds.z_score
        },
        deviation: Some(value - baseline.mean),
        description: format!(
            "value {value:.2} deviates from baseline mean {:.2} (z-score {z:.2}, mad-score {mad_score:.2})",
            baseline.mean
        ),
    })
}

/// Scan a whole series against its own baseline. Returns `(index, anomaly)`
/// pairs; empty below the baseline minimum.
pub fn detect_outliers(values: &[f64], thresholds: &Thresholds) -> Vec<(usize, Anomaly)> {
    let Some(baseline) = Baseline::compute(values) else {
        return Vec::new();
    };

    values
        .iter()
        .enumerate()
        .filter_map(|(index, value)| {
            detect_outlier(*value, &baseline, thresholds).map(|anomaly| (index, anomaly))
        })
        .collect()
}

/// Number of value transitions between consecutive status points.
pub fn count_status_changes(points: &[MetricPoint]) -> usize {
    points
        .windows(2)
        .filter(|pair| pair[0].value != pair[1].value)
        .count()
}

/// Flag a service flapping between states more than `max_changes` times
/// inside the window.
pub fn detect_unstable(status_points: &[MetricPoint], max_changes: usize) -> Option<Anomaly> {
    let changes = count_status_changes(status_points);
    if changes <= max_changes {
        return None;
    }

    Some(Anomaly {
        kind: AnomalyKind::UnstableService,
        severity: AnomalySeverity::Warning,
        value: changes as f64,
        expected: max_changes as f64,
        threshold: max_changes as f64,
        deviation: None,
        description: format!(
            "service changed status {changes} times in the analysis window (allowed: {max_changes})"
        ),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Improving,
    Degrading,
    Stable,
}

/// Least-squares slope over `(index, value)` pairs; 0 for degenerate input.
pub fn regression_slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    if values.len() < 2 {
        return 0.0;
    }

    let sum_x: f64 = (0..values.len()).map(|i| i as f64).sum();
    let sum_y: f64 = values.iter().sum();
    let sum_xy: f64 = values.iter().enumerate().map(|(i, v)| i as f64 * v).sum();
    let sum_xx: f64 = (0..values.len()).map(|i| (i as f64).powi(2)).sum();

    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator == 0.0 {
        return 0.0;
    }

    (n * sum_xy - sum_x * sum_y) / denominator
}

/// Classify a series' drift, folding in the metric's polarity: rising
/// uptime is good, rising anything else is bad.
pub fn classify_trend(values: &[f64], kind: MetricKind) -> TrendDirection {
    let slope = regression_slope(values);
    if slope.abs() < TREND_SLOPE_EPSILON {
        return TrendDirection::Stable;
    }

    let rising = slope > 0.0;
    match kind {
        MetricKind::Uptime | MetricKind::Status => {
            if rising {
                TrendDirection::Improving
            } else {
                TrendDirection::Degrading
            }
        }
        _ => {
            if rising {
                TrendDirection::Degrading
            } else {
                TrendDirection::Improving
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ForecastTrend {
    Increasing,
    Decreasing,
    Stable,
}

/// One-step-ahead forecast.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Forecast {
    pub predicted: f64,
    /// 0-100, from the coefficient of variation of the last 5 points.
    pub confidence: f64,
    pub trend: ForecastTrend,
    /// Steps ahead the prediction covers.
    pub horizon: usize,
}

/// Holt-linear double exponential smoothing, seeded from the first two
/// points. `None` below the forecast minimum.
pub fn holt_forecast(values: &[f64]) -> Option<Forecast> {
    if values.len() < MIN_FORECAST_SAMPLES {
        return None;
    }

    let mut level = values[0];
    let mut trend = values[1] - values[0];

    for value in &values[1..] {
        let previous_level = level;
        level = HOLT_ALPHA * value + (1.0 - HOLT_ALPHA) * (level + trend);
        trend = HOLT_BETA * (level - previous_level) + (1.0 - HOLT_BETA) * trend;
    }

    let predicted = (level + trend).max(0.0);

    let label = if trend > FORECAST_TREND_EPSILON {
        ForecastTrend::Increasing
    } else if trend < -FORECAST_TREND_EPSILON {
        ForecastTrend::Decreasing
    } else {
        ForecastTrend::Stable
    };

    Some(Forecast {
        predicted,
        confidence: forecast_confidence(&values[values.len() - 5..]),
        trend: label,
        horizon: 1,
    })
}

/// `100 - cv*100` over the tail, clamped to `[0, 100]`; a zero mean means
/// nothing to be uncertain about.
fn forecast_confidence(tail: &[f64]) -> f64 {
    let n = tail.len() as f64;
    let mean = tail.iter().sum::<f64>() / n;
    if mean == 0.0 {
        return 100.0;
    }

    let variance = tail.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (100.0 - (variance.sqrt() / mean) * 100.0).clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationPriority {
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub priority: RecommendationPriority,
    pub category: &'static str,
    pub message: String,
}

/// Per-metric inputs to the recommendation rules.
#[derive(Debug, Clone)]
pub struct MetricAssessment {
    pub kind: MetricKind,
    pub trend: TrendDirection,
    pub average: f64,
    pub forecast: Option<Forecast>,
}

/// Rule table over trends, averages and forecasts.
pub fn recommend(assessments: &[MetricAssessment]) -> Vec<Recommendation> {
    let mut recommendations = Vec::new();

    let degrading = |kind: MetricKind| {
        assessments
            .iter()
            .find(|a| a.kind == kind && a.trend == TrendDirection::Degrading)
    };

    let cpu = degrading(MetricKind::CpuUsage);
    let response = degrading(MetricKind::ResponseTime);

    // CPU and response time degrading together collapse into one finding.
    if cpu.is_some() && response.is_some() {
        recommendations.push(Recommendation {
            priority: RecommendationPriority::Critical,
            category: "resource",
            message: "CPU usage and response time are degrading together; investigate a resource bottleneck".to_string(),
        });
    } else {
        if response.is_some() {
            recommendations.push(Recommendation {
                priority: RecommendationPriority::Medium,
                category: "performance",
                message: "response time is trending up; consider profiling slow endpoints"
                    .to_string(),
            });
        }
        if let Some(cpu) = cpu {
            if cpu.average > 80.0 {
                recommendations.push(Recommendation {
                    priority: RecommendationPriority::High,
                    category: "resource",
                    message: format!(
                        "CPU usage is degrading at an average of {:.1}%; add capacity or reduce load",
                        cpu.average
                    ),
                });
            }
        }
    }

    if let Some(memory) = degrading(MetricKind::MemoryUsage) {
        if memory.average > 85.0 {
            recommendations.push(Recommendation {
                priority: RecommendationPriority::High,
                category: "resource",
                message: format!(
                    "memory usage is degrading at an average of {:.1}%; check for leaks or add memory",
                    memory.average
                ),
            });
        }
    }

    if degrading(MetricKind::Uptime).is_some() {
        recommendations.push(Recommendation {
            priority: RecommendationPriority::High,
            category: "reliability",
            message: "uptime is degrading; review recent failures and restart policies".to_string(),
        });
    }

    // Proactive capacity notes for percent-scaled resource metrics.
    for assessment in assessments {
        if !matches!(
            assessment.kind,
            MetricKind::CpuUsage | MetricKind::MemoryUsage | MetricKind::DiskUsage
        ) {
            continue;
        }

        if let Some(forecast) = &assessment.forecast {
            if forecast.predicted > 90.0 && forecast.trend == ForecastTrend::Increasing {
                recommendations.push(Recommendation {
                    priority: RecommendationPriority::High,
                    category: "capacity",
                    message: format!(
                        "{} is forecast to reach {:.1}% and still rising; act before it saturates",
                        assessment.kind, forecast.predicted
                    ),
                });
            }
        }
    }

    recommendations
}
