//! Protocol-specific reachability checks
//!
//! One probe is a single, timeout-bounded health check against one service.
//! Dispatch is an exhaustive match over the sealed [`Protocol`] enum, so an
//! unsupported protocol cannot exist past config parsing; probe-level
//! configuration problems (bad URL, wrong scheme) are reported as
//! `ServiceStatus::Error` and kept distinct from network failures
//! (`ServiceStatus::Offline`).
//!
//! Probes never retry internally. Retry policy is the monitor's next tick.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{instrument, trace};

use crate::config::ServiceTarget;
use crate::{CheckResult, ServiceStatus};

mod http;
mod tcp;

/// Supported check protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
    Tcp,
    Ssh,
    Mysql,
    Redis,
    Docker,
    /// ICMP is unavailable without elevated privileges, so ping targets are
    /// checked with a TCP connect instead.
    Ping,
    Custom,
}

/// Why a probe did not come back `Online`.
#[derive(Debug)]
pub enum ProbeError {
    /// The service could not be reached or did not answer acceptably.
    Unreachable(String),

    /// The target is misconfigured; retrying will not help until the
    /// configuration changes.
    Config(String),
}

impl std::fmt::Display for ProbeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeError::Unreachable(msg) => write!(f, "{}", msg),
            ProbeError::Config(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl std::error::Error for ProbeError {}

/// Caller-supplied predicate for `Protocol::Custom` targets.
pub type CustomCheck =
    Arc<dyn Fn(ServiceTarget) -> BoxFuture<'static, Result<(), ProbeError>> + Send + Sync>;

/// Stateless probe dispatcher.
///
/// Holds the shared HTTP client and the registry of custom predicates;
/// everything else lives on the target.
pub struct Prober {
    client: reqwest::Client,
    custom_checks: HashMap<String, CustomCheck>,
}

impl Prober {
    pub fn new() -> Self {
        Self {
            // Redirects are not followed: 301/302 are accepted status codes
            // in their own right.
            client: reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .expect("Failed to build HTTP client"),
            custom_checks: HashMap::new(),
        }
    }

    /// Register a predicate for a `Protocol::Custom` target.
    ///
    /// Targets without a registered predicate fall back to the HTTP check.
    pub fn register_custom_check(&mut self, service_id: impl ToString, check: CustomCheck) {
        self.custom_checks.insert(service_id.to_string(), check);
    }

    /// Run one check against the target, racing it against the target's
    /// timeout. Whichever settles first wins.
    #[instrument(skip(self, target), fields(service = %target.id))]
    pub async fn check(&self, target: &ServiceTarget) -> CheckResult {
        trace!("probing {} via {:?}", target.url, target.protocol);

        let start = Instant::now();
        let outcome =
            tokio::time::timeout(Duration::from_millis(target.timeout_ms), self.dispatch(target))
                .await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(())) => CheckResult {
                status: ServiceStatus::Online,
                response_time_ms: Some(elapsed_ms),
                timestamp: Utc::now(),
                error: None,
            },
            Ok(Err(ProbeError::Unreachable(msg))) => CheckResult {
                status: ServiceStatus::Offline,
                response_time_ms: None,
                timestamp: Utc::now(),
                error: Some(msg),
            },
            Ok(Err(err @ ProbeError::Config(_))) => CheckResult {
                status: ServiceStatus::Error,
                response_time_ms: None,
                timestamp: Utc::now(),
                error: Some(err.to_string()),
            },
            Err(_) => CheckResult {
                status: ServiceStatus::Offline,
                response_time_ms: None,
                timestamp: Utc::now(),
                error: Some(format!("timed out after {}ms", target.timeout_ms)),
            },
        }
    }

    async fn dispatch(&self, target: &ServiceTarget) -> Result<(), ProbeError> {
        match target.protocol {
            Protocol::Http | Protocol::Https => http::check_http(&self.client, target).await,

            Protocol::Tcp | Protocol::Ssh | Protocol::Mysql | Protocol::Redis | Protocol::Ping => {
                tcp::check_connect(target).await
            }

            Protocol::Docker => http::check_docker(&self.client, target).await,

            Protocol::Custom => match self.custom_checks.get(&target.id) {
                Some(check) => check(target.clone()).await,
                None => http::check_http(&self.client, target).await,
            },
        }
    }
}

impl Default for Prober {
    fn default() -> Self {
        Self::new()
    }
}
