//! HTTP-layer checks: plain HTTP/HTTPS and the Docker Engine ping.

use tracing::trace;
use url::Url;

use crate::config::ServiceTarget;

use super::{ProbeError, tcp};

/// Status codes accepted when the target does not configure its own set.
const DEFAULT_ACCEPTED_STATUS: [u16; 3] = [200, 301, 302];

/// GET the target URL and validate the response.
pub(super) async fn check_http(
    client: &reqwest::Client,
    target: &ServiceTarget,
) -> Result<(), ProbeError> {
    let url = Url::parse(&target.url)
        .map_err(|e| ProbeError::Config(format!("invalid url '{}': {e}", target.url)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ProbeError::Config(format!(
            "scheme '{}' cannot be checked over HTTP",
            url.scheme()
        )));
    }

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| ProbeError::Unreachable(format!("request failed: {e}")))?;

    let status_code = response.status().as_u16();
    let accepted = target
        .expected_status
        .as_deref()
        .unwrap_or(&DEFAULT_ACCEPTED_STATUS);

    if !accepted.contains(&status_code) {
        return Err(ProbeError::Unreachable(format!(
            "unexpected status code: {status_code}"
        )));
    }

    if let Some(fragment) = &target.body_contains {
        let body = response
            .text()
            .await
            .map_err(|e| ProbeError::Unreachable(format!("failed to read body: {e}")))?;

        if !body.contains(fragment.as_str()) {
            return Err(ProbeError::Unreachable(format!(
                "response body does not contain '{fragment}'"
            )));
        }
    }

    Ok(())
}

/// Ping the Docker Engine API; any HTTP-layer failure degrades to a plain
/// TCP connect so an engine without the API exposed still counts as up.
pub(super) async fn check_docker(
    client: &reqwest::Client,
    target: &ServiceTarget,
) -> Result<(), ProbeError> {
    let ping_url = docker_ping_url(target)?;

    match client.get(&ping_url).send().await {
        Ok(response) if response.status().is_success() => Ok(()),
        Ok(response) => {
            trace!(
                "docker ping at {ping_url} answered {}, falling back to tcp",
                response.status()
            );
            tcp::check_connect(target).await
        }
        Err(e) => {
            trace!("docker ping at {ping_url} failed ({e}), falling back to tcp");
            tcp::check_connect(target).await
        }
    }
}

fn docker_ping_url(target: &ServiceTarget) -> Result<String, ProbeError> {
    let (host, port) = tcp::derive_endpoint(target)?;
    Ok(format!("http://{host}:{port}/_ping"))
}
