//! Raw socket connect checks for the TCP-family protocols.

use tokio::net::TcpStream;
use url::Url;

use crate::config::ServiceTarget;
use crate::probe::Protocol;

use super::ProbeError;

/// Open a socket to the target's host:port. Success is the connect event
/// itself; nothing is written or read.
pub(super) async fn check_connect(target: &ServiceTarget) -> Result<(), ProbeError> {
    let (host, port) = derive_endpoint(target)?;

    TcpStream::connect((host.as_str(), port))
        .await
        .map_err(|e| ProbeError::Unreachable(format!("connect to {host}:{port} failed: {e}")))?;

    Ok(())
}

/// Derive host and port from the target URL, defaulting the port by
/// protocol. Bare `host:port` strings are accepted as well.
pub(super) fn derive_endpoint(target: &ServiceTarget) -> Result<(String, u16), ProbeError> {
    let parsed = parse_lenient(&target.url)?;

    let host = parsed
        .host_str()
        .ok_or_else(|| ProbeError::Config(format!("url '{}' has no host", target.url)))?
        .to_string();

    let port = parsed
        .port()
        .unwrap_or_else(|| default_port(target.protocol));

    Ok((host, port))
}

/// `Url::parse` treats `example.com:9000` as a scheme of `example.com`;
/// retry with an explicit scheme when that happens.
fn parse_lenient(raw: &str) -> Result<Url, ProbeError> {
    match Url::parse(raw) {
        Ok(url) if url.host_str().is_some() => Ok(url),
        _ => Url::parse(&format!("tcp://{raw}"))
            .map_err(|e| ProbeError::Config(format!("invalid url '{raw}': {e}"))),
    }
}

fn default_port(protocol: Protocol) -> u16 {
    match protocol {
        Protocol::Ssh => 22,
        Protocol::Mysql => 3306,
        Protocol::Redis => 6379,
        Protocol::Docker => 2375,
        Protocol::Https => 443,
        _ => 80,
    }
}
