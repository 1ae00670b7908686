//! Request diagnostics: who is asking.
//!
//! The client identity only feeds log lines, so resolving it must never fail
//! a request. A failed or slow reverse lookup degrades to the raw address.

use crate::config::ServerConfig;
use crate::error::BridgeError;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tracing::debug;

/// Identity used when the peer address is not known.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Resolve a human-readable identity for `peer`.
///
/// `"host (ip)"` when reverse lookup is enabled and succeeds, the bare IP
/// otherwise, [`UNKNOWN_CLIENT`] without a peer address.
pub async fn resolve_client_identity(peer: Option<SocketAddr>, config: &ServerConfig) -> String {
    let Some(peer) = peer else {
        return UNKNOWN_CLIENT.to_string();
    };
    let ip = peer.ip();
    if !config.resolve_client_names {
        return ip.to_string();
    }

    match reverse_lookup(ip, config.lookup_timeout).await {
        Ok(host) if host != ip.to_string() => format!("{host} ({ip})"),
        Ok(_) => ip.to_string(),
        Err(e) => {
            debug!("{}", e);
            ip.to_string()
        }
    }
}

/// Reverse-resolve `ip`, bounded by `timeout`.
///
/// `getnameinfo` blocks, so it runs on the blocking pool.
pub async fn reverse_lookup(ip: IpAddr, timeout: Duration) -> Result<String, BridgeError> {
    let failure = |reason: String| BridgeError::DiagnosticLookupFailure {
        addr: ip.to_string(),
        reason,
    };

    let lookup = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip));
    match tokio::time::timeout(timeout, lookup).await {
        Ok(Ok(Ok(host))) => Ok(host),
        Ok(Ok(Err(e))) => Err(failure(e.to_string())),
        Ok(Err(e)) => Err(failure(format!("lookup task panicked: {e}"))),
        Err(_) => Err(failure(format!("timed out after {}ms", timeout.as_millis()))),
    }
}
