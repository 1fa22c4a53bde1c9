//! Egress allowlist gate.
//!
//! Fail-closed: an empty allowlist denies every destination. Destinations
//! must be absolute http(s) URLs with a host; the host is matched
//! case-insensitively and exactly against the configured names.

use std::collections::BTreeSet;

use reqwest::Url;

use crate::error::{GatewayError, Result};

/// Process-wide set of permitted destination hosts.
#[derive(Debug, Clone, Default)]
pub struct AllowlistGate {
    hosts: BTreeSet<String>,
}

impl AllowlistGate {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hosts: hosts
                .into_iter()
                .map(|h| h.as_ref().trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        }
    }

    /// A gate that denies everything.
    pub fn deny_all() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn is_permitted(&self, destination: &str) -> bool {
        self.check(destination).is_ok()
    }

    /// Parse `destination` and confirm its host is allowed.
    ///
    /// Malformed URLs yield `InvalidDestination`; well-formed but
    /// disallowed ones yield `ForwardingNotPermitted`.
    pub fn check(&self, destination: &str) -> Result<Url> {
        let url = parse_destination(destination)?;
        let host = url
            .host_str()
            .map(|h| h.to_ascii_lowercase())
            .unwrap_or_default();
        if self.hosts.contains(&host) {
            Ok(url)
        } else {
            tracing::warn!(destination, host, "forwarding blocked by allowlist");
            Err(GatewayError::ForwardingNotPermitted { host })
        }
    }
}

fn parse_destination(destination: &str) -> Result<Url> {
    let url = Url::parse(destination)
        .map_err(|e| GatewayError::InvalidDestination(format!("{destination}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(GatewayError::InvalidDestination(format!(
            "{destination}: scheme must be http or https"
        )));
    }
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(GatewayError::InvalidDestination(format!(
            "{destination}: missing host"
        ))),
    }
}
