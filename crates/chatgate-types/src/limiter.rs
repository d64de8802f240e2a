//! Admission-control vocabulary shared by the core limiter and the HTTP layer.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Opaque identity a rate-limit bucket is keyed by.
///
/// In practice this is a client IP address rendered as text, but nothing
/// downstream relies on that structure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ClientKey(String);

impl ClientKey {
    /// Key used when a request carries no usable origin address.
    pub const UNKNOWN: &'static str = "unknown";

    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn unknown() -> Self {
        Self(Self::UNKNOWN.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ClientKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<std::net::IpAddr> for ClientKey {
    fn from(ip: std::net::IpAddr) -> Self {
        Self(ip.to_string())
    }
}

/// Outcome of asking the limiter to admit one request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Admission {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Whole tokens left in the bucket after this decision.
    pub remaining: u32,
    /// Bucket capacity, reported so callers can expose it to clients.
    pub limit: u32,
    /// Time until one whole token is available again. Only set on rejection.
    pub retry_after: Option<Duration>,
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// `Retry-After` value in whole seconds, rounded up and never below 1.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after.map(|d| {
            let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
            secs.max(1)
        })
    }
}
