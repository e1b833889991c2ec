//! Transport stream abstraction
//!
//! This module provides the capability interface a protocol engine drives to
//! move raw bytes over a duplex connection, so the engine never depends on a
//! concrete transport (plain TCP, TLS over TCP, test doubles, ...).

use crate::config::SecuritySettings;
use crate::error::{Error, Result};
use bytes::Bytes;
use std::sync::Weak;
use std::time::Duration;

/// Host and port a stream should connect to
///
/// The port is kept in a wide integer so that out-of-range values coming from
/// URL or configuration parsing are rejected here rather than truncated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    host: Option<String>,
    port: i64,
}

/// A validated [`ConnectTarget`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or IP literal, without IPv6 brackets
    pub host: String,
    /// Port in the 16-bit range
    pub port: u16,
}

impl ConnectTarget {
    /// Create a target from a host and port
    pub fn new(host: impl Into<String>, port: i64) -> Self {
        Self {
            host: Some(host.into()),
            port,
        }
    }

    /// Create a target whose source carried no host component
    pub fn without_host(port: i64) -> Self {
        Self { host: None, port }
    }

    /// Host component, if any
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Raw port value
    pub fn port(&self) -> i64 {
        self.port
    }

    /// Check the target without touching the network
    ///
    /// # Errors
    ///
    /// [`Error::InvalidPort`] when the port is outside `0..=65535`, then
    /// [`Error::InvalidHost`] when the host is missing, blank or has
    /// unbalanced IPv6 brackets.
    pub fn validate(&self) -> Result<Endpoint> {
        let port = u16::try_from(self.port).map_err(|_| Error::InvalidPort(self.port))?;

        let host = self
            .host
            .as_deref()
            .map(str::trim)
            .and_then(unbracket)
            .filter(|h| !h.is_empty() && !h.contains(&['[', ']'][..]))
            .ok_or(Error::InvalidHost)?;

        Ok(Endpoint {
            host: host.to_string(),
            port,
        })
    }
}

/// Strip one pair of IPv6 literal brackets; a lone bracket is malformed.
fn unbracket(host: &str) -> Option<&str> {
    match host.strip_prefix('[') {
        Some(inner) => inner.strip_suffix(']'),
        None if host.ends_with(']') => None,
        None => Some(host),
    }
}

/// Evidence produced by transport-security negotiation
///
/// Consumed by an external trust policy; this crate never judges it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustInfo {
    /// DER-encoded peer certificate chain, leaf first
    pub certificates: Vec<Vec<u8>>,
    /// Peer identity the negotiation was performed for
    pub domain: Option<String>,
}

impl TrustInfo {
    /// No evidence at all
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty() && self.domain.is_none()
    }
}

/// Consumer notified by a stream about incoming data
///
/// Streams hold delegates weakly; a dropped delegate is skipped silently.
/// No notification is dispatched for a connection once `cleanup` has returned,
/// but one already dispatched when `cleanup` starts may still be delivered.
pub trait StreamDelegate: Send + Sync {
    /// New bytes were appended to the stream's read buffer.
    ///
    /// Called once per received chunk. The bytes are not passed along;
    /// drain them with [`WsStream::read`].
    fn new_bytes_available(&self);

    /// The background receive stopped on its own: `None` when the peer
    /// closed the connection, `Some` on a receive error.
    fn stream_did_error(&self, _error: Option<&Error>) {}
}

/// Duplex byte stream driven by a protocol engine
#[async_trait::async_trait]
pub trait WsStream: Send + Sync {
    /// Open the connection and, when requested, negotiate TLS on top of it.
    ///
    /// On success the stream starts receiving in the background right away.
    async fn connect(
        &self,
        target: &ConnectTarget,
        timeout: Duration,
        security: &SecuritySettings,
    ) -> Result<()>;

    /// Send `data` on the live connection.
    ///
    /// `is_cancelled` is advisory: implementations may consult it to skip
    /// work, but are not required to abort a send already in flight.
    async fn write(&self, data: &[u8], is_cancelled: &(dyn Fn() -> bool + Send + Sync))
        -> Result<()>;

    /// Drain everything received since the last drain.
    ///
    /// Never blocks. Returns `None` when nothing is buffered.
    fn read(&self) -> Option<Bytes>;

    /// Stop receiving and release the connection. Safe to call repeatedly.
    fn cleanup(&self);

    /// Trust evidence from the last security negotiation
    fn trust_info(&self) -> TrustInfo;

    /// Install the delegate notified about incoming data
    fn set_delegate(&self, delegate: Weak<dyn StreamDelegate>);
}
