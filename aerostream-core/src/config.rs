//! Stream configuration for AeroStream
//!
//! This module provides configuration options for transport streams and the
//! security layer they may negotiate.

use crate::error::ConfigError;
use crate::Error;
use std::path::PathBuf;
use std::time::Duration;

/// Largest chunk a single background receive may deliver
pub const DEFAULT_MAX_READ_CHUNK: usize = 4096;

/// Connect timeout used when the caller has no better value
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Stream configuration
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Maximum bytes requested per background receive
    pub max_read_chunk: usize,
    /// Disable Nagle's algorithm on the socket
    pub nodelay: bool,
    /// Timeout suggested to callers of `connect`
    pub default_connect_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_read_chunk: DEFAULT_MAX_READ_CHUNK,
            nodelay: true,
            default_connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl StreamConfig {
    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_read_chunk == 0 {
            return Err(Error::Config(ConfigError::Validation(
                "max_read_chunk must be greater than 0".to_string(),
            )));
        }

        if self.default_connect_timeout.is_zero() {
            return Err(Error::Config(ConfigError::Validation(
                "default_connect_timeout must be greater than 0".to_string(),
            )));
        }

        Ok(())
    }

    /// Set maximum receive chunk size
    pub fn max_read_chunk(mut self, size: usize) -> Self {
        self.max_read_chunk = size;
        self
    }

    /// Set TCP_NODELAY
    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.nodelay = enabled;
        self
    }

    /// Set the default connect timeout
    pub fn default_connect_timeout(mut self, timeout: Duration) -> Self {
        self.default_connect_timeout = timeout;
        self
    }
}

/// How the peer certificate is judged during the TLS handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrustMode {
    /// Verify the chain against the configured roots while negotiating
    #[default]
    Verify,
    /// Accept any chain while negotiating; an external policy judges
    /// the evidence exposed through `trust_info`
    Deferred,
}

/// Transport security settings
#[derive(Debug, Clone, Default)]
pub struct SecuritySettings {
    /// Negotiate TLS on top of TCP
    pub use_tls: bool,
    /// Name used for SNI and certificate matching; defaults to the target host
    pub server_name: Option<String>,
    /// Extra DER-encoded trust anchors
    pub root_certificates: Vec<Vec<u8>>,
    /// PEM file with extra trust anchors
    pub ca_file: Option<PathBuf>,
    /// Certificate evaluation mode
    pub trust_mode: TrustMode,
}

impl SecuritySettings {
    /// Plain TCP, no security layer
    pub fn plain() -> Self {
        Self::default()
    }

    /// TLS with default verification
    pub fn tls() -> Self {
        Self {
            use_tls: true,
            ..Self::default()
        }
    }

    /// Override the server name
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Trust an extra DER-encoded root certificate
    pub fn add_root_certificate(mut self, der: Vec<u8>) -> Self {
        self.root_certificates.push(der);
        self
    }

    /// Load extra trust anchors from a PEM file
    pub fn ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    /// Set the trust mode
    pub fn trust_mode(mut self, mode: TrustMode) -> Self {
        self.trust_mode = mode;
        self
    }
}
