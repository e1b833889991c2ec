//! Error types for AeroStream
//!
//! This module defines all error types used throughout the AeroStream crates.
//! Every failure of a stream operation is reported as one [`Error`] value
//! through the result of the operation that detected it.

#![allow(missing_docs)]

use std::time::Duration;
use thiserror::Error;

/// Result type alias for AeroStream operations
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for AeroStream operations
#[derive(Error, Debug)]
pub enum Error {
    /// Port outside the 16-bit range
    #[error("Invalid port: {0}")]
    InvalidPort(i64),

    /// Target without a usable host component
    #[error("Invalid host")]
    InvalidHost,

    /// Operation attempted without a live connection
    #[error("No connection")]
    NoConnection,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS errors
    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    /// Timeout errors
    #[error("Timeout error: {0}")]
    Timeout(#[from] TimeoutError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Broad classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Detected before any I/O from the arguments alone
    Configuration,
    /// Detected before any I/O from the stream's own state
    ResourceState,
    /// Produced by the underlying connection
    Transport,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidPort(_) | Error::InvalidHost | Error::Config(_) => {
                ErrorKind::Configuration
            }
            Error::NoConnection => ErrorKind::ResourceState,
            Error::Io(_) | Error::Tls(_) | Error::Timeout(_) => ErrorKind::Transport,
        }
    }

    /// Whether this error came from the network rather than from local checks
    pub fn is_transport(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }
}

/// TLS negotiation and configuration errors
#[derive(Error, Debug, Clone)]
pub enum TlsError {
    /// Name not usable for SNI / certificate matching
    #[error("Invalid server name: {0}")]
    InvalidServerName(String),

    /// Certificate material could not be loaded
    #[error("Invalid certificate: {0}")]
    Certificate(String),

    /// Handshake with the peer failed
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// TLS requested but support was compiled out
    #[error("TLS support is not enabled")]
    Unsupported,
}

/// Timeout errors
#[derive(Error, Debug, Clone)]
pub enum TimeoutError {
    /// Connection establishment did not finish in time
    #[error("Connect timeout: {timeout:?}")]
    Connect { timeout: Duration },
}

/// Configuration errors
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}
