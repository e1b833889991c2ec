//! TLS Transport for AeroStream
//!
//! This crate layers TLS on top of an already connected byte stream and
//! collects the trust evidence produced by the handshake.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/aerostream-transport-tls/")]

pub mod tls;

// Re-export TLS types
pub use tls::{client_config, negotiate, TlsClientStream};

/// Prelude module
pub mod prelude {
    pub use crate::tls::{client_config, negotiate, TlsClientStream};
    pub use aerostream_core::config::{SecuritySettings, TrustMode};
    pub use aerostream_core::transport::TrustInfo;
}
