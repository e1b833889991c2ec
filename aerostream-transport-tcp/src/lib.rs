//! TCP Transport for AeroStream
//!
//! This crate provides the TCP-based [`WsStream`](aerostream_core::WsStream)
//! implementation, with optional TLS via the `tls` feature.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/aerostream-transport-tcp/")]

mod connection;
pub mod tcp;

// Re-export TCP transport types
pub use tcp::NetworkStream;

/// Prelude module
pub mod prelude {
    pub use crate::tcp::NetworkStream;
    pub use aerostream_core::transport::{ConnectTarget, StreamDelegate, TrustInfo, WsStream};
}
