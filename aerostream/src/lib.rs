//! # AeroStream
//!
//! **Duplex byte transport and cancellable operations for WebSocket engines**
//!
//! AeroStream provides the layer a WebSocket protocol engine sits on: a
//! byte stream that connects (optionally over TLS), pushes "bytes available"
//! notifications to a delegate and hands buffered bytes over on demand, plus
//! an operation primitive that only finishes when its work says so.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use aerostream::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct Printer;
//!
//! impl StreamDelegate for Printer {
//!     fn new_bytes_available(&self) {
//!         println!("bytes available");
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> aerostream::Result<()> {
//!     let stream = NetworkStream::new();
//!     let delegate: Arc<dyn StreamDelegate> = Arc::new(Printer);
//!     stream.set_delegate(Arc::downgrade(&delegate));
//!
//!     let target = ConnectTarget::new("example.com", 443);
//!     stream
//!         .connect(&target, Duration::from_secs(5), &SecuritySettings::tls())
//!         .await?;
//!     stream.write(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n", &|| false).await?;
//!
//!     tokio::time::sleep(Duration::from_millis(500)).await;
//!     if let Some(bytes) = stream.read() {
//!         println!("{}", String::from_utf8_lossy(&bytes));
//!     }
//!     stream.cleanup();
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/aerostream/")]

// Re-export core components
pub use aerostream_core::*;

#[cfg(feature = "transport-tcp")]
pub use aerostream_transport_tcp as transport_tcp;

#[cfg(feature = "transport-tcp")]
pub use aerostream_transport_tcp::NetworkStream;

#[cfg(feature = "transport-tls")]
pub use aerostream_transport_tls as transport_tls;

/// Prelude module with common imports
pub mod prelude {
    pub use aerostream_core::prelude::*;

    #[cfg(feature = "transport-tcp")]
    pub use aerostream_transport_tcp::prelude::*;

    #[cfg(feature = "transport-tls")]
    pub use aerostream_transport_tls::prelude::*;
}
