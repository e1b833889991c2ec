//! # AeroStream Core
//!
//! Contracts shared by AeroStream transports and the engines driving them
//!
//! This crate provides:
//!
//! - Error handling and types
//! - The [`WsStream`] capability trait and its [`StreamDelegate`]
//! - Connection targets, security settings and trust evidence
//! - The receive buffer used by stream implementations
//! - [`AsyncFinishOperation`], a cancellable task for queue-based schedulers,
//!   and the [`OperationQueue`] that runs them

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/aerostream-core/")]

// Core modules
pub mod buffer;
pub mod config;
pub mod error;
pub mod logging;
pub mod operation;
pub mod queue;
pub mod transport;

// Prelude module with common imports
pub mod prelude;

// Re-export key types for convenience
pub use buffer::ReadBuffer;
pub use config::{SecuritySettings, StreamConfig, TrustMode};
pub use error::{Error, ErrorKind, Result};
pub use operation::{
    AsyncFinishOperation, CancellationProbe, ChangePhase, CompletionSignal, ObservedKey,
    OperationId, OperationState,
};
pub use queue::OperationQueue;
pub use transport::{ConnectTarget, Endpoint, StreamDelegate, TrustInfo, WsStream};
