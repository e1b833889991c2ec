//! Prelude module for AeroStream Core
//!
//! This module re-exports commonly used types and traits to make them
//! easily accessible for users of the library.

pub use crate::config::{SecuritySettings, StreamConfig, TrustMode};
pub use crate::error::{Error, Result};
pub use crate::operation::{AsyncFinishOperation, CancellationProbe, CompletionSignal};
pub use crate::queue::OperationQueue;
pub use crate::transport::{ConnectTarget, StreamDelegate, TrustInfo, WsStream};

// Re-export commonly used external dependencies
pub use bytes::Bytes;
