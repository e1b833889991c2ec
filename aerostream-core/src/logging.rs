//! Logging setup for AeroStream
//!
//! The crates emit structured events through `tracing`. Applications that do
//! not install their own subscriber can call [`init_logging`].

/// Install a global `tracing` subscriber filtered by `RUST_LOG` (default `info`)
///
/// Returns an error if a global subscriber is already installed.
#[cfg(feature = "logging")]
pub fn init_logging() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Initialize logging subsystem (no-op when logging feature is disabled)
#[cfg(not(feature = "logging"))]
pub fn init_logging() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_twice_does_not_panic() {
        let _ = init_logging();
        let second = init_logging();
        #[cfg(not(feature = "logging"))]
        assert!(second.is_ok());
        #[cfg(feature = "logging")]
        assert!(second.is_err());
    }
}
