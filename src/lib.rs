//! Portkeeper library (lib.rs)
//!
//! Keeps a fixed set of ports mapped on the local UPnP gateway for as long as
//! the process runs, renewing them periodically and removing them on exit.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Interruptible waits for the mapping worker
pub mod interrupt;

// Port mapping lifecycle
pub mod nat;

// Waking the main thread from signal handlers
#[cfg(unix)]
pub mod signal;

// Re-export main types
pub use interrupt::CancellableWait;
pub use nat::{
    GatewayClient,
    GatewayError,
    IgdClient,
    IgdConfig,
    ManagerConfig,
    ManagerError,
    ManagerState,
    ManagerStatus,
    MappingManager,
    PortSet,
    Transport,
};
#[cfg(unix)]
pub use signal::{SignalGuard, SignalHandoff};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging system with custom configuration
///
/// `RUST_LOG` takes precedence over `level` when set.
///
/// # Arguments
/// * `level` - Log level (trace/debug/info/warn/error)
///
/// # Example
/// ```
/// portkeeper::init_logging("info");
/// ```
pub fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
        // Reduce verbosity of the UPnP stack
        .add_directive("igd=warn".parse().expect("static directive"))
        .add_directive("attohttpc=warn".parse().expect("static directive"));

    // try_init so a second call (tests, embedding) is harmless
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_names(true)
                .with_ansi(true),
        )
        .with(filter)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_init_logging_twice() {
        init_logging("debug");
        init_logging("info");
    }
}
