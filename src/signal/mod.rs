//! Waking an ordinary thread from OS signal handlers.
//!
//! Signal handlers may not take locks or allocate, so they can't use the
//! worker's [`CancellableWait`](crate::interrupt::CancellableWait). Instead
//! they post to a [`SignalHandoff`], a self-pipe the main thread blocks on.

mod handlers;
mod handoff;

use std::io;
use std::os::raw::c_int;
use thiserror::Error;

pub use self::handlers::{claim_shutdown, SignalGuard, SHUTDOWN_SIGNALS};
pub use self::handoff::SignalHandoff;

/// Errors installing signal handlers
#[derive(Debug, Error)]
pub enum SignalError {
    /// Another guard is still alive
    #[error("Signal handlers are already installed")]
    AlreadyInstalled,

    /// `sigaction` failed
    #[error("Failed to install handler for signal {signal}: {source}")]
    Install {
        /// Signal number
        signal: c_int,
        /// OS error
        #[source]
        source: io::Error,
    },
}
