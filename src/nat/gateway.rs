//! Abstraction over the gateway device.

use std::fmt;
use std::net::IpAddr;

use super::error::GatewayError;

/// The device-facing side of the mapping lifecycle.
///
/// Every call is synchronous and may block for seconds; the manager only
/// checks for cancellation between calls. All state needed for follow-up
/// calls lives in the [`Context`](Self::Context) returned by discovery, which
/// is thrown away and rebuilt whenever a whole mapping cycle fails.
pub trait GatewayClient: Send + Sync + 'static {
    /// Session state obtained from discovery
    type Context: Send + fmt::Display;

    /// Locate a gateway and open a session with it
    fn discover(&self) -> Result<Self::Context, GatewayError>;

    /// Query the gateway's external address. Informational only.
    fn external_address(&self, ctx: &Self::Context) -> Result<IpAddr, GatewayError>;

    /// Map `port` on the gateway to the same port on this host
    fn add_mapping(&self, ctx: &Self::Context, port: u16) -> Result<(), GatewayError>;

    /// Remove the mapping for `port`
    fn remove_mapping(&self, ctx: &Self::Context, port: u16) -> Result<(), GatewayError>;
}
