//! UPnP IGD backend for [`GatewayClient`].
//!
//! Uses the blocking `igd` API; every call here runs on the mapping worker
//! thread and may take seconds.

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddrV4, UdpSocket};
use std::str::FromStr;
use std::time::Duration;

use igd::{AddPortError, Gateway, PortMappingProtocol, RemovePortError, RequestError, SearchOptions};

use super::error::{GatewayError, MappingAction};
use super::gateway::GatewayClient;

/// Transport protocol of the mappings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    /// TCP
    #[default]
    Tcp,
    /// UDP
    Udp,
}

impl From<Transport> for PortMappingProtocol {
    fn from(transport: Transport) -> Self {
        match transport {
            Transport::Tcp => PortMappingProtocol::TCP,
            Transport::Udp => PortMappingProtocol::UDP,
        }
    }
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            other => Err(format!("unknown protocol '{}', expected tcp or udp", other)),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "TCP"),
            Self::Udp => write!(f, "UDP"),
        }
    }
}

/// UPnP IGD client configuration
#[derive(Debug, Clone)]
pub struct IgdConfig {
    /// How long SSDP discovery waits for answers
    pub discovery_timeout: Duration,
    /// Protocol of every mapping
    pub transport: Transport,
    /// Requested lease in seconds, 0 for permanent
    pub lease_duration: u32,
    /// Description shown in the router's mapping table
    pub description: String,
}

impl Default for IgdConfig {
    fn default() -> Self {
        Self {
            discovery_timeout: Duration::from_millis(2000),
            transport: Transport::Tcp,
            lease_duration: 0,
            description: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

/// [`GatewayClient`] speaking UPnP IGD through the `igd` crate
#[derive(Debug, Clone, Default)]
pub struct IgdClient {
    config: IgdConfig,
}

impl IgdClient {
    /// Create a client; nothing is sent until discovery
    pub fn new(config: IgdConfig) -> Self {
        Self { config }
    }

    /// Settings applied to discovery and every mapping request
    pub fn config(&self) -> &IgdConfig {
        &self.config
    }
}

/// An open session with a discovered IGD
pub struct IgdSession {
    gateway: Gateway,
    local_addr: Ipv4Addr,
}

impl IgdSession {
    /// Address of this host on the gateway's network
    pub fn local_addr(&self) -> Ipv4Addr {
        self.local_addr
    }

    /// The gateway's control endpoint
    pub fn gateway_addr(&self) -> SocketAddrV4 {
        self.gateway.addr
    }
}

impl fmt::Display for IgdSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IGD at {} (local IP {})", self.gateway.addr, self.local_addr)
    }
}

impl GatewayClient for IgdClient {
    type Context = IgdSession;

    fn discover(&self) -> Result<IgdSession, GatewayError> {
        tracing::debug!(
            "Searching for UPnP gateway (timeout {:?}) ...",
            self.config.discovery_timeout
        );

        let options = SearchOptions {
            timeout: Some(self.config.discovery_timeout),
            ..Default::default()
        };
        let gateway = igd::search_gateway(options).map_err(|e| GatewayError::NotFound(e.to_string()))?;
        tracing::debug!("UPnP gateway found: {}", gateway.addr);

        let local_addr = local_ipv4_towards(gateway.addr).map_err(|e| {
            GatewayError::NotFound(format!(
                "cannot determine local address towards {}: {}",
                gateway.addr, e
            ))
        })?;

        Ok(IgdSession { gateway, local_addr })
    }

    fn external_address(&self, ctx: &IgdSession) -> Result<IpAddr, GatewayError> {
        ctx.gateway
            .get_external_ip()
            .map(IpAddr::V4)
            .map_err(|e| GatewayError::Unavailable(e.to_string()))
    }

    fn add_mapping(&self, ctx: &IgdSession, port: u16) -> Result<(), GatewayError> {
        ctx.gateway
            .add_port(
                self.config.transport.into(),
                port,
                SocketAddrV4::new(ctx.local_addr, port),
                self.config.lease_duration,
                &self.config.description,
            )
            .map_err(|e| GatewayError::Mapping {
                action: MappingAction::Add,
                port,
                code: add_error_code(&e),
                reason: e.to_string(),
            })
    }

    fn remove_mapping(&self, ctx: &IgdSession, port: u16) -> Result<(), GatewayError> {
        ctx.gateway
            .remove_port(self.config.transport.into(), port)
            .map_err(|e| GatewayError::Mapping {
                action: MappingAction::Remove,
                port,
                code: remove_error_code(&e),
                reason: e.to_string(),
            })
    }
}

fn add_error_code(err: &AddPortError) -> Option<u16> {
    match err {
        AddPortError::RequestError(RequestError::ErrorCode(code, _)) => Some(*code),
        _ => None,
    }
}

fn remove_error_code(err: &RemovePortError) -> Option<u16> {
    match err {
        RemovePortError::RequestError(RequestError::ErrorCode(code, _)) => Some(*code),
        _ => None,
    }
}

/// Local IPv4 address the OS would use to reach `gateway`.
///
/// Connecting a UDP socket sends nothing; it only makes the kernel pick a
/// route and source address.
fn local_ipv4_towards(gateway: SocketAddrV4) -> io::Result<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect(gateway)?;
    match socket.local_addr()?.ip() {
        IpAddr::V4(ip) => Ok(ip),
        IpAddr::V6(_) => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "UPnP requires an IPv4 local address",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = IgdConfig::default();
        assert_eq!(config.discovery_timeout, Duration::from_secs(2));
        assert_eq!(config.transport, Transport::Tcp);
        assert_eq!(config.lease_duration, 0);
        assert_eq!(config.description, "portkeeper");
    }

    #[test]
    fn test_transport_parsing() {
        assert_eq!("tcp".parse::<Transport>(), Ok(Transport::Tcp));
        assert_eq!("UDP".parse::<Transport>(), Ok(Transport::Udp));
        assert!("sctp".parse::<Transport>().is_err());
        assert_eq!(PortMappingProtocol::from(Transport::Udp), PortMappingProtocol::UDP);
        assert_eq!(Transport::Tcp.to_string(), "TCP");
    }

    #[test]
    fn test_local_address_towards_loopback() {
        let local = local_ipv4_towards(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 1900)).unwrap();
        assert_eq!(local, Ipv4Addr::LOCALHOST);
    }
}
