//! Port mapping lifecycle: discover a gateway, map ports, keep renewing them,
//! and unmap on shutdown.

use std::time::Duration;

pub mod error;
pub mod gateway;
pub mod manager;
pub mod ports;
pub mod upnp;
mod worker;

pub use self::error::{GatewayError, ManagerError, MappingAction};
pub use self::gateway::GatewayClient;
pub use self::manager::{FatalCallback, ManagerState, ManagerStatus, MappingManager};
pub use self::ports::PortSet;
pub use self::upnp::{IgdClient, IgdConfig, IgdSession, Transport};

/// Timing of the mapping cycles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Wait after a cycle that mapped nothing; the next cycle rediscovers
    pub retry_interval: Duration,
    /// Wait after a cycle that mapped at least one port
    pub renew_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(60),
            renew_interval: Duration::from_secs(20 * 60),
        }
    }
}

impl ManagerConfig {
    /// Pick the wait before the next cycle
    pub fn next_wait(&self, any_mapped: bool) -> Duration {
        if any_mapped {
            self.renew_interval
        } else {
            self.retry_interval
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_intervals() {
        let config = ManagerConfig::default();
        assert_eq!(config.retry_interval, Duration::from_secs(60));
        assert_eq!(config.renew_interval, Duration::from_secs(1200));
    }

    #[test]
    fn test_next_wait_policy() {
        let config = ManagerConfig::default();
        assert_eq!(config.next_wait(false), config.retry_interval);
        assert_eq!(config.next_wait(true), config.renew_interval);
    }
}
