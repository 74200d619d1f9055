//! Ring configuration

use crate::error::{Result, RingError};
use crate::peer::PeerId;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default registry port, known to all peers in advance
pub const DEFAULT_REGISTRY_PORT: u16 = 50099;

/// Default base port for peer addressing (peer `id` listens on `base + id`)
pub const DEFAULT_PEER_PORT_BASE: u16 = 50000;

/// Ring configuration shared by participants and the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingConfig {
    /// Host all peers are reachable on
    pub host: IpAddr,

    /// Base port for deterministic peer addressing
    pub peer_port_base: u16,

    /// Well-known registry address
    pub registry_addr: SocketAddr,

    /// Connection establishment timeout
    pub connect_timeout: Duration,

    /// Timeout for a full request/response round trip
    pub call_timeout: Duration,

    /// Upper bound of the randomized delay before a triggered election starts
    pub trigger_stagger_max: Duration,

    /// How long the registry keeps registrations blocked for an election
    /// that never reported its end
    pub election_grace: Duration,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            peer_port_base: DEFAULT_PEER_PORT_BASE,
            registry_addr: SocketAddr::new(
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                DEFAULT_REGISTRY_PORT,
            ),
            connect_timeout: Duration::from_secs(2),
            call_timeout: Duration::from_secs(5),
            trigger_stagger_max: Duration::from_millis(250),
            election_grace: Duration::from_secs(30),
        }
    }
}

impl RingConfig {
    /// Set the host peers are reachable on
    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    /// Set the peer port base
    pub fn with_peer_port_base(mut self, base: u16) -> Self {
        self.peer_port_base = base;
        self
    }

    /// Set the registry address
    pub fn with_registry_addr(mut self, addr: SocketAddr) -> Self {
        self.registry_addr = addr;
        self
    }

    /// Set the call timeout
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the exclusion-flag grace period
    pub fn with_election_grace(mut self, grace: Duration) -> Self {
        self.election_grace = grace;
        self
    }

    /// Compute the address peer `id` listens on.
    ///
    /// Addressing is deterministic (`host : peer_port_base + id`) so any
    /// party can reach a peer without a lookup service.
    pub fn peer_addr(&self, id: PeerId) -> Result<SocketAddr> {
        let port = u16::try_from(id)
            .ok()
            .and_then(|id| self.peer_port_base.checked_add(id))
            .ok_or(RingError::IdOutOfRange {
                id,
                base: self.peer_port_base,
            })?;
        Ok(SocketAddr::new(self.host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RingConfig::default();
        assert_eq!(config.peer_port_base, DEFAULT_PEER_PORT_BASE);
        assert_eq!(config.registry_addr.port(), DEFAULT_REGISTRY_PORT);
    }

    #[test]
    fn test_peer_addressing() {
        let config = RingConfig::default();
        let addr = config.peer_addr(5).unwrap();
        assert_eq!(addr.port(), DEFAULT_PEER_PORT_BASE + 5);
        assert_eq!(addr.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn test_peer_addressing_overflow() {
        let config = RingConfig::default();
        let err = config.peer_addr(u64::from(u16::MAX)).unwrap_err();
        assert!(matches!(err, RingError::IdOutOfRange { .. }));
    }

    #[test]
    fn test_builder_setters() {
        let config = RingConfig::default()
            .with_peer_port_base(42000)
            .with_call_timeout(Duration::from_millis(500));
        assert_eq!(config.peer_addr(7).unwrap().port(), 42007);
        assert_eq!(config.call_timeout, Duration::from_millis(500));
    }
}
