//! Configuration for the mesh client

use crate::error::{MeshError, Result};
use crate::packet::{constants, PeerInfo};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Mesh client configuration builder
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// Local address to bind. Discovery advertises the bound address, so a
    /// concrete interface address makes the node reachable by its peers.
    pub bind_addr: IpAddr,
    /// Well-known mesh port: dedicated hosts bind it and discovery
    /// broadcasts to it.
    pub port: u16,
    /// Dedicated hosts bind the well-known port and are trusted to keep
    /// application state; regular clients bind an ephemeral port.
    pub dedicated: bool,
    /// Known dedicated server to announce to each discovery round.
    pub dedicated_server: Option<SocketAddr>,
    /// Public internet endpoint of this node, if known. Shared alongside the
    /// LAN endpoint and used to recognize our own advertisements.
    pub wan_endpoint: Option<SocketAddr>,
    /// IPv4 subnet mask used for the broadcast address computation.
    pub subnet_mask: Ipv4Addr,
    /// Maximum coalesced datagram payload in bytes.
    pub max_datagram_payload: usize,
    /// Pause between discovery rounds.
    pub discovery_interval: Duration,
    /// Pause after each peer's retransmit pass, bounding the resend rate.
    pub resend_pace: Duration,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: constants::DEFAULT_PORT,
            dedicated: false,
            dedicated_server: None,
            wan_endpoint: None,
            subnet_mask: Ipv4Addr::new(255, 255, 255, 0),
            max_datagram_payload: constants::MAX_DATAGRAM_PAYLOAD,
            discovery_interval: Duration::from_millis(1000),
            resend_pace: Duration::from_millis(20),
        }
    }
}

impl MeshConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for a dedicated host on the well-known port
    pub fn dedicated_host() -> Self {
        Self::default().dedicated(true)
    }

    /// Set the local bind address
    pub fn bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the well-known mesh port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Flag this client as a dedicated host
    pub fn dedicated(mut self, dedicated: bool) -> Self {
        self.dedicated = dedicated;
        self
    }

    /// Set a known dedicated server endpoint to announce to
    pub fn dedicated_server(mut self, endpoint: SocketAddr) -> Self {
        self.dedicated_server = Some(endpoint);
        self
    }

    /// Set this node's public internet endpoint, if known
    pub fn wan_endpoint(mut self, endpoint: SocketAddr) -> Self {
        self.wan_endpoint = Some(endpoint);
        self
    }

    /// Set the IPv4 subnet mask used for broadcast discovery
    pub fn subnet_mask(mut self, mask: Ipv4Addr) -> Self {
        self.subnet_mask = mask;
        self
    }

    /// Set the maximum coalesced datagram payload
    pub fn max_datagram_payload(mut self, bytes: usize) -> Self {
        self.max_datagram_payload = bytes;
        self
    }

    /// Set the pause between discovery rounds
    pub fn discovery_interval(mut self, interval: Duration) -> Self {
        self.discovery_interval = interval;
        self
    }

    /// Set the per-peer pause in the retransmit pass
    pub fn resend_pace(mut self, pace: Duration) -> Self {
        self.resend_pace = pace;
        self
    }

    /// The port the client binds: the well-known port for dedicated hosts,
    /// an ephemeral one otherwise.
    pub fn effective_bind_port(&self) -> u16 {
        if self.dedicated {
            self.port
        } else {
            0
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_datagram_payload < PeerInfo::SIZE {
            return Err(MeshError::config(
                "Datagram payload must hold at least one peer info packet",
            ));
        }

        if self.discovery_interval.is_zero() {
            return Err(MeshError::config(
                "Discovery interval must be greater than zero",
            ));
        }

        if self.resend_pace.is_zero() {
            return Err(MeshError::config("Resend pace must be greater than zero"));
        }

        if self.dedicated && self.port == 0 {
            return Err(MeshError::config(
                "A dedicated host needs a fixed well-known port",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(MeshConfig::default().validate().is_ok());
        assert!(MeshConfig::dedicated_host().validate().is_ok());
    }

    #[test]
    fn test_bind_port_selection() {
        assert_eq!(MeshConfig::new().effective_bind_port(), 0);
        assert_eq!(
            MeshConfig::dedicated_host().effective_bind_port(),
            constants::DEFAULT_PORT
        );
    }

    #[test]
    fn test_validation_rejects_nonsense() {
        assert!(MeshConfig::new()
            .max_datagram_payload(8)
            .validate()
            .is_err());
        assert!(MeshConfig::new()
            .discovery_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(MeshConfig::new()
            .resend_pace(Duration::ZERO)
            .validate()
            .is_err());
        assert!(MeshConfig::dedicated_host().port(0).validate().is_err());
    }
}
