//! CLI argument parsing for the ringleader daemon
//!
//! One binary, two roles: the well-known registry service and the
//! individual ring peers.

use clap::{Parser, Subcommand};
use ringleader::{PeerId, RingConfig};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Ringleader - LCR ring leader election
///
/// Start the registry first, then any number of peers. Peers register
/// themselves on startup; the registry rebuilds the ring topology on
/// every join. Type `election` at a peer prompt to have every member
/// start an election; the largest identifier wins.
#[derive(Parser, Debug)]
#[command(name = "ringleaderd")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the membership registry at the well-known address
    Registry {
        /// Registry bind address
        #[arg(long, default_value = "127.0.0.1:50099", env = "RINGLEADER_REGISTRY_BIND")]
        bind: SocketAddr,

        /// Seconds before a stale election stops blocking registration
        #[arg(long, default_value = "30", env = "RINGLEADER_ELECTION_GRACE_SECS")]
        election_grace_secs: u64,
    },

    /// Run one ring peer
    Peer {
        /// Unique peer identifier; the peer listens on port-base + id
        #[arg(long, env = "RINGLEADER_PEER_ID")]
        id: PeerId,

        /// Host all peers are reachable on
        #[arg(long, default_value = "127.0.0.1", env = "RINGLEADER_HOST")]
        host: IpAddr,

        /// Base port for deterministic peer addressing
        #[arg(long, default_value = "50000", env = "RINGLEADER_PORT_BASE")]
        port_base: u16,

        /// Well-known registry address
        #[arg(long, default_value = "127.0.0.1:50099", env = "RINGLEADER_REGISTRY")]
        registry: SocketAddr,

        /// Upper bound (ms) of the randomized delay before a triggered
        /// election starts
        #[arg(long, default_value = "250", env = "RINGLEADER_STAGGER_MS")]
        stagger_ms: u64,
    },
}

impl Cli {
    /// Build the ring configuration for the selected role
    pub fn ring_config(&self) -> RingConfig {
        match &self.command {
            Command::Registry {
                bind,
                election_grace_secs,
            } => RingConfig::default()
                .with_registry_addr(*bind)
                .with_election_grace(Duration::from_secs(*election_grace_secs)),
            Command::Peer {
                host,
                port_base,
                registry,
                stagger_ms,
                ..
            } => {
                let mut config = RingConfig::default()
                    .with_host(*host)
                    .with_peer_port_base(*port_base)
                    .with_registry_addr(*registry);
                config.trigger_stagger_max = Duration::from_millis(*stagger_ms);
                config
            }
        }
    }

    /// Validate arguments before any network resource is opened
    pub fn validate(&self) -> Result<(), String> {
        if let Command::Peer { id, port_base, .. } = &self.command {
            let fits = u16::try_from(*id)
                .ok()
                .and_then(|id| port_base.checked_add(id))
                .is_some();
            if !fits {
                return Err(format!(
                    "peer id {} does not fit in the port space (base {})",
                    id, port_base
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_defaults() {
        let cli = Cli::parse_from(["ringleaderd", "registry"]);
        assert!(cli.validate().is_ok());

        let config = cli.ring_config();
        assert_eq!(config.registry_addr.port(), 50099);
        assert_eq!(config.election_grace, Duration::from_secs(30));
    }

    #[test]
    fn test_peer_arguments() {
        let cli = Cli::parse_from([
            "ringleaderd",
            "peer",
            "--id",
            "5",
            "--port-base",
            "42000",
            "--registry",
            "127.0.0.1:42900",
        ]);
        assert!(cli.validate().is_ok());

        let config = cli.ring_config();
        assert_eq!(config.peer_addr(5).unwrap().port(), 42005);
        assert_eq!(config.registry_addr.port(), 42900);
    }

    #[test]
    fn test_peer_id_is_required() {
        let result = Cli::try_parse_from(["ringleaderd", "peer"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_peer_id_port_overflow_rejected() {
        let cli = Cli::parse_from(["ringleaderd", "peer", "--id", "70000"]);
        assert!(cli.validate().is_err());
    }
}
