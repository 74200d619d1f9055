//! # Ringleader
//!
//! Leader election in a dynamically-formed unidirectional ring of peer
//! processes, using the LCR (comparison-based ring election) algorithm:
//!
//! - **Participant**: per-peer election state machine. Forwards
//!   strictly-greater candidates, drops strictly-lesser ones, and
//!   declares victory when its own identifier returns unchanged. The
//!   `Leader` announcement then circulates exactly once.
//! - **Registry**: one well-known service that admits peers, rebuilds
//!   the ring on every membership change, fans out election triggers,
//!   and blocks registrations while an election is in flight.
//!
//! Ring adjacency follows arrival order, not identifier magnitude, so
//! the election outcome (maximum identifier wins) is independent of
//! where in the ring that identifier sits.
//!
//! ## Architecture
//!
//! ```text
//!            ┌──────────────┐
//!   Register │   Registry   │ ConfigureSuccessor / TriggerElection
//!  ─────────>│  membership  │────────────────────────┐
//!            │  exclusion   │                        │
//!            └──────────────┘                        ▼
//!        ┌──────┐     ┌──────┐     ┌──────┐     ┌──────┐
//!        │ peer │────>│ peer │────>│ peer │────>│ peer │──┐
//!        └──────┘     └──────┘     └──────┘     └──────┘  │
//!            ▲          Election / Leader messages        │
//!            └────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use ringleader::{Participant, Registry, RingConfig};
//!
//! let config = RingConfig::default();
//! let (_registry, _server) = Registry::serve(config.clone()).await?;
//!
//! let peer = Participant::new(5, config)?;
//! let _handle = peer.serve().await?;
//! peer.register().await?;
//! peer.start_election().await?;
//! ```

pub mod config;
pub mod error;
pub mod participant;
pub mod peer;
pub mod protocol;
pub mod registry;
pub mod transport;

// Re-export main types
pub use config::{RingConfig, DEFAULT_PEER_PORT_BASE, DEFAULT_REGISTRY_PORT};
pub use error::{Result, RingError};
pub use participant::{ElectionState, Participant};
pub use peer::{Member, PeerId};
pub use protocol::{ErrorCode, RingRequest, RingResponse};
pub use registry::{Registry, RegistryHandle};
pub use transport::{RingClient, ServerHandle};
