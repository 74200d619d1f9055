//! Peer identity

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Unique peer identifier. Totally ordered; the election winner is the
/// largest id in the registered set.
pub type PeerId = u64;

/// A registered ring member as tracked by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Peer identifier
    pub id: PeerId,
    /// Address the peer listens on
    pub addr: SocketAddr,
}

impl Member {
    pub fn new(id: PeerId, addr: SocketAddr) -> Self {
        Self { id, addr }
    }
}
