//! Ring error types

use crate::peer::PeerId;
use std::net::SocketAddr;
use thiserror::Error;

/// Result type for ring operations
pub type Result<T> = std::result::Result<T, RingError>;

/// Ring errors
#[derive(Debug, Error)]
pub enum RingError {
    // ==================== Registration Errors ====================
    #[error("peer {0} is already registered")]
    DuplicateId(PeerId),

    #[error("election in progress, registration blocked")]
    ElectionInProgress,

    // ==================== Topology Errors ====================
    #[error("no successor configured")]
    NotConfigured,

    #[error("peer unreachable: {addr}")]
    Unreachable { addr: SocketAddr },

    #[error("peer id {id} does not fit in the port space (base {base})")]
    IdOutOfRange { id: PeerId, base: u16 },

    // ==================== Protocol Errors ====================
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    // ==================== Network Errors ====================
    #[error("request timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // ==================== Internal Errors ====================
    #[error("channel closed")]
    ChannelClosed,
}

impl RingError {
    /// Check if this error is retriable by the operator
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            RingError::ElectionInProgress
                | RingError::NotConfigured
                | RingError::Unreachable { .. }
                | RingError::Timeout
        )
    }

    /// Check if this is a registration-time rejection (the peer itself is fine,
    /// the registry refused the request)
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            RingError::DuplicateId(_) | RingError::ElectionInProgress
        )
    }
}

// Conversion from channel errors
impl<T> From<tokio::sync::mpsc::error::SendError<T>> for RingError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        RingError::ChannelClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for RingError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        RingError::ChannelClosed
    }
}

// Conversion from postcard for serialization
impl From<postcard::Error> for RingError {
    fn from(e: postcard::Error) -> Self {
        RingError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_errors() {
        assert!(RingError::Timeout.is_retriable());
        assert!(RingError::ElectionInProgress.is_retriable());
        assert!(RingError::NotConfigured.is_retriable());
        assert!(!RingError::DuplicateId(7).is_retriable());
        assert!(!RingError::ChannelClosed.is_retriable());
    }

    #[test]
    fn test_rejections() {
        assert!(RingError::DuplicateId(7).is_rejection());
        assert!(RingError::ElectionInProgress.is_rejection());
        assert!(!RingError::Timeout.is_rejection());
    }
}
