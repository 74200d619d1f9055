//! Wire protocol for ring communication
//!
//! Every call is a synchronous request/response exchange: one framed
//! request, one framed response. Frames are a 4-byte big-endian length
//! prefix followed by a postcard-encoded message.

use crate::error::{Result, RingError};
use crate::peer::PeerId;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Maximum message size (64 KB, generous for ring messages)
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Request types for ring operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RingRequest {
    // ==================== Registry Operations ====================
    /// Join the ring (peer -> registry)
    Register { id: PeerId, addr: SocketAddr },

    /// Ask the registry to trigger an election on every member
    /// (peer -> registry)
    BroadcastElection { origin: PeerId },

    /// An election round has started; block registrations
    /// (peer -> registry, idempotent)
    ElectionStarted { id: PeerId },

    /// An election round has concluded; allow registrations
    /// (peer -> registry, idempotent)
    ElectionEnded { id: PeerId },

    // ==================== Participant Operations ====================
    /// Install a new successor link (registry -> peer)
    ConfigureSuccessor { successor: PeerId },

    /// LCR election message carrying the circulating candidate
    /// (peer -> successor)
    Election { candidate: PeerId, origin: PeerId },

    /// Leader announcement circulating once around the ring
    /// (peer -> successor)
    Leader { winner: PeerId },

    /// Start an election after a randomized stagger (registry -> peer);
    /// acked before the election runs
    TriggerElection { origin: PeerId },
}

/// Response types for ring operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RingResponse {
    /// Request accepted
    Ack,
    /// Request rejected or failed
    Error { code: ErrorCode, message: String },
}

impl RingResponse {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        RingResponse::Error {
            code,
            message: message.into(),
        }
    }

    /// Turn this response into a `Result`, mapping error codes back to
    /// `RingError`
    pub fn into_result(self) -> Result<()> {
        match self {
            RingResponse::Ack => Ok(()),
            RingResponse::Error { code, message } => Err(code.into_error(message)),
        }
    }
}

/// Protocol-level error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    Unknown = 1,
    DuplicateId = 2,
    ElectionInProgress = 3,
    NotConfigured = 4,
    Unreachable = 5,
    Timeout = 6,
    InvalidRequest = 7,
}

impl ErrorCode {
    /// Reconstruct a `RingError` from a wire error
    pub fn into_error(self, message: String) -> RingError {
        match self {
            // The offending id is embedded in the message; the code alone
            // is what callers match on.
            ErrorCode::DuplicateId => RingError::Protocol(message),
            ErrorCode::ElectionInProgress => RingError::ElectionInProgress,
            ErrorCode::NotConfigured => RingError::NotConfigured,
            ErrorCode::Timeout => RingError::Timeout,
            ErrorCode::Unreachable | ErrorCode::Unknown | ErrorCode::InvalidRequest => {
                RingError::Protocol(message)
            }
        }
    }
}

impl RingError {
    /// Map an error to its wire code
    pub fn error_code(&self) -> ErrorCode {
        match self {
            RingError::DuplicateId(_) => ErrorCode::DuplicateId,
            RingError::ElectionInProgress => ErrorCode::ElectionInProgress,
            RingError::NotConfigured => ErrorCode::NotConfigured,
            RingError::Unreachable { .. } => ErrorCode::Unreachable,
            RingError::Timeout => ErrorCode::Timeout,
            _ => ErrorCode::Unknown,
        }
    }

    /// Build the wire response for a failed request
    pub fn to_response(&self) -> RingResponse {
        RingResponse::error(self.error_code(), self.to_string())
    }
}

/// Encode a request to bytes
pub fn encode_request(request: &RingRequest) -> Result<Vec<u8>> {
    postcard::to_allocvec(request).map_err(|e| RingError::Serialization(e.to_string()))
}

/// Decode a request from bytes
pub fn decode_request(bytes: &[u8]) -> Result<RingRequest> {
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(RingError::MessageTooLarge {
            size: bytes.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    postcard::from_bytes(bytes).map_err(|e| RingError::Deserialization(e.to_string()))
}

/// Encode a response to bytes
pub fn encode_response(response: &RingResponse) -> Result<Vec<u8>> {
    postcard::to_allocvec(response).map_err(|e| RingError::Serialization(e.to_string()))
}

/// Decode a response from bytes
pub fn decode_response(bytes: &[u8]) -> Result<RingResponse> {
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(RingError::MessageTooLarge {
            size: bytes.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    postcard::from_bytes(bytes).map_err(|e| RingError::Deserialization(e.to_string()))
}

/// Frame a message with length prefix for TCP transmission
pub fn frame_message(data: &[u8]) -> Vec<u8> {
    let len = data.len() as u32;
    let mut framed = Vec::with_capacity(4 + data.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(data);
    framed
}

/// Extract message length from frame header
pub fn frame_length(header: &[u8; 4]) -> usize {
    u32::from_be_bytes(*header) as usize
}
