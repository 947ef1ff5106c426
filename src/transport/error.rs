//! Transport layer error types.
//!
//! Malformed inbound frames are dropped without any reply; the
//! classification helpers below let callers decide whether an error only
//! warrants a log line or ends the connection.

use std::io;

use thiserror::Error;

use crate::core::{ConfigError, TransformError};

use super::connection::{ConnectionPhase, FailReason};
use super::frame::FrameError;
use super::reassembly::ReassemblyError;

/// Transport layer errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Frame parsing error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Reassembly protocol violation.
    #[error("reassembly error: {0}")]
    Reassembly(#[from] ReassemblyError),

    /// Rejected configuration.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Payload transform failure.
    #[error(transparent)]
    Transform(#[from] TransformError),

    /// I/O error (socket operations).
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Operation requires an established connection.
    #[error("connection not established (phase {0:?})")]
    NotEstablished(ConnectionPhase),

    /// Outbound packet or raw datagram over its size limit.
    #[error("packet of {size} bytes exceeds limit of {max}")]
    PacketTooLarge {
        /// Offered size.
        size: usize,
        /// Applicable limit.
        max: usize,
    },

    /// The handshake did not complete.
    #[error("handshake failed: {0}")]
    HandshakeFailed(FailReason),

    /// Connection is closed.
    #[error("connection closed")]
    ConnectionClosed,
}

impl TransportError {
    /// Check if this error should result in silent drop (no response sent).
    pub fn is_silent_drop(&self) -> bool {
        matches!(self, TransportError::Frame(_))
    }

    /// Check if this error is a recoverable protocol violation.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            TransportError::Reassembly(_) | TransportError::Transform(_)
        )
    }

    /// Check if this error is fatal to the connection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::Io(_)
                | TransportError::HandshakeFailed(_)
                | TransportError::ConnectionClosed
        )
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
