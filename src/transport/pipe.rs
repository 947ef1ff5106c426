//! Raw pipe multiplexing.
//!
//! Pipe datagrams share the socket with the reliable stream but bypass it
//! entirely: no sequence number, no acknowledgement, no window slot.

use bytes::Bytes;

use crate::core::PIPE_HEADER_SIZE;

use super::error::{TransportError, TransportResult};
use super::frame::Frame;

/// Encodes outbound pipe datagrams and counts traffic per direction.
#[derive(Debug, Clone)]
pub struct PipeMux {
    mtu: usize,
    sent: u64,
    received: u64,
}

impl PipeMux {
    /// Create a multiplexer for the given MTU.
    pub fn new(mtu: usize) -> Self {
        Self {
            mtu,
            sent: 0,
            received: 0,
        }
    }

    /// Largest payload one pipe datagram can carry.
    pub fn max_payload(&self) -> usize {
        self.mtu - PIPE_HEADER_SIZE
    }

    /// Encode a datagram for `pipe_id`.
    pub fn outbound(&mut self, pipe_id: u8, payload: Bytes) -> TransportResult<Bytes> {
        if payload.len() > self.max_payload() {
            return Err(TransportError::PacketTooLarge {
                size: payload.len(),
                max: self.max_payload(),
            });
        }
        self.sent += 1;
        Ok(Frame::Pipe { pipe_id, payload }.encode())
    }

    /// Account for an inbound datagram and hand its contents back.
    pub fn inbound(&mut self, pipe_id: u8, payload: Bytes) -> (u8, Bytes) {
        self.received += 1;
        (pipe_id, payload)
    }

    /// Datagrams encoded so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Datagrams received so far.
    pub fn received(&self) -> u64 {
        self.received
    }
}
