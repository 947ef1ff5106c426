//! Outbound fragmentation of logical packets.
//!
//! A packet that fits in one frame together with a START-sized header is
//! sent as a single SINGLE frame. Anything larger becomes START, zero or
//! more MID, and one END frame. Fragment bodies are split as evenly as the
//! MTU allows so the last frame is never a tiny remainder.

use bytes::Bytes;

use crate::core::{SEQ_HEADER_SIZE, START_HEADER_SIZE};

use super::frame::{Fragment, FragmentPosition};

/// Splits logical packets into sequenced fragments.
///
/// Owns the connection's outbound sequence counter, so every fragment ever
/// produced by one `Fragmenter` has a distinct sequence number (modulo 2^32
/// wrap-around).
#[derive(Debug, Clone)]
pub struct Fragmenter {
    mtu: usize,
    next_seq: u32,
}

impl Fragmenter {
    /// Create a fragmenter whose first sequence number is 0.
    pub fn new(mtu: usize) -> Self {
        Self::with_initial_seq(mtu, 0)
    }

    /// Create a fragmenter starting at `seq`.
    pub fn with_initial_seq(mtu: usize, seq: u32) -> Self {
        debug_assert!(mtu > START_HEADER_SIZE);
        Self { mtu, next_seq: seq }
    }

    /// The MTU fragments are sized for.
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Sequence number the next fragment will carry.
    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    /// Number of frames `len` bytes are split into.
    pub fn frame_count(&self, len: usize) -> usize {
        let first_cap = self.mtu - START_HEADER_SIZE;
        if len <= first_cap {
            return 1;
        }
        let rest_cap = self.mtu - SEQ_HEADER_SIZE;
        1 + (len - first_cap).div_ceil(rest_cap)
    }

    /// Split `packet` into fragments, consuming one sequence number each.
    ///
    /// The caller enforces the maximum packet size; `packet.len()` must fit
    /// the 24-bit START length field.
    pub fn fragment(&mut self, packet: Bytes) -> Vec<Fragment> {
        let total = packet.len();
        let count = self.frame_count(total);

        if count == 1 {
            return vec![Fragment::new(
                self.take_seq(),
                FragmentPosition::Single,
                packet,
            )];
        }

        let first_cap = self.mtu - START_HEADER_SIZE;
        let mut fragments = Vec::with_capacity(count);
        let mut offset = 0;

        for index in 0..count {
            let remaining = total - offset;
            let frames_left = count - index;
            let mut chunk = remaining.div_ceil(frames_left);

            let position = if index == 0 {
                chunk = chunk.min(first_cap);
                FragmentPosition::Start {
                    total_len: total as u32,
                }
            } else if frames_left == 1 {
                FragmentPosition::End
            } else {
                FragmentPosition::Mid
            };

            let payload = packet.slice(offset..offset + chunk);
            offset += chunk;
            fragments.push(Fragment::new(self.take_seq(), position, payload));
        }

        debug_assert_eq!(offset, total);
        fragments
    }

    fn take_seq(&mut self) -> u32 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }
}
