//! Inbound ordering and reassembly.
//!
//! Data frames may arrive lost, duplicated, or reordered. [`ReceiveWindow`]
//! buffers them by sequence number and releases them strictly in order;
//! [`Reassembler`] turns the ordered stream of SINGLE/START/MID/END frames
//! back into logical packets.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use super::frame::{Fragment, FragmentPosition};

/// Where an inbound data frame falls relative to the receive cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Buffered for in-order release; acknowledge it.
    Accepted,
    /// Already released or already buffered; acknowledge it again.
    Duplicate,
    /// Too far ahead of the cursor; drop without acknowledging.
    OutOfWindow,
}

impl Admission {
    /// Whether the frame should be acknowledged.
    pub fn should_ack(self) -> bool {
        !matches!(self, Self::OutOfWindow)
    }
}

/// Bounded reorder buffer with an in-order release cursor.
#[derive(Debug, Clone)]
pub struct ReceiveWindow {
    next_expected: u32,
    window: u32,
    buffered: HashMap<u32, Fragment>,
}

impl ReceiveWindow {
    /// Create a window expecting sequence 0 first.
    pub fn new(window: u32) -> Self {
        Self::with_initial_seq(window, 0)
    }

    /// Create a window expecting `seq` first.
    pub fn with_initial_seq(window: u32, seq: u32) -> Self {
        Self {
            next_expected: seq,
            window,
            buffered: HashMap::new(),
        }
    }

    /// Next sequence number that will be released.
    pub fn next_expected(&self) -> u32 {
        self.next_expected
    }

    /// Number of frames waiting for a gap to fill.
    pub fn buffered(&self) -> usize {
        self.buffered.len()
    }

    /// Offer one inbound fragment.
    pub fn insert(&mut self, fragment: Fragment) -> Admission {
        // Wrapping distance; negative means behind the cursor.
        let advance = fragment.seq.wrapping_sub(self.next_expected) as i32;
        if advance < 0 {
            return Admission::Duplicate;
        }
        if advance as u32 >= self.window {
            return Admission::OutOfWindow;
        }
        if self.buffered.contains_key(&fragment.seq) {
            return Admission::Duplicate;
        }
        self.buffered.insert(fragment.seq, fragment);
        Admission::Accepted
    }

    /// Release the next in-order fragment, if it has arrived.
    pub fn pop_ready(&mut self) -> Option<Fragment> {
        let fragment = self.buffered.remove(&self.next_expected)?;
        self.next_expected = self.next_expected.wrapping_add(1);
        Some(fragment)
    }

    /// Discard every buffered frame.
    pub fn clear(&mut self) {
        self.buffered.clear();
    }
}

/// Recoverable reassembly failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReassemblyError {
    /// A START or SINGLE arrived while another packet was still open.
    #[error("reassembly of packet starting at seq {abandoned_seq} interrupted")]
    Interrupted {
        /// Sequence of the abandoned START.
        abandoned_seq: u32,
    },

    /// MID or END with no open packet.
    #[error("orphan fragment seq {seq} with no open packet")]
    Orphan {
        /// Sequence of the orphan.
        seq: u32,
    },

    /// END reached with fewer bytes than announced.
    #[error("packet length mismatch: announced {expected}, received {actual}")]
    LengthMismatch {
        /// Announced total length.
        expected: usize,
        /// Bytes received.
        actual: usize,
    },

    /// START announced more than the configured maximum.
    #[error("announced packet of {announced} bytes exceeds maximum {max}")]
    Oversized {
        /// Announced total length.
        announced: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Fragments carried more bytes than announced.
    #[error("packet overflow: announced {expected}, received at least {actual}")]
    Overflow {
        /// Announced total length.
        expected: usize,
        /// Bytes received so far.
        actual: usize,
    },
}

/// Result of feeding one in-order fragment to the [`Reassembler`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reassembled {
    /// Completed logical packet, if this fragment finished one.
    pub packet: Option<Bytes>,
    /// Protocol violations observed while handling this fragment.
    pub errors: Vec<ReassemblyError>,
}

impl Reassembled {
    fn packet(packet: Bytes) -> Self {
        Self {
            packet: Some(packet),
            errors: Vec::new(),
        }
    }

    fn error(error: ReassemblyError) -> Self {
        Self {
            packet: None,
            errors: vec![error],
        }
    }
}

/// The single open packet.
#[derive(Debug, Clone)]
struct ReassemblyState {
    seq_start: u32,
    expected_total: usize,
    received: BytesMut,
}

/// What the reassembler is doing with the current packet.
#[derive(Debug, Clone, Default)]
enum Slot {
    /// Between packets.
    #[default]
    Idle,
    /// Collecting fragments.
    Open(ReassemblyState),
    /// Skipping the rest of a rejected packet up to its END.
    Discarding,
}

/// Rebuilds logical packets from in-order fragments.
///
/// At most one packet is open at a time; the reassembler does not reorder.
/// A rejected packet is reported once and its remaining fragments are
/// skipped silently.
#[derive(Debug, Clone)]
pub struct Reassembler {
    max_packet_size: usize,
    slot: Slot,
}

impl Reassembler {
    /// Create a reassembler accepting packets up to `max_packet_size` bytes.
    pub fn new(max_packet_size: usize) -> Self {
        Self {
            max_packet_size,
            slot: Slot::Idle,
        }
    }

    /// Whether a packet is partially assembled.
    pub fn is_open(&self) -> bool {
        matches!(self.slot, Slot::Open(_))
    }

    /// Whether the rest of a rejected packet is being skipped.
    pub fn is_discarding(&self) -> bool {
        matches!(self.slot, Slot::Discarding)
    }

    /// Abandon any open packet.
    pub fn reset(&mut self) {
        self.slot = Slot::Idle;
    }

    /// Feed the next in-order fragment.
    pub fn push(&mut self, fragment: Fragment) -> Reassembled {
        match fragment.position {
            FragmentPosition::Single => {
                let mut out = Reassembled::packet(fragment.payload);
                out.errors.extend(self.abandon());
                out
            }
            FragmentPosition::Start { total_len } => {
                let mut out = Reassembled::default();
                out.errors.extend(self.abandon());
                let total = total_len as usize;

                if total > self.max_packet_size {
                    self.slot = Slot::Discarding;
                    out.errors.push(ReassemblyError::Oversized {
                        announced: total,
                        max: self.max_packet_size,
                    });
                } else if fragment.payload.len() > total {
                    self.slot = Slot::Discarding;
                    out.errors.push(ReassemblyError::Overflow {
                        expected: total,
                        actual: fragment.payload.len(),
                    });
                } else {
                    let mut received = BytesMut::with_capacity(total);
                    received.extend_from_slice(&fragment.payload);
                    self.slot = Slot::Open(ReassemblyState {
                        seq_start: fragment.seq,
                        expected_total: total,
                        received,
                    });
                }
                out
            }
            FragmentPosition::Mid | FragmentPosition::End => {
                let is_end = fragment.position == FragmentPosition::End;
                let state = match &mut self.slot {
                    Slot::Open(state) => state,
                    Slot::Discarding => {
                        if is_end {
                            self.slot = Slot::Idle;
                        }
                        return Reassembled::default();
                    }
                    Slot::Idle => {
                        return Reassembled::error(ReassemblyError::Orphan { seq: fragment.seq });
                    }
                };

                let actual = state.received.len() + fragment.payload.len();
                if actual > state.expected_total {
                    let expected = state.expected_total;
                    self.slot = if is_end { Slot::Idle } else { Slot::Discarding };
                    return Reassembled::error(ReassemblyError::Overflow { expected, actual });
                }
                state.received.extend_from_slice(&fragment.payload);

                if !is_end {
                    return Reassembled::default();
                }

                let Slot::Open(state) = std::mem::take(&mut self.slot) else {
                    return Reassembled::default();
                };
                if state.received.len() != state.expected_total {
                    return Reassembled::error(ReassemblyError::LengthMismatch {
                        expected: state.expected_total,
                        actual: state.received.len(),
                    });
                }
                Reassembled::packet(state.received.freeze())
            }
        }
    }

    /// Drop the current packet; an open one is reported as interrupted.
    fn abandon(&mut self) -> Option<ReassemblyError> {
        match std::mem::take(&mut self.slot) {
            Slot::Open(state) => Some(ReassemblyError::Interrupted {
                abandoned_seq: state.seq_start,
            }),
            Slot::Idle | Slot::Discarding => None,
        }
    }
}
