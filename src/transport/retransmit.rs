//! Retransmission queue and congestion window.
//!
//! Frames move through `Unsent -> InFlight -> Acked`. New frames are admitted
//! in FIFO order while fewer than `max_in_flight` frames are unacknowledged.
//! In-flight frames are kept in a schedule ordered by last transmission time
//! and resent once the retransmit timeout has passed since that time.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

use bytes::Bytes;

/// One encoded data frame awaiting acknowledgement.
#[derive(Debug, Clone)]
pub struct PendingFrame {
    /// Sequence number of the frame.
    pub seq: u32,
    /// Encoded datagram, resent verbatim.
    pub datagram: Bytes,
    /// First transmission; `None` while unsent.
    pub first_sent_at: Option<Instant>,
    /// Latest transmission; `None` while unsent.
    pub last_sent_at: Option<Instant>,
    /// Number of transmissions so far.
    pub transmissions: u32,
    /// Tie-breaker among frames sent at the same instant.
    order: u64,
}

impl PendingFrame {
    fn new(seq: u32, datagram: Bytes) -> Self {
        Self {
            seq,
            datagram,
            first_sent_at: None,
            last_sent_at: None,
            transmissions: 0,
            order: 0,
        }
    }
}

/// Datagrams produced by one [`RetransmitQueue::tick`].
#[derive(Debug, Default, Clone)]
pub struct TickOutput {
    /// Datagrams to put on the wire, in order.
    pub datagrams: Vec<Bytes>,
    /// How many of them were first transmissions.
    pub admitted: usize,
    /// How many of them were retransmissions.
    pub retransmitted: usize,
}

/// Frames awaiting acknowledgement, bounded by the congestion window.
#[derive(Debug)]
pub struct RetransmitQueue {
    max_in_flight: u32,
    unsent: VecDeque<PendingFrame>,
    in_flight: HashMap<u32, PendingFrame>,
    /// `(last_sent_at, order) -> seq`, earliest first.
    schedule: BTreeMap<(Instant, u64), u32>,
    next_order: u64,
}

impl RetransmitQueue {
    /// Create a queue allowing `max_in_flight` unacknowledged frames.
    pub fn new(max_in_flight: u32) -> Self {
        Self {
            max_in_flight,
            unsent: VecDeque::new(),
            in_flight: HashMap::new(),
            schedule: BTreeMap::new(),
            next_order: 0,
        }
    }

    /// Queue an encoded frame for its first transmission.
    pub fn enqueue(&mut self, seq: u32, datagram: Bytes) {
        self.unsent.push_back(PendingFrame::new(seq, datagram));
    }

    /// Frames transmitted and not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Frames waiting for a window slot.
    pub fn unsent(&self) -> usize {
        self.unsent.len()
    }

    /// Whether nothing is queued or in flight.
    pub fn is_empty(&self) -> bool {
        self.unsent.is_empty() && self.in_flight.is_empty()
    }

    /// Whether `seq` is transmitted and unacknowledged.
    pub fn is_in_flight(&self, seq: u32) -> bool {
        self.in_flight.contains_key(&seq)
    }

    /// Resend overdue frames, then admit new ones into free window slots.
    pub fn tick(&mut self, now: Instant, rto: Duration) -> TickOutput {
        let mut output = TickOutput::default();

        let mut resent = Vec::new();
        while let Some((&(sent_at, order), &seq)) = self.schedule.first_key_value() {
            if sent_at + rto > now {
                break;
            }
            self.schedule.remove(&(sent_at, order));
            resent.push(seq);
        }

        for seq in resent {
            let order = self.take_order();
            let Some(frame) = self.in_flight.get_mut(&seq) else {
                continue;
            };
            frame.last_sent_at = Some(now);
            frame.transmissions += 1;
            frame.order = order;
            output.datagrams.push(frame.datagram.clone());
            output.retransmitted += 1;
            self.schedule.insert((now, order), seq);
        }

        while self.in_flight.len() < self.max_in_flight as usize {
            let Some(mut frame) = self.unsent.pop_front() else {
                break;
            };
            let order = self.take_order();
            frame.first_sent_at = Some(now);
            frame.last_sent_at = Some(now);
            frame.transmissions = 1;
            frame.order = order;
            output.datagrams.push(frame.datagram.clone());
            output.admitted += 1;
            self.schedule.insert((now, order), frame.seq);
            self.in_flight.insert(frame.seq, frame);
        }

        output
    }

    /// Remove an acknowledged frame, returning its RTT sample.
    ///
    /// Unknown and duplicate acknowledgements return `None`.
    pub fn on_ack(&mut self, seq: u32, now: Instant) -> Option<Duration> {
        let frame = self.in_flight.remove(&seq)?;
        let (Some(first), Some(last)) = (frame.first_sent_at, frame.last_sent_at) else {
            return None;
        };
        self.schedule.remove(&(last, frame.order));
        Some(now.saturating_duration_since(first))
    }

    /// Drop every queued and in-flight frame.
    pub fn clear(&mut self) {
        self.unsent.clear();
        self.in_flight.clear();
        self.schedule.clear();
    }

    fn take_order(&mut self) -> u64 {
        let order = self.next_order;
        self.next_order += 1;
        order
    }
}
