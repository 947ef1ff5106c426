//! Keepalive ping/pong and dead-peer detection.
//!
//! The first tick after the connection comes up sends a PING and starts the
//! pong timer. A new PING follows every `ping_interval`; any PONG restarts
//! the timer. When the timer reaches `pong_timeout` the manager reports
//! [`LivenessEvent::TimedOut`] once and stops.

use std::time::{Duration, Instant};

use rand::RngCore;

use crate::core::NONCE_SIZE;

use super::frame::Nonce;

/// Keepalive state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessPhase {
    /// No tick has run yet.
    Idle,
    /// Pinging the peer.
    Active,
    /// Pong timeout elapsed; terminal.
    TimedOut,
}

/// Action requested by a liveness tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessEvent {
    /// Send a PING carrying this nonce.
    Ping(Nonce),
    /// The peer stopped answering.
    TimedOut,
}

/// Drives PING emission and tracks PONG arrival.
#[derive(Debug, Clone)]
pub struct LivenessManager {
    phase: LivenessPhase,
    ping_interval: Duration,
    pong_timeout: Duration,
    last_ping_sent: Option<Instant>,
    last_pong_seen: Option<Instant>,
}

impl LivenessManager {
    /// Create an idle manager.
    pub fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            phase: LivenessPhase::Idle,
            ping_interval,
            pong_timeout,
            last_ping_sent: None,
            last_pong_seen: None,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> LivenessPhase {
        self.phase
    }

    /// When the last PING went out.
    pub fn last_ping_sent(&self) -> Option<Instant> {
        self.last_ping_sent
    }

    /// When the last PONG arrived (or pinging started).
    pub fn last_pong_seen(&self) -> Option<Instant> {
        self.last_pong_seen
    }

    /// Advance to `now`.
    pub fn tick<R: RngCore>(&mut self, now: Instant, rng: &mut R) -> Option<LivenessEvent> {
        match self.phase {
            LivenessPhase::TimedOut => None,
            LivenessPhase::Idle => {
                self.phase = LivenessPhase::Active;
                self.last_pong_seen = Some(now);
                Some(self.ping(now, rng))
            }
            LivenessPhase::Active => {
                if let Some(seen) = self.last_pong_seen
                    && now.saturating_duration_since(seen) >= self.pong_timeout
                {
                    self.phase = LivenessPhase::TimedOut;
                    return Some(LivenessEvent::TimedOut);
                }

                let due = self
                    .last_ping_sent
                    .is_none_or(|sent| now.saturating_duration_since(sent) >= self.ping_interval);
                due.then(|| self.ping(now, rng))
            }
        }
    }

    /// Record a PONG.
    pub fn on_pong(&mut self, now: Instant) {
        if self.phase == LivenessPhase::Active {
            self.last_pong_seen = Some(now);
        }
    }

    /// Reset to idle; the next tick starts pinging afresh.
    pub fn reset(&mut self) {
        self.phase = LivenessPhase::Idle;
        self.last_ping_sent = None;
        self.last_pong_seen = None;
    }

    fn ping<R: RngCore>(&mut self, now: Instant, rng: &mut R) -> LivenessEvent {
        let mut nonce = [0u8; NONCE_SIZE];
        rng.fill_bytes(&mut nonce);
        self.last_ping_sent = Some(now);
        LivenessEvent::Ping(nonce)
    }
}
