//! RTT estimation.
//!
//! Mean and mean-square of the round-trip time are tracked as exponentially
//! weighted moving averages. The retransmit timeout is the mean scaled by a
//! fixed multiplier, floored at a configured minimum.

use std::time::Duration;

use crate::core::{MIN_TICK_INTERVAL, TICK_RTO_FACTOR};

use super::config::TransportConfig;

/// EWMA round-trip-time estimator.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// Mean RTT in seconds.
    mean: f64,
    /// Mean squared RTT in seconds².
    mean_sq: f64,
    /// Weight of a new sample.
    decay: f64,
    /// Mean-to-timeout multiplier.
    retry_multiplier: f64,
    /// Timeout floor.
    min_rto: Duration,
    /// Samples observed so far.
    samples: u64,
}

impl RttEstimator {
    /// Create an estimator seeded with `initial` as the mean.
    pub fn new(initial: Duration, decay: f64, retry_multiplier: f64, min_rto: Duration) -> Self {
        let mean = initial.as_secs_f64();
        Self {
            mean,
            mean_sq: mean * mean,
            decay,
            retry_multiplier,
            min_rto,
            samples: 0,
        }
    }

    /// Create an estimator from transport options.
    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(
            config.initial_rtt,
            config.rtt_decay,
            config.retry_multiplier,
            config.min_rto,
        )
    }

    /// Fold in one RTT sample.
    pub fn update(&mut self, sample: Duration) {
        let sample = sample.as_secs_f64();
        let keep = 1.0 - self.decay;
        self.mean = keep * self.mean + self.decay * sample;
        self.mean_sq = keep * self.mean_sq + self.decay * sample * sample;
        // Jensen keeps mean_sq >= mean^2 exactly; rounding may not.
        self.mean_sq = self.mean_sq.max(self.mean * self.mean);
        self.samples += 1;
    }

    /// Smoothed mean RTT.
    pub fn mean(&self) -> Duration {
        Duration::from_secs_f64(self.mean)
    }

    /// RTT variance in seconds².
    pub fn variance(&self) -> f64 {
        (self.mean_sq - self.mean * self.mean).max(0.0)
    }

    /// Number of samples folded in.
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Current retransmit timeout.
    pub fn retransmit_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.mean * self.retry_multiplier).max(self.min_rto)
    }

    /// Period of the connection tick for the current timeout.
    pub fn tick_interval(&self) -> Duration {
        self.retransmit_timeout()
            .mul_f64(TICK_RTO_FACTOR)
            .max(MIN_TICK_INTERVAL)
    }
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::from_config(&TransportConfig::default())
    }
}
