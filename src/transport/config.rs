//! Transport configuration.

use std::time::Duration;

use crate::core::{
    ConfigError, DEFAULT_HELLO_INTERVAL, DEFAULT_HELLO_TIMEOUT, DEFAULT_INITIAL_RTT,
    DEFAULT_MAX_IN_FLIGHT, DEFAULT_MAX_PACKET_SIZE, DEFAULT_MAX_PROTOCOL_VIOLATIONS,
    DEFAULT_MIN_RTO, DEFAULT_MTU, DEFAULT_PING_INTERVAL, DEFAULT_PONG_TIMEOUT,
    DEFAULT_RECV_BUFFER_SIZE, DEFAULT_REORDER_WINDOW, DEFAULT_RETRY_MULTIPLIER,
    DEFAULT_RTT_DECAY, MAX_REORDER_WINDOW, MAX_TOTAL_LEN, MIN_MTU,
};

/// Per-connection transport options.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    /// Path MTU; no data frame exceeds it.
    pub mtu: usize,
    /// Congestion window: frames simultaneously in flight.
    pub max_in_flight: u32,
    /// Interval between pings.
    pub ping_interval: Duration,
    /// Pong silence after which the connection goes down.
    pub pong_timeout: Duration,
    /// EWMA weight of a new RTT sample.
    pub rtt_decay: f64,
    /// Multiplier from mean RTT to retransmit timeout.
    pub retry_multiplier: f64,
    /// RTT assumed before the first sample.
    pub initial_rtt: Duration,
    /// Floor of the retransmit timeout.
    pub min_rto: Duration,
    /// HELLO retry interval while connecting.
    pub hello_interval: Duration,
    /// Time allowed for the handshake.
    pub hello_timeout: Duration,
    /// Out-of-order data frames buffered by the receiver.
    pub reorder_window: u32,
    /// Largest logical packet accepted in either direction.
    pub max_packet_size: usize,
    /// Violations tolerated between two delivered packets.
    pub max_protocol_violations: u32,
    /// Run raw pipe payloads through the payload transform.
    pub transform_raw: bool,
    /// Socket receive buffer size.
    pub recv_buffer_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            ping_interval: DEFAULT_PING_INTERVAL,
            pong_timeout: DEFAULT_PONG_TIMEOUT,
            rtt_decay: DEFAULT_RTT_DECAY,
            retry_multiplier: DEFAULT_RETRY_MULTIPLIER,
            initial_rtt: DEFAULT_INITIAL_RTT,
            min_rto: DEFAULT_MIN_RTO,
            hello_interval: DEFAULT_HELLO_INTERVAL,
            hello_timeout: DEFAULT_HELLO_TIMEOUT,
            reorder_window: DEFAULT_REORDER_WINDOW,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            max_protocol_violations: DEFAULT_MAX_PROTOCOL_VIOLATIONS,
            transform_raw: false,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
        }
    }
}

impl TransportConfig {
    /// Start a builder from the defaults.
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder::new()
    }

    /// Check that every option is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mtu < MIN_MTU {
            return Err(ConfigError::MtuTooSmall {
                mtu: self.mtu,
                min: MIN_MTU,
            });
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::EmptyWindow);
        }
        if self.ping_interval.is_zero() {
            return Err(ConfigError::ZeroPingInterval);
        }
        if self.pong_timeout <= self.ping_interval {
            return Err(ConfigError::PongTimeoutTooShort);
        }
        if !(self.rtt_decay > 0.0 && self.rtt_decay <= 1.0) {
            return Err(ConfigError::InvalidDecay(self.rtt_decay));
        }
        if !(self.retry_multiplier >= 1.0 && self.retry_multiplier.is_finite()) {
            return Err(ConfigError::InvalidRetryMultiplier(self.retry_multiplier));
        }
        if self.initial_rtt.is_zero() || self.min_rto.is_zero() {
            return Err(ConfigError::ZeroTiming);
        }
        if self.hello_interval.is_zero() || self.hello_timeout < self.hello_interval {
            return Err(ConfigError::InvalidHelloTiming);
        }
        if self.reorder_window < self.max_in_flight {
            return Err(ConfigError::ReorderWindowTooSmall {
                window: self.reorder_window,
                in_flight: self.max_in_flight,
            });
        }
        if self.reorder_window > MAX_REORDER_WINDOW {
            return Err(ConfigError::ReorderWindowTooLarge {
                window: self.reorder_window,
                max: MAX_REORDER_WINDOW,
            });
        }
        if self.max_packet_size == 0 || self.max_packet_size > MAX_TOTAL_LEN {
            return Err(ConfigError::InvalidMaxPacketSize {
                size: self.max_packet_size,
                max: MAX_TOTAL_LEN,
            });
        }
        if self.max_protocol_violations == 0 {
            return Err(ConfigError::ZeroViolationThreshold);
        }
        if self.recv_buffer_size < self.mtu {
            return Err(ConfigError::RecvBufferTooSmall {
                size: self.recv_buffer_size,
                mtu: self.mtu,
            });
        }
        Ok(())
    }
}

/// Builder for [`TransportConfig`].
#[derive(Debug, Clone, Default)]
pub struct TransportConfigBuilder {
    config: TransportConfig,
}

impl TransportConfigBuilder {
    /// Create a builder with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the path MTU.
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.config.mtu = mtu;
        self
    }

    /// Set the congestion window.
    pub fn max_in_flight(mut self, frames: u32) -> Self {
        self.config.max_in_flight = frames;
        self
    }

    /// Set the ping interval.
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.config.ping_interval = interval;
        self
    }

    /// Set the pong timeout.
    pub fn pong_timeout(mut self, timeout: Duration) -> Self {
        self.config.pong_timeout = timeout;
        self
    }

    /// Set the RTT decay.
    pub fn rtt_decay(mut self, decay: f64) -> Self {
        self.config.rtt_decay = decay;
        self
    }

    /// Set the retry multiplier.
    pub fn retry_multiplier(mut self, multiplier: f64) -> Self {
        self.config.retry_multiplier = multiplier;
        self
    }

    /// Set the RTT assumed before the first sample.
    pub fn initial_rtt(mut self, rtt: Duration) -> Self {
        self.config.initial_rtt = rtt;
        self
    }

    /// Set the retransmit timeout floor.
    pub fn min_rto(mut self, rto: Duration) -> Self {
        self.config.min_rto = rto;
        self
    }

    /// Set the HELLO retry interval.
    pub fn hello_interval(mut self, interval: Duration) -> Self {
        self.config.hello_interval = interval;
        self
    }

    /// Set the handshake timeout.
    pub fn hello_timeout(mut self, timeout: Duration) -> Self {
        self.config.hello_timeout = timeout;
        self
    }

    /// Set the receiver reorder window.
    pub fn reorder_window(mut self, frames: u32) -> Self {
        self.config.reorder_window = frames;
        self
    }

    /// Set the maximum logical packet size.
    pub fn max_packet_size(mut self, size: usize) -> Self {
        self.config.max_packet_size = size;
        self
    }

    /// Set the protocol violation threshold.
    pub fn max_protocol_violations(mut self, count: u32) -> Self {
        self.config.max_protocol_violations = count;
        self
    }

    /// Enable or disable the payload transform on raw pipes.
    pub fn transform_raw(mut self, enabled: bool) -> Self {
        self.config.transform_raw = enabled;
        self
    }

    /// Set the socket receive buffer size.
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.config.recv_buffer_size = size;
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<TransportConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
