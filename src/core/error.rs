//! Error types shared by every udptun layer.

use thiserror::Error;

/// Errors raised when validating a transport configuration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// MTU too small to carry a START header and one payload byte.
    #[error("mtu {mtu} is below the minimum of {min}")]
    MtuTooSmall {
        /// Configured MTU.
        mtu: usize,
        /// Smallest accepted MTU.
        min: usize,
    },

    /// Congestion window of zero frames.
    #[error("max_in_flight must be at least 1")]
    EmptyWindow,

    /// Zero ping interval.
    #[error("ping_interval must be non-zero")]
    ZeroPingInterval,

    /// Pong timeout that would expire before the next ping.
    #[error("pong_timeout must exceed ping_interval")]
    PongTimeoutTooShort,

    /// RTT decay outside (0, 1].
    #[error("rtt_decay must be in (0, 1], got {0}")]
    InvalidDecay(f64),

    /// Retry multiplier below 1.
    #[error("retry_multiplier must be at least 1.0, got {0}")]
    InvalidRetryMultiplier(f64),

    /// Zero initial RTT or minimum RTO.
    #[error("initial_rtt and min_rto must be non-zero")]
    ZeroTiming,

    /// Zero HELLO retry interval or a timeout shorter than it.
    #[error("hello_timeout must be at least hello_interval, and both non-zero")]
    InvalidHelloTiming,

    /// Reorder window smaller than the congestion window.
    #[error("reorder_window {window} is smaller than max_in_flight {in_flight}")]
    ReorderWindowTooSmall {
        /// Configured reorder window.
        window: u32,
        /// Configured congestion window.
        in_flight: u32,
    },

    /// Reorder window too wide for wrapping sequence comparison.
    #[error("reorder_window {window} exceeds {max}")]
    ReorderWindowTooLarge {
        /// Configured reorder window.
        window: u32,
        /// Largest accepted window.
        max: u32,
    },

    /// Maximum packet size outside [1, 2^24 - 1].
    #[error("max_packet_size {size} outside 1..={max}")]
    InvalidMaxPacketSize {
        /// Configured maximum.
        size: usize,
        /// Largest encodable packet.
        max: usize,
    },

    /// Violation threshold of zero.
    #[error("max_protocol_violations must be at least 1")]
    ZeroViolationThreshold,

    /// Receive buffer smaller than the MTU.
    #[error("recv_buffer_size {size} is smaller than mtu {mtu}")]
    RecvBufferTooSmall {
        /// Configured receive buffer.
        size: usize,
        /// Configured MTU.
        mtu: usize,
    },
}

/// Error reported by a [`PayloadTransform`](super::PayloadTransform).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("payload transform failed: {0}")]
pub struct TransformError(pub String);

impl TransformError {
    /// Create a transform error from any message.
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}
