//! Protocol constants for the udptun wire format.
//!
//! Wire values MUST NOT be changed; both peers depend on them. The
//! `DEFAULT_*` values are the defaults of [`TransportConfig`] and may be
//! overridden per connection.
//!
//! [`TransportConfig`]: crate::transport::TransportConfig

use std::time::Duration;

// =============================================================================
// CHUNK KINDS
// =============================================================================

/// Handshake hello, followed by the pre-shared token.
pub const KIND_MGMT_HELLO: u8 = 1;

/// Keepalive ping, followed by a 64 byte random nonce.
pub const KIND_MGMT_PING: u8 = 2;

/// Keepalive pong, followed by the 64 byte nonce echoed from the ping.
pub const KIND_MGMT_PONG: u8 = 3;

/// Whole logical packet in one frame.
pub const KIND_PKT_SINGLE: u8 = 16;

/// First fragment of a logical packet (carries the total length).
pub const KIND_PKT_START: u8 = 17;

/// Last fragment of a logical packet.
pub const KIND_PKT_END: u8 = 18;

/// Middle fragment of a logical packet.
pub const KIND_PKT_MID: u8 = 19;

/// Acknowledgement of one data frame.
pub const KIND_PKT_ACK: u8 = 32;

/// Raw passthrough datagram, followed by a 1 byte pipe identifier.
pub const KIND_UDP_PIPE: u8 = 48;

// =============================================================================
// FRAME SIZES
// =============================================================================

/// Size of the kind byte that starts every frame.
pub const KIND_SIZE: usize = 1;

/// Sequence number size (LE32).
pub const SEQ_SIZE: usize = 4;

/// START total length field size (LE24).
pub const TOTAL_LEN_SIZE: usize = 3;

/// Header of SINGLE, MID, END and ACK frames (kind + seq).
pub const SEQ_HEADER_SIZE: usize = KIND_SIZE + SEQ_SIZE;

/// Header of START frames (kind + seq + total length).
pub const START_HEADER_SIZE: usize = SEQ_HEADER_SIZE + TOTAL_LEN_SIZE;

/// Header of UDP_PIPE frames (kind + pipe id).
pub const PIPE_HEADER_SIZE: usize = KIND_SIZE + 1;

/// Ping/pong nonce size.
pub const NONCE_SIZE: usize = 64;

/// Largest value representable in the 24-bit START length field.
pub const MAX_TOTAL_LEN: usize = (1 << 24) - 1;

/// Smallest MTU that still leaves room for a START header and payload.
pub const MIN_MTU: usize = 16;

// =============================================================================
// DEFAULTS - TRANSPORT
// =============================================================================

/// Default path MTU.
pub const DEFAULT_MTU: usize = 1500;

/// Default congestion window (frames in flight).
pub const DEFAULT_MAX_IN_FLIGHT: u32 = 50;

/// Default EWMA weight of a new RTT sample.
pub const DEFAULT_RTT_DECAY: f64 = 0.05;

/// Default multiplier from mean RTT to retransmit timeout.
pub const DEFAULT_RETRY_MULTIPLIER: f64 = 1.5;

/// RTT assumed before the first sample.
pub const DEFAULT_INITIAL_RTT: Duration = Duration::from_millis(100);

/// Floor of the retransmit timeout.
pub const DEFAULT_MIN_RTO: Duration = Duration::from_millis(10);

/// Fraction of the retransmit timeout between two ticks.
pub const TICK_RTO_FACTOR: f64 = 0.3;

/// Floor of the tick interval.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Default number of out-of-order data frames buffered by the receiver.
pub const DEFAULT_REORDER_WINDOW: u32 = 1024;

/// Widest reorder window; sequence distances are compared as `i32`.
pub const MAX_REORDER_WINDOW: u32 = i32::MAX as u32;

/// Default maximum logical packet size.
pub const DEFAULT_MAX_PACKET_SIZE: usize = MAX_TOTAL_LEN;

/// Default number of protocol violations tolerated between two delivered packets.
pub const DEFAULT_MAX_PROTOCOL_VIOLATIONS: u32 = 32;

/// Default socket receive buffer size.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 65535;

// =============================================================================
// DEFAULTS - LIVENESS AND HANDSHAKE
// =============================================================================

/// Default interval between pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(5);

/// Default pong silence after which the connection is considered dead.
pub const DEFAULT_PONG_TIMEOUT: Duration = Duration::from_secs(30);

/// Default HELLO retry interval while connecting.
pub const DEFAULT_HELLO_INTERVAL: Duration = Duration::from_secs(1);

/// Default time allowed for the handshake.
pub const DEFAULT_HELLO_TIMEOUT: Duration = Duration::from_secs(10);
