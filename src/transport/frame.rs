//! Frame encoding and decoding.
//!
//! Every datagram carries exactly one frame. All multi-byte integers are
//! little-endian.
//!
//! ```text
//! +------+-------------------------------+---------------------------+
//! | Kind | Header                        | Payload                   |
//! +------+-------------------------------+---------------------------+
//! |  1   | -                             | HELLO token               |
//! |  2   | -                             | 64 byte ping nonce        |
//! |  3   | -                             | 64 byte echoed nonce      |
//! |  16  | seq (LE32)                    | whole packet              |
//! |  17  | seq (LE32), total_len (LE24)  | first fragment            |
//! |  19  | seq (LE32)                    | middle fragment           |
//! |  18  | seq (LE32)                    | last fragment             |
//! |  32  | seq (LE32)                    | -                         |
//! |  48  | pipe_id (u8)                  | raw bytes                 |
//! +------+-------------------------------+---------------------------+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::core::{
    KIND_MGMT_HELLO, KIND_MGMT_PING, KIND_MGMT_PONG, KIND_PKT_ACK, KIND_PKT_END, KIND_PKT_MID,
    KIND_PKT_SINGLE, KIND_PKT_START, KIND_SIZE, KIND_UDP_PIPE, NONCE_SIZE, PIPE_HEADER_SIZE,
    SEQ_HEADER_SIZE, START_HEADER_SIZE,
};

/// Ping/pong nonce.
pub type Nonce = [u8; NONCE_SIZE];

/// Chunk kind identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChunkKind {
    /// Handshake hello carrying the shared token.
    MgmtHello = KIND_MGMT_HELLO,
    /// Keepalive ping.
    MgmtPing = KIND_MGMT_PING,
    /// Keepalive pong.
    MgmtPong = KIND_MGMT_PONG,
    /// Unfragmented packet.
    PktSingle = KIND_PKT_SINGLE,
    /// First fragment.
    PktStart = KIND_PKT_START,
    /// Last fragment.
    PktEnd = KIND_PKT_END,
    /// Middle fragment.
    PktMid = KIND_PKT_MID,
    /// Acknowledgement.
    PktAck = KIND_PKT_ACK,
    /// Raw passthrough.
    UdpPipe = KIND_UDP_PIPE,
}

impl ChunkKind {
    /// Parse a chunk kind from its byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            KIND_MGMT_HELLO => Some(Self::MgmtHello),
            KIND_MGMT_PING => Some(Self::MgmtPing),
            KIND_MGMT_PONG => Some(Self::MgmtPong),
            KIND_PKT_SINGLE => Some(Self::PktSingle),
            KIND_PKT_START => Some(Self::PktStart),
            KIND_PKT_END => Some(Self::PktEnd),
            KIND_PKT_MID => Some(Self::PktMid),
            KIND_PKT_ACK => Some(Self::PktAck),
            KIND_UDP_PIPE => Some(Self::UdpPipe),
            _ => None,
        }
    }

    /// Byte representation on the wire.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Size of the header including the kind byte.
    pub fn header_size(self) -> usize {
        match self {
            Self::MgmtHello | Self::MgmtPing | Self::MgmtPong => KIND_SIZE,
            Self::PktSingle | Self::PktMid | Self::PktEnd | Self::PktAck => SEQ_HEADER_SIZE,
            Self::PktStart => START_HEADER_SIZE,
            Self::UdpPipe => PIPE_HEADER_SIZE,
        }
    }
}

/// Where a data frame sits inside its logical packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentPosition {
    /// The frame is the whole packet.
    Single,
    /// First of several frames; records the full packet length.
    Start {
        /// Length of the whole logical packet.
        total_len: u32,
    },
    /// Neither first nor last.
    Mid,
    /// Last of several frames.
    End,
}

impl FragmentPosition {
    /// Chunk kind carrying this position.
    pub fn kind(self) -> ChunkKind {
        match self {
            Self::Single => ChunkKind::PktSingle,
            Self::Start { .. } => ChunkKind::PktStart,
            Self::Mid => ChunkKind::PktMid,
            Self::End => ChunkKind::PktEnd,
        }
    }
}

/// A sequenced data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Per-connection sequence number.
    pub seq: u32,
    /// Position inside the logical packet.
    pub position: FragmentPosition,
    /// Fragment body.
    pub payload: Bytes,
}

impl Fragment {
    /// Create a fragment.
    pub fn new(seq: u32, position: FragmentPosition, payload: Bytes) -> Self {
        Self {
            seq,
            position,
            payload,
        }
    }

    /// Encoded size of this fragment.
    pub fn wire_len(&self) -> usize {
        self.position.kind().header_size() + self.payload.len()
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Handshake hello with the pre-shared token.
    Hello(Bytes),
    /// Keepalive ping.
    Ping(Nonce),
    /// Keepalive pong echoing a ping nonce.
    Pong(Nonce),
    /// SINGLE, START, MID or END data frame.
    Data(Fragment),
    /// Acknowledgement of one data frame.
    Ack {
        /// Acknowledged sequence number.
        seq: u32,
    },
    /// Raw passthrough datagram.
    Pipe {
        /// Pipe identifier.
        pipe_id: u8,
        /// Opaque bytes.
        payload: Bytes,
    },
}

impl Frame {
    /// Chunk kind of this frame.
    pub fn kind(&self) -> ChunkKind {
        match self {
            Self::Hello(_) => ChunkKind::MgmtHello,
            Self::Ping(_) => ChunkKind::MgmtPing,
            Self::Pong(_) => ChunkKind::MgmtPong,
            Self::Data(fragment) => fragment.position.kind(),
            Self::Ack { .. } => ChunkKind::PktAck,
            Self::Pipe { .. } => ChunkKind::UdpPipe,
        }
    }

    /// Encoded size of this frame.
    pub fn wire_len(&self) -> usize {
        let body = match self {
            Self::Hello(token) => token.len(),
            Self::Ping(_) | Self::Pong(_) => NONCE_SIZE,
            Self::Data(fragment) => fragment.payload.len(),
            Self::Ack { .. } => 0,
            Self::Pipe { payload, .. } => payload.len(),
        };
        self.kind().header_size() + body
    }

    /// Append the encoded frame to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(self.wire_len());
        buf.put_u8(self.kind().as_byte());
        match self {
            Self::Hello(token) => buf.put_slice(token),
            Self::Ping(nonce) | Self::Pong(nonce) => buf.put_slice(nonce),
            Self::Data(fragment) => {
                buf.put_u32_le(fragment.seq);
                if let FragmentPosition::Start { total_len } = fragment.position {
                    buf.put_uint_le(u64::from(total_len), 3);
                }
                buf.put_slice(&fragment.payload);
            }
            Self::Ack { seq } => buf.put_u32_le(*seq),
            Self::Pipe { pipe_id, payload } => {
                buf.put_u8(*pipe_id);
                buf.put_slice(payload);
            }
        }
    }

    /// Encode the frame into a fresh buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Decode one frame from a datagram.
    ///
    /// Payloads are zero-copy slices of `datagram`. Never panics; truncated
    /// buffers and unknown kinds are reported as [`FrameError`].
    pub fn decode(datagram: Bytes) -> Result<Self, FrameError> {
        let Some(&first) = datagram.first() else {
            return Err(FrameError::Empty);
        };
        let kind = ChunkKind::from_byte(first).ok_or(FrameError::UnknownKind(first))?;

        let header = kind.header_size();
        if datagram.len() < header {
            return Err(FrameError::TooShort {
                kind,
                expected: header,
                actual: datagram.len(),
            });
        }

        let mut cursor = &datagram[KIND_SIZE..header];
        let body = datagram.slice(header..);

        let frame = match kind {
            ChunkKind::MgmtHello => Self::Hello(body),
            ChunkKind::MgmtPing => Self::Ping(read_nonce(&body)?),
            ChunkKind::MgmtPong => Self::Pong(read_nonce(&body)?),
            ChunkKind::PktAck => {
                if !body.is_empty() {
                    return Err(FrameError::TrailingBytes {
                        kind,
                        extra: body.len(),
                    });
                }
                Self::Ack {
                    seq: cursor.get_u32_le(),
                }
            }
            ChunkKind::PktSingle | ChunkKind::PktMid | ChunkKind::PktEnd => {
                let seq = cursor.get_u32_le();
                let position = match kind {
                    ChunkKind::PktSingle => FragmentPosition::Single,
                    ChunkKind::PktMid => FragmentPosition::Mid,
                    _ => FragmentPosition::End,
                };
                Self::Data(Fragment::new(seq, position, body))
            }
            ChunkKind::PktStart => {
                let seq = cursor.get_u32_le();
                let total_len = cursor.get_uint_le(3) as u32;
                Self::Data(Fragment::new(
                    seq,
                    FragmentPosition::Start { total_len },
                    body,
                ))
            }
            ChunkKind::UdpPipe => Self::Pipe {
                pipe_id: cursor.get_u8(),
                payload: body,
            },
        };

        Ok(frame)
    }
}

fn read_nonce(body: &[u8]) -> Result<Nonce, FrameError> {
    body.try_into()
        .map_err(|_| FrameError::InvalidNonceLength(body.len()))
}

/// Errors that can occur during frame decoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Zero-length datagram.
    #[error("empty datagram")]
    Empty,

    /// Kind byte not in the chunk table.
    #[error("unknown chunk kind: 0x{0:02x}")]
    UnknownKind(u8),

    /// Datagram shorter than the header of its kind.
    #[error("{kind:?} frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Kind announced by the first byte.
        kind: ChunkKind,
        /// Header size of that kind.
        expected: usize,
        /// Actual datagram size.
        actual: usize,
    },

    /// Ping or pong body that is not exactly one nonce.
    #[error("nonce must be 64 bytes, got {0}")]
    InvalidNonceLength(usize),

    /// Bytes after a frame that has no payload.
    #[error("{extra} trailing bytes after {kind:?} frame")]
    TrailingBytes {
        /// Kind of the frame.
        kind: ChunkKind,
        /// Number of unexpected bytes.
        extra: usize,
    },
}
