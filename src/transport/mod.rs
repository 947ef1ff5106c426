//! udptun - Transport Layer
//!
//! Reliable, ordered delivery of logical packets over an unreliable datagram
//! socket, plus an unreliable raw side-channel on the same socket:
//!
//! - **Frame encoding/decoding**: [`Frame`] and the wire format
//! - **Fragmentation**: [`Fragmenter`] and [`Reassembler`], with an in-order
//!   [`ReceiveWindow`] in front of the reassembler
//! - **Retransmission**: [`RetransmitQueue`] with a congestion window, timed by
//!   the EWMA [`RttEstimator`]
//! - **Liveness**: [`LivenessManager`] ping/pong with dead-peer detection
//! - **Raw pipes**: [`PipeMux`] for unsequenced datagrams
//! - **Connection state machine**: the sans-IO [`ConnectionState`]
//! - **Async driver**: [`Tunnel`] over any [`DatagramSocket`]
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │    Application (packets, raw pipes)     │
//! ├─────────────────────────────────────────┤
//! │   Tunnel: socket + engine tasks         │
//! ├─────────────────────────────────────────┤
//! │   ConnectionState                       │  ← sans-IO
//! │   fragment, retransmit, liveness, pipe  │
//! ├─────────────────────────────────────────┤
//! │              UDP                        │
//! └─────────────────────────────────────────┘
//! ```

mod clock;
mod config;
mod connection;
mod error;
mod fragment;
mod frame;
mod liveness;
mod pipe;
mod reassembly;
mod retransmit;
mod socket;
mod timing;
mod tunnel;

pub use clock::*;
pub use config::*;
pub use connection::*;
pub use error::*;
pub use fragment::Fragmenter;
pub use frame::*;
pub use liveness::*;
pub use pipe::PipeMux;
pub use reassembly::*;
pub use retransmit::*;
pub use socket::*;
pub use timing::RttEstimator;
pub use tunnel::{Tunnel, TunnelBuilder};
