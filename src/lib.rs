//! # udptun
//!
//! A reliable, ordered, fragmenting transport over UDP, with an unreliable
//! raw side-channel multiplexed on the same socket. It provides:
//!
//! - **Reliability**: per-frame acknowledgement and retransmission with an
//!   adaptive RTT-based timeout
//! - **Ordering**: a bounded reorder buffer releases frames strictly in order
//! - **Fragmentation**: logical packets up to 16 MiB split into MTU-sized,
//!   evenly balanced frames
//! - **Flow control**: a fixed congestion window of in-flight frames
//! - **Liveness**: ping/pong keepalive with dead-peer detection
//! - **Raw pipes**: unsequenced datagrams tagged by a 1 byte pipe id
//!
//! Confidentiality is left to the layer above; a [`PayloadTransform`]
//! can seal and open every payload.
//!
//! ## Feature Flags
//!
//! - `transport` (default): frames, engine, sockets and the tokio driver
//!
//! ## Modules
//!
//! - [`core`]: constants, error types and extension points (always included)
//! - [`transport`]: transport layer (requires `transport` feature)
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use udptun::prelude::*;
//!
//! # async fn run() -> Result<(), TransportError> {
//! let socket = UdpDatagramSocket::bind("0.0.0.0:4000").await?;
//! let peer = "198.51.100.7:4000".parse().unwrap();
//!
//! let mut tunnel = Tunnel::builder(&b"shared-token"[..])
//!     .config(TransportConfig::default())
//!     .connect(socket, peer)
//!     .await?;
//!
//! tunnel.send(&b"hello"[..]).await?;
//! tunnel.send_raw(3, &b"unreliable"[..]).await?;
//!
//! while let Some(event) = tunnel.recv().await {
//!     match event {
//!         Event::PacketReceived(packet) => println!("{} bytes", packet.len()),
//!         Event::RawReceived(pipe, payload) => println!("pipe {pipe}: {payload:?}"),
//!         Event::ConnectionDown(reason) => println!("down: {reason}"),
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! [`PayloadTransform`]: core::PayloadTransform

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Transport layer (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod transport;

/// Prelude module for convenient imports.
pub mod prelude {
    // Core traits and types
    pub use crate::core::*;

    // Transport types (when enabled)
    #[cfg(feature = "transport")]
    pub use crate::transport::{
        ConnectionPhase, ConnectionState, DatagramSocket, DownReason, Event, FailReason, Frame,
        TransportConfig, TransportConfigBuilder, TransportError, TransportResult, TransportStats,
        Tunnel, TunnelBuilder, UdpDatagramSocket,
    };
}

// Re-export commonly used items at crate root
pub use core::{ConfigError, PayloadTransform, Plaintext, TransformError};

#[cfg(feature = "transport")]
pub use transport::{
    ConnectionPhase, ConnectionState, Event, TransportConfig, TransportError, TransportResult,
    Tunnel, UdpDatagramSocket,
};
