//! Datagram socket abstraction.
//!
//! A [`Tunnel`](super::Tunnel) talks to the network only through
//! [`DatagramSocket`], so tests can swap the UDP socket for an in-memory
//! link. [`UdpDatagramSocket`] is the tokio-backed implementation.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;

use tokio::net::{ToSocketAddrs, UdpSocket};

/// Boxed future returned by [`DatagramSocket::send_to`].
pub type SendFuture<'a> = Pin<Box<dyn Future<Output = io::Result<usize>> + Send + 'a>>;

/// Boxed future returned by [`DatagramSocket::recv_from`].
pub type RecvFuture<'a> =
    Pin<Box<dyn Future<Output = io::Result<(usize, SocketAddr)>> + Send + 'a>>;

/// Async datagram socket.
///
/// Object-safe so a tunnel can hold it as `Arc<dyn DatagramSocket>` and
/// share it between its receive task and its engine task.
pub trait DatagramSocket: Send + Sync + 'static {
    /// Send one datagram to `target`.
    fn send_to<'a>(&'a self, buf: &'a [u8], target: SocketAddr) -> SendFuture<'a>;

    /// Receive one datagram into `buf`, returning its length and sender.
    ///
    /// An error other than a transient ICMP report means the socket is gone.
    fn recv_from<'a>(&'a self, buf: &'a mut [u8]) -> RecvFuture<'a>;

    /// Local address the socket is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Whether a receive error is a transient ICMP report rather than socket loss.
pub fn is_transient_recv_error(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

/// [`DatagramSocket`] backed by a tokio UDP socket.
#[derive(Debug)]
pub struct UdpDatagramSocket {
    socket: UdpSocket,
}

impl UdpDatagramSocket {
    /// Bind a new UDP socket.
    pub async fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self::from_socket(socket))
    }

    /// Wrap an existing tokio UDP socket.
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self { socket }
    }

    /// The underlying socket.
    pub fn inner(&self) -> &UdpSocket {
        &self.socket
    }
}

impl DatagramSocket for UdpDatagramSocket {
    fn send_to<'a>(&'a self, buf: &'a [u8], target: SocketAddr) -> SendFuture<'a> {
        Box::pin(self.socket.send_to(buf, target))
    }

    fn recv_from<'a>(&'a self, buf: &'a mut [u8]) -> RecvFuture<'a> {
        Box::pin(self.socket.recv_from(buf))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}
