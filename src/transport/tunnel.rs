//! Tunnel driver: owns the socket and runs a [`ConnectionState`].
//!
//! Two tasks back every [`Tunnel`]. The receive task reads datagrams from the
//! socket, drops anything not from the peer, and forwards the rest over a
//! channel. The engine task is the only owner of the connection state; it
//! selects over that channel, application commands and the tick timer, and
//! after every step flushes outbound datagrams to the socket and events to
//! the application. No lock is needed because nothing else touches the
//! state.
//!
//! ```text
//!   socket ──► receive task ──► input ─┐
//!                                      ▼
//!   Tunnel ──── commands ──────► engine task ──► socket
//!     ▲                                │
//!     └────────── events ◄─────────────┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use crate::core::{PayloadTransform, Plaintext};

use super::clock::{Clock, TokioClock};
use super::config::TransportConfig;
use super::connection::{ConnectionPhase, ConnectionState, Event, FailReason, TransportStats};
use super::error::{TransportError, TransportResult};
use super::socket::{DatagramSocket, is_transient_recv_error};

/// Depth of the command and inbound datagram channels.
const CHANNEL_CAPACITY: usize = 1024;

/// Commands sent to the engine task.
enum Command {
    Send {
        packet: Bytes,
        reply: oneshot::Sender<TransportResult<()>>,
    },
    SendRaw {
        pipe_id: u8,
        payload: Bytes,
        reply: oneshot::Sender<TransportResult<()>>,
    },
    Stats {
        reply: oneshot::Sender<TransportStats>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Phase published by the engine task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Status {
    phase: ConnectionPhase,
    failure: Option<FailReason>,
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Builder for [`Tunnel`].
pub struct TunnelBuilder {
    config: TransportConfig,
    magic: Bytes,
    transform: Box<dyn PayloadTransform>,
    clock: Arc<dyn Clock>,
}

impl TunnelBuilder {
    /// Start a builder for a tunnel authenticated by `magic`.
    pub fn new(magic: impl Into<Bytes>) -> Self {
        Self {
            config: TransportConfig::default(),
            magic: magic.into(),
            transform: Box::new(Plaintext),
            clock: Arc::new(TokioClock),
        }
    }

    /// Set the transport options.
    pub fn config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the payload transform.
    pub fn transform(mut self, transform: impl PayloadTransform) -> Self {
        self.transform = Box::new(transform);
        self
    }

    /// Set the clock.
    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Start the handshake and return immediately.
    ///
    /// Must be called from within a tokio runtime. The outcome of the
    /// handshake arrives as the first event.
    pub fn spawn(self, socket: impl DatagramSocket, peer: SocketAddr) -> TransportResult<Tunnel> {
        let socket: Arc<dyn DatagramSocket> = Arc::new(socket);
        let local_addr = socket.local_addr()?;

        let mut engine = ConnectionState::with_transform(self.config, self.magic, self.transform)?;
        engine.connect(self.clock.now())?;

        let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(Status {
            phase: engine.phase(),
            failure: None,
        });

        debug!(%local_addr, %peer, "spawning tunnel");
        let driver = Driver {
            engine,
            socket,
            peer,
            clock: self.clock,
            events_tx,
            status_tx,
        };
        let task = tokio::spawn(driver.run(cmd_rx));

        Ok(Tunnel {
            cmd_tx,
            events_rx,
            status_rx,
            local_addr,
            peer,
            task,
        })
    }

    /// Start the handshake and wait until it completes.
    pub async fn connect(
        self,
        socket: impl DatagramSocket,
        peer: SocketAddr,
    ) -> TransportResult<Tunnel> {
        let tunnel = self.spawn(socket, peer)?;
        tunnel.established().await?;
        Ok(tunnel)
    }
}

/// Reliable, ordered tunnel to one peer over a datagram socket.
///
/// Dropping the tunnel stops its tasks without notifying the peer.
#[derive(Debug)]
pub struct Tunnel {
    cmd_tx: mpsc::Sender<Command>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    status_rx: watch::Receiver<Status>,
    local_addr: SocketAddr,
    peer: SocketAddr,
    task: JoinHandle<()>,
}

impl Tunnel {
    /// Start building a tunnel authenticated by `magic`.
    pub fn builder(magic: impl Into<Bytes>) -> TunnelBuilder {
        TunnelBuilder::new(magic)
    }

    /// Connect with default options and wait for the handshake.
    pub async fn connect(
        socket: impl DatagramSocket,
        peer: SocketAddr,
        magic: impl Into<Bytes>,
    ) -> TransportResult<Self> {
        TunnelBuilder::new(magic).connect(socket, peer).await
    }

    /// Wait until the handshake has completed or failed.
    pub async fn established(&self) -> TransportResult<()> {
        let mut status_rx = self.status_rx.clone();
        let status = *status_rx
            .wait_for(|status| status.phase != ConnectionPhase::Connecting)
            .await
            .map_err(|_| TransportError::ConnectionClosed)?;

        match (status.phase, status.failure) {
            (ConnectionPhase::Established, _) => Ok(()),
            (_, Some(reason)) => Err(TransportError::HandshakeFailed(reason)),
            _ => Err(TransportError::ConnectionClosed),
        }
    }

    /// Current connection phase.
    pub fn phase(&self) -> ConnectionPhase {
        self.status_rx.borrow().phase
    }

    /// Local socket address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Peer socket address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Queue a logical packet; returns once it is accepted, not delivered.
    pub async fn send(&self, packet: impl Into<Bytes>) -> TransportResult<()> {
        let packet = packet.into();
        self.request(|reply| Command::Send { packet, reply })
            .await?
    }

    /// Send an unreliable datagram on `pipe_id`.
    pub async fn send_raw(&self, pipe_id: u8, payload: impl Into<Bytes>) -> TransportResult<()> {
        let payload = payload.into();
        self.request(|reply| Command::SendRaw {
            pipe_id,
            payload,
            reply,
        })
        .await?
    }

    /// Next event; `None` once the connection is closed and all events
    /// have been taken.
    pub async fn recv(&mut self) -> Option<Event> {
        self.events_rx.recv().await
    }

    /// Connection counters.
    pub async fn stats(&self) -> TransportResult<TransportStats> {
        self.request(|reply| Command::Stats { reply }).await
    }

    /// Close the connection and release the socket. Idempotent.
    pub async fn close(&self) {
        if self.request(|reply| Command::Close { reply }).await.is_err() {
            trace!("tunnel already closed");
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> TransportResult<T> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(reply))
            .await
            .map_err(|_| TransportError::ConnectionClosed)?;
        rx.await.map_err(|_| TransportError::ConnectionClosed)
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// State owned by the engine task.
struct Driver {
    engine: ConnectionState,
    socket: Arc<dyn DatagramSocket>,
    peer: SocketAddr,
    clock: Arc<dyn Clock>,
    events_tx: mpsc::UnboundedSender<Event>,
    status_tx: watch::Sender<Status>,
}

impl Driver {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<Command>) {
        let (input_tx, mut input_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let _receiver = AbortOnDrop(tokio::spawn(receive_loop(
            Arc::clone(&self.socket),
            self.peer,
            self.engine.config().recv_buffer_size,
            input_tx,
        )));

        self.flush().await;
        let mut next_tick = self.deadline(self.engine.next_tick_interval());

        while self.engine.phase() != ConnectionPhase::Closed {
            let mut close_reply = None;

            tokio::select! {
                _ = tokio::time::sleep_until(next_tick) => {
                    self.engine.tick(self.clock.now());
                    next_tick = self.deadline(self.engine.next_tick_interval());
                }

                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Send { packet, reply }) => {
                        let result = self.engine.send(packet, self.clock.now());
                        let _ = reply.send(result);
                    }
                    Some(Command::SendRaw { pipe_id, payload, reply }) => {
                        let _ = reply.send(self.engine.send_raw(pipe_id, payload));
                    }
                    Some(Command::Stats { reply }) => {
                        let _ = reply.send(self.engine.stats());
                    }
                    Some(Command::Close { reply }) => {
                        self.engine.close();
                        close_reply = Some(reply);
                    }
                    None => {
                        trace!("tunnel handle dropped");
                        self.engine.close();
                    }
                },

                input = input_rx.recv() => match input {
                    Some(datagram) => self.engine.handle_datagram(datagram, self.clock.now()),
                    None => self.engine.socket_closed(),
                },
            }

            self.flush().await;
            if let Some(reply) = close_reply {
                let _ = reply.send(());
            }
        }

        debug!(peer = %self.peer, "tunnel stopped");
    }

    fn deadline(&self, interval: Duration) -> tokio::time::Instant {
        tokio::time::Instant::now() + interval
    }

    /// Send queued datagrams, forward events, publish the phase.
    async fn flush(&mut self) {
        while let Some(datagram) = self.engine.poll_transmit() {
            if let Err(error) = self.socket.send_to(&datagram, self.peer).await {
                debug!(%error, "socket send failed");
            }
        }

        let mut failure = None;
        while let Some(event) = self.engine.poll_event() {
            if let Event::ConnectionFail(reason) = &event {
                failure = Some(*reason);
            }
            // The application may have dropped its receiver.
            let _ = self.events_tx.send(event);
        }

        let phase = self.engine.phase();
        self.status_tx.send_if_modified(|status| {
            let changed = status.phase != phase || failure.is_some();
            status.phase = phase;
            if failure.is_some() {
                status.failure = failure;
            }
            changed
        });
    }
}

/// Read datagrams from the peer until the socket fails or the engine stops.
async fn receive_loop(
    socket: Arc<dyn DatagramSocket>,
    peer: SocketAddr,
    buffer_size: usize,
    input_tx: mpsc::Sender<Bytes>,
) {
    let mut buf = vec![0u8; buffer_size];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, from)) => {
                if from != peer {
                    trace!(%from, "dropping datagram from unknown address");
                    continue;
                }
                let datagram = Bytes::copy_from_slice(&buf[..len]);
                if input_tx.send(datagram).await.is_err() {
                    break;
                }
            }
            Err(error) if is_transient_recv_error(&error) => {
                debug!(%error, "transient receive error");
            }
            Err(error) => {
                error!(%error, "socket receive failed");
                break;
            }
        }
    }
}
