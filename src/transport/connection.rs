//! Connection state machine.
//!
//! [`ConnectionState`] is the sans-IO heart of a tunnel: it consumes inbound
//! datagrams and clock ticks, and produces outbound datagrams and
//! [`Event`]s. Nothing in here touches a socket or reads the clock; callers
//! pass `now` explicitly, which keeps every timeout deterministic under test.
//!
//! ```text
//!  connect()        valid HELLO           timeout / close / violations
//! ──────────► Connecting ──────► Established ──────────────► Closing ──► Closed
//!                  │                                            ▲  (events drained)
//!                  └──── token mismatch / hello timeout ────────┘
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info, trace, warn};

use crate::core::{KIND_SIZE, PayloadTransform, Plaintext};

use super::config::TransportConfig;
use super::error::{TransportError, TransportResult};
use super::fragment::Fragmenter;
use super::frame::{Fragment, Frame};
use super::liveness::{LivenessEvent, LivenessManager};
use super::pipe::PipeMux;
use super::reassembly::{Admission, ReceiveWindow, Reassembler};
use super::retransmit::RetransmitQueue;
use super::timing::RttEstimator;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Handshake in progress.
    Connecting,
    /// Handshake complete, data transfer active.
    Established,
    /// Terminal event emitted but not yet consumed.
    Closing,
    /// Connection closed.
    Closed,
}

impl ConnectionPhase {
    /// Whether the connection has ended.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

/// Why a handshake failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    /// The peer presented a different token.
    TokenMismatch,
    /// No valid HELLO within `hello_timeout`.
    HelloTimeout,
    /// The socket stopped delivering datagrams.
    SocketClosed,
    /// Closed locally before the handshake completed.
    LocalClose,
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TokenMismatch => write!(f, "handshake token mismatch"),
            Self::HelloTimeout => write!(f, "hello timeout"),
            Self::SocketClosed => write!(f, "socket closed"),
            Self::LocalClose => write!(f, "closed locally"),
        }
    }
}

/// Why an established connection went down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownReason {
    /// No PONG within `pong_timeout`.
    PongTimeout,
    /// Too many protocol violations without a delivered packet in between.
    ProtocolViolations(u32),
    /// The socket stopped delivering datagrams.
    SocketClosed,
    /// Closed locally.
    LocalClose,
}

impl fmt::Display for DownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PongTimeout => write!(f, "pong timeout"),
            Self::ProtocolViolations(count) => write!(f, "{count} protocol violations"),
            Self::SocketClosed => write!(f, "socket closed"),
            Self::LocalClose => write!(f, "closed locally"),
        }
    }
}

/// Something the application should know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Handshake completed.
    ConnectionUp,
    /// Handshake failed; the connection is closed.
    ConnectionFail(FailReason),
    /// Established connection ended.
    ConnectionDown(DownReason),
    /// A logical packet arrived.
    PacketReceived(Bytes),
    /// A raw pipe datagram arrived.
    RawReceived(u8, Bytes),
}

/// Connection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Datagrams handed to the socket.
    pub datagrams_sent: u64,
    /// First transmissions of data frames.
    pub frames_sent: u64,
    /// Retransmissions of data frames.
    pub retransmissions: u64,
    /// ACKs that removed an in-flight frame.
    pub acks_received: u64,
    /// ACKs sent for inbound data frames.
    pub acks_sent: u64,
    /// Logical packets accepted by `send`.
    pub packets_sent: u64,
    /// Logical packets delivered to the application.
    pub packets_delivered: u64,
    /// Raw pipe datagrams sent.
    pub raw_sent: u64,
    /// Raw pipe datagrams received.
    pub raw_received: u64,
    /// PINGs sent.
    pub pings_sent: u64,
    /// PONGs received.
    pub pongs_received: u64,
    /// Inbound datagrams that failed to decode.
    pub malformed_dropped: u64,
    /// Protocol violations observed.
    pub protocol_violations: u64,
    /// Data frames currently in flight.
    pub in_flight: usize,
    /// Smoothed round-trip time.
    pub smoothed_rtt: Duration,
    /// Current retransmit timeout.
    pub retransmit_timeout: Duration,
}

/// Sans-IO connection engine.
pub struct ConnectionState {
    config: TransportConfig,
    magic: Bytes,
    phase: ConnectionPhase,
    transform: Box<dyn PayloadTransform>,

    fragmenter: Fragmenter,
    retransmit: RetransmitQueue,
    rtt: RttEstimator,
    window: ReceiveWindow,
    reassembler: Reassembler,
    liveness: LivenessManager,
    pipes: PipeMux,
    rng: StdRng,

    handshake_started: Option<Instant>,
    last_hello_sent: Option<Instant>,
    /// Violations since the last delivered packet.
    violations: u32,
    stats: TransportStats,

    outbox: VecDeque<Bytes>,
    events: VecDeque<Event>,
}

impl ConnectionState {
    /// Create a plaintext connection authenticated by `magic`.
    pub fn new(config: TransportConfig, magic: impl Into<Bytes>) -> TransportResult<Self> {
        Self::with_transform(config, magic, Box::new(Plaintext))
    }

    /// Create a connection whose payloads pass through `transform`.
    pub fn with_transform(
        config: TransportConfig,
        magic: impl Into<Bytes>,
        transform: Box<dyn PayloadTransform>,
    ) -> TransportResult<Self> {
        config.validate()?;
        let magic = magic.into();
        if KIND_SIZE + magic.len() > config.mtu {
            return Err(TransportError::PacketTooLarge {
                size: magic.len(),
                max: config.mtu - KIND_SIZE,
            });
        }

        Ok(Self {
            fragmenter: Fragmenter::new(config.mtu),
            retransmit: RetransmitQueue::new(config.max_in_flight),
            rtt: RttEstimator::from_config(&config),
            window: ReceiveWindow::new(config.reorder_window),
            reassembler: Reassembler::new(config.max_packet_size),
            liveness: LivenessManager::new(config.ping_interval, config.pong_timeout),
            pipes: PipeMux::new(config.mtu),
            rng: StdRng::from_entropy(),
            config,
            magic,
            phase: ConnectionPhase::Connecting,
            transform,
            handshake_started: None,
            last_hello_sent: None,
            violations: 0,
            stats: TransportStats::default(),
            outbox: VecDeque::new(),
            events: VecDeque::new(),
        })
    }

    /// Current phase.
    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// Whether data can be sent.
    pub fn is_established(&self) -> bool {
        self.phase == ConnectionPhase::Established
    }

    /// Options this connection runs with.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> TransportStats {
        TransportStats {
            raw_sent: self.pipes.sent(),
            raw_received: self.pipes.received(),
            in_flight: self.retransmit.in_flight(),
            smoothed_rtt: self.rtt.mean(),
            retransmit_timeout: self.rtt.retransmit_timeout(),
            ..self.stats
        }
    }

    /// How long the driver may sleep before the next [`tick`](Self::tick).
    pub fn next_tick_interval(&self) -> Duration {
        let interval = self.rtt.tick_interval();
        if self.phase == ConnectionPhase::Connecting {
            interval.min(self.config.hello_interval)
        } else {
            interval
        }
    }

    /// Start the handshake by sending the first HELLO.
    pub fn connect(&mut self, now: Instant) -> TransportResult<()> {
        match self.phase {
            ConnectionPhase::Connecting => {
                if self.handshake_started.is_none() {
                    debug!("starting handshake");
                    self.handshake_started = Some(now);
                    self.send_hello(now);
                }
                Ok(())
            }
            ConnectionPhase::Established => Ok(()),
            ConnectionPhase::Closing | ConnectionPhase::Closed => {
                Err(TransportError::ConnectionClosed)
            }
        }
    }

    /// Queue a logical packet for reliable, ordered delivery.
    ///
    /// `max_packet_size` bounds the packet both before and after the
    /// payload transform.
    pub fn send(&mut self, packet: Bytes, now: Instant) -> TransportResult<()> {
        self.ensure_established()?;
        if packet.len() > self.config.max_packet_size {
            return Err(TransportError::PacketTooLarge {
                size: packet.len(),
                max: self.config.max_packet_size,
            });
        }

        // The peer enforces the limit on what it reassembles: the sealed bytes.
        let sealed = self.transform.seal(packet)?;
        if sealed.len() > self.config.max_packet_size {
            return Err(TransportError::PacketTooLarge {
                size: sealed.len(),
                max: self.config.max_packet_size,
            });
        }

        let fragments = self.fragmenter.fragment(sealed);
        trace!(
            frames = fragments.len(),
            first_seq = fragments.first().map(|f| f.seq),
            "queued packet"
        );
        for fragment in fragments {
            let seq = fragment.seq;
            self.retransmit.enqueue(seq, Frame::Data(fragment).encode());
        }
        self.stats.packets_sent += 1;
        self.pump_queue(now);
        Ok(())
    }

    /// Send an unreliable datagram on `pipe_id`.
    pub fn send_raw(&mut self, pipe_id: u8, payload: Bytes) -> TransportResult<()> {
        self.ensure_established()?;
        let payload = if self.config.transform_raw {
            self.transform.seal(payload)?
        } else {
            payload
        };
        let datagram = self.pipes.outbound(pipe_id, payload)?;
        trace!(pipe_id, len = datagram.len(), "sending raw datagram");
        self.outbox.push_back(datagram);
        Ok(())
    }

    /// Process one inbound datagram from the peer.
    pub fn handle_datagram(&mut self, datagram: Bytes, now: Instant) {
        if self.phase.is_terminal() {
            return;
        }

        let frame = match Frame::decode(datagram) {
            Ok(frame) => frame,
            Err(error) => {
                self.stats.malformed_dropped += 1;
                warn!(%error, "dropping malformed frame");
                return;
            }
        };

        let kind = frame.kind();
        trace!(?kind, "received frame");

        match frame {
            Frame::Hello(token) => self.on_hello(token, now),
            _ if self.phase != ConnectionPhase::Established => {
                trace!(?kind, "dropping frame before handshake");
            }
            Frame::Ping(nonce) => self.outbox.push_back(Frame::Pong(nonce).encode()),
            Frame::Pong(_) => {
                self.stats.pongs_received += 1;
                self.liveness.on_pong(now);
            }
            Frame::Ack { seq } => self.on_ack(seq, now),
            Frame::Data(fragment) => self.on_data(fragment),
            Frame::Pipe { pipe_id, payload } => self.on_pipe(pipe_id, payload),
        }
    }

    /// Run timers: HELLO retries and timeout while connecting; liveness and
    /// retransmission once established.
    pub fn tick(&mut self, now: Instant) {
        match self.phase {
            ConnectionPhase::Connecting => self.tick_handshake(now),
            ConnectionPhase::Established => {
                match self.liveness.tick(now, &mut self.rng) {
                    Some(LivenessEvent::Ping(nonce)) => {
                        self.stats.pings_sent += 1;
                        self.outbox.push_back(Frame::Ping(nonce).encode());
                    }
                    Some(LivenessEvent::TimedOut) => {
                        self.go_down(DownReason::PongTimeout);
                        return;
                    }
                    None => {}
                }
                self.pump_queue(now);
            }
            ConnectionPhase::Closing | ConnectionPhase::Closed => {}
        }
    }

    /// Report that the socket can no longer receive.
    pub fn socket_closed(&mut self) {
        match self.phase {
            ConnectionPhase::Connecting => self.fail(FailReason::SocketClosed),
            ConnectionPhase::Established => self.go_down(DownReason::SocketClosed),
            ConnectionPhase::Closing | ConnectionPhase::Closed => {}
        }
    }

    /// Close the connection, discarding all pending state. Idempotent.
    pub fn close(&mut self) {
        match self.phase {
            ConnectionPhase::Connecting => self.fail(FailReason::LocalClose),
            ConnectionPhase::Established => self.go_down(DownReason::LocalClose),
            ConnectionPhase::Closing | ConnectionPhase::Closed => {}
        }
    }

    /// Next datagram to put on the wire.
    pub fn poll_transmit(&mut self) -> Option<Bytes> {
        let datagram = self.outbox.pop_front()?;
        self.stats.datagrams_sent += 1;
        Some(datagram)
    }

    /// Next event for the application.
    ///
    /// Once the terminal event has been taken the phase becomes `Closed`.
    pub fn poll_event(&mut self) -> Option<Event> {
        let event = self.events.pop_front();
        if event.is_none() && self.phase == ConnectionPhase::Closing {
            debug!("connection closed");
            self.phase = ConnectionPhase::Closed;
        }
        event
    }

    fn ensure_established(&self) -> TransportResult<()> {
        match self.phase {
            ConnectionPhase::Established => Ok(()),
            ConnectionPhase::Closing | ConnectionPhase::Closed => {
                Err(TransportError::ConnectionClosed)
            }
            phase => Err(TransportError::NotEstablished(phase)),
        }
    }

    fn send_hello(&mut self, now: Instant) {
        trace!("sending hello");
        self.last_hello_sent = Some(now);
        self.outbox.push_back(Frame::Hello(self.magic.clone()).encode());
    }

    fn tick_handshake(&mut self, now: Instant) {
        let Some(started) = self.handshake_started else {
            return;
        };
        if now.saturating_duration_since(started) >= self.config.hello_timeout {
            self.fail(FailReason::HelloTimeout);
            return;
        }
        let due = self.last_hello_sent.is_none_or(|sent| {
            now.saturating_duration_since(sent) >= self.config.hello_interval
        });
        if due {
            self.send_hello(now);
        }
    }

    fn on_hello(&mut self, token: Bytes, now: Instant) {
        let valid = token == self.magic;
        match self.phase {
            ConnectionPhase::Connecting if valid => {
                info!("connection established");
                self.phase = ConnectionPhase::Established;
                self.events.push_back(Event::ConnectionUp);
            }
            ConnectionPhase::Connecting => self.fail(FailReason::TokenMismatch),
            ConnectionPhase::Established if valid => {
                // Peer may have missed our HELLO; answer, but not in a loop.
                let min_gap = self.config.hello_interval / 2;
                let due = self
                    .last_hello_sent
                    .is_none_or(|sent| now.saturating_duration_since(sent) >= min_gap);
                if due {
                    self.send_hello(now);
                }
            }
            ConnectionPhase::Established => {
                self.stats.malformed_dropped += 1;
                warn!("dropping hello with wrong token");
            }
            ConnectionPhase::Closing | ConnectionPhase::Closed => {}
        }
    }

    fn on_ack(&mut self, seq: u32, now: Instant) {
        let Some(sample) = self.retransmit.on_ack(seq, now) else {
            trace!(seq, "ignoring unknown ack");
            return;
        };
        self.rtt.update(sample);
        self.stats.acks_received += 1;
        trace!(seq, rtt = ?sample, "frame acknowledged");
        self.pump_queue(now);
    }

    fn on_data(&mut self, fragment: Fragment) {
        let seq = fragment.seq;
        let admission = self.window.insert(fragment);
        if admission.should_ack() {
            self.stats.acks_sent += 1;
            self.outbox.push_back(Frame::Ack { seq }.encode());
        }
        match admission {
            Admission::Accepted => {}
            Admission::Duplicate => trace!(seq, "duplicate data frame"),
            Admission::OutOfWindow => debug!(
                seq,
                expected = self.window.next_expected(),
                "data frame beyond reorder window"
            ),
        }

        while self.phase == ConnectionPhase::Established {
            let Some(fragment) = self.window.pop_ready() else {
                break;
            };
            let reassembled = self.reassembler.push(fragment);
            for error in reassembled.errors {
                self.violation(error.into());
            }
            if self.phase != ConnectionPhase::Established {
                break;
            }
            if let Some(packet) = reassembled.packet {
                self.deliver(packet);
            }
        }
    }

    fn deliver(&mut self, packet: Bytes) {
        if self.phase != ConnectionPhase::Established {
            return;
        }
        match self.transform.open(packet) {
            Ok(packet) => {
                self.violations = 0;
                self.stats.packets_delivered += 1;
                trace!(len = packet.len(), "packet delivered");
                self.events.push_back(Event::PacketReceived(packet));
            }
            Err(error) => self.violation(error.into()),
        }
    }

    fn on_pipe(&mut self, pipe_id: u8, payload: Bytes) {
        let payload = if self.config.transform_raw {
            match self.transform.open(payload) {
                Ok(payload) => payload,
                Err(error) => {
                    self.violation(error.into());
                    return;
                }
            }
        } else {
            payload
        };
        let (pipe_id, payload) = self.pipes.inbound(pipe_id, payload);
        self.events.push_back(Event::RawReceived(pipe_id, payload));
    }

    fn violation(&mut self, error: TransportError) {
        self.violations += 1;
        self.stats.protocol_violations += 1;
        warn!(%error, count = self.violations, "protocol violation");
        if self.violations >= self.config.max_protocol_violations {
            self.go_down(DownReason::ProtocolViolations(self.violations));
        }
    }

    fn pump_queue(&mut self, now: Instant) {
        let output = self.retransmit.tick(now, self.rtt.retransmit_timeout());
        if output.retransmitted > 0 {
            debug!(
                count = output.retransmitted,
                rto = ?self.rtt.retransmit_timeout(),
                "retransmitting frames"
            );
        }
        self.stats.frames_sent += output.admitted as u64;
        self.stats.retransmissions += output.retransmitted as u64;
        self.outbox.extend(output.datagrams);
    }

    fn go_down(&mut self, reason: DownReason) {
        if self.phase != ConnectionPhase::Established {
            return;
        }
        info!(%reason, "connection down");
        self.events.push_back(Event::ConnectionDown(reason));
        self.teardown();
    }

    fn fail(&mut self, reason: FailReason) {
        if self.phase != ConnectionPhase::Connecting {
            return;
        }
        warn!(%reason, "handshake failed");
        self.events.push_back(Event::ConnectionFail(reason));
        self.teardown();
    }

    fn teardown(&mut self) {
        self.phase = ConnectionPhase::Closing;
        self.retransmit.clear();
        self.window.clear();
        self.reassembler.reset();
        self.liveness.reset();
        self.outbox.clear();
    }
}

impl fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionState")
            .field("phase", &self.phase)
            .field("next_seq", &self.fragmenter.next_seq())
            .field("next_expected", &self.window.next_expected())
            .field("in_flight", &self.retransmit.in_flight())
            .field("violations", &self.violations)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TransformError;
    use crate::transport::frame::FragmentPosition;

    const MAGIC: &[u8] = b"0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    fn config() -> TransportConfig {
        TransportConfig::default()
    }

    fn conn(config: TransportConfig) -> ConnectionState {
        ConnectionState::new(config, Bytes::from_static(MAGIC)).unwrap()
    }

    fn drain(conn: &mut ConnectionState) -> Vec<Bytes> {
        std::iter::from_fn(|| conn.poll_transmit()).collect()
    }

    fn events(conn: &mut ConnectionState) -> Vec<Event> {
        std::iter::from_fn(|| conn.poll_event()).collect()
    }

    fn deliver(conn: &mut ConnectionState, datagrams: Vec<Bytes>, now: Instant) {
        for datagram in datagrams {
            conn.handle_datagram(datagram, now);
        }
    }

    /// Move datagrams both ways until neither side has anything to send.
    fn exchange(a: &mut ConnectionState, b: &mut ConnectionState, now: Instant) {
        loop {
            let from_a = drain(a);
            let from_b = drain(b);
            if from_a.is_empty() && from_b.is_empty() {
                break;
            }
            deliver(b, from_a, now);
            deliver(a, from_b, now);
        }
    }

    fn established_pair(config: TransportConfig, now: Instant) -> (ConnectionState, ConnectionState) {
        established_between(conn(config.clone()), conn(config), now)
    }

    fn established_between(
        mut a: ConnectionState,
        mut b: ConnectionState,
        now: Instant,
    ) -> (ConnectionState, ConnectionState) {
        a.connect(now).unwrap();
        b.connect(now).unwrap();
        exchange(&mut a, &mut b, now);
        assert_eq!(events(&mut a), vec![Event::ConnectionUp]);
        assert_eq!(events(&mut b), vec![Event::ConnectionUp]);
        (a, b)
    }

    fn kinds(datagrams: &[Bytes]) -> Vec<u8> {
        datagrams.iter().map(|d| d[0]).collect()
    }

    #[test]
    fn test_handshake() {
        let now = Instant::now();
        let (a, b) = established_pair(config(), now);
        assert!(a.is_established());
        assert!(b.is_established());
    }

    #[test]
    fn test_handshake_one_sided_loss() {
        let now = Instant::now();
        let mut a = conn(config());
        let mut b = conn(config());
        a.connect(now).unwrap();
        b.connect(now).unwrap();

        // b's first HELLO is lost; a's reaches b.
        drain(&mut b);
        deliver(&mut b, drain(&mut a), now);
        assert!(b.is_established());
        assert!(!a.is_established());

        // a retries after hello_interval and b answers.
        a.tick(now + Duration::from_secs(1));
        exchange(&mut a, &mut b, now + Duration::from_secs(1));
        assert!(a.is_established());
        assert_eq!(events(&mut a), vec![Event::ConnectionUp]);
    }

    #[test]
    fn test_established_hellos_do_not_loop() {
        let now = Instant::now();
        let (mut a, mut b) = established_pair(config(), now);
        let later = now + Duration::from_secs(2);
        b.handle_datagram(Frame::Hello(Bytes::from_static(MAGIC)).encode(), later);
        let reply = drain(&mut b);
        assert_eq!(kinds(&reply), vec![1]);

        // b has just sent one, so it stays quiet.
        deliver(&mut a, reply, later);
        let echo = drain(&mut a);
        assert_eq!(echo.len(), 1);
        deliver(&mut b, echo, later);
        assert!(drain(&mut b).is_empty());
    }

    #[test]
    fn test_token_mismatch_fails() {
        let now = Instant::now();
        let mut a = conn(config());
        let mut b = ConnectionState::new(config(), Bytes::from_static(b"other")).unwrap();
        a.connect(now).unwrap();
        b.connect(now).unwrap();

        deliver(&mut a, drain(&mut b), now);
        assert_eq!(
            events(&mut a),
            vec![Event::ConnectionFail(FailReason::TokenMismatch)]
        );
        assert_eq!(a.phase(), ConnectionPhase::Closed);

        // No further frames are processed.
        a.handle_datagram(Frame::Hello(Bytes::from_static(MAGIC)).encode(), now);
        assert!(events(&mut a).is_empty());
        assert!(drain(&mut a).is_empty());
    }

    #[test]
    fn test_hello_retries_and_timeout() {
        let start = Instant::now();
        let mut a = conn(config());
        a.connect(start).unwrap();
        assert_eq!(kinds(&drain(&mut a)), vec![1]);

        a.tick(start + Duration::from_millis(500));
        assert!(drain(&mut a).is_empty());
        a.tick(start + Duration::from_secs(1));
        assert_eq!(kinds(&drain(&mut a)), vec![1]);

        a.tick(start + Duration::from_secs(10));
        assert_eq!(
            events(&mut a),
            vec![Event::ConnectionFail(FailReason::HelloTimeout)]
        );
        assert_eq!(a.phase(), ConnectionPhase::Closed);
    }

    #[test]
    fn test_send_requires_established() {
        let now = Instant::now();
        let mut a = conn(config());
        assert!(matches!(
            a.send(Bytes::from_static(b"x"), now),
            Err(TransportError::NotEstablished(ConnectionPhase::Connecting))
        ));
        assert!(matches!(
            a.send_raw(1, Bytes::from_static(b"x")),
            Err(TransportError::NotEstablished(_))
        ));
    }

    #[test]
    fn test_data_before_established_is_dropped() {
        let now = Instant::now();
        let mut a = conn(config());
        a.connect(now).unwrap();
        drain(&mut a);
        let frame = Frame::Data(Fragment::new(
            0,
            FragmentPosition::Single,
            Bytes::from_static(b"early"),
        ));
        a.handle_datagram(frame.encode(), now);
        assert!(drain(&mut a).is_empty());
        assert!(events(&mut a).is_empty());
    }

    #[test]
    fn test_large_packet_transfer() {
        let now = Instant::now();
        let (mut a, mut b) = established_pair(config(), now);
        let packet: Bytes = (0..20_000).map(|i| (i % 253) as u8).collect();

        a.send(packet.clone(), now).unwrap();
        assert!(a.stats().in_flight > 1);
        exchange(&mut a, &mut b, now);

        assert_eq!(events(&mut b), vec![Event::PacketReceived(packet)]);
        assert_eq!(a.stats().in_flight, 0);
        assert_eq!(b.stats().packets_delivered, 1);
    }

    #[test]
    fn test_window_stops_at_limit() {
        let now = Instant::now();
        let (mut a, mut b) = established_pair(config(), now);
        for i in 0..60u8 {
            a.send(Bytes::from(vec![i; 10]), now).unwrap();
        }

        let sent = drain(&mut a);
        assert_eq!(sent.len(), 50);
        assert_eq!(a.stats().in_flight, 50);

        deliver(&mut b, sent, now);
        let acks = drain(&mut b);
        assert_eq!(acks.len(), 50);

        // One ACK frees one slot; the 51st frame goes out.
        deliver(&mut a, acks[..1].to_vec(), now);
        let next = drain(&mut a);
        assert_eq!(next.len(), 1);
        let Frame::Data(fragment) = Frame::decode(next[0].clone()).unwrap() else {
            panic!("expected data frame");
        };
        assert_eq!(fragment.seq, 50);
    }

    #[test]
    fn test_reordered_and_duplicated_delivery() {
        let now = Instant::now();
        let config = TransportConfig::builder().mtu(80).build().unwrap();
        let (mut a, mut b) = established_pair(config, now);

        let first: Bytes = (0..300).map(|i| i as u8).collect();
        let second = Bytes::from_static(b"second");
        a.send(first.clone(), now).unwrap();
        a.send(second.clone(), now).unwrap();

        let mut wire = drain(&mut a);
        wire.reverse();
        let dup = wire[2].clone();
        wire.insert(4, dup);
        deliver(&mut b, wire, now);

        assert_eq!(
            events(&mut b),
            vec![Event::PacketReceived(first), Event::PacketReceived(second)]
        );
    }

    #[test]
    fn test_retransmission_after_loss() {
        let start = Instant::now();
        let (mut a, mut b) = established_pair(config(), start);
        a.send(Bytes::from_static(b"lost"), start).unwrap();
        drain(&mut a);

        let rto = a.stats().retransmit_timeout;
        a.tick(start + rto);
        let resent: Vec<Bytes> = drain(&mut a)
            .into_iter()
            .filter(|d| d[0] == crate::core::KIND_PKT_SINGLE)
            .collect();
        assert_eq!(resent.len(), 1);
        assert_eq!(a.stats().retransmissions, 1);

        deliver(&mut b, resent, start + rto);
        assert_eq!(
            events(&mut b),
            vec![Event::PacketReceived(Bytes::from_static(b"lost"))]
        );
    }

    #[test]
    fn test_raw_bypasses_window() {
        let now = Instant::now();
        let (mut a, mut b) = established_pair(config(), now);
        a.send_raw(3, Bytes::from_static(b"x")).unwrap();
        assert_eq!(a.stats().in_flight, 0);

        let wire = drain(&mut a);
        assert_eq!(hex::encode(&wire[0]), "300378");
        deliver(&mut b, wire, now);
        assert_eq!(
            events(&mut b),
            vec![Event::RawReceived(3, Bytes::from_static(b"x"))]
        );
        assert!(drain(&mut b).is_empty());
        assert_eq!(b.stats().raw_received, 1);
    }

    #[test]
    fn test_raw_size_limit() {
        let now = Instant::now();
        let config = TransportConfig::builder().mtu(100).build().unwrap();
        let (mut a, _b) = established_pair(config, now);
        assert!(matches!(
            a.send_raw(0, Bytes::from(vec![0u8; 99])),
            Err(TransportError::PacketTooLarge { size: 99, max: 98 })
        ));
    }

    #[test]
    fn test_ping_is_answered() {
        let now = Instant::now();
        let (mut a, mut b) = established_pair(config(), now);
        a.tick(now);
        let ping = drain(&mut a);
        assert_eq!(kinds(&ping), vec![2]);

        deliver(&mut b, ping.clone(), now);
        let pong = drain(&mut b);
        assert_eq!(kinds(&pong), vec![3]);
        assert_eq!(pong[0][1..], ping[0][1..]);

        deliver(&mut a, pong, now);
        assert_eq!(a.stats().pongs_received, 1);
    }

    #[test]
    fn test_pong_timeout_goes_down_once() {
        let start = Instant::now();
        let (mut a, _b) = established_pair(config(), start);

        let mut downs = Vec::new();
        for step in 0..=400u64 {
            let now = start + Duration::from_millis(step * 100);
            a.tick(now);
            drain(&mut a);
            for event in events(&mut a) {
                downs.push((step, event));
            }
        }
        assert_eq!(downs.len(), 1);
        assert_eq!(downs[0].1, Event::ConnectionDown(DownReason::PongTimeout));
        assert!(downs[0].0 >= 300);
        assert_eq!(a.phase(), ConnectionPhase::Closed);
    }

    #[test]
    fn test_violation_threshold() {
        let now = Instant::now();
        let config = TransportConfig::builder()
            .max_protocol_violations(3)
            .build()
            .unwrap();
        let (_a, mut b) = established_pair(config, now);

        for seq in 0..3 {
            let orphan = Frame::Data(Fragment::new(
                seq,
                FragmentPosition::Mid,
                Bytes::from_static(b"?"),
            ));
            b.handle_datagram(orphan.encode(), now);
        }
        assert_eq!(
            events(&mut b),
            vec![Event::ConnectionDown(DownReason::ProtocolViolations(3))]
        );
        assert_eq!(b.stats().protocol_violations, 3);
    }

    #[test]
    fn test_delivery_resets_violations() {
        let now = Instant::now();
        let config = TransportConfig::builder()
            .max_protocol_violations(2)
            .build()
            .unwrap();
        let (_a, mut b) = established_pair(config, now);

        let frames = [
            (FragmentPosition::Mid, &b"?"[..]),
            (FragmentPosition::Single, &b"ok"[..]),
            (FragmentPosition::End, &b"?"[..]),
        ];
        for (seq, (position, payload)) in frames.into_iter().enumerate() {
            let frame = Frame::Data(Fragment::new(
                seq as u32,
                position,
                Bytes::copy_from_slice(payload),
            ));
            b.handle_datagram(frame.encode(), now);
        }
        assert!(b.is_established());
        assert_eq!(
            events(&mut b),
            vec![Event::PacketReceived(Bytes::from_static(b"ok"))]
        );
    }

    #[test]
    fn test_malformed_is_counted_and_ignored() {
        let now = Instant::now();
        let (mut a, _b) = established_pair(config(), now);
        a.handle_datagram(Bytes::from_static(&[0x7f, 1, 2]), now);
        a.handle_datagram(Bytes::from_static(&[0x02, 1, 2]), now);
        a.handle_datagram(Bytes::new(), now);
        assert_eq!(a.stats().malformed_dropped, 3);
        assert!(a.is_established());
        assert!(drain(&mut a).is_empty());
    }

    #[test]
    fn test_close_is_idempotent() {
        let now = Instant::now();
        let (mut a, _b) = established_pair(config(), now);
        a.send(Bytes::from_static(b"pending"), now).unwrap();

        a.close();
        a.close();
        assert_eq!(
            events(&mut a),
            vec![Event::ConnectionDown(DownReason::LocalClose)]
        );
        a.close();
        assert!(events(&mut a).is_empty());
        assert_eq!(a.phase(), ConnectionPhase::Closed);
        assert_eq!(a.stats().in_flight, 0);
        assert!(matches!(
            a.send(Bytes::from_static(b"x"), now),
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_socket_closed() {
        let now = Instant::now();
        let (mut a, _b) = established_pair(config(), now);
        a.socket_closed();
        assert_eq!(
            events(&mut a),
            vec![Event::ConnectionDown(DownReason::SocketClosed)]
        );

        let mut c = conn(config());
        c.connect(now).unwrap();
        c.socket_closed();
        assert_eq!(
            events(&mut c),
            vec![Event::ConnectionFail(FailReason::SocketClosed)]
        );
    }

    struct Xor(u8);

    impl PayloadTransform for Xor {
        fn seal(&mut self, payload: Bytes) -> Result<Bytes, TransformError> {
            Ok(payload.iter().map(|b| b ^ self.0).collect())
        }

        fn open(&mut self, payload: Bytes) -> Result<Bytes, TransformError> {
            if payload.first() == Some(&0) {
                return Err(TransformError::new("zero lead byte"));
            }
            Ok(payload.iter().map(|b| b ^ self.0).collect())
        }
    }

    #[test]
    fn test_transform_applies_to_packets() {
        let now = Instant::now();
        let mut a = ConnectionState::with_transform(config(), MAGIC, Box::new(Xor(0x55))).unwrap();
        let mut b = ConnectionState::with_transform(config(), MAGIC, Box::new(Xor(0x55))).unwrap();
        a.connect(now).unwrap();
        b.connect(now).unwrap();
        exchange(&mut a, &mut b, now);
        events(&mut a);
        events(&mut b);

        a.send(Bytes::from_static(b"secret"), now).unwrap();
        let wire = drain(&mut a);
        assert!(!wire[0].windows(6).any(|w| w == b"secret"));

        deliver(&mut b, wire, now);
        assert_eq!(
            events(&mut b),
            vec![Event::PacketReceived(Bytes::from_static(b"secret"))]
        );
    }

    /// Appends a 16 byte trailer, like an AEAD tag.
    struct Tagged;

    impl PayloadTransform for Tagged {
        fn seal(&mut self, payload: Bytes) -> Result<Bytes, TransformError> {
            let mut sealed = payload.to_vec();
            sealed.extend_from_slice(&[0xAA; 16]);
            Ok(Bytes::from(sealed))
        }

        fn open(&mut self, payload: Bytes) -> Result<Bytes, TransformError> {
            let len = payload
                .len()
                .checked_sub(16)
                .ok_or_else(|| TransformError::new("missing tag"))?;
            Ok(payload.slice(..len))
        }
    }

    #[test]
    fn test_packet_limit_counts_transform_overhead() {
        let now = Instant::now();
        let config = TransportConfig::builder()
            .max_packet_size(4000)
            .build()
            .unwrap();
        let a = ConnectionState::with_transform(config.clone(), MAGIC, Box::new(Tagged)).unwrap();
        let b = ConnectionState::with_transform(config, MAGIC, Box::new(Tagged)).unwrap();
        let (mut a, mut b) = established_between(a, b, now);

        assert!(matches!(
            a.send(Bytes::from(vec![7u8; 4000]), now),
            Err(TransportError::PacketTooLarge {
                size: 4016,
                max: 4000
            })
        ));
        assert_eq!(a.stats().packets_sent, 0);

        let fits = Bytes::from(vec![7u8; 3984]);
        a.send(fits.clone(), now).unwrap();
        exchange(&mut a, &mut b, now);
        assert_eq!(events(&mut b), vec![Event::PacketReceived(fits)]);
        assert_eq!(b.stats().protocol_violations, 0);
    }

    #[test]
    fn test_oversized_packet_is_one_violation() {
        let now = Instant::now();
        let sender = TransportConfig::builder().mtu(100).build().unwrap();
        let receiver = TransportConfig::builder()
            .mtu(100)
            .max_packet_size(1000)
            .build()
            .unwrap();
        let (mut a, mut b) = established_between(conn(sender), conn(receiver), now);

        a.send(Bytes::from(vec![1u8; 5000]), now).unwrap();
        exchange(&mut a, &mut b, now);

        assert!(b.is_established());
        assert!(events(&mut b).is_empty());
        assert_eq!(b.stats().protocol_violations, 1);
        assert_eq!(a.stats().in_flight, 0);

        // The link keeps working for packets within the limit.
        a.send(Bytes::from_static(b"after"), now).unwrap();
        exchange(&mut a, &mut b, now);
        assert_eq!(
            events(&mut b),
            vec![Event::PacketReceived(Bytes::from_static(b"after"))]
        );
    }

    #[test]
    fn test_transform_failure_is_violation() {
        let now = Instant::now();
        let mut b = ConnectionState::with_transform(config(), MAGIC, Box::new(Xor(0x55))).unwrap();
        b.connect(now).unwrap();
        b.handle_datagram(Frame::Hello(Bytes::from_static(MAGIC)).encode(), now);
        events(&mut b);

        let frame = Frame::Data(Fragment::new(
            0,
            FragmentPosition::Single,
            Bytes::from_static(&[0, 1, 2]),
        ));
        b.handle_datagram(frame.encode(), now);
        assert!(events(&mut b).is_empty());
        assert_eq!(b.stats().protocol_violations, 1);
    }

    #[test]
    fn test_rtt_updates_from_acks() {
        let start = Instant::now();
        let (mut a, mut b) = established_pair(config(), start);
        a.send(Bytes::from_static(b"ping"), start).unwrap();
        deliver(&mut b, drain(&mut a), start);
        deliver(&mut a, drain(&mut b), start + Duration::from_millis(20));

        let stats = a.stats();
        assert_eq!(stats.acks_received, 1);
        assert!(stats.smoothed_rtt < Duration::from_millis(100));
    }
}
