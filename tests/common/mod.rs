//! Shared test helpers for tunnel integration tests

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, mpsc};
use udptun::transport::{DatagramSocket, RecvFuture, SendFuture};

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Deterministic impairments for one direction of a link.
///
/// Every counter is per datagram: `drop_every = 5` drops the 5th, 10th, ...
/// datagram. Zero disables the impairment.
#[derive(Debug, Default)]
pub struct LinkPolicy {
    drop_first: u64,
    drop_every: u64,
    duplicate_every: u64,
    reorder_every: u64,
    cut: AtomicBool,
    sent: AtomicU64,
    held: StdMutex<Option<Vec<u8>>>,
}

impl LinkPolicy {
    /// A perfect link.
    pub fn clean() -> Self {
        Self::default()
    }

    /// Drop the first `n` datagrams.
    pub fn drop_first(mut self, n: u64) -> Self {
        self.drop_first = n;
        self
    }

    /// Drop every `n`th datagram.
    pub fn drop_every(mut self, n: u64) -> Self {
        self.drop_every = n;
        self
    }

    /// Deliver every `n`th datagram twice.
    pub fn duplicate_every(mut self, n: u64) -> Self {
        self.duplicate_every = n;
        self
    }

    /// Hold every `n`th datagram back until after the next one.
    pub fn reorder_every(mut self, n: u64) -> Self {
        self.reorder_every = n;
        self
    }

    /// Stop delivering anything from now on.
    pub fn cut(&self) {
        self.cut.store(true, Ordering::SeqCst);
    }

    /// Datagrams handed to this direction so far.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }

    /// Apply the policy to one datagram, returning what reaches the wire.
    fn apply(&self, datagram: &[u8]) -> Vec<Vec<u8>> {
        let n = self.sent.fetch_add(1, Ordering::SeqCst) + 1;
        if self.cut.load(Ordering::SeqCst) {
            return Vec::new();
        }
        if n <= self.drop_first || hits(n, self.drop_every) {
            return Vec::new();
        }

        let mut out = Vec::with_capacity(3);
        let mut held = self.held.lock().unwrap();
        if hits(n, self.reorder_every) && held.is_none() {
            *held = Some(datagram.to_vec());
            return out;
        }

        out.push(datagram.to_vec());
        if hits(n, self.duplicate_every) {
            out.push(datagram.to_vec());
        }
        if let Some(late) = held.take() {
            out.push(late);
        }
        out
    }
}

fn hits(n: u64, every: u64) -> bool {
    every != 0 && n % every == 0
}

/// One end of an in-memory datagram link.
pub struct MemorySocket {
    local: SocketAddr,
    peer: SocketAddr,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    inbound: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    policy: Arc<LinkPolicy>,
}

impl DatagramSocket for MemorySocket {
    fn send_to<'a>(&'a self, buf: &'a [u8], _target: SocketAddr) -> SendFuture<'a> {
        Box::pin(async move {
            for datagram in self.policy.apply(buf) {
                // A vanished peer is silence, as with UDP.
                let _ = self.outbound.send(datagram);
            }
            Ok(buf.len())
        })
    }

    fn recv_from<'a>(&'a self, buf: &'a mut [u8]) -> RecvFuture<'a> {
        Box::pin(async move {
            let mut inbound = self.inbound.lock().await;
            match inbound.recv().await {
                Some(datagram) => {
                    let len = datagram.len().min(buf.len());
                    buf[..len].copy_from_slice(&datagram[..len]);
                    Ok((len, self.peer))
                }
                None => std::future::pending::<io::Result<(usize, SocketAddr)>>().await,
            }
        })
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local)
    }
}

/// Both ends of a link, with a handle on each direction's policy.
pub struct MemoryLink {
    pub a: MemorySocket,
    pub b: MemorySocket,
    pub a_to_b: Arc<LinkPolicy>,
    pub b_to_a: Arc<LinkPolicy>,
}

impl MemoryLink {
    /// Address of end `a`.
    pub const ADDR_A: &'static str = "10.0.0.1:4000";
    /// Address of end `b`.
    pub const ADDR_B: &'static str = "10.0.0.2:4000";

    /// A perfect link.
    pub fn clean() -> Self {
        Self::new(LinkPolicy::clean(), LinkPolicy::clean())
    }

    /// A link with the given impairments per direction.
    pub fn new(a_to_b: LinkPolicy, b_to_a: LinkPolicy) -> Self {
        let addr_a: SocketAddr = Self::ADDR_A.parse().unwrap();
        let addr_b: SocketAddr = Self::ADDR_B.parse().unwrap();
        let a_to_b = Arc::new(a_to_b);
        let b_to_a = Arc::new(b_to_a);
        let (tx_ab, rx_ab) = mpsc::unbounded_channel();
        let (tx_ba, rx_ba) = mpsc::unbounded_channel();

        let a = MemorySocket {
            local: addr_a,
            peer: addr_b,
            outbound: tx_ab,
            inbound: Mutex::new(rx_ba),
            policy: Arc::clone(&a_to_b),
        };
        let b = MemorySocket {
            local: addr_b,
            peer: addr_a,
            outbound: tx_ba,
            inbound: Mutex::new(rx_ab),
            policy: Arc::clone(&b_to_a),
        };

        Self {
            a,
            b,
            a_to_b,
            b_to_a,
        }
    }

    /// Address of end `a`.
    pub fn addr_a() -> SocketAddr {
        Self::ADDR_A.parse().unwrap()
    }

    /// Address of end `b`.
    pub fn addr_b() -> SocketAddr {
        Self::ADDR_B.parse().unwrap()
    }
}
