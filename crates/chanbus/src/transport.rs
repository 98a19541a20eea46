//! # Transport Abstraction
//!
//! Moves opaque frames between two nodes. A transport knows nothing about
//! envelopes or channels; a `PeerLink` layers routing on top.
//!
//! ## Invariants
//!
//! - Frames arrive whole and in the order they were sent.
//! - `recv` returning `Ok(None)` means the remote side closed cleanly.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The remote side is unreachable or the connection dropped.
    ConnectionLost(String),
    /// The frame exceeds what the transport will carry.
    PayloadTooLarge(usize),
    Io(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::PayloadTooLarge(n) => write!(f, "Frame of {} bytes is too large for transport", n),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// A bidirectional frame pipe. Object safe, so links hold `Arc<dyn Transport>`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, frame: &[u8]) -> Result<()>;

    async fn recv(&self) -> Result<Option<Vec<u8>>>;
}

/// In-process transport over tokio channels.
///
/// Frames sent on one end appear on the other end's `recv`.
pub struct DuplexTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl DuplexTransport {
    /// Two connected ends.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        let a = Self { tx: tx_a, rx: Arc::new(Mutex::new(rx_b)) };
        let b = Self { tx: tx_b, rx: Arc::new(Mutex::new(rx_a)) };
        (a, b)
    }
}

#[async_trait::async_trait]
impl Transport for DuplexTransport {
    async fn send(&self, frame: &[u8]) -> Result<()> {
        self.tx
            .send(frame.to_vec())
            .map_err(|_| Error::ConnectionLost("duplex peer dropped".into()))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }
}
