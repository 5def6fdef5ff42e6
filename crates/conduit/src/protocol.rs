use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

/// A duplex, ordered, reliable whole-message transport connecting two peers.
///
/// Implementations deliver each `send` payload at most once and in order;
/// framing at the byte level is their responsibility. The IPC layer treats
/// `send` as fire-and-forget: a failing transport drops the message rather
/// than surfacing an error. `recv` has a single logical consumer per
/// endpoint (the connection pump).
#[async_trait]
pub trait MessagePassingProtocol: Send + Sync + 'static {
    /// Queue one message for delivery to the peer.
    fn send(&self, message: Vec<u8>);

    /// Next whole message from the peer, or `None` once the transport is
    /// closed.
    async fn recv(&self) -> Option<Vec<u8>>;
}

/// One end of an in-process message pipe, see [`loopback`].
pub struct LoopbackProtocol {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

/// Connect two in-process endpoints over unbounded channels.
///
/// Dropping every handle to one end closes the other end's `recv`. Used by
/// the test suites and for wiring channel endpoints within one process.
pub fn loopback() -> (Arc<LoopbackProtocol>, Arc<LoopbackProtocol>) {
    let (left_tx, right_rx) = mpsc::unbounded_channel();
    let (right_tx, left_rx) = mpsc::unbounded_channel();
    let left = Arc::new(LoopbackProtocol { tx: left_tx, rx: Mutex::new(left_rx) });
    let right = Arc::new(LoopbackProtocol { tx: right_tx, rx: Mutex::new(right_rx) });
    (left, right)
}

#[async_trait]
impl MessagePassingProtocol for LoopbackProtocol {
    fn send(&self, message: Vec<u8>) {
        let _ = self.tx.send(message);
    }

    async fn recv(&self) -> Option<Vec<u8>> {
        self.rx.lock().await.recv().await
    }
}
