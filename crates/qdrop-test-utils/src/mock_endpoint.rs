//! Mock connection endpoint for testing without real network.
//!
//! Provides in-memory channel pairs shaped like the server's per-connection
//! plumbing, allowing protocol logic to be exercised without sockets.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use qdrop_core::error::{Error, Result};
use qdrop_core::protocol::Message;

/// Default receive timeout for test endpoints.
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// One side of an in-memory message connection.
#[derive(Debug)]
pub struct MockEndpoint {
    tx: mpsc::Sender<Message>,
    rx: mpsc::Receiver<Message>,
}

impl MockEndpoint {
    /// Send a message to the peer.
    pub async fn send(&self, msg: Message) -> Result<()> {
        self.tx.send(msg).await.map_err(|_| Error::ConnectionClosed)
    }

    /// Receive the next message, failing after a timeout so a wedged test
    /// fails fast instead of hanging.
    pub async fn recv(&mut self) -> Result<Message> {
        match timeout(RECV_TIMEOUT, self.rx.recv()).await {
            Ok(Some(msg)) => Ok(msg),
            Ok(None) => Err(Error::ConnectionClosed),
            Err(_) => Err(Error::Protocol {
                message: "timed out waiting for message".into(),
            }),
        }
    }

    /// Receive the next message, skipping any that `skip` matches.
    ///
    /// Useful when broadcasts (participant updates, progress samples)
    /// interleave with the frame a test is actually waiting for.
    pub async fn recv_skipping<F>(&mut self, mut skip: F) -> Result<Message>
    where
        F: FnMut(&Message) -> bool,
    {
        loop {
            let msg = self.recv().await?;
            if !skip(&msg) {
                return Ok(msg);
            }
        }
    }

    /// Non-blocking receive, for asserting that nothing was delivered.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    /// Split into the raw channel halves, matching the server's
    /// `(inbound, outbound)` actor wiring.
    pub fn into_parts(self) -> (mpsc::Sender<Message>, mpsc::Receiver<Message>) {
        (self.tx, self.rx)
    }

    /// Clone the send half.
    pub fn sender(&self) -> mpsc::Sender<Message> {
        self.tx.clone()
    }

    /// Drop the send half, simulating a peer disconnect.
    pub fn close(self) -> mpsc::Receiver<Message> {
        self.rx
    }
}

/// Create a cross-wired pair of endpoints with the given queue depth.
pub fn mock_endpoint_pair(depth: usize) -> (MockEndpoint, MockEndpoint) {
    let (tx_a, rx_b) = mpsc::channel(depth);
    let (tx_b, rx_a) = mpsc::channel(depth);
    (
        MockEndpoint { tx: tx_a, rx: rx_a },
        MockEndpoint { tx: tx_b, rx: rx_b },
    )
}
