//! In-Memory Transport Pair
//!
//! Two connected transports backed by channels, yielding the client and
//! server ends of a conversation inside one process. The engine tests and
//! the facade examples run over this pair; it honors the same contract as
//! the wire transports, including idempotent disconnect and in-order
//! delivery.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicBool, Ordering};

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

// Layer 3: Internal module imports
use super::{MessageContext, Transport, TransportError, TransportMessage};
use crate::protocol::RequestId;

/// One end of an in-process transport pair
pub struct MemoryTransport {
    outbound: mpsc::Sender<Bytes>,
    inbound: Mutex<mpsc::Receiver<Bytes>>,
    closed: CancellationToken,
    connected: AtomicBool,
    /// Shared with the peer so either side's disconnect ends both streams
    peer_closed: CancellationToken,
}

impl MemoryTransport {
    /// Default channel depth per direction
    const QUEUE_DEPTH: usize = 64;

    /// Create a connected pair of transports
    pub fn pair() -> (MemoryTransport, MemoryTransport) {
        let (a_tx, a_rx) = mpsc::channel(Self::QUEUE_DEPTH);
        let (b_tx, b_rx) = mpsc::channel(Self::QUEUE_DEPTH);
        let closed = CancellationToken::new();

        let left = MemoryTransport {
            outbound: a_tx,
            inbound: Mutex::new(b_rx),
            closed: closed.clone(),
            connected: AtomicBool::new(false),
            peer_closed: closed.clone(),
        };
        let right = MemoryTransport {
            outbound: b_tx,
            inbound: Mutex::new(a_rx),
            closed: closed.clone(),
            connected: AtomicBool::new(false),
            peer_closed: closed,
        };
        (left, right)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::connection("pair already closed"));
        }
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::Release);
        self.closed.cancel();
        Ok(())
    }

    async fn send(
        &mut self,
        data: Bytes,
        _related_request_id: Option<&RequestId>,
    ) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(data)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn receive(&mut self) -> Option<TransportMessage> {
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            _ = self.peer_closed.cancelled() => None,
            data = inbound.recv() => data.map(|data| {
                TransportMessage::new(data, MessageContext::without_session())
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_delivers_in_order() {
        let (mut left, mut right) = MemoryTransport::pair();
        left.connect().await.unwrap();
        right.connect().await.unwrap();

        left.send(Bytes::from_static(b"one"), None).await.unwrap();
        left.send(Bytes::from_static(b"two"), None).await.unwrap();

        assert_eq!(right.receive().await.unwrap().data, Bytes::from_static(b"one"));
        assert_eq!(right.receive().await.unwrap().data, Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_and_ends_both_sides() {
        let (mut left, mut right) = MemoryTransport::pair();
        left.connect().await.unwrap();
        right.connect().await.unwrap();

        left.disconnect().await.unwrap();
        left.disconnect().await.unwrap();

        assert!(right.receive().await.is_none());
        assert!(right
            .send(Bytes::from_static(b"x"), None)
            .await
            .is_err());
    }
}
