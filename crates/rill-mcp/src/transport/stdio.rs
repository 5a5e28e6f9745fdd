//! STDIO Transport
//!
//! Newline-framed JSON-RPC over stdin/stdout. One message per line; a
//! background reader task feeds the receive queue so `receive()` observes
//! wire order. Used by hosts that spawn the server as a child process.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

// Layer 3: Internal module imports
use super::{MessageContext, Transport, TransportError, TransportMessage};
use crate::protocol::RequestId;

/// Newline-framed transport over the process's stdin/stdout
pub struct StdioTransport {
    inbound_rx: mpsc::Receiver<TransportMessage>,
    inbound_tx: Option<mpsc::Sender<TransportMessage>>,
    stdout: Arc<Mutex<Stdout>>,
    reader_task: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
    connected: Arc<AtomicBool>,
}

impl StdioTransport {
    /// Default receive queue depth
    const QUEUE_DEPTH: usize = 64;

    /// Create a transport over this process's standard streams
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(Self::QUEUE_DEPTH);
        Self {
            inbound_rx,
            inbound_tx: Some(inbound_tx),
            stdout: Arc::new(Mutex::new(tokio::io::stdout())),
            reader_task: None,
            shutdown: CancellationToken::new(),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.connected.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let Some(inbound_tx) = self.inbound_tx.take() else {
            return Err(TransportError::connection("transport already shut down"));
        };
        let shutdown = self.shutdown.clone();
        let connected = Arc::clone(&self.connected);

        self.reader_task = Some(tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            let trimmed = line.trim();
                            if trimmed.is_empty() {
                                continue;
                            }
                            let message = TransportMessage::new(
                                Bytes::from(trimmed.to_string()),
                                MessageContext::without_session(),
                            );
                            if inbound_tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {
                            debug!("stdin reached EOF");
                            break;
                        }
                        Err(e) => {
                            warn!(error = %e, "stdin read failed");
                            break;
                        }
                    },
                }
            }
            connected.store(false, Ordering::Release);
            // Dropping inbound_tx ends the receive sequence.
        }));

        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.shutdown.cancel();
        self.connected.store(false, Ordering::Release);
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        self.inbound_rx.close();
        Ok(())
    }

    async fn send(
        &mut self,
        data: Bytes,
        _related_request_id: Option<&RequestId>,
    ) -> Result<(), TransportError> {
        if self.shutdown.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let mut stdout = self.stdout.lock().await;
        stdout.write_all(&data).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
        Ok(())
    }

    async fn receive(&mut self) -> Option<TransportMessage> {
        self.inbound_rx.recv().await
    }
}
