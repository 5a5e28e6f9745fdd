//! Streamable HTTP Client Transport
//!
//! Each outbound send is a fresh POST against the server endpoint. A
//! `200 application/json` response yields a single inbound message; a
//! `200 text/event-stream` response is pumped inbound until the stream
//! ends; a `202` acknowledges a notification-only body. When streaming is
//! enabled the transport also maintains the session's standalone GET
//! stream, reconnecting with exponential backoff and resuming via
//! `Last-Event-ID`.

// Layer 1: Standard library imports
use std::sync::{Arc, OnceLock};

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, ORIGIN};
use reqwest::{Client, StatusCode};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

// Layer 3: Internal module imports
use super::config::HttpClientConfig;
use super::sse::SseDecoder;
use crate::protocol::{headers as mcp_headers, RequestId};
use crate::transport::{MessageContext, Transport, TransportError, TransportMessage};

/// Shared state between the transport handle and its pump tasks
struct ClientShared {
    config: HttpClientConfig,
    inbound_tx: mpsc::Sender<TransportMessage>,
    /// Captured once from the initialize response headers
    session_id: OnceLock<String>,
    session_ready: Notify,
    /// Last seen `id:` line on the standalone stream
    last_event_id: Mutex<Option<String>>,
    closed: CancellationToken,
}

impl ClientShared {
    fn session_id(&self) -> Option<String> {
        self.session_id.get().cloned()
    }

    fn record_session(&self, response_headers: &HeaderMap) {
        let Some(session) = response_headers
            .get(mcp_headers::MCP_SESSION_ID)
            .and_then(|v| v.to_str().ok())
        else {
            return;
        };
        if self.session_id.set(session.to_string()).is_ok() {
            debug!(session_id = %session, "captured session id");
            // notify_one stores a permit, so a loop that has not started
            // waiting yet still observes the capture.
            self.session_ready.notify_one();
        }
    }

    async fn last_event_id(&self) -> Option<String> {
        self.last_event_id.lock().await.clone()
    }

    async fn record_event_id(&self, id: &str) {
        *self.last_event_id.lock().await = Some(id.to_string());
    }

    fn request_headers(&self, for_sse: bool) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let accept = if for_sse {
            "text/event-stream"
        } else {
            "application/json, text/event-stream"
        };
        headers.insert(ACCEPT, HeaderValue::from_static(accept));
        if !for_sse {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        if let Some(session) = self.session_id() {
            if let Ok(value) = HeaderValue::from_str(&session) {
                headers.insert(mcp_headers::MCP_SESSION_ID, value);
            }
        }
        if let Some(version) = &self.config.protocol_version {
            if let Ok(value) = HeaderValue::from_str(version.as_str()) {
                headers.insert(mcp_headers::MCP_PROTOCOL_VERSION, value);
            }
        }
        if let Some(origin) = &self.config.origin {
            if let Ok(value) = HeaderValue::from_str(origin) {
                headers.insert(ORIGIN, value);
            }
        }
        headers
    }

    async fn push_inbound(&self, data: Bytes) -> Result<(), TransportError> {
        let context = match self.session_id() {
            Some(session) => MessageContext::new(session),
            None => MessageContext::without_session(),
        };
        self.inbound_tx
            .send(TransportMessage::new(data, context))
            .await
            .map_err(|_| TransportError::Closed)
    }
}

/// HTTP client transport over reqwest
pub struct HttpClientTransport {
    shared: Arc<ClientShared>,
    inbound_rx: Mutex<mpsc::Receiver<TransportMessage>>,
    client: Option<Client>,
    standalone_task: Option<JoinHandle<()>>,
}

impl HttpClientTransport {
    /// Inbound queue depth
    const INBOUND_DEPTH: usize = 64;

    /// Create a transport for the given configuration
    pub fn new(config: HttpClientConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(Self::INBOUND_DEPTH);
        Self {
            shared: Arc::new(ClientShared {
                config,
                inbound_tx,
                session_id: OnceLock::new(),
                session_ready: Notify::new(),
                last_event_id: Mutex::new(None),
                closed: CancellationToken::new(),
            }),
            inbound_rx: Mutex::new(inbound_rx),
            client: None,
            standalone_task: None,
        }
    }

    /// The session id captured from the initialize response, if any
    pub fn session(&self) -> Option<String> {
        self.shared.session_id()
    }
}

#[async_trait]
impl Transport for HttpClientTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.shared.closed.is_cancelled() {
            return Err(TransportError::connection("transport already closed"));
        }
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| TransportError::connection(format!("client build failed: {e}")))?;
        self.client = Some(client.clone());

        if self.shared.config.streaming {
            let shared = Arc::clone(&self.shared);
            self.standalone_task = Some(tokio::spawn(async move {
                standalone_loop(shared, client).await;
            }));
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.shared.closed.cancel();
        if let Some(task) = self.standalone_task.take() {
            task.abort();
        }
        Ok(())
    }

    async fn send(
        &mut self,
        data: Bytes,
        _related_request_id: Option<&RequestId>,
    ) -> Result<(), TransportError> {
        if self.shared.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| TransportError::connection("transport not connected"))?;

        let response = client
            .post(self.shared.config.endpoint.clone())
            .headers(self.shared.request_headers(false))
            .body(data.to_vec())
            .send()
            .await
            .map_err(|e| TransportError::connection(format!("POST failed: {e}")))?;

        self.shared.record_session(response.headers());

        match response.status() {
            StatusCode::ACCEPTED => Ok(()),
            StatusCode::OK => {
                let content_type = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();

                if content_type.starts_with("text/event-stream") {
                    let shared = Arc::clone(&self.shared);
                    tokio::spawn(async move {
                        pump_sse_body(shared, response).await;
                    });
                    Ok(())
                } else {
                    let body = response
                        .bytes()
                        .await
                        .map_err(|e| TransportError::other(format!("body read failed: {e}")))?;
                    if body.is_empty() {
                        return Ok(());
                    }
                    self.shared.push_inbound(body).await
                }
            }
            status => {
                let detail = response.text().await.unwrap_or_default();
                Err(TransportError::other(format!(
                    "server answered {status}: {detail}"
                )))
            }
        }
    }

    async fn receive(&mut self) -> Option<TransportMessage> {
        let mut inbound = self.inbound_rx.lock().await;
        tokio::select! {
            _ = self.shared.closed.cancelled() => None,
            message = inbound.recv() => message,
        }
    }

    fn session_id(&self) -> Option<String> {
        self.shared.session_id()
    }
}

/// Pump one POST SSE response body inbound until it ends
async fn pump_sse_body(shared: Arc<ClientShared>, response: reqwest::Response) {
    let mut decoder = SseDecoder::new();
    let mut body = response.bytes_stream();
    loop {
        tokio::select! {
            _ = shared.closed.cancelled() => return,
            chunk = body.next() => match chunk {
                Some(Ok(chunk)) => {
                    for event in decoder.feed(&chunk) {
                        if event.data.is_empty() {
                            continue;
                        }
                        if shared.push_inbound(Bytes::from(event.data)).await.is_err() {
                            return;
                        }
                    }
                }
                Some(Err(error)) => {
                    debug!(error = %error, "POST SSE body errored");
                    return;
                }
                None => return,
            },
        }
    }
}

/// Maintain the standalone GET stream with backoff and resumption
async fn standalone_loop(shared: Arc<ClientShared>, client: Client) {
    // The standalone stream needs a session; wait for initialize to
    // capture one.
    while shared.session_id().is_none() {
        tokio::select! {
            _ = shared.closed.cancelled() => return,
            _ = shared.session_ready.notified() => {}
        }
    }

    let policy = shared.config.reconnect.clone();
    let mut attempt: u32 = 0;
    loop {
        if shared.closed.is_cancelled() {
            return;
        }

        match open_standalone(&shared, &client).await {
            Ok(response) => {
                attempt = 0;
                consume_standalone(&shared, response).await;
                if shared.closed.is_cancelled() {
                    return;
                }
                debug!("standalone stream ended, reconnecting");
            }
            Err(error) => {
                debug!(error = %error, "standalone stream connect failed");
            }
        }

        attempt += 1;
        if attempt > policy.max_retries {
            warn!(
                attempts = attempt - 1,
                "standalone stream retries exhausted, ending receive sequence"
            );
            // Surfaces as a transport failure: pending requests resolve
            // with ConnectionClosed when receive() ends.
            shared.closed.cancel();
            return;
        }
        let delay = policy.delay_for(attempt);
        debug!(attempt, ?delay, "standalone stream backoff");
        tokio::select! {
            _ = shared.closed.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn open_standalone(
    shared: &Arc<ClientShared>,
    client: &Client,
) -> Result<reqwest::Response, TransportError> {
    let mut headers = shared.request_headers(true);
    if let Some(last) = shared.last_event_id().await {
        if let Ok(value) = HeaderValue::from_str(&last) {
            headers.insert(mcp_headers::LAST_EVENT_ID, value);
        }
    }

    let response = client
        .get(shared.config.endpoint.clone())
        .headers(headers)
        .send()
        .await
        .map_err(|e| TransportError::connection(format!("GET failed: {e}")))?;

    if response.status() != StatusCode::OK {
        return Err(TransportError::other(format!(
            "standalone GET answered {}",
            response.status()
        )));
    }
    Ok(response)
}

async fn consume_standalone(shared: &Arc<ClientShared>, response: reqwest::Response) {
    let mut decoder = SseDecoder::new();
    let mut body = response.bytes_stream();
    loop {
        tokio::select! {
            _ = shared.closed.cancelled() => return,
            chunk = body.next() => match chunk {
                Some(Ok(chunk)) => {
                    for event in decoder.feed(&chunk) {
                        if let Some(id) = &event.id {
                            shared.record_event_id(id).await;
                        }
                        if event.data.is_empty() {
                            continue;
                        }
                        if shared.push_inbound(Bytes::from(event.data)).await.is_err() {
                            return;
                        }
                    }
                }
                Some(Err(error)) => {
                    debug!(error = %error, "standalone stream errored");
                    return;
                }
                None => return,
            },
        }
    }
}
