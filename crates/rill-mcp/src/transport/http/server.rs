//! Stateful Streamable HTTP Server Transport
//!
//! One instance per session. POST bodies become engine inbound messages;
//! responses and server-initiated messages route back out through the
//! stream bound to their related request id, or through the session's
//! standalone GET stream. Every emitted SSE event is recorded in the
//! event store so a reconnecting client can resume with `Last-Event-ID`.
//!
//! Routing summary:
//! - POST `initialize` (no prior session): buffered 200 JSON response
//!   carrying the `Mcp-Session-Id` header
//! - POST of notifications/responses only: 202 Accepted, empty body
//! - POST containing requests: a fresh SSE stream bound to the contained
//!   request ids, closed after the final response
//! - GET: the standalone SSE stream, with replay on `Last-Event-ID`
//! - DELETE: session teardown
//!
//! Live SSE channels are keyed by [`StreamKey`] in a sharded map; every
//! sender clone lives in that map, so removing a stream's entries is the
//! close path that ends its HTTP body.

// Layer 1: Standard library imports
use std::convert::Infallible;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

// Layer 3: Internal module imports
use super::config::HttpServerConfig;
use super::event_store::{SseEventStore, StreamKey};
use super::sse::SseFrame;
use super::validation::extract_last_event_id;
use crate::protocol::{
    headers as mcp_headers, methods, JsonRpcMessage, JsonRpcMessageTrait, JsonRpcResponse,
    McpError, ParsedBody, RequestId,
};
use crate::transport::{
    MessageContext, RequestInfo, StreamCloser, Transport, TransportError, TransportMessage,
};

/// Metadata of a POST-bound SSE stream: which request ids it still owes
/// responses
struct PostStream {
    key: StreamKey,
    ids: Vec<RequestId>,
    remaining: DashMap<RequestId, ()>,
}

impl PostStream {
    /// Mark one request answered; true when none remain
    fn complete(&self, id: &RequestId) -> bool {
        self.remaining.remove(id);
        self.remaining.is_empty()
    }

    /// Mark the whole batch answered (single array response)
    fn complete_all(&self) -> bool {
        self.remaining.clear();
        true
    }
}

/// A live SSE channel: the standalone stream or one POST stream
struct StreamEntry {
    sender: mpsc::Sender<SseFrame>,
    post: Option<Arc<PostStream>>,
}

/// Shape of an outbound wire body, for final-response detection
enum OutboundShape {
    Response(Option<RequestId>),
    BatchArray,
    Other,
}

fn classify_outbound(data: &[u8]) -> OutboundShape {
    let first = data.iter().find(|b| !b.is_ascii_whitespace());
    if first == Some(&b'[') {
        return OutboundShape::BatchArray;
    }
    match JsonRpcMessage::from_json_bytes(data) {
        Ok(JsonRpcMessage::Response(response)) => OutboundShape::Response(response.id),
        _ => OutboundShape::Other,
    }
}

struct SessionInner {
    session_id: String,
    config: Arc<HttpServerConfig>,
    inbound_tx: mpsc::Sender<TransportMessage>,
    inbound_rx: Mutex<mpsc::Receiver<TransportMessage>>,
    event_store: SseEventStore,
    /// Live SSE channels; the map entries own every sender clone
    streams: DashMap<StreamKey, StreamEntry>,
    /// Buffered-response slots for initialize requests
    buffered: DashMap<RequestId, oneshot::Sender<Bytes>>,
    closed: CancellationToken,
}

impl SessionInner {
    fn close_post_stream(&self, post: &PostStream) {
        for id in &post.ids {
            self.streams.remove(&StreamKey::Request(id.clone()));
        }
        // POST streams are not resumable across connections.
        self.event_store.forget(&post.key);
    }

    fn close_standalone(&self) {
        // History is retained so a reconnect can replay.
        self.streams.remove(&StreamKey::Standalone);
    }

    fn standalone_sender(&self) -> Option<mpsc::Sender<SseFrame>> {
        self.streams
            .get(&StreamKey::Standalone)
            .map(|entry| entry.sender.clone())
    }

    fn install_standalone(&self, sender: mpsc::Sender<SseFrame>) {
        // At most one concurrent standalone stream; a reconnect replaces
        // the previous one, ending its body.
        self.streams
            .insert(StreamKey::Standalone, StreamEntry { sender, post: None });
    }

    fn teardown(&self) {
        self.closed.cancel();
        self.streams.clear();
        self.buffered.clear();
    }
}

/// Streamable HTTP server transport for one session
///
/// Cloneable handle; the HTTP host keeps one clone for request dispatch
/// while the engine owns another as its transport.
#[derive(Clone)]
pub struct StreamableHttpTransport {
    inner: Arc<SessionInner>,
}

impl StreamableHttpTransport {
    /// Inbound queue depth between HTTP handlers and the engine
    const INBOUND_DEPTH: usize = 64;

    /// Create the transport for a freshly assigned session id
    pub fn new(session_id: impl Into<String>, config: Arc<HttpServerConfig>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(Self::INBOUND_DEPTH);
        let event_store = SseEventStore::new(config.event_store_capacity);
        Self {
            inner: Arc::new(SessionInner {
                session_id: session_id.into(),
                config,
                inbound_tx,
                inbound_rx: Mutex::new(inbound_rx),
                event_store,
                streams: DashMap::new(),
                buffered: DashMap::new(),
                closed: CancellationToken::new(),
            }),
        }
    }

    /// The session this transport serves
    pub fn session(&self) -> &str {
        &self.inner.session_id
    }

    /// Whether the session has been torn down
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Handle a POST on the session endpoint
    pub async fn handle_post(&self, headers: &HeaderMap, body: Bytes) -> Response {
        if self.is_closed() {
            return session_gone(&self.inner.session_id);
        }

        let parsed = match ParsedBody::from_slice(&body) {
            Ok(parsed) => parsed,
            Err(error) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(JsonRpcResponse::from_error(&error, None)),
                )
                    .into_response()
            }
        };

        if let ParsedBody::Single(JsonRpcMessage::Request(request)) = &parsed {
            if request.method == methods::INITIALIZE {
                return self
                    .handle_initialize_post(headers, body, request.id.clone())
                    .await;
            }
        }

        if parsed.is_notification_only() {
            // Hand the messages to the engine and acknowledge.
            if self.inject(body, self.base_context(headers)).await.is_err() {
                return session_gone(&self.inner.session_id);
            }
            return StatusCode::ACCEPTED.into_response();
        }

        // At least one request: open a POST SSE stream bound to its ids.
        let ids = parsed.request_ids();
        let Some(first_id) = ids.first().cloned() else {
            let error = McpError::invalid_request("body carries no request");
            return (
                StatusCode::BAD_REQUEST,
                Json(JsonRpcResponse::from_error(&error, None)),
            )
                .into_response();
        };

        let (frame_tx, frame_rx) = mpsc::channel(self.inner.config.sse_channel_depth);
        let post = Arc::new(PostStream {
            key: StreamKey::Request(first_id),
            ids: ids.clone(),
            remaining: ids.iter().cloned().map(|id| (id, ())).collect(),
        });
        for id in &ids {
            self.inner.streams.insert(
                StreamKey::Request(id.clone()),
                StreamEntry {
                    sender: frame_tx.clone(),
                    post: Some(Arc::clone(&post)),
                },
            );
        }
        // The map entries own the channel; removing them ends the body.
        drop(frame_tx);

        let closer_inner = Arc::clone(&self.inner);
        let closer_post = Arc::clone(&post);
        let context = self
            .base_context(headers)
            .with_close_sse_stream(StreamCloser::new(move || {
                closer_inner.close_post_stream(&closer_post);
            }));

        if self.inject(body, context).await.is_err() {
            self.inner.close_post_stream(&post);
            return session_gone(&self.inner.session_id);
        }

        self.sse_response(Vec::new(), frame_rx)
    }

    /// Handle a GET: the standalone SSE stream, with optional replay
    pub async fn handle_get(&self, headers: &HeaderMap) -> Response {
        if self.is_closed() {
            return session_gone(&self.inner.session_id);
        }

        let replayed = match extract_last_event_id(headers) {
            Some(last_event_id) => {
                match self
                    .inner
                    .event_store
                    .replay_after(&StreamKey::Standalone, &last_event_id)
                {
                    Ok(events) => events
                        .into_iter()
                        .map(|(id, data)| SseFrame::event(id, data))
                        .collect(),
                    Err(error) => {
                        // Replay gap: terminate immediately so the client
                        // falls back to a fresh subscription.
                        warn!(
                            session_id = %self.inner.session_id,
                            error = %error,
                            "cannot resume standalone stream"
                        );
                        let (_tx, rx) = mpsc::channel(1);
                        return self.sse_response(Vec::new(), rx);
                    }
                }
            }
            None => Vec::new(),
        };

        let (frame_tx, frame_rx) = mpsc::channel(self.inner.config.sse_channel_depth);
        self.inner.install_standalone(frame_tx);
        self.sse_response(replayed, frame_rx)
    }

    /// Handle a DELETE: terminate the session
    pub async fn handle_delete(&self) -> Response {
        self.inner.teardown();
        StatusCode::OK.into_response()
    }

    async fn handle_initialize_post(
        &self,
        headers: &HeaderMap,
        body: Bytes,
        id: RequestId,
    ) -> Response {
        let (response_tx, response_rx) = oneshot::channel();
        self.inner.buffered.insert(id.clone(), response_tx);

        if self.inject(body, self.base_context(headers)).await.is_err() {
            self.inner.buffered.remove(&id);
            return session_gone(&self.inner.session_id);
        }

        match tokio::time::timeout(self.inner.config.initialize_timeout, response_rx).await {
            Ok(Ok(data)) => {
                let mut response = (StatusCode::OK, data).into_response();
                let headers = response.headers_mut();
                headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
                if let Ok(session) = HeaderValue::from_str(&self.inner.session_id) {
                    headers.insert(mcp_headers::MCP_SESSION_ID, session);
                }
                response
            }
            _ => {
                self.inner.buffered.remove(&id);
                let error = McpError::internal_error("initialize produced no response");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(JsonRpcResponse::from_error(&error, Some(id))),
                )
                    .into_response()
            }
        }
    }

    fn base_context(&self, headers: &HeaderMap) -> MessageContext {
        let mut request_info = RequestInfo::default();
        for (name, value) in headers {
            if let Ok(value) = value.to_str() {
                request_info
                    .headers
                    .insert(name.as_str().to_string(), value.to_string());
            }
        }
        let standalone_inner = Arc::clone(&self.inner);
        MessageContext::new(&self.inner.session_id)
            .with_request_info(request_info)
            .with_close_standalone_sse_stream(StreamCloser::new(move || {
                standalone_inner.close_standalone();
            }))
    }

    async fn inject(&self, body: Bytes, context: MessageContext) -> Result<(), TransportError> {
        self.inner
            .inbound_tx
            .send(TransportMessage::new(body, context))
            .await
            .map_err(|_| TransportError::Closed)
    }

    fn sse_response(&self, replayed: Vec<SseFrame>, live: mpsc::Receiver<SseFrame>) -> Response {
        let mut prefix = Vec::new();
        if let Some(hint) = self.inner.config.sse_retry_hint {
            prefix.push(SseFrame::retry_hint(hint));
        }
        prefix.extend(replayed);

        let stream = futures::stream::iter(prefix)
            .chain(ReceiverStream::new(live))
            .map(|frame| Ok::<Event, Infallible>(frame.into_event()));

        let mut response = Sse::new(stream).into_response();
        let headers = response.headers_mut();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        if let Ok(session) = HeaderValue::from_str(&self.inner.session_id) {
            headers.insert(mcp_headers::MCP_SESSION_ID, session);
        }
        response
    }

    async fn route_related(&self, id: &RequestId, data: Bytes) -> Result<(), TransportError> {
        // Buffered slots (initialize) win over streams.
        if let Some((_, response_tx)) = self.inner.buffered.remove(id) {
            let _ = response_tx.send(data);
            return Ok(());
        }

        // Clone out of the map entry; the shard guard must not be held
        // across the send.
        let stream = self.inner.streams.get(&StreamKey::Request(id.clone())).and_then(|entry| {
            entry
                .post
                .as_ref()
                .map(|post| (entry.sender.clone(), Arc::clone(post)))
        });
        let Some((sender, post)) = stream else {
            warn!(
                session_id = %self.inner.session_id,
                request_id = %id,
                "no open stream for related request, dropping message"
            );
            return Ok(());
        };

        let shape = classify_outbound(&data);
        let event_id = self.inner.event_store.append(&post.key, data.clone());
        if sender.send(SseFrame::event(event_id, data)).await.is_err() {
            debug!(session_id = %self.inner.session_id, "POST stream receiver went away");
            self.inner.close_post_stream(&post);
            return Ok(());
        }

        let done = match shape {
            OutboundShape::Response(Some(response_id)) => post.complete(&response_id),
            OutboundShape::Response(None) => post.complete(id),
            OutboundShape::BatchArray => post.complete_all(),
            OutboundShape::Other => false,
        };
        if done {
            self.inner.close_post_stream(&post);
        }
        Ok(())
    }

    async fn route_standalone(&self, data: Bytes) -> Result<(), TransportError> {
        let Some(sender) = self.inner.standalone_sender() else {
            warn!(
                session_id = %self.inner.session_id,
                "no standalone stream open, dropping message"
            );
            return Ok(());
        };
        let event_id = self
            .inner
            .event_store
            .append(&StreamKey::Standalone, data.clone());
        if sender.send(SseFrame::event(event_id, data)).await.is_err() {
            debug!(session_id = %self.inner.session_id, "standalone receiver went away");
            self.inner.close_standalone();
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::connection("session already terminated"));
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.inner.teardown();
        Ok(())
    }

    async fn send(
        &mut self,
        data: Bytes,
        related_request_id: Option<&RequestId>,
    ) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        match related_request_id {
            Some(id) => self.route_related(id, data).await,
            None => self.route_standalone(data).await,
        }
    }

    async fn receive(&mut self) -> Option<TransportMessage> {
        let mut inbound = self.inner.inbound_rx.lock().await;
        tokio::select! {
            _ = self.inner.closed.cancelled() => None,
            message = inbound.recv() => message,
        }
    }

    fn session_id(&self) -> Option<String> {
        Some(self.inner.session_id.clone())
    }
}

fn session_gone(session_id: &str) -> Response {
    let error = McpError::invalid_request(format!("session terminated: {session_id}"));
    (
        StatusCode::NOT_FOUND,
        Json(JsonRpcResponse::from_error(&error, None)),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transport() -> StreamableHttpTransport {
        StreamableHttpTransport::new("session-1", Arc::new(HttpServerConfig::default()))
    }

    #[tokio::test]
    async fn notification_only_post_is_accepted() {
        let t = transport();
        let body = Bytes::from(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#);
        let response = t.handle_post(&HeaderMap::new(), body).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        // The engine side observes the injected message.
        let mut engine_side = t.clone();
        let received = engine_side.receive().await.unwrap();
        assert_eq!(received.context.session_id(), Some("session-1"));
    }

    #[tokio::test]
    async fn parse_error_maps_to_bad_request() {
        let t = transport();
        let response = t
            .handle_post(&HeaderMap::new(), Bytes::from_static(b"{oops"))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn request_post_opens_sse_and_routes_response() {
        let t = transport();
        let body = Bytes::from(r#"{"jsonrpc":"2.0","id":7,"method":"tools/call"}"#);
        let response = t.handle_post(&HeaderMap::new(), body).await;
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        assert!(content_type.starts_with("text/event-stream"));

        // Engine answers: the response routes to the POST stream and
        // closes it.
        let mut engine_side = t.clone();
        let _ = engine_side.receive().await.unwrap();
        let wire = JsonRpcResponse::success(json!({"ok": true}), RequestId::new_number(7))
            .to_bytes()
            .unwrap();
        engine_side
            .send(wire, Some(&RequestId::new_number(7)))
            .await
            .unwrap();
        assert!(t.inner.streams.is_empty());
    }

    #[tokio::test]
    async fn close_handle_releases_the_post_stream() {
        let t = transport();
        let body = Bytes::from(r#"{"jsonrpc":"2.0","id":9,"method":"tasks/slow"}"#);
        let _response = t.handle_post(&HeaderMap::new(), body).await;

        let mut engine_side = t.clone();
        let received = engine_side.receive().await.unwrap();
        let closer = received.context.close_sse_stream().cloned().unwrap();
        assert!(!t.inner.streams.is_empty());

        closer.close();
        assert!(t.inner.streams.is_empty());
        // Closing again is a no-op.
        closer.close();
    }

    #[tokio::test]
    async fn unrelated_message_without_standalone_is_dropped() {
        let mut t = transport();
        // No GET stream open: send must not error.
        t.send(Bytes::from_static(b"{}"), None).await.unwrap();
    }

    #[tokio::test]
    async fn delete_tears_down_receive() {
        let t = transport();
        let _ = t.handle_delete().await;
        let mut engine_side = t.clone();
        assert!(engine_side.receive().await.is_none());
        assert!(matches!(
            engine_side.send(Bytes::from_static(b"{}"), None).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let mut t = transport();
        t.disconnect().await.unwrap();
        t.disconnect().await.unwrap();
    }
}
