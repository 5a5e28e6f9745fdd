//! JSON-RPC Protocol Engine
//!
//! The engine owns one endpoint of a JSON-RPC 2.0 conversation: it
//! correlates outbound requests with their responses, dispatches inbound
//! requests to registered handlers, routes notifications, and implements
//! the cancellation, progress, timeout, batch, and initialization-gate
//! semantics of the protocol.
//!
//! # Concurrency model
//!
//! A single loop task owns the transport; every mutation of protocol
//! state happens between its suspension points (actor-serialized per
//! session). Handlers run on their own tasks so a slow handler never
//! stalls correlation, but they communicate with the session exclusively
//! through the engine's command channel.
//!
//! # Architecture
//!
//! - [`JsonRpcEngine`] - engine handle: call/notify/cancel/registration
//! - [`Peer`] - cheap handle for calling back to the remote endpoint,
//!   optionally routed to the stream a request arrived on
//! - [`handler`] - the handler traits, [`IncomingRequest`], progress sink

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use bytes::Bytes;
use chrono::TimeDelta;
use dashmap::DashMap;
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

// Layer 3: Internal module imports
use crate::correlation::{CorrelationConfig, PendingRequests, RequestIdGenerator};
use crate::protocol::{
    defaults, methods, CancelledParams, JsonRpcMessage, JsonRpcMessageTrait, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, McpError, McpResult, ParsedBody, RequestId, RequestMeta,
};
use crate::transport::{MessageContext, Transport, TransportMessage};

pub mod handler;

pub use handler::{
    FnRequestHandler, IncomingRequest, NotificationHandler, ProgressSink, RequestHandler,
};

/// Which side of the conversation this engine plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineRole {
    /// Initiates the handshake and most requests
    Client,
    /// Answers the handshake and serves the method catalog
    Server,
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Which side of the conversation this engine plays
    pub role: EngineRole,

    /// Deadline applied to outbound requests without an explicit timeout
    pub default_timeout: Duration,

    /// Pending-request map configuration
    pub correlation: CorrelationConfig,

    /// Reject non-initialize requests until the handshake completes
    pub enforce_initialization: bool,
}

impl EngineConfig {
    /// Configuration for a client endpoint
    pub fn client() -> Self {
        Self {
            role: EngineRole::Client,
            default_timeout: defaults::REQUEST_TIMEOUT,
            correlation: CorrelationConfig::default(),
            enforce_initialization: true,
        }
    }

    /// Configuration for a server endpoint
    pub fn server() -> Self {
        Self {
            role: EngineRole::Server,
            ..Self::client()
        }
    }

    /// Override the default per-request timeout
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

/// Initialization gate states
const INIT_NOT_STARTED: u8 = 0;
const INIT_PENDING_ACK: u8 = 1;
const INIT_READY: u8 = 2;

/// An outbound wire write with its routing hint
struct Outbound {
    data: Bytes,
    related: Option<RequestId>,
}

/// Shared engine state behind the cloneable handles
struct EngineInner {
    config: EngineConfig,
    pending: PendingRequests,
    id_gen: RequestIdGenerator,
    handlers: RwLock<HashMap<String, Arc<dyn RequestHandler>>>,
    notification_handlers: RwLock<HashMap<String, Arc<dyn NotificationHandler>>>,
    /// Cancellation scopes of in-flight incoming handlers, keyed by id
    incoming: DashMap<RequestId, CancellationToken>,
    outbound_tx: mpsc::Sender<Outbound>,
    init_state: AtomicU8,
    shutdown: CancellationToken,
}

/// Handle to a running JSON-RPC engine
///
/// Cloneable; all clones drive the same endpoint. Dropping the last handle
/// does not stop the engine, call [`JsonRpcEngine::close`] for that.
#[derive(Clone)]
pub struct JsonRpcEngine {
    inner: Arc<EngineInner>,
    loop_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl JsonRpcEngine {
    /// Outbound command queue depth
    const OUTBOUND_DEPTH: usize = 64;

    /// Connect the transport and start the engine loop
    ///
    /// # Errors
    ///
    /// Returns the transport's connect error mapped to [`McpError`].
    pub async fn start<T>(mut transport: T, config: EngineConfig) -> McpResult<Self>
    where
        T: Transport + 'static,
    {
        transport.connect().await?;

        let (outbound_tx, outbound_rx) = mpsc::channel(Self::OUTBOUND_DEPTH);
        let inner = Arc::new(EngineInner {
            pending: PendingRequests::new(config.correlation.clone()),
            id_gen: RequestIdGenerator::new(),
            handlers: RwLock::new(HashMap::new()),
            notification_handlers: RwLock::new(HashMap::new()),
            incoming: DashMap::new(),
            outbound_tx,
            init_state: AtomicU8::new(INIT_NOT_STARTED),
            shutdown: CancellationToken::new(),
            config,
        });

        let loop_inner = Arc::clone(&inner);
        let loop_task = tokio::spawn(async move {
            run_loop(loop_inner, transport, outbound_rx).await;
        });

        Ok(Self {
            inner,
            loop_task: Arc::new(Mutex::new(Some(loop_task))),
        })
    }

    /// Register an async handler for a request method
    pub async fn register_handler(&self, method: impl Into<String>, handler: Arc<dyn RequestHandler>) {
        self.inner
            .handlers
            .write()
            .await
            .insert(method.into(), handler);
    }

    /// Register an async handler for a notification method
    pub async fn register_notification_handler(
        &self,
        method: impl Into<String>,
        handler: Arc<dyn NotificationHandler>,
    ) {
        self.inner
            .notification_handlers
            .write()
            .await
            .insert(method.into(), handler);
    }

    /// Send a request and await its correlated result
    ///
    /// # Errors
    ///
    /// Resolves with the peer's error object, [`McpError::RequestTimeout`]
    /// after the deadline, [`McpError::RequestCancelled`] if cancelled, or
    /// [`McpError::ConnectionClosed`] on disconnect.
    pub async fn call(&self, method: impl Into<String>, params: Option<Value>) -> McpResult<Value> {
        self.inner.call_related(method.into(), params, None, None).await
    }

    /// Send a request with an explicit deadline
    pub async fn call_with_timeout(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        timeout: Duration,
    ) -> McpResult<Value> {
        self.inner
            .call_related(method.into(), params, Some(timeout), None)
            .await
    }

    /// Send a fire-and-forget notification
    pub async fn notify(&self, method: impl Into<String>, params: Option<Value>) -> McpResult<()> {
        self.inner.notify_related(method.into(), params, None).await
    }

    /// Cancel a request by id, in either direction
    ///
    /// Sends an advisory `notifications/cancelled`. If the id matches an
    /// in-flight outgoing request its continuation resolves with
    /// RequestCancelled; if it matches an in-flight incoming handler its
    /// cancellation signal fires. Unknown ids are a no-op.
    pub async fn cancel(&self, id: &RequestId, reason: Option<String>) -> McpResult<()> {
        self.inner.cancel(id, reason, None).await
    }

    /// A peer handle without stream affinity
    pub fn peer(&self) -> Peer {
        Peer {
            inner: Arc::clone(&self.inner),
            related: None,
        }
    }

    /// Whether the initialization handshake has completed
    pub fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }

    /// Mark the handshake complete (client side, after the initialized
    /// notification is on the wire)
    pub fn mark_ready(&self) {
        self.inner.init_state.store(INIT_READY, Ordering::Release);
    }

    /// Number of in-flight outgoing requests
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// Stop the engine: disconnect the transport, cancel in-flight
    /// handlers, and fail pending requests. Idempotent.
    pub async fn close(&self) {
        self.inner.shutdown.cancel();
        if let Some(task) = self.loop_task.lock().await.take() {
            let _ = task.await;
        }
    }
}

/// Cheap handle for sending to the remote endpoint
///
/// A peer obtained from an [`IncomingRequest`] carries that request's id
/// as the routing hint, so server-initiated messages reach the stream the
/// request arrived on.
#[derive(Clone)]
pub struct Peer {
    inner: Arc<EngineInner>,
    related: Option<RequestId>,
}

impl Peer {
    /// Send a request and await its correlated result
    pub async fn call(&self, method: impl Into<String>, params: Option<Value>) -> McpResult<Value> {
        self.inner
            .call_related(method.into(), params, None, self.related.clone())
            .await
    }

    /// Send a request with an explicit deadline
    pub async fn call_with_timeout(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        timeout: Duration,
    ) -> McpResult<Value> {
        self.inner
            .call_related(method.into(), params, Some(timeout), self.related.clone())
            .await
    }

    /// Send a fire-and-forget notification
    pub async fn notify(&self, method: impl Into<String>, params: Option<Value>) -> McpResult<()> {
        self.inner
            .notify_related(method.into(), params, self.related.clone())
            .await
    }

    /// Cancel a request by id
    pub async fn cancel(&self, id: &RequestId, reason: Option<String>) -> McpResult<()> {
        self.inner.cancel(id, reason, self.related.clone()).await
    }

    /// Send pre-serialized bytes with this peer's routing hint
    pub(crate) async fn send_raw(&self, data: Bytes) -> McpResult<()> {
        self.inner.send_outbound(data, self.related.clone()).await
    }
}

impl EngineInner {
    fn is_ready(&self) -> bool {
        !self.config.enforce_initialization
            || self.init_state.load(Ordering::Acquire) == INIT_READY
    }

    async fn send_outbound(&self, data: Bytes, related: Option<RequestId>) -> McpResult<()> {
        self.outbound_tx
            .send(Outbound { data, related })
            .await
            .map_err(|_| McpError::connection_closed())
    }

    async fn call_related(
        self: &Arc<Self>,
        method: String,
        params: Option<Value>,
        timeout: Option<Duration>,
        related: Option<RequestId>,
    ) -> McpResult<Value> {
        let id = self.id_gen.next_id();
        let timeout = timeout.unwrap_or(self.config.default_timeout);
        let deadline = TimeDelta::from_std(timeout).unwrap_or(TimeDelta::seconds(60));
        let receiver = self.pending.register(id.clone(), Some(deadline))?;

        let request = JsonRpcRequest::new(method, params, id.clone());
        self.send_outbound(request.to_bytes()?, related.clone())
            .await?;

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(result)) => result,
            // The sender side vanished: the engine loop tore down.
            Ok(Err(_)) => Err(McpError::connection_closed()),
            Err(_) => {
                self.pending.forget(&id);
                // Courtesy advisory so the peer can stop working on it.
                let params = CancelledParams {
                    request_id: id.clone(),
                    reason: Some("timeout".to_string()),
                };
                let _ = self
                    .notify_related(
                        methods::CANCELLED.to_string(),
                        Some(serde_json::to_value(params)?),
                        related,
                    )
                    .await;
                Err(McpError::request_timeout(timeout))
            }
        }
    }

    async fn notify_related(
        &self,
        method: String,
        params: Option<Value>,
        related: Option<RequestId>,
    ) -> McpResult<()> {
        let notification = JsonRpcNotification::new(method, params);
        self.send_outbound(notification.to_bytes()?, related).await
    }

    async fn cancel(
        &self,
        id: &RequestId,
        reason: Option<String>,
        related: Option<RequestId>,
    ) -> McpResult<()> {
        let params = CancelledParams {
            request_id: id.clone(),
            reason: reason.clone(),
        };
        self.notify_related(
            methods::CANCELLED.to_string(),
            Some(serde_json::to_value(params)?),
            related,
        )
        .await?;

        if self.pending.cancel(id, reason) {
            return Ok(());
        }
        if let Some((_, token)) = self.incoming.remove(id) {
            token.cancel();
        }
        Ok(())
    }

    /// Dispatch one received transport message; never blocks on handlers
    async fn dispatch(self: &Arc<Self>, message: TransportMessage) {
        let parsed = match ParsedBody::from_slice(&message.data) {
            Ok(parsed) => parsed,
            Err(error) => {
                debug!(error = %error, "rejecting unparseable inbound body");
                let response = JsonRpcResponse::from_error(&error, None);
                if let Ok(data) = response.to_bytes() {
                    // Spawned so the loop never waits on its own queue.
                    let engine = Arc::clone(self);
                    tokio::spawn(async move {
                        let _ = engine.send_outbound(data, None).await;
                    });
                }
                return;
            }
        };

        match parsed {
            ParsedBody::Single(JsonRpcMessage::Response(response)) => {
                self.handle_response(response);
            }
            ParsedBody::Single(JsonRpcMessage::Notification(notification)) => {
                self.handle_notification(notification, message.context).await;
            }
            ParsedBody::Single(JsonRpcMessage::Request(request)) => {
                let engine = Arc::clone(self);
                let context = message.context;
                tokio::spawn(async move {
                    let id = request.id.clone();
                    if let Some(response) =
                        engine.process_request(request, context, false).await
                    {
                        if let Ok(data) = response.to_bytes() {
                            let _ = engine.send_outbound(data, Some(id)).await;
                        }
                    }
                });
            }
            ParsedBody::Batch(messages) => {
                let engine = Arc::clone(self);
                let context = message.context;
                tokio::spawn(async move {
                    engine.process_batch(messages, context).await;
                });
            }
        }
    }

    /// Dispatch batch elements independently and answer with one ordered
    /// array, omitting notifications
    async fn process_batch(self: Arc<Self>, messages: Vec<JsonRpcMessage>, context: MessageContext) {
        let mut first_request_id = None;
        let mut request_futures = Vec::new();

        for (index, element) in messages.into_iter().enumerate() {
            match element {
                JsonRpcMessage::Response(response) => self.handle_response(response),
                JsonRpcMessage::Notification(notification) => {
                    self.handle_notification(notification, context.clone()).await;
                }
                JsonRpcMessage::Request(request) => {
                    if first_request_id.is_none() {
                        first_request_id = Some(request.id.clone());
                    }
                    let engine = Arc::clone(&self);
                    let element_context = context.clone();
                    request_futures.push(async move {
                        let response = engine
                            .process_request(request, element_context, true)
                            .await;
                        (index, response)
                    });
                }
            }
        }

        let mut responses: Vec<(usize, JsonRpcResponse)> = join_all(request_futures)
            .await
            .into_iter()
            .filter_map(|(index, response)| response.map(|r| (index, r)))
            .collect();
        responses.sort_by_key(|(index, _)| *index);
        let ordered: Vec<JsonRpcResponse> = responses.into_iter().map(|(_, r)| r).collect();

        if ordered.is_empty() {
            return;
        }
        match serde_json::to_vec(&ordered) {
            Ok(data) => {
                let _ = self.send_outbound(Bytes::from(data), first_request_id).await;
            }
            Err(error) => warn!(error = %error, "failed to serialize batch responses"),
        }
    }

    /// Run one incoming request to a response, or `None` when suppressed
    async fn process_request(
        self: &Arc<Self>,
        request: JsonRpcRequest,
        context: MessageContext,
        in_batch: bool,
    ) -> Option<JsonRpcResponse> {
        let id = request.id.clone();
        let is_initialize = request.method == methods::INITIALIZE;

        if is_initialize && in_batch {
            let error = McpError::invalid_request("initialize is not allowed in a batch");
            return Some(JsonRpcResponse::from_error(&error, Some(id)));
        }
        if !is_initialize && !self.is_ready() {
            let error = McpError::invalid_request("received request before initialization");
            return Some(JsonRpcResponse::from_error(&error, Some(id)));
        }

        let meta = match RequestMeta::from_params(request.params.as_ref()) {
            Ok(meta) => meta,
            Err(error) => return Some(JsonRpcResponse::from_error(&error, Some(id))),
        };

        let handler = self.handlers.read().await.get(&request.method).cloned();
        let Some(handler) = handler else {
            let error = McpError::method_not_found(&request.method);
            return Some(JsonRpcResponse::from_error(&error, Some(id)));
        };

        let token = self.shutdown.child_token();
        self.incoming.insert(id.clone(), token.clone());

        // Snapshot the stream close handles: a cancelled request never
        // produces the response that would otherwise close its streams.
        let close_sse_stream = context.close_sse_stream().cloned();
        let close_standalone_sse_stream = context.close_standalone_sse_stream().cloned();

        let peer = Peer {
            inner: Arc::clone(self),
            related: Some(id.clone()),
        };
        let progress = ProgressSink::new(meta.progress_token(), peer.clone());
        let incoming = IncomingRequest {
            id: id.clone(),
            method: request.method.clone(),
            params: request.params,
            meta,
            context,
            progress: progress.clone(),
            cancellation: token.clone(),
            peer,
        };

        // Handlers run on their own task so a panic maps to InternalError
        // instead of poisoning the session.
        let mut handler_task = tokio::spawn(async move { handler.handle(incoming).await });

        let outcome = tokio::select! {
            _ = token.cancelled() => {
                handler_task.abort();
                // Guaranteed release: no response will close these.
                if let Some(closer) = &close_sse_stream {
                    closer.close();
                }
                if let Some(closer) = &close_standalone_sse_stream {
                    closer.close();
                }
                None
            }
            joined = &mut handler_task => Some(match joined {
                Ok(result) => result,
                Err(join_error) if join_error.is_panic() => {
                    Err(McpError::internal_error(format!(
                        "handler for {} panicked",
                        request.method
                    )))
                }
                Err(_) => Err(McpError::internal_error("handler task aborted")),
            }),
        };

        self.incoming.remove(&id);
        progress.close();

        let result = outcome?;
        if token.is_cancelled() {
            // A late result after cancellation must not be sent.
            return None;
        }

        if is_initialize && self.config.role == EngineRole::Server && result.is_ok() {
            self.init_state.store(INIT_PENDING_ACK, Ordering::Release);
        }

        Some(match result {
            Ok(value) => JsonRpcResponse::success(value, id),
            Err(error) => JsonRpcResponse::from_error(&error, Some(id)),
        })
    }

    async fn handle_notification(
        self: &Arc<Self>,
        notification: JsonRpcNotification,
        context: MessageContext,
    ) {
        match notification.method.as_str() {
            methods::CANCELLED => {
                let Some(params) = notification
                    .params
                    .and_then(|p| serde_json::from_value::<CancelledParams>(p).ok())
                else {
                    debug!("dropping malformed cancellation notification");
                    return;
                };
                if self.pending.cancel(&params.request_id, params.reason.clone()) {
                    return;
                }
                if let Some((_, token)) = self.incoming.remove(&params.request_id) {
                    debug!(request_id = %params.request_id, "cancelling in-flight handler");
                    token.cancel();
                }
                // Unknown id: advisory cancellation is a no-op.
            }
            methods::INITIALIZED => {
                self.init_state.store(INIT_READY, Ordering::Release);
            }
            method => {
                let handler = self.notification_handlers.read().await.get(method).cloned();
                match handler {
                    Some(handler) => {
                        tokio::spawn(async move {
                            handler.handle(notification, context).await;
                        });
                    }
                    None => debug!(method, "dropping unhandled notification"),
                }
            }
        }
    }

    fn handle_response(&self, response: JsonRpcResponse) {
        let Some(id) = response.id.clone() else {
            warn!("dropping response without id");
            return;
        };
        let result = match response.error {
            Some(error) => match McpError::from_wire_value(error) {
                Ok(decoded) => Err(decoded),
                Err(bad) => Err(bad),
            },
            None => Ok(response.result.unwrap_or(Value::Null)),
        };
        if !self.pending.resolve(&id, result) {
            warn!(request_id = %id, "dropping response with unknown id");
        }
    }
}

/// The engine loop: sole owner of the transport
async fn run_loop<T: Transport>(
    inner: Arc<EngineInner>,
    mut transport: T,
    mut outbound_rx: mpsc::Receiver<Outbound>,
) {
    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            outbound = outbound_rx.recv() => match outbound {
                Some(Outbound { data, related }) => {
                    if let Err(error) = transport.send(data, related.as_ref()).await {
                        warn!(error = %error, "transport send failed, tearing down");
                        inner.pending.fail_all(&error.into());
                        break;
                    }
                }
                None => break,
            },
            received = transport.receive() => match received {
                Some(message) => inner.dispatch(message).await,
                None => {
                    debug!("transport receive stream ended");
                    inner.pending.fail_all(&McpError::connection_closed());
                    break;
                }
            },
        }
    }

    // Guaranteed-release path: cancel in-flight handlers, fail pending
    // requests, and close the transport exactly once.
    inner.shutdown.cancel();
    for entry in inner.incoming.iter() {
        entry.value().cancel();
    }
    inner.incoming.clear();
    inner.pending.fail_all(&McpError::connection_closed());
    inner.pending.shutdown();
    if let Err(error) = transport.disconnect().await {
        debug!(error = %error, "transport disconnect reported an error");
    }
}
