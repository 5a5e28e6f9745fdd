//! Engine Handler Interfaces
//!
//! The request/notification handler traits registered with the engine, the
//! incoming-request view handed to handlers, and the progress sink that
//! emits `notifications/progress` correlated through the request's
//! progress token.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

// Layer 3: Internal module imports
use super::Peer;
use crate::protocol::{
    methods, JsonRpcMessageTrait, JsonRpcNotification, McpError, McpResult, ProgressParams,
    ProgressToken, RequestId, RequestMeta,
};
use crate::transport::MessageContext;

/// Async handler for an incoming JSON-RPC request
///
/// A handler returns the result value for the response, or an [`McpError`]
/// that becomes the response error object. Unexpected failures (panics)
/// are mapped to InternalError by the engine; errors never cross the
/// engine boundary.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handle one incoming request
    async fn handle(&self, request: IncomingRequest) -> McpResult<Value>;
}

/// Async handler for an incoming notification
///
/// Notifications are fire-and-forget; there is nothing to return.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    /// Handle one incoming notification
    async fn handle(&self, notification: JsonRpcNotification, context: MessageContext);
}

/// Blanket handler over an async closure, for lightweight registrations
pub struct FnRequestHandler<F>(pub F);

#[async_trait]
impl<F, Fut> RequestHandler for FnRequestHandler<F>
where
    F: Fn(IncomingRequest) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = McpResult<Value>> + Send,
{
    async fn handle(&self, request: IncomingRequest) -> McpResult<Value> {
        (self.0)(request).await
    }
}

/// An incoming request as seen by a handler
///
/// Carries the decoded request alongside the cancellation scope keyed by
/// its id, the progress sink authorized by `_meta.progressToken`, and a
/// peer handle for server-initiated round-trips (e.g. elicitation) that
/// routes through the stream the request arrived on.
#[derive(Clone)]
pub struct IncomingRequest {
    /// The request id
    pub id: RequestId,
    /// The invoked method
    pub method: String,
    /// Raw request parameters
    pub params: Option<Value>,
    /// Validated `_meta` view of the parameters
    pub meta: RequestMeta,
    /// Transport context the request arrived with
    pub context: MessageContext,
    /// Progress sink; a no-op unless the request declared a token
    pub progress: ProgressSink,
    /// Fires when the peer cancels this request or the session ends
    pub cancellation: CancellationToken,
    /// Handle for calling back to the requesting peer
    pub peer: Peer,
}

impl IncomingRequest {
    /// Decode the parameters into a typed shape
    ///
    /// # Errors
    ///
    /// Returns [`McpError::InvalidParams`] when the parameters do not
    /// match `T`.
    pub fn params_as<T: DeserializeOwned>(&self) -> McpResult<T> {
        let params = self.params.clone().unwrap_or(Value::Null);
        serde_json::from_value(params).map_err(|e| McpError::invalid_params(e.to_string()))
    }
}

/// Emits `notifications/progress` for one in-flight request
///
/// Only requests that declared `_meta.progressToken` get a live sink;
/// otherwise every report is silently suppressed. Progress values are
/// monotonically non-decreasing per token, and emissions after the
/// request's response are suppressed.
#[derive(Clone)]
pub struct ProgressSink {
    token: Option<ProgressToken>,
    peer: Peer,
    closed: Arc<AtomicBool>,
    /// Bit pattern of the highest progress reported so far
    last: Arc<AtomicU64>,
}

impl ProgressSink {
    /// Create a sink for the given token (or a no-op sink without one)
    pub(super) fn new(token: Option<ProgressToken>, peer: Peer) -> Self {
        Self {
            token,
            peer,
            closed: Arc::new(AtomicBool::new(false)),
            last: Arc::new(AtomicU64::new(f64::NEG_INFINITY.to_bits())),
        }
    }

    /// Whether this sink can emit at all
    pub fn is_live(&self) -> bool {
        self.token.is_some() && !self.closed.load(Ordering::Acquire)
    }

    /// Report progress toward the request's completion
    ///
    /// Regressing values and reports after the response are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::ConnectionClosed`] when the session is gone.
    pub async fn report(
        &self,
        progress: f64,
        total: Option<f64>,
        message: Option<String>,
    ) -> McpResult<()> {
        let Some(token) = &self.token else {
            return Ok(());
        };
        if self.closed.load(Ordering::Acquire) {
            debug!(token = %token, "progress after response suppressed");
            return Ok(());
        }
        let last = f64::from_bits(self.last.load(Ordering::Acquire));
        if progress < last {
            debug!(token = %token, progress, "regressing progress dropped");
            return Ok(());
        }
        self.last.store(progress.to_bits(), Ordering::Release);

        let params = ProgressParams {
            progress_token: token.clone(),
            progress,
            total,
            message,
        };
        let notification =
            JsonRpcNotification::new(methods::PROGRESS, Some(serde_json::to_value(params)?));
        self.peer.send_raw(notification.to_bytes()?).await
    }

    /// Suppress further emissions; called once the response is sent
    pub(super) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
