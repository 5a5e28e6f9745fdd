//! Transport Layer
//!
//! Communication transport abstractions for the JSON-RPC engine. A
//! transport delivers framed message bytes in wire order (per stream) and
//! accepts best-effort ordered sends with an optional request-correlation
//! hint used by multiplexing transports.
//!
//! # Architecture
//!
//! - [`Transport`] - the contract every transport satisfies
//! - [`TransportMessage`] / [`MessageContext`] - received bytes plus
//!   session and per-request metadata
//! - [`stdio`] - newline-framed stdin/stdout transport
//! - [`memory`] - in-process transport pair for tests and examples
//! - [`http`] - streamable HTTP server and client transports

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

// Layer 3: Internal module imports
use crate::protocol::{McpError, RequestId};

pub mod http;
pub mod memory;
pub mod stdio;

pub use memory::MemoryTransport;
pub use stdio::StdioTransport;

/// Transport error types for comprehensive error handling
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection setup or teardown failures
    #[error("connection error: {message}")]
    Connection { message: String },

    /// I/O operation errors
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Message serialization/deserialization errors
    #[error("serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    /// The transport is closed; sends and receives can no longer succeed
    #[error("transport closed")]
    Closed,

    /// Timeout during a transport operation
    #[error("timeout: {message}")]
    Timeout { message: String },

    /// Generic transport errors
    #[error("transport error: {message}")]
    Other { message: String },
}

impl TransportError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a generic transport error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

impl From<TransportError> for McpError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Closed => McpError::connection_closed(),
            other => McpError::transport_failure(other.to_string()),
        }
    }
}

/// Authentication information attached to a received message
///
/// Produced by external authentication collaborators; the engine only
/// carries it through to handlers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthInfo {
    /// Authenticated subject, if any
    pub subject: Option<String>,
    /// Granted scopes
    pub scopes: Vec<String>,
}

/// HTTP-level request information attached to a received message
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    /// Request headers as lower-case name/value pairs
    pub headers: HashMap<String, String>,
}

/// Handle that closes an SSE stream associated with a received message
///
/// Cloneable and idempotent; invoking it after the stream already closed
/// is a no-op.
#[derive(Clone)]
pub struct StreamCloser {
    close: Arc<dyn Fn() + Send + Sync>,
}

impl StreamCloser {
    /// Wrap a close callback
    pub fn new(close: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            close: Arc::new(close),
        }
    }

    /// Close the associated stream
    pub fn close(&self) {
        (self.close)();
    }
}

impl fmt::Debug for StreamCloser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCloser").finish_non_exhaustive()
    }
}

/// Session and metadata context carried with each received message
#[derive(Debug, Clone, Default)]
pub struct MessageContext {
    /// Session identifier (multi-session transports only)
    session_id: Option<String>,

    /// Authentication information, if the transport authenticates
    auth_info: Option<AuthInfo>,

    /// HTTP request information, if applicable
    request_info: Option<RequestInfo>,

    /// Closes the SSE stream opened by the originating POST, if any
    close_sse_stream: Option<StreamCloser>,

    /// Closes the session's standalone SSE stream, if open
    close_standalone_sse_stream: Option<StreamCloser>,
}

impl MessageContext {
    /// Create a context for the given session
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Default::default()
        }
    }

    /// Create a context without a session (single-connection transports)
    pub fn without_session() -> Self {
        Self::default()
    }

    /// Get the session id
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Get the authentication info
    pub fn auth_info(&self) -> Option<&AuthInfo> {
        self.auth_info.as_ref()
    }

    /// Get the HTTP request info
    pub fn request_info(&self) -> Option<&RequestInfo> {
        self.request_info.as_ref()
    }

    /// Handle closing the POST SSE stream this message arrived on
    pub fn close_sse_stream(&self) -> Option<&StreamCloser> {
        self.close_sse_stream.as_ref()
    }

    /// Handle closing the session's standalone SSE stream
    pub fn close_standalone_sse_stream(&self) -> Option<&StreamCloser> {
        self.close_standalone_sse_stream.as_ref()
    }

    /// Attach authentication info
    pub fn with_auth_info(mut self, auth_info: AuthInfo) -> Self {
        self.auth_info = Some(auth_info);
        self
    }

    /// Attach HTTP request info
    pub fn with_request_info(mut self, request_info: RequestInfo) -> Self {
        self.request_info = Some(request_info);
        self
    }

    /// Attach the POST SSE stream close handle
    pub fn with_close_sse_stream(mut self, closer: StreamCloser) -> Self {
        self.close_sse_stream = Some(closer);
        self
    }

    /// Attach the standalone SSE stream close handle
    pub fn with_close_standalone_sse_stream(mut self, closer: StreamCloser) -> Self {
        self.close_standalone_sse_stream = Some(closer);
        self
    }
}

/// A framed message received from a transport
#[derive(Debug, Clone)]
pub struct TransportMessage {
    /// Raw JSON-RPC body bytes
    pub data: Bytes,
    /// Session and metadata context
    pub context: MessageContext,
}

impl TransportMessage {
    /// Create a message with the given context
    pub fn new(data: Bytes, context: MessageContext) -> Self {
        Self { data, context }
    }
}

/// Core transport abstraction for JSON-RPC communication
///
/// # Contract
///
/// - `connect` fails with a transport error on I/O setup failure
/// - `disconnect` is idempotent, terminates the receive stream, and
///   cancels in-flight sends
/// - `send` is best-effort ordered; `related_request_id` is a routing
///   hint used only by multiplexing transports, others ignore it
/// - `receive` yields messages in wire arrival order within a single
///   stream; across streams of one session no order is defined
/// - `session_id` is populated only by multi-session transports
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the transport's communication channel
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Tear down the transport; safe to call more than once
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Send one framed message
    async fn send(
        &mut self,
        data: Bytes,
        related_request_id: Option<&RequestId>,
    ) -> Result<(), TransportError>;

    /// Receive the next message, or `None` once the transport is closed
    async fn receive(&mut self) -> Option<TransportMessage>;

    /// The session this transport is bound to, if any
    fn session_id(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn stream_closer_is_cloneable_and_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let closer = StreamCloser::new(move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        let clone = closer.clone();
        closer.close();
        clone.close();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn transport_error_maps_to_protocol_error() {
        let error: McpError = TransportError::Closed.into();
        assert_eq!(error, McpError::connection_closed());

        let error: McpError = TransportError::connection("refused").into();
        assert!(matches!(error, McpError::TransportFailure { .. }));
    }

    #[test]
    fn context_builder_round_trip() {
        let context = MessageContext::new("session-1")
            .with_auth_info(AuthInfo {
                subject: Some("alice".to_string()),
                scopes: vec!["mcp".to_string()],
            })
            .with_request_info(RequestInfo::default());

        assert_eq!(context.session_id(), Some("session-1"));
        assert_eq!(
            context.auth_info().and_then(|a| a.subject.as_deref()),
            Some("alice")
        );
        assert!(context.request_info().is_some());
        assert!(context.close_sse_stream().is_none());
    }
}
