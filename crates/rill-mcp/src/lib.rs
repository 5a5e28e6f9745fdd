//! rill-mcp - Model Context Protocol Implementation
//!
//! This crate implements the Model Context Protocol: a bidirectional
//! JSON-RPC 2.0 engine with pluggable transports, capability negotiation,
//! per-request timeouts, progress and cancellation utilities, and a
//! resumable streamable HTTP transport built on Server-Sent Events.
//!
//! # Architecture
//!
//! The implementation is organized in layers:
//!
//! - **Protocol Layer** (`protocol`): JSON-RPC 2.0 message types, the
//!   `_meta` codec, the error model, and typed MCP structures
//! - **Correlation Layer** (`correlation`): the pending-request map that
//!   pairs outbound requests with their responses
//! - **Engine Layer** (`engine`): dispatch, handler registry, progress,
//!   cancellation, batching, and the initialization gate
//! - **Transport Layer** (`transport`): the transport contract, stdio and
//!   in-memory transports, and the streamable HTTP server/client
//! - **Integration Layer** (`integration`): high-level `McpClient` and
//!   `McpServer` facades
//!
//! # Quick Start
//!
//! ```rust
//! use rill_mcp::protocol::{JsonRpcRequest, JsonRpcMessageTrait, RequestId};
//! use serde_json::json;
//!
//! // Create a JSON-RPC request
//! let request = JsonRpcRequest::new(
//!     "tools/call",
//!     Some(json!({"name": "add", "arguments": {"a": 2, "b": 3}})),
//!     RequestId::new_number(1),
//! );
//!
//! // Serialize and parse back
//! let json = request.to_json().unwrap();
//! let parsed = JsonRpcRequest::from_json(&json).unwrap();
//! assert_eq!(request, parsed);
//! ```
//!
//! A server is a set of method handlers behind negotiated capabilities:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rill_mcp::engine::{FnRequestHandler, IncomingRequest};
//! use rill_mcp::integration::McpServer;
//! use rill_mcp::protocol::{CallToolResult, ServerCapabilities, ToolCapabilities};
//! use rill_mcp::transport::http::HttpServerConfig;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = McpServer::builder()
//!     .server_info("adder", "1.0.0")
//!     .capabilities(ServerCapabilities {
//!         tools: Some(ToolCapabilities::default()),
//!         ..Default::default()
//!     })
//!     .with_method_handler(
//!         "tools/call",
//!         Arc::new(FnRequestHandler(|request: IncomingRequest| async move {
//!             let args = request.params_as::<serde_json::Value>()?;
//!             let a = args["arguments"]["a"].as_i64().unwrap_or(0);
//!             let b = args["arguments"]["b"].as_i64().unwrap_or(0);
//!             Ok(json!(CallToolResult::text((a + b).to_string())))
//!         })),
//!     )
//!     .build();
//!
//! let handle = server.serve_http(HttpServerConfig::default()).await?;
//! println!("listening on {}", handle.local_addr());
//! # Ok(())
//! # }
//! ```

// Correlation layer modules
pub mod correlation;

// Engine layer modules
pub mod engine;

// Integration layer modules
pub mod integration;

// Protocol layer modules
pub mod protocol;

// Transport layer modules
pub mod transport;

// Re-export commonly used types for convenience
pub use protocol::{
    ErrorObject,
    // JSON-RPC 2.0 Message Types
    JsonRpcMessage,
    JsonRpcMessageTrait,
    JsonRpcNotification,
    JsonRpcRequest,
    JsonRpcResponse,
    // Error Types
    McpError,
    McpResult,
    ProgressToken,
    ProtocolVersion,
    RequestId,
};

pub use engine::{EngineConfig, EngineRole, IncomingRequest, JsonRpcEngine, Peer, RequestHandler};

pub use correlation::{CorrelationConfig, PendingRequests, RequestIdGenerator};

pub use integration::{McpClient, McpClientBuilder, McpServer, McpServerBuilder};

pub use transport::{
    MessageContext, Transport, TransportError, TransportMessage,
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the crate version as a string
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_crate_public_api() {
        let request = JsonRpcRequest::new(
            "test_method",
            Some(json!({"param": "value"})),
            RequestId::new_string("test-123"),
        );
        let response =
            JsonRpcResponse::success(json!({"result": "success"}), RequestId::new_number(456));
        let notification =
            JsonRpcNotification::new("test_event", Some(json!({"event": "occurred"})));

        assert!(request.to_json().is_ok());
        assert!(response.to_json().is_ok());
        assert!(notification.to_json().is_ok());
    }

    #[test]
    fn test_json_rpc_compliance() {
        let request = JsonRpcRequest::new("ping", None, RequestId::new_number(1));
        let response = JsonRpcResponse::success(json!("pong"), RequestId::new_number(1));
        let notification = JsonRpcNotification::new("heartbeat", None);

        let request_json = request.to_json().unwrap();
        let response_json = response.to_json().unwrap();
        let notification_json = notification.to_json().unwrap();

        assert!(request_json.contains(r#""jsonrpc":"2.0""#));
        assert!(response_json.contains(r#""jsonrpc":"2.0""#));
        assert!(notification_json.contains(r#""jsonrpc":"2.0""#));

        assert!(request_json.contains(r#""id":1"#));
        assert!(!notification_json.contains("id"));
        assert!(response_json.contains(r#""result":"pong""#));
    }

    #[test]
    fn test_version_info() {
        assert!(!version().is_empty());
        assert_eq!(version(), VERSION);
    }
}
