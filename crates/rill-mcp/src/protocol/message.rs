//! JSON-RPC 2.0 Message Implementation
//!
//! This module provides the JSON-RPC 2.0 message types used by the engine
//! and every transport: requests, responses, notifications, the unified
//! message union, and batch body parsing.
//!
//! # Examples
//!
//! ```rust
//! use rill_mcp::protocol::{JsonRpcRequest, JsonRpcMessageTrait, RequestId};
//! use serde_json::json;
//!
//! let request = JsonRpcRequest::new(
//!     "ping",
//!     Some(json!({"message": "hello"})),
//!     RequestId::new_string("req-123")
//! );
//!
//! let json = request.to_json().unwrap();
//! let parsed = JsonRpcRequest::from_json(&json).unwrap();
//! assert_eq!(request, parsed);
//! ```

// Layer 1: Standard library imports
use std::fmt;

// Layer 2: Third-party crate imports
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// Layer 3: Internal module imports
use super::errors::McpError;

/// JSON-RPC message types supporting requests, responses, and notifications
///
/// This enum unifies all JSON-RPC 2.0 message types into a single type
/// for transport and handling. Each variant preserves the specific structure
/// of its message type while providing unified serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// JSON-RPC request message
    Request(JsonRpcRequest),
    /// JSON-RPC notification message
    Notification(JsonRpcNotification),
    /// JSON-RPC response message
    Response(JsonRpcResponse),
}

/// Trait for JSON-RPC message serialization and deserialization
///
/// Provides common functionality for all JSON-RPC message types so every
/// type serializes the same way. Any type that implements
/// `Serialize + Deserialize` gets the default implementations for free.
pub trait JsonRpcMessageTrait: Serialize + for<'de> Deserialize<'de> {
    /// Serialize this message to a JSON string
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if serialization fails, which should be
    /// rare given the controlled structure of JSON-RPC messages.
    fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from a JSON string
    fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize directly into a buffer, avoiding an intermediate String
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if serialization fails.
    fn serialize_to_buffer(&self, buffer: &mut BytesMut) -> Result<(), serde_json::Error> {
        serde_json::to_writer(buffer.writer(), self)
    }

    /// Serialize this message to bytes ready for a transport write
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if serialization fails.
    fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        let mut buffer = BytesMut::with_capacity(256);
        self.serialize_to_buffer(&mut buffer)?;
        Ok(buffer.freeze())
    }

    /// Deserialize a message from JSON bytes
    ///
    /// More efficient than string-based parsing when working with byte
    /// streams.
    fn from_json_bytes(json: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(json)
    }
}

/// Request ID supporting both string and numeric formats per JSON-RPC 2.0
///
/// The specification allows request IDs to be strings, numbers, or null.
/// This enum supports string and numeric variants; null IDs are represented
/// by `Option<RequestId>`. A request id is globally unique within a session
/// for the lifetime of the request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// String-based request identifier
    String(String),
    /// Numeric request identifier
    Number(i64),
}

impl RequestId {
    /// Create a new string-based request ID
    pub fn new_string(id: impl Into<String>) -> Self {
        RequestId::String(id.into())
    }

    /// Create a new numeric request ID
    pub fn new_number(id: i64) -> Self {
        RequestId::Number(id)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::String(s) => write!(f, "{s}"),
            RequestId::Number(n) => write!(f, "{n}"),
        }
    }
}

/// JSON-RPC 2.0 Request Message
///
/// Represents a request to invoke a method on the remote peer. All fields
/// are required except for `params`, which may be omitted if the method
/// takes no parameters. `params` MAY carry `_meta.progressToken` to
/// authorize progress notifications for this request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    /// Protocol version - always "2.0" for JSON-RPC 2.0 compliance
    pub jsonrpc: String,

    /// Name of the method to invoke
    pub method: String,

    /// Parameters for the method (object or array)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,

    /// Unique identifier for this request
    pub id: RequestId,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC 2.0 request
    pub fn new(method: impl Into<String>, params: Option<Value>, id: RequestId) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
            id,
        }
    }
}

impl JsonRpcMessageTrait for JsonRpcRequest {}

/// JSON-RPC 2.0 Response Message
///
/// Contains either a successful result or error information, never both
/// (mutual exclusion enforced by the JSON-RPC specification).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    /// Protocol version - always "2.0" for JSON-RPC 2.0 compliance
    pub jsonrpc: String,

    /// Result of successful method invocation (mutually exclusive with error)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error information for failed method invocation (mutually exclusive with result)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,

    /// Request identifier from the original request (null for parse errors)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

impl JsonRpcResponse {
    /// Create a successful JSON-RPC 2.0 response
    pub fn success(result: Value, id: RequestId) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id: Some(id),
        }
    }

    /// Create an error JSON-RPC 2.0 response
    ///
    /// `id` is `None` for errors that could not be correlated to a request,
    /// such as parse errors.
    pub fn error(error: Value, id: Option<RequestId>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }

    /// Create an error response from a typed protocol error
    pub fn from_error(error: &McpError, id: Option<RequestId>) -> Self {
        Self::error(error.to_wire_value(), id)
    }

    /// Whether this response carries an error object
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl JsonRpcMessageTrait for JsonRpcResponse {}

/// JSON-RPC 2.0 Notification Message
///
/// A request that does not expect a response. Notifications are "fire and
/// forget" messages used for events or one-way communication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcNotification {
    /// Protocol version - always "2.0" for JSON-RPC 2.0 compliance
    pub jsonrpc: String,

    /// Name of the notification method
    pub method: String,

    /// Parameters for the notification (object or array)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    // Note: No `id` field - this is what makes it a notification instead of a request
}

impl JsonRpcNotification {
    /// Create a new JSON-RPC 2.0 notification
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }
}

impl JsonRpcMessageTrait for JsonRpcNotification {}

impl JsonRpcMessageTrait for JsonRpcMessage {}

/// A parsed JSON-RPC body: either a single message or an ordered batch
///
/// Per the JSON-RPC 2.0 batch rules, responses for a batch are returned as
/// an array in the same order as the input, omitting notifications. If any
/// element of a batch is unparseable the whole batch is answered with a
/// single InvalidRequest error.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedBody {
    /// A single JSON-RPC message
    Single(JsonRpcMessage),
    /// An ordered batch of messages
    Batch(Vec<JsonRpcMessage>),
}

impl ParsedBody {
    /// Parse a wire body into a single message or a batch
    ///
    /// # Errors
    ///
    /// * [`McpError::ParseError`] - the body is not valid JSON
    /// * [`McpError::InvalidRequest`] - the body is valid JSON but not a
    ///   valid JSON-RPC message, an empty batch, or a batch with an
    ///   unparseable element
    pub fn from_slice(body: &[u8]) -> Result<Self, McpError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|e| McpError::parse_error(e.to_string()))?;

        match value {
            Value::Array(elements) => {
                if elements.is_empty() {
                    return Err(McpError::invalid_request("empty batch"));
                }
                let mut messages = Vec::with_capacity(elements.len());
                for element in elements {
                    let message = serde_json::from_value::<JsonRpcMessage>(element)
                        .map_err(|e| McpError::invalid_request(e.to_string()))?;
                    messages.push(message);
                }
                Ok(ParsedBody::Batch(messages))
            }
            other => {
                let message = serde_json::from_value::<JsonRpcMessage>(other)
                    .map_err(|e| McpError::invalid_request(e.to_string()))?;
                Ok(ParsedBody::Single(message))
            }
        }
    }

    /// All messages in wire order, regardless of single/batch shape
    pub fn messages(&self) -> &[JsonRpcMessage] {
        match self {
            ParsedBody::Single(message) => std::slice::from_ref(message),
            ParsedBody::Batch(messages) => messages.as_slice(),
        }
    }

    /// True when every element is a notification or a response
    ///
    /// The streamable HTTP transport answers such POST bodies with
    /// `202 Accepted` and no body.
    pub fn is_notification_only(&self) -> bool {
        self.messages()
            .iter()
            .all(|m| !matches!(m, JsonRpcMessage::Request(_)))
    }

    /// Ids of the requests contained in the body, in wire order
    pub fn request_ids(&self) -> Vec<RequestId> {
        self.messages()
            .iter()
            .filter_map(|m| match m {
                JsonRpcMessage::Request(r) => Some(r.id.clone()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_round_trip() {
        let request = JsonRpcRequest::new(
            "tools/call",
            Some(json!({"name": "add", "arguments": {"a": 2, "b": 3}})),
            RequestId::new_number(2),
        );

        let json = request.to_json().unwrap();
        let parsed = JsonRpcRequest::from_json(&json).unwrap();
        assert_eq!(request, parsed);
    }

    #[test]
    fn response_round_trip() {
        let success = JsonRpcResponse::success(json!({"ok": true}), RequestId::new_string("a"));
        let parsed = JsonRpcResponse::from_json(&success.to_json().unwrap()).unwrap();
        assert_eq!(success, parsed);

        let error = JsonRpcResponse::error(
            json!({"code": -32601, "message": "Method not found"}),
            Some(RequestId::new_number(7)),
        );
        let parsed = JsonRpcResponse::from_json(&error.to_json().unwrap()).unwrap();
        assert_eq!(error, parsed);
    }

    #[test]
    fn notification_has_no_id() {
        let notification = JsonRpcNotification::new("notifications/initialized", None);
        let json = notification.to_json().unwrap();
        assert!(!json.contains("\"id\""));
        assert!(json.contains(r#""jsonrpc":"2.0""#));
    }

    #[test]
    fn message_union_discriminates() {
        let request = r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;
        let notification = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        let response = r#"{"jsonrpc":"2.0","id":1,"result":{}}"#;

        assert!(matches!(
            JsonRpcMessage::from_json(request).unwrap(),
            JsonRpcMessage::Request(_)
        ));
        assert!(matches!(
            JsonRpcMessage::from_json(notification).unwrap(),
            JsonRpcMessage::Notification(_)
        ));
        assert!(matches!(
            JsonRpcMessage::from_json(response).unwrap(),
            JsonRpcMessage::Response(_)
        ));
    }

    #[test]
    fn batch_parse_preserves_order() {
        let body = br#"[
            {"jsonrpc":"2.0","id":1,"method":"a"},
            {"jsonrpc":"2.0","method":"n"},
            {"jsonrpc":"2.0","id":2,"method":"b"}
        ]"#;

        let parsed = ParsedBody::from_slice(body).unwrap();
        assert_eq!(
            parsed.request_ids(),
            vec![RequestId::new_number(1), RequestId::new_number(2)]
        );
        assert!(!parsed.is_notification_only());
    }

    #[test]
    fn batch_with_bad_element_is_invalid_request() {
        let body = br#"[{"jsonrpc":"2.0","id":1,"method":"a"}, {"bogus": true}]"#;
        let err = ParsedBody::from_slice(body).unwrap_err();
        assert_eq!(err.code(), -32600);
    }

    #[test]
    fn empty_batch_is_invalid_request() {
        let err = ParsedBody::from_slice(b"[]").unwrap_err();
        assert_eq!(err.code(), -32600);
    }

    #[test]
    fn invalid_json_is_parse_error() {
        let err = ParsedBody::from_slice(b"{not json").unwrap_err();
        assert_eq!(err.code(), -32700);
    }

    #[test]
    fn notification_only_body() {
        let body = br#"[{"jsonrpc":"2.0","method":"x"},{"jsonrpc":"2.0","id":3,"result":{}}]"#;
        let parsed = ParsedBody::from_slice(body).unwrap();
        assert!(parsed.is_notification_only());
        assert!(parsed.request_ids().is_empty());
    }
}
