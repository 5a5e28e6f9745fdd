//! Protocol Error Model
//!
//! Error kinds with JSON-RPC wire codes and lossless wire-format round-trip.
//!
//! Every error kind maps to a wire code; encoding emits `{code, message,
//! data?}` and decoding reconstructs the specific kind by code. A wire
//! message equal to the default message for its code decodes back to a
//! detail-less variant, so `decode(encode(e)) == e` holds for all kinds.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Convenient result type for protocol operations
pub type McpResult<T> = Result<T, McpError>;

/// Protocol error kinds with JSON-RPC 2.0 wire codes
///
/// Protocol errors are surfaced in the response `error` object and never
/// thrown across the engine boundary; transport and timeout errors resolve
/// pending continuations instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum McpError {
    /// Invalid JSON was received (-32700)
    #[error("{}", .detail.as_deref().unwrap_or(Self::MSG_PARSE_ERROR))]
    ParseError { detail: Option<String> },

    /// The JSON sent is not a valid Request object (-32600)
    #[error("{}", .detail.as_deref().unwrap_or(Self::MSG_INVALID_REQUEST))]
    InvalidRequest { detail: Option<String> },

    /// The method does not exist or is not advertised (-32601)
    #[error("{}", .detail.as_deref().unwrap_or(Self::MSG_METHOD_NOT_FOUND))]
    MethodNotFound { detail: Option<String> },

    /// Invalid method parameters (-32602)
    #[error("{}", .detail.as_deref().unwrap_or(Self::MSG_INVALID_PARAMS))]
    InvalidParams { detail: Option<String> },

    /// Internal error, including unexpected handler failures (-32603)
    #[error("{}", .detail.as_deref().unwrap_or(Self::MSG_INTERNAL_ERROR))]
    InternalError { detail: Option<String> },

    /// The underlying connection closed while requests were in flight (-32000)
    #[error("{}", .detail.as_deref().unwrap_or(Self::MSG_CONNECTION_CLOSED))]
    ConnectionClosed { detail: Option<String> },

    /// An outbound request exceeded its deadline (-32001)
    #[error("Request timed out after {timeout:?}")]
    RequestTimeout { timeout: Duration },

    /// A referenced resource does not exist (-32002)
    #[error("{}", .detail.as_deref().unwrap_or(Self::MSG_RESOURCE_NOT_FOUND))]
    ResourceNotFound { detail: Option<String> },

    /// A transport-level failure, carrying the underlying description (-32003)
    #[error("{error}")]
    TransportFailure { error: String },

    /// The request was cancelled before completion (-32004)
    #[error("{}", .reason.as_deref().unwrap_or(Self::MSG_CANCELLED))]
    RequestCancelled { reason: Option<String> },

    /// The client must complete a URL elicitation first (-32042)
    #[error("{}", .detail.as_deref().unwrap_or(Self::MSG_URL_ELICITATION))]
    UrlElicitationRequired { detail: Option<String> },

    /// Server-defined error with a code in the reserved server range
    #[error("server error {code}: {message}")]
    ServerError {
        code: i64,
        message: String,
        data: Option<Value>,
    },
}

/// JSON-RPC error object as it appears on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Numeric error code
    pub code: i64,
    /// Human-readable message
    pub message: String,
    /// Optional structured data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl McpError {
    /// JSON-RPC 2.0 and MCP wire codes
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const CONNECTION_CLOSED: i64 = -32000;
    pub const REQUEST_TIMEOUT: i64 = -32001;
    pub const RESOURCE_NOT_FOUND: i64 = -32002;
    pub const TRANSPORT_ERROR: i64 = -32003;
    pub const REQUEST_CANCELLED: i64 = -32004;
    pub const URL_ELICITATION_REQUIRED: i64 = -32042;

    const MSG_PARSE_ERROR: &'static str = "Invalid JSON";
    const MSG_INVALID_REQUEST: &'static str = "Invalid Request";
    const MSG_METHOD_NOT_FOUND: &'static str = "Method not found";
    const MSG_INVALID_PARAMS: &'static str = "Invalid params";
    const MSG_INTERNAL_ERROR: &'static str = "Internal error";
    const MSG_CONNECTION_CLOSED: &'static str = "Connection closed";
    const MSG_RESOURCE_NOT_FOUND: &'static str = "Resource not found";
    const MSG_CANCELLED: &'static str = "cancelled";
    const MSG_URL_ELICITATION: &'static str = "URL elicitation required";

    /// Create a parse error with detail
    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::ParseError {
            detail: Some(detail.into()),
        }
    }

    /// Create an invalid request error with detail
    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::InvalidRequest {
            detail: Some(detail.into()),
        }
    }

    /// Create a method not found error naming the method
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::MethodNotFound {
            detail: Some(format!("Method not found: {}", method.into())),
        }
    }

    /// Create an invalid parameters error with detail
    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::InvalidParams {
            detail: Some(detail.into()),
        }
    }

    /// Create an internal error with detail
    pub fn internal_error(detail: impl Into<String>) -> Self {
        Self::InternalError {
            detail: Some(detail.into()),
        }
    }

    /// Create a connection closed error without detail
    pub fn connection_closed() -> Self {
        Self::ConnectionClosed { detail: None }
    }

    /// Create a request timeout error for the given deadline
    pub fn request_timeout(timeout: Duration) -> Self {
        Self::RequestTimeout { timeout }
    }

    /// Create a transport failure carrying the underlying description
    pub fn transport_failure(error: impl Into<String>) -> Self {
        Self::TransportFailure {
            error: error.into(),
        }
    }

    /// Create a cancellation error with an optional user reason
    pub fn request_cancelled(reason: Option<String>) -> Self {
        Self::RequestCancelled { reason }
    }

    /// Create a resource not found error with detail
    pub fn resource_not_found(detail: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            detail: Some(detail.into()),
        }
    }

    /// Create a server-defined error
    ///
    /// The code should fall in the reserved server range `[-32099, -32000]`.
    pub fn server_error(code: i64, message: impl Into<String>) -> Self {
        Self::ServerError {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Get the JSON-RPC wire code for this error
    pub fn code(&self) -> i64 {
        match self {
            McpError::ParseError { .. } => Self::PARSE_ERROR,
            McpError::InvalidRequest { .. } => Self::INVALID_REQUEST,
            McpError::MethodNotFound { .. } => Self::METHOD_NOT_FOUND,
            McpError::InvalidParams { .. } => Self::INVALID_PARAMS,
            McpError::InternalError { .. } => Self::INTERNAL_ERROR,
            McpError::ConnectionClosed { .. } => Self::CONNECTION_CLOSED,
            McpError::RequestTimeout { .. } => Self::REQUEST_TIMEOUT,
            McpError::ResourceNotFound { .. } => Self::RESOURCE_NOT_FOUND,
            McpError::TransportFailure { .. } => Self::TRANSPORT_ERROR,
            McpError::RequestCancelled { .. } => Self::REQUEST_CANCELLED,
            McpError::UrlElicitationRequired { .. } => Self::URL_ELICITATION_REQUIRED,
            McpError::ServerError { code, .. } => *code,
        }
    }

    /// Structured `data` payload for the wire error object, if any
    pub fn wire_data(&self) -> Option<Value> {
        match self {
            McpError::RequestTimeout { timeout } => {
                Some(json!({ "timeout": timeout.as_millis() as u64 }))
            }
            McpError::TransportFailure { error } => Some(json!({ "error": error })),
            McpError::ServerError { data, .. } => data.clone(),
            _ => None,
        }
    }

    /// Encode as a typed wire error object
    pub fn to_error_object(&self) -> ErrorObject {
        ErrorObject {
            code: self.code(),
            message: self.to_string(),
            data: self.wire_data(),
        }
    }

    /// Encode as a wire `error` value for a response body
    pub fn to_wire_value(&self) -> Value {
        // ErrorObject has no map keys that can fail to serialize
        serde_json::to_value(self.to_error_object()).unwrap_or_else(|_| {
            json!({ "code": Self::INTERNAL_ERROR, "message": Self::MSG_INTERNAL_ERROR })
        })
    }

    /// Reconstruct the specific error kind from a wire error object
    pub fn from_error_object(object: ErrorObject) -> Self {
        fn detail(message: String, default: &str) -> Option<String> {
            if message == default {
                None
            } else {
                Some(message)
            }
        }

        let ErrorObject {
            code,
            message,
            data,
        } = object;

        match code {
            Self::PARSE_ERROR => McpError::ParseError {
                detail: detail(message, Self::MSG_PARSE_ERROR),
            },
            Self::INVALID_REQUEST => McpError::InvalidRequest {
                detail: detail(message, Self::MSG_INVALID_REQUEST),
            },
            Self::METHOD_NOT_FOUND => McpError::MethodNotFound {
                detail: detail(message, Self::MSG_METHOD_NOT_FOUND),
            },
            Self::INVALID_PARAMS => McpError::InvalidParams {
                detail: detail(message, Self::MSG_INVALID_PARAMS),
            },
            Self::INTERNAL_ERROR => McpError::InternalError {
                detail: detail(message, Self::MSG_INTERNAL_ERROR),
            },
            Self::CONNECTION_CLOSED => McpError::ConnectionClosed {
                detail: detail(message, Self::MSG_CONNECTION_CLOSED),
            },
            Self::REQUEST_TIMEOUT => {
                let millis = data
                    .as_ref()
                    .and_then(|d| d.get("timeout"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                McpError::RequestTimeout {
                    timeout: Duration::from_millis(millis),
                }
            }
            Self::RESOURCE_NOT_FOUND => McpError::ResourceNotFound {
                detail: detail(message, Self::MSG_RESOURCE_NOT_FOUND),
            },
            Self::TRANSPORT_ERROR => {
                let error = data
                    .as_ref()
                    .and_then(|d| d.get("error"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or(message);
                McpError::TransportFailure { error }
            }
            Self::REQUEST_CANCELLED => McpError::RequestCancelled {
                reason: detail(message, Self::MSG_CANCELLED),
            },
            Self::URL_ELICITATION_REQUIRED => McpError::UrlElicitationRequired {
                detail: detail(message, Self::MSG_URL_ELICITATION),
            },
            other => McpError::ServerError {
                code: other,
                message,
                data,
            },
        }
    }

    /// Decode a wire `error` value from a response body
    ///
    /// # Errors
    ///
    /// Returns [`McpError::InvalidRequest`] if the value is not a valid
    /// error object.
    pub fn from_wire_value(value: Value) -> McpResult<Self> {
        let object: ErrorObject = serde_json::from_value(value)
            .map_err(|e| McpError::invalid_request(format!("malformed error object: {e}")))?;
        Ok(Self::from_error_object(object))
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        McpError::internal_error(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(error: McpError) {
        let wire = error.to_error_object();
        let decoded = McpError::from_error_object(wire);
        assert_eq!(error, decoded);
    }

    #[test]
    fn all_kinds_round_trip() {
        round_trip(McpError::ParseError { detail: None });
        round_trip(McpError::parse_error("unexpected token"));
        round_trip(McpError::InvalidRequest { detail: None });
        round_trip(McpError::invalid_request("no method"));
        round_trip(McpError::MethodNotFound { detail: None });
        round_trip(McpError::method_not_found("tools/call"));
        round_trip(McpError::InvalidParams { detail: None });
        round_trip(McpError::InternalError { detail: None });
        round_trip(McpError::internal_error("boom"));
        round_trip(McpError::connection_closed());
        round_trip(McpError::request_timeout(Duration::from_secs(60)));
        round_trip(McpError::ResourceNotFound { detail: None });
        round_trip(McpError::transport_failure("connection reset"));
        round_trip(McpError::RequestCancelled { reason: None });
        round_trip(McpError::request_cancelled(Some("user".to_string())));
        round_trip(McpError::UrlElicitationRequired { detail: None });
        round_trip(McpError::server_error(-32050, "backend unavailable"));
    }

    #[test]
    fn default_message_decodes_without_detail() {
        let wire = ErrorObject {
            code: McpError::INVALID_REQUEST,
            message: "Invalid Request".to_string(),
            data: None,
        };
        assert_eq!(
            McpError::from_error_object(wire),
            McpError::InvalidRequest { detail: None }
        );
    }

    #[test]
    fn timeout_carries_millis_in_data() {
        let error = McpError::request_timeout(Duration::from_millis(1500));
        let wire = error.to_error_object();
        assert_eq!(wire.code, -32001);
        assert_eq!(wire.data.unwrap()["timeout"], 1500);
    }

    #[test]
    fn transport_error_carries_description_in_data() {
        let error = McpError::transport_failure("broken pipe");
        let wire = error.to_error_object();
        assert_eq!(wire.code, -32003);
        assert_eq!(wire.data.unwrap()["error"], "broken pipe");
        assert_eq!(wire.message, "broken pipe");
    }

    #[test]
    fn unknown_server_code_decodes_as_server_error() {
        let wire = ErrorObject {
            code: -32055,
            message: "custom".to_string(),
            data: Some(json!({"k": 1})),
        };
        let decoded = McpError::from_error_object(wire.clone());
        assert_eq!(decoded.code(), -32055);
        assert_eq!(decoded.to_error_object(), wire);
    }

    #[test]
    fn cancelled_uses_reason_as_message() {
        let error = McpError::request_cancelled(Some("user".to_string()));
        assert_eq!(error.to_string(), "user");
        let error = McpError::RequestCancelled { reason: None };
        assert_eq!(error.to_string(), "cancelled");
    }
}
