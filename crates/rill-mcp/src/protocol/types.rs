//! MCP Protocol Types
//!
//! Typed structures for the initialization handshake, capability
//! negotiation, progress and cancellation notifications, and elicitation
//! round-trips. The full MCP method catalog is a registration surface, so
//! only the shapes the engine itself needs are typed here; everything else
//! flows through `serde_json::Value`.

// Layer 1: Standard library imports
use std::fmt;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};
use serde_json::Value;

// Layer 3: Internal module imports
use super::errors::{McpError, McpResult};
use super::meta::ProgressToken;
use super::message::RequestId;

/// Protocol version in `YYYY-MM-DD` format with validation
///
/// # Examples
///
/// ```rust
/// use rill_mcp::protocol::ProtocolVersion;
///
/// let version = ProtocolVersion::latest();
/// assert_eq!(version.as_str(), "2025-03-26");
///
/// let version = ProtocolVersion::new("2024-11-05")?;
/// assert_eq!(version.as_str(), "2024-11-05");
///
/// assert!(ProtocolVersion::new("not-a-date").is_err());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ProtocolVersion(String);

impl ProtocolVersion {
    /// Latest protocol version this engine speaks
    pub const LATEST: &'static str = "2025-03-26";

    /// All versions this engine accepts, newest first
    pub const SUPPORTED: &'static [&'static str] = &["2025-03-26", "2024-11-05"];

    /// Create a new protocol version with validation
    ///
    /// # Errors
    ///
    /// Returns [`McpError::InvalidParams`] if the version format is not
    /// `YYYY-MM-DD`.
    pub fn new(version: impl Into<String>) -> McpResult<Self> {
        let version = version.into();
        if Self::is_valid_format(&version) {
            Ok(Self(version))
        } else {
            Err(McpError::invalid_params(format!(
                "invalid protocol version: {version}"
            )))
        }
    }

    /// The latest protocol version; guaranteed valid
    pub fn latest() -> Self {
        Self(Self::LATEST.to_string())
    }

    /// Get the version string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this engine accepts the given version
    pub fn is_supported(&self) -> bool {
        Self::SUPPORTED.contains(&self.0.as_str())
    }

    fn is_valid_format(version: &str) -> bool {
        if version.len() != 10 {
            return false;
        }
        let bytes = version.as_bytes();
        bytes[4] == b'-'
            && bytes[7] == b'-'
            && bytes[0..4].iter().all(u8::is_ascii_digit)
            && bytes[5..7].iter().all(u8::is_ascii_digit)
            && bytes[8..10].iter().all(u8::is_ascii_digit)
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::latest()
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client identification exchanged during initialize
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Server identification exchanged during initialize
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// Client capabilities advertised during initialize
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ClientCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<SamplingCapabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<RootsCapabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elicitation: Option<ElicitationCapabilities>,
}

/// Server capabilities advertised during initialize
///
/// The negotiated set constrains what the peer may call: requests that
/// target an unadvertised capability are answered with MethodNotFound.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingCapabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptCapabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceCapabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolCapabilities>,
}

impl ServerCapabilities {
    /// Whether the negotiated set admits the given method
    ///
    /// Methods outside the cataloged capability families (custom methods,
    /// `ping`, the lifecycle methods) are always admitted; dispatch decides
    /// whether a handler exists.
    pub fn admits_method(&self, method: &str) -> bool {
        match method.split('/').next() {
            Some("tools") => self.tools.is_some(),
            Some("resources") => self.resources.is_some(),
            Some("prompts") => self.prompts.is_some(),
            Some("logging") => self.logging.is_some(),
            _ => true,
        }
    }
}

/// Sampling capabilities
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SamplingCapabilities {}

/// Roots capabilities
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RootsCapabilities {
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Elicitation capabilities (client-side)
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ElicitationCapabilities {}

/// Logging capabilities
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LoggingCapabilities {}

/// Prompt capabilities
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PromptCapabilities {
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Resource capabilities
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ResourceCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<bool>,
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Tool capabilities
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ToolCapabilities {
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Initialize request parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InitializeRequest {
    /// Protocol version proposed by the client; absent defaults to latest
    #[serde(rename = "protocolVersion", default)]
    pub protocol_version: ProtocolVersion,
    /// Capabilities advertised by the client
    #[serde(default)]
    pub capabilities: ClientCapabilities,
    /// Client identification
    #[serde(rename = "clientInfo")]
    pub client_info: ClientInfo,
}

/// Initialize response payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InitializeResponse {
    /// Protocol version the server settled on
    #[serde(rename = "protocolVersion")]
    pub protocol_version: ProtocolVersion,
    /// Capabilities advertised by the server
    pub capabilities: ServerCapabilities,
    /// Server identification
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
    /// Optional usage instructions for the client's model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Parameters of `notifications/cancelled`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CancelledParams {
    /// The id of the request being cancelled
    #[serde(rename = "requestId")]
    pub request_id: RequestId,
    /// Optional human-readable reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Parameters of `notifications/progress`
///
/// `progress` values are monotonically non-decreasing per token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressParams {
    /// Token declared by the original request in `_meta.progressToken`
    #[serde(rename = "progressToken")]
    pub progress_token: ProgressToken,
    /// Work completed so far
    pub progress: f64,
    /// Total expected work, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    /// Optional status message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The three possible outcomes of an elicitation round-trip
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ElicitationAction {
    /// The user supplied the requested input
    Accept,
    /// The user explicitly declined
    Decline,
    /// The user dismissed the prompt
    Cancel,
}

/// Server-to-client request for user input (`elicitation/create`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElicitationRequest {
    /// Message shown to the user
    pub message: String,
    /// JSON schema describing the requested input shape
    #[serde(rename = "requestedSchema", skip_serializing_if = "Option::is_none")]
    pub requested_schema: Option<Value>,
}

/// Result of an elicitation round-trip
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElicitationResult {
    /// What the user chose to do
    pub action: ElicitationAction,
    /// The supplied input when `action` is accept
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}

/// Content block inside a tool result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    /// Plain text content
    Text { text: String },
}

impl Content {
    /// Create a text content block
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }
}

/// Result payload of `tools/call`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallToolResult {
    /// Result content blocks
    pub content: Vec<Content>,
    /// Whether the tool reported a domain-level failure
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl CallToolResult {
    /// Successful result with a single text block
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: false,
        }
    }
}

/// Negotiate the protocol version for an initialize exchange
///
/// The server answers with the client's version when it supports it and
/// with its own latest otherwise, per the MCP version negotiation rules.
pub fn negotiate_version(requested: &ProtocolVersion) -> ProtocolVersion {
    if requested.is_supported() {
        requested.clone()
    } else {
        ProtocolVersion::latest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn version_format_validation() {
        assert!(ProtocolVersion::new("2025-03-26").is_ok());
        assert!(ProtocolVersion::new("2025-3-26").is_err());
        assert!(ProtocolVersion::new("20250326").is_err());
        assert!(ProtocolVersion::new("").is_err());
    }

    #[test]
    fn initialize_request_defaults_version() {
        let params = json!({
            "capabilities": {},
            "clientInfo": {"name": "c", "version": "1"}
        });
        let request: InitializeRequest = serde_json::from_value(params).unwrap();
        assert_eq!(request.protocol_version.as_str(), ProtocolVersion::LATEST);
    }

    #[test]
    fn initialize_round_trip() {
        let response = InitializeResponse {
            protocol_version: ProtocolVersion::latest(),
            capabilities: ServerCapabilities {
                tools: Some(ToolCapabilities::default()),
                ..Default::default()
            },
            server_info: ServerInfo {
                name: "s".to_string(),
                version: "1".to_string(),
            },
            instructions: None,
        };
        let wire = serde_json::to_value(&response).unwrap();
        assert!(wire.get("instructions").is_none());
        let decoded: InitializeResponse = serde_json::from_value(wire).unwrap();
        assert_eq!(response, decoded);
    }

    #[test]
    fn capability_gating_by_prefix() {
        let capabilities = ServerCapabilities {
            tools: Some(ToolCapabilities::default()),
            ..Default::default()
        };
        assert!(capabilities.admits_method("tools/call"));
        assert!(capabilities.admits_method("tools/list"));
        assert!(!capabilities.admits_method("resources/read"));
        assert!(!capabilities.admits_method("prompts/get"));
        assert!(capabilities.admits_method("ping"));
        assert!(capabilities.admits_method("custom/anything"));
    }

    #[test]
    fn version_negotiation() {
        let supported = ProtocolVersion::new("2024-11-05").unwrap();
        assert_eq!(negotiate_version(&supported), supported);

        let unsupported = ProtocolVersion::new("2001-01-01").unwrap();
        assert_eq!(negotiate_version(&unsupported), ProtocolVersion::latest());
    }

    #[test]
    fn elicitation_action_wire_format() {
        assert_eq!(
            serde_json::to_value(ElicitationAction::Accept).unwrap(),
            json!("accept")
        );
        let result: ElicitationResult =
            serde_json::from_value(json!({"action": "decline"})).unwrap();
        assert_eq!(result.action, ElicitationAction::Decline);
        assert!(result.content.is_none());
    }

    #[test]
    fn call_tool_result_wire_shape() {
        let result = CallToolResult::text("5");
        let wire = serde_json::to_value(&result).unwrap();
        assert_eq!(
            wire,
            json!({"content": [{"type": "text", "text": "5"}], "isError": false})
        );
    }
}
