//! MCP Protocol Constants
//!
//! This module defines constants for MCP protocol method names, headers,
//! and other standardized values to ensure consistency and reduce typos.

/// MCP protocol method names
pub mod methods {
    /// Initialization method
    pub const INITIALIZE: &str = "initialize";
    /// Initialized notification (sent by the client after a successful initialize)
    pub const INITIALIZED: &str = "notifications/initialized";
    /// Cancellation notification (advisory, either direction)
    pub const CANCELLED: &str = "notifications/cancelled";
    /// Progress notification (correlated through a progress token)
    pub const PROGRESS: &str = "notifications/progress";

    /// Tool-related methods
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";

    /// Resource-related methods
    pub const RESOURCES_LIST: &str = "resources/list";
    pub const RESOURCES_READ: &str = "resources/read";

    /// Prompt-related methods
    pub const PROMPTS_LIST: &str = "prompts/list";
    pub const PROMPTS_GET: &str = "prompts/get";

    /// Logging-related methods
    pub const LOGGING_SET_LEVEL: &str = "logging/setLevel";

    /// Server-to-client request for user input
    pub const ELICITATION_CREATE: &str = "elicitation/create";

    /// Connectivity testing method
    pub const PING: &str = "ping";
}

/// HTTP header names used by the streamable HTTP transport
pub mod headers {
    /// Session identifier assigned on initialize and echoed on every request
    pub const MCP_SESSION_ID: &str = "mcp-session-id";

    /// Negotiated protocol version, sent by clients on every HTTP request
    pub const MCP_PROTOCOL_VERSION: &str = "mcp-protocol-version";

    /// Standard SSE resumption header
    pub const LAST_EVENT_ID: &str = "last-event-id";
}

/// Default values for MCP protocol
pub mod defaults {
    use std::time::Duration;

    /// Default per-request timeout
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

    /// Default HTTP session idle timeout
    pub const SESSION_TIMEOUT: Duration = Duration::from_secs(3600);

    /// Default HTTP endpoint path
    pub const ENDPOINT_PATH: &str = "/mcp";

    /// Default retained events per SSE stream
    pub const EVENT_STORE_CAPACITY: usize = 256;

    /// Default maximum pending requests per endpoint
    pub const MAX_PENDING_REQUESTS: usize = 1000;
}
