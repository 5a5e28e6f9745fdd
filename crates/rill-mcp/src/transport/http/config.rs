//! HTTP Transport Configuration
//!
//! Configuration for the streamable HTTP server transport, the session
//! host, and the HTTP client transport, including the SSE reconnection
//! policy.

// Layer 1: Standard library imports
use std::net::SocketAddr;
use std::time::Duration;

// Layer 2: Third-party crate imports
use url::Url;

// Layer 3: Internal module imports
use crate::protocol::{defaults, ProtocolVersion};

/// Origin validation policy for the HTTP server
#[derive(Debug, Clone, Default, PartialEq)]
pub enum OriginPolicy {
    /// Accept any origin (including requests without one)
    Any,
    /// Accept only loopback origins: `http(s)://(localhost|127.0.0.1|[::1])(:port)?`
    #[default]
    LocalhostOnly,
    /// Accept only origins from the whitelist
    Whitelist(Vec<String>),
}

/// Streamable HTTP server configuration
#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    /// Address the session host binds
    pub bind_address: SocketAddr,

    /// Endpoint path serving POST/GET/DELETE
    pub endpoint_path: String,

    /// Idle time after which a session is evicted
    pub session_timeout: Duration,

    /// How often the host sweeps for idle sessions
    pub eviction_interval: Duration,

    /// Origin validation policy
    pub origin_policy: OriginPolicy,

    /// Require SSE-capable Accept headers (`sseRequired` mode)
    pub require_sse_accept: bool,

    /// Optional `retry:` hint emitted when an SSE stream opens
    pub sse_retry_hint: Option<Duration>,

    /// Per-stream SSE channel depth
    pub sse_channel_depth: usize,

    /// Retained events per stream for resumability
    pub event_store_capacity: usize,

    /// How long a POST initialize waits for its buffered response
    pub initialize_timeout: Duration,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            bind_address: ([127, 0, 0, 1], 3000).into(),
            endpoint_path: defaults::ENDPOINT_PATH.to_string(),
            session_timeout: defaults::SESSION_TIMEOUT,
            eviction_interval: Duration::from_secs(60),
            origin_policy: OriginPolicy::default(),
            require_sse_accept: true,
            sse_retry_hint: None,
            sse_channel_depth: 64,
            event_store_capacity: defaults::EVENT_STORE_CAPACITY,
            initialize_timeout: Duration::from_secs(30),
        }
    }
}

impl HttpServerConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind address
    pub fn bind_address(mut self, address: SocketAddr) -> Self {
        self.bind_address = address;
        self
    }

    /// Set the endpoint path
    pub fn endpoint_path(mut self, path: impl Into<String>) -> Self {
        self.endpoint_path = path.into();
        self
    }

    /// Set the session idle timeout
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Set the origin policy
    pub fn origin_policy(mut self, policy: OriginPolicy) -> Self {
        self.origin_policy = policy;
        self
    }

    /// Emit a `retry:` hint when SSE streams open
    pub fn sse_retry_hint(mut self, hint: Duration) -> Self {
        self.sse_retry_hint = Some(hint);
        self
    }
}

/// SSE reconnection policy
///
/// Delay for attempt `n` (1-based) is
/// `min(max_delay, initial_delay * grow_factor^(n-1))`.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnection attempt
    pub initial_delay: Duration,

    /// Upper bound on the computed delay
    pub max_delay: Duration,

    /// Multiplier applied per attempt
    pub grow_factor: f64,

    /// Attempts before the stream is declared failed
    pub max_retries: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            grow_factor: 1.5,
            max_retries: 2,
        }
    }
}

impl ReconnectPolicy {
    /// Backoff delay for the given 1-based attempt number
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.grow_factor.powi(exponent as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

/// HTTP client transport configuration
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Server endpoint URL
    pub endpoint: Url,

    /// Open a standalone GET SSE stream for server-initiated messages
    pub streaming: bool,

    /// SSE reconnection policy
    pub reconnect: ReconnectPolicy,

    /// Per-HTTP-request timeout (connection-level, not JSON-RPC deadline)
    pub request_timeout: Duration,

    /// `Origin` header to present, if any
    pub origin: Option<String>,

    /// Protocol version advertised in `MCP-Protocol-Version`
    pub protocol_version: Option<ProtocolVersion>,
}

impl HttpClientConfig {
    /// Create a configuration for the given endpoint
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            streaming: false,
            reconnect: ReconnectPolicy::default(),
            request_timeout: Duration::from_secs(120),
            origin: None,
            protocol_version: Some(ProtocolVersion::latest()),
        }
    }

    /// Enable the standalone GET SSE stream
    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Override the reconnection policy
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1500));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2250));

        let long = ReconnectPolicy {
            initial_delay: Duration::from_secs(20),
            ..Default::default()
        };
        assert_eq!(long.delay_for(5), Duration::from_secs(30));
    }

    #[test]
    fn server_defaults_match_protocol_defaults() {
        let config = HttpServerConfig::default();
        assert_eq!(config.endpoint_path, "/mcp");
        assert_eq!(config.session_timeout, Duration::from_secs(3600));
        assert!(config.require_sse_accept);
    }
}
