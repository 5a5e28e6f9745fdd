//! High-level MCP Client API
//!
//! A type-safe client over the engine: it drives the initialization
//! handshake, tracks the server's negotiated capabilities, and offers
//! typed conveniences for the common calls. Server-initiated elicitation
//! requests are answered by a registered [`ElicitationHandler`].

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::debug;

// Layer 3: Internal module imports
use crate::engine::{
    EngineConfig, IncomingRequest, JsonRpcEngine, NotificationHandler, RequestHandler,
};
use crate::protocol::{
    defaults, methods, CallToolResult, ClientCapabilities, ClientInfo, ElicitationRequest,
    ElicitationResult, InitializeRequest, InitializeResponse, JsonRpcNotification, McpError,
    McpResult, ProgressParams, ProtocolVersion, RequestId,
};
use crate::transport::{MessageContext, Transport};

/// Handler for server-initiated elicitation round-trips
#[async_trait]
pub trait ElicitationHandler: Send + Sync {
    /// Answer one elicitation request with accept/decline/cancel
    async fn handle(&self, request: ElicitationRequest) -> McpResult<ElicitationResult>;
}

/// Callback invoked for `notifications/progress`
pub type ProgressCallback = Arc<dyn Fn(ProgressParams) + Send + Sync>;

/// Client configuration
#[derive(Debug, Clone)]
pub struct McpClientConfig {
    /// Identification sent in initialize
    pub client_info: ClientInfo,
    /// Capabilities advertised to the server
    pub capabilities: ClientCapabilities,
    /// Protocol version proposed in initialize
    pub protocol_version: ProtocolVersion,
    /// Deadline applied to requests without an explicit timeout
    pub default_timeout: Duration,
}

impl Default for McpClientConfig {
    fn default() -> Self {
        Self {
            client_info: ClientInfo {
                name: "rill-mcp-client".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            capabilities: ClientCapabilities::default(),
            protocol_version: ProtocolVersion::latest(),
            default_timeout: defaults::REQUEST_TIMEOUT,
        }
    }
}

/// Builder for [`McpClient`]
#[derive(Default)]
pub struct McpClientBuilder {
    config: McpClientConfig,
    elicitation_handler: Option<Arc<dyn ElicitationHandler>>,
    progress_callback: Option<ProgressCallback>,
}

impl McpClientBuilder {
    /// Create a builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the client identification
    pub fn client_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.config.client_info = ClientInfo {
            name: name.into(),
            version: version.into(),
        };
        self
    }

    /// Set the advertised capabilities
    pub fn capabilities(mut self, capabilities: ClientCapabilities) -> Self {
        self.config.capabilities = capabilities;
        self
    }

    /// Set the proposed protocol version
    pub fn protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.config.protocol_version = version;
        self
    }

    /// Set the default per-request deadline
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = timeout;
        self
    }

    /// Answer server-initiated elicitation with this handler
    pub fn with_elicitation_handler(mut self, handler: Arc<dyn ElicitationHandler>) -> Self {
        self.elicitation_handler = Some(handler);
        self
    }

    /// Observe progress notifications
    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Start the engine over the transport and build the client
    ///
    /// The handshake is not performed here; call
    /// [`McpClient::initialize`] next.
    pub async fn connect<T>(self, transport: T) -> McpResult<McpClient>
    where
        T: Transport + 'static,
    {
        let engine_config =
            EngineConfig::client().with_default_timeout(self.config.default_timeout);
        let engine = JsonRpcEngine::start(transport, engine_config).await?;

        if let Some(handler) = self.elicitation_handler {
            engine
                .register_handler(
                    methods::ELICITATION_CREATE,
                    Arc::new(ElicitationRequestHandler { inner: handler }),
                )
                .await;
        }
        if let Some(callback) = self.progress_callback {
            engine
                .register_notification_handler(
                    methods::PROGRESS,
                    Arc::new(ProgressNotificationHandler { callback }),
                )
                .await;
        }

        Ok(McpClient {
            engine,
            config: self.config,
            server: RwLock::new(None),
        })
    }
}

/// High-level MCP client
pub struct McpClient {
    engine: JsonRpcEngine,
    config: McpClientConfig,
    server: RwLock<Option<InitializeResponse>>,
}

impl McpClient {
    /// Start building a client
    pub fn builder() -> McpClientBuilder {
        McpClientBuilder::new()
    }

    /// Perform the initialization handshake
    ///
    /// Sends `initialize`, records the server's answer, and confirms with
    /// `notifications/initialized`.
    pub async fn initialize(&self) -> McpResult<InitializeResponse> {
        let params = InitializeRequest {
            protocol_version: self.config.protocol_version.clone(),
            capabilities: self.config.capabilities.clone(),
            client_info: self.config.client_info.clone(),
        };
        let value = self
            .engine
            .call(methods::INITIALIZE, Some(serde_json::to_value(params)?))
            .await?;
        let response: InitializeResponse = serde_json::from_value(value)
            .map_err(|e| McpError::invalid_params(format!("malformed initialize result: {e}")))?;

        self.engine.notify(methods::INITIALIZED, None).await?;
        self.engine.mark_ready();
        debug!(
            server = %response.server_info.name,
            version = %response.protocol_version,
            "handshake complete"
        );

        *self.server.write().await = Some(response.clone());
        Ok(response)
    }

    /// The server's initialize answer, once the handshake completed
    pub async fn server(&self) -> Option<InitializeResponse> {
        self.server.read().await.clone()
    }

    /// Send a request and await its result
    ///
    /// Requests that target a capability the server did not advertise are
    /// answered locally with MethodNotFound, matching what the server
    /// would reply.
    pub async fn call(&self, method: impl Into<String>, params: Option<Value>) -> McpResult<Value> {
        let method = method.into();
        self.ensure_allowed(&method).await?;
        self.engine.call(method, params).await
    }

    /// Send a request with an explicit deadline
    pub async fn call_with_timeout(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        timeout: Duration,
    ) -> McpResult<Value> {
        let method = method.into();
        self.ensure_allowed(&method).await?;
        self.engine.call_with_timeout(method, params, timeout).await
    }

    /// Call a tool by name
    pub async fn call_tool(&self, name: impl Into<String>, arguments: Value) -> McpResult<CallToolResult> {
        let value = self
            .call(
                methods::TOOLS_CALL,
                Some(json!({ "name": name.into(), "arguments": arguments })),
            )
            .await?;
        serde_json::from_value(value)
            .map_err(|e| McpError::invalid_params(format!("malformed tool result: {e}")))
    }

    /// Send a fire-and-forget notification
    pub async fn notify(&self, method: impl Into<String>, params: Option<Value>) -> McpResult<()> {
        self.engine.notify(method, params).await
    }

    /// Cancel an in-flight request
    pub async fn cancel(&self, id: &RequestId, reason: Option<String>) -> McpResult<()> {
        self.engine.cancel(id, reason).await
    }

    /// The underlying engine, for advanced use
    pub fn engine(&self) -> &JsonRpcEngine {
        &self.engine
    }

    /// Shut the client down
    pub async fn close(&self) {
        self.engine.close().await;
    }

    async fn ensure_allowed(&self, method: &str) -> McpResult<()> {
        let server = self.server.read().await;
        let Some(server) = server.as_ref() else {
            return Err(McpError::invalid_request("client not initialized"));
        };
        if server.capabilities.admits_method(method) {
            Ok(())
        } else {
            Err(McpError::method_not_found(method))
        }
    }
}

/// Adapts an [`ElicitationHandler`] to the engine handler interface
struct ElicitationRequestHandler {
    inner: Arc<dyn ElicitationHandler>,
}

#[async_trait]
impl RequestHandler for ElicitationRequestHandler {
    async fn handle(&self, request: IncomingRequest) -> McpResult<Value> {
        let elicitation: ElicitationRequest = request.params_as()?;
        let result = self.inner.handle(elicitation).await?;
        Ok(serde_json::to_value(result)?)
    }
}

/// Routes progress notifications to the configured callback
struct ProgressNotificationHandler {
    callback: ProgressCallback,
}

#[async_trait]
impl NotificationHandler for ProgressNotificationHandler {
    async fn handle(&self, notification: JsonRpcNotification, _context: MessageContext) {
        let Some(params) = notification
            .params
            .and_then(|p| serde_json::from_value::<ProgressParams>(p).ok())
        else {
            debug!("dropping malformed progress notification");
            return;
        };
        (self.callback)(params);
    }
}
