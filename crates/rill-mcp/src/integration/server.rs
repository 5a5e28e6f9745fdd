//! High-level MCP Server API
//!
//! A server is a method-handler registry plus negotiated identity: it
//! advertises capabilities during the handshake, gates dispatch on them,
//! and can drive elicitation round-trips back to the client. One
//! `McpServer` serves any number of sessions; per-session state lives in
//! the engine each session gets.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

// Layer 3: Internal module imports
use crate::engine::{
    EngineConfig, IncomingRequest, JsonRpcEngine, Peer, RequestHandler,
};
use crate::protocol::{
    methods, negotiate_version, ElicitationRequest, ElicitationResult, InitializeRequest,
    InitializeResponse, McpError, McpResult, ServerCapabilities, ServerInfo,
};
use crate::transport::http::{HttpServerConfig, ServerHandle, StreamableHttpServer};
use crate::transport::{Transport, TransportError};

/// Server identity and negotiation configuration
#[derive(Debug, Clone)]
pub struct McpServerConfig {
    /// Identification returned from initialize
    pub server_info: ServerInfo,
    /// Capabilities advertised to clients
    pub capabilities: ServerCapabilities,
    /// Optional usage instructions for the client's model
    pub instructions: Option<String>,
}

struct ServerCore {
    config: McpServerConfig,
    handlers: HashMap<String, Arc<dyn RequestHandler>>,
}

/// Builder for [`McpServer`]
pub struct McpServerBuilder {
    config: McpServerConfig,
    handlers: HashMap<String, Arc<dyn RequestHandler>>,
}

impl Default for McpServerBuilder {
    fn default() -> Self {
        Self {
            config: McpServerConfig {
                server_info: ServerInfo {
                    name: "rill-mcp-server".to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                },
                capabilities: ServerCapabilities::default(),
                instructions: None,
            },
            handlers: HashMap::new(),
        }
    }
}

impl McpServerBuilder {
    /// Create a builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server identification
    pub fn server_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.config.server_info = ServerInfo {
            name: name.into(),
            version: version.into(),
        };
        self
    }

    /// Set the advertised capabilities
    pub fn capabilities(mut self, capabilities: ServerCapabilities) -> Self {
        self.config.capabilities = capabilities;
        self
    }

    /// Set the instructions returned from initialize
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.config.instructions = Some(instructions.into());
        self
    }

    /// Register a handler for a method
    ///
    /// Dispatch is capability-gated: a registered method whose capability
    /// family is not advertised still answers MethodNotFound.
    pub fn with_method_handler(
        mut self,
        method: impl Into<String>,
        handler: Arc<dyn RequestHandler>,
    ) -> Self {
        self.handlers.insert(method.into(), handler);
        self
    }

    /// Build the server
    pub fn build(self) -> McpServer {
        McpServer {
            core: Arc::new(ServerCore {
                config: self.config,
                handlers: self.handlers,
            }),
        }
    }
}

/// High-level MCP server
#[derive(Clone)]
pub struct McpServer {
    core: Arc<ServerCore>,
}

impl McpServer {
    /// Start building a server
    pub fn builder() -> McpServerBuilder {
        McpServerBuilder::new()
    }

    /// The advertised capabilities
    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.core.config.capabilities
    }

    /// Wire this server to a transport, producing a session engine
    ///
    /// Registers the initialize handler plus every configured method
    /// handler (capability-gated) and starts the engine.
    pub async fn connect<T>(&self, transport: T) -> McpResult<JsonRpcEngine>
    where
        T: Transport + 'static,
    {
        let engine = JsonRpcEngine::start(transport, EngineConfig::server()).await?;

        engine
            .register_handler(
                methods::INITIALIZE,
                Arc::new(InitializeHandler {
                    core: Arc::clone(&self.core),
                }),
            )
            .await;

        for (method, handler) in &self.core.handlers {
            engine
                .register_handler(
                    method.clone(),
                    Arc::new(GatedHandler {
                        core: Arc::clone(&self.core),
                        inner: Arc::clone(handler),
                    }),
                )
                .await;
        }

        Ok(engine)
    }

    /// Serve this server over streamable HTTP
    ///
    /// # Errors
    ///
    /// Returns a transport error when the listener cannot bind.
    pub async fn serve_http(&self, config: HttpServerConfig) -> Result<ServerHandle, TransportError> {
        let server = self.clone();
        let factory: crate::transport::http::EngineFactory = Arc::new(move |transport| {
            let server = server.clone();
            Box::pin(async move { server.connect(transport).await })
        });
        StreamableHttpServer::new(config, factory).serve().await
    }

    /// Run an elicitation round-trip against the requesting client
    ///
    /// Sent through the peer handle of the request being handled so the
    /// round-trip rides that request's stream.
    pub async fn elicit(peer: &Peer, request: ElicitationRequest) -> McpResult<ElicitationResult> {
        let value = peer
            .call(
                methods::ELICITATION_CREATE,
                Some(serde_json::to_value(request)?),
            )
            .await?;
        serde_json::from_value(value)
            .map_err(|e| McpError::invalid_params(format!("malformed elicitation result: {e}")))
    }
}

/// Answers `initialize` with negotiated version and advertised capabilities
struct InitializeHandler {
    core: Arc<ServerCore>,
}

#[async_trait]
impl RequestHandler for InitializeHandler {
    async fn handle(&self, request: IncomingRequest) -> McpResult<Value> {
        let params: InitializeRequest = request.params_as()?;
        let negotiated = negotiate_version(&params.protocol_version);
        debug!(
            client = %params.client_info.name,
            requested = %params.protocol_version,
            negotiated = %negotiated,
            "initialize handshake"
        );

        let response = InitializeResponse {
            protocol_version: negotiated,
            capabilities: self.core.config.capabilities.clone(),
            server_info: self.core.config.server_info.clone(),
            instructions: self.core.config.instructions.clone(),
        };
        Ok(serde_json::to_value(response)?)
    }
}

/// Wraps a user handler with the capability gate
struct GatedHandler {
    core: Arc<ServerCore>,
    inner: Arc<dyn RequestHandler>,
}

#[async_trait]
impl RequestHandler for GatedHandler {
    async fn handle(&self, request: IncomingRequest) -> McpResult<Value> {
        if !self.core.config.capabilities.admits_method(&request.method) {
            return Err(McpError::method_not_found(&request.method));
        }
        self.inner.handle(request).await
    }
}
