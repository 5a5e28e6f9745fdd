//! HTTP Session Host
//!
//! Binds a listener and demultiplexes requests across sessions by the
//! `Mcp-Session-Id` header. A POST carrying an `initialize` request and
//! no session header creates a fresh session: a new transport plus an
//! engine built by the user-provided factory. A background task evicts
//! sessions idle past the configured timeout.

// Layer 1: Standard library imports
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

// Layer 2: Third-party crate imports
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use axum::Router;
use bytes::Bytes;
use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

// Layer 3: Internal module imports
use super::config::HttpServerConfig;
use super::server::StreamableHttpTransport;
use super::validation::{
    extract_session_id, missing_session_error, unknown_session_error, validate_request,
    RequestKind,
};
use crate::engine::JsonRpcEngine;
use crate::protocol::{methods, JsonRpcResponse, McpError, McpResult};
use crate::transport::TransportError;

/// Builds the per-session engine for a freshly created transport
///
/// The factory typically registers the application's method handlers and
/// starts the engine over the given transport.
pub type EngineFactory =
    Arc<dyn Fn(StreamableHttpTransport) -> BoxFuture<'static, McpResult<JsonRpcEngine>> + Send + Sync>;

/// One live session; `last_access` is mutated in place through the
/// registry's own sharding
struct SessionEntry {
    transport: StreamableHttpTransport,
    engine: JsonRpcEngine,
    last_access: Instant,
}

type SessionRegistry = DashMap<String, SessionEntry>;

/// Refresh a session's last-access time and hand out its transport
fn touch_session(sessions: &SessionRegistry, session_id: &str) -> Option<StreamableHttpTransport> {
    let mut entry = sessions.get_mut(session_id)?;
    entry.last_access = Instant::now();
    Some(entry.transport.clone())
}

#[derive(Clone)]
struct HostState {
    config: Arc<HttpServerConfig>,
    factory: EngineFactory,
    sessions: Arc<SessionRegistry>,
}

/// Streamable HTTP session host
pub struct StreamableHttpServer {
    config: Arc<HttpServerConfig>,
    factory: EngineFactory,
}

impl StreamableHttpServer {
    /// Create a host with the given configuration and engine factory
    pub fn new(config: HttpServerConfig, factory: EngineFactory) -> Self {
        Self {
            config: Arc::new(config),
            factory,
        }
    }

    /// Bind the listener and start serving
    ///
    /// # Errors
    ///
    /// Returns a transport error when the bind fails.
    pub async fn serve(self) -> Result<ServerHandle, TransportError> {
        let listener = TcpListener::bind(self.config.bind_address)
            .await
            .map_err(|e| TransportError::connection(format!("bind failed: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| TransportError::connection(format!("no local address: {e}")))?;

        let sessions: Arc<SessionRegistry> = Arc::new(DashMap::new());
        let state = HostState {
            config: Arc::clone(&self.config),
            factory: Arc::clone(&self.factory),
            sessions: Arc::clone(&sessions),
        };

        let router = Router::new()
            .route(
                &self.config.endpoint_path,
                post(handle_post).get(handle_get).delete(handle_delete),
            )
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state);

        let shutdown = CancellationToken::new();
        let serve_shutdown = shutdown.clone();
        let server_task = tokio::spawn(async move {
            let serve = axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(async move { serve_shutdown.cancelled().await });
            if let Err(error) = serve.await {
                warn!(error = %error, "HTTP server exited with an error");
            }
        });

        let eviction_task = spawn_eviction(
            Arc::clone(&self.config),
            Arc::clone(&sessions),
            shutdown.clone(),
        );

        info!(%local_addr, path = %self.config.endpoint_path, "streamable HTTP server listening");
        Ok(ServerHandle {
            local_addr,
            sessions,
            shutdown,
            server_task,
            eviction_task,
        })
    }
}

/// Handle to a running session host
pub struct ServerHandle {
    local_addr: SocketAddr,
    sessions: Arc<SessionRegistry>,
    shutdown: CancellationToken,
    server_task: JoinHandle<()>,
    eviction_task: JoinHandle<()>,
}

impl ServerHandle {
    /// The bound address (useful with an ephemeral port)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Stop serving: disconnect every session and close the listener
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let keys: Vec<String> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
        for key in keys {
            if let Some((_, entry)) = self.sessions.remove(&key) {
                entry.engine.close().await;
            }
        }
        self.eviction_task.abort();
        let _ = self.server_task.await;
    }
}

fn spawn_eviction(
    config: Arc<HttpServerConfig>,
    sessions: Arc<SessionRegistry>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.eviction_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let stale: Vec<String> = sessions
                .iter()
                .filter(|entry| entry.value().last_access.elapsed() > config.session_timeout)
                .map(|entry| entry.key().clone())
                .collect();
            for session_id in stale {
                if let Some((_, entry)) = sessions.remove(&session_id) {
                    info!(%session_id, "evicting idle session");
                    entry.engine.close().await;
                }
            }
        }
    })
}

async fn handle_post(
    State(state): State<HostState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let kind = RequestKind::Post {
        has_body: !body.is_empty(),
    };
    if let Err(failure) = validate_request(&state.config, kind, &headers) {
        return failure.into_response();
    }

    match extract_session_id(&headers) {
        Some(session_id) => match touch_session(&state.sessions, &session_id) {
            Some(transport) => transport.handle_post(&headers, body).await,
            None => unknown_session_error(&session_id).into_response(),
        },
        None => {
            if !body_is_initialize(&body) {
                return missing_session_error().into_response();
            }
            create_session(&state, &headers, body).await
        }
    }
}

async fn handle_get(State(state): State<HostState>, headers: HeaderMap) -> Response {
    if let Err(failure) = validate_request(&state.config, RequestKind::Get, &headers) {
        return failure.into_response();
    }
    let Some(session_id) = extract_session_id(&headers) else {
        return missing_session_error().into_response();
    };
    let Some(transport) = touch_session(&state.sessions, &session_id) else {
        return unknown_session_error(&session_id).into_response();
    };
    transport.handle_get(&headers).await
}

async fn handle_delete(State(state): State<HostState>, headers: HeaderMap) -> Response {
    if let Err(failure) = validate_request(&state.config, RequestKind::Delete, &headers) {
        return failure.into_response();
    }
    let Some(session_id) = extract_session_id(&headers) else {
        return missing_session_error().into_response();
    };
    let Some((_, entry)) = state.sessions.remove(&session_id) else {
        return unknown_session_error(&session_id).into_response();
    };
    debug!(%session_id, "terminating session on DELETE");
    let response = entry.transport.handle_delete().await;
    entry.engine.close().await;
    response
}

async fn create_session(state: &HostState, headers: &HeaderMap, body: Bytes) -> Response {
    let session_id = Uuid::new_v4().to_string();
    let transport = StreamableHttpTransport::new(&session_id, Arc::clone(&state.config));

    let engine = match (state.factory)(transport.clone()).await {
        Ok(engine) => engine,
        Err(error) => {
            warn!(error = %error, "engine factory failed");
            let error = McpError::internal_error(error.to_string());
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(JsonRpcResponse::from_error(&error, None)),
            )
                .into_response();
        }
    };

    state.sessions.insert(
        session_id.clone(),
        SessionEntry {
            transport: transport.clone(),
            engine,
            last_access: Instant::now(),
        },
    );
    info!(%session_id, "created session");

    transport.handle_post(headers, body).await
}

/// Peek whether a body is a single `initialize` request
fn body_is_initialize(body: &[u8]) -> bool {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) else {
        return false;
    };
    value.get("method").and_then(|m| m.as_str()) == Some(methods::INITIALIZE)
        && value.get("id").is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_body_detection() {
        assert!(body_is_initialize(
            br#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#
        ));
        assert!(!body_is_initialize(
            br#"{"jsonrpc":"2.0","method":"initialize"}"#
        ));
        assert!(!body_is_initialize(br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#));
        assert!(!body_is_initialize(b"not json"));
    }
}
