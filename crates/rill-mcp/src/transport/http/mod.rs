//! Streamable HTTP Transport
//!
//! The stateful HTTP server transport (POST + SSE, standalone GET stream,
//! session lifecycle), the matching reconnecting client transport, the
//! validation pipeline run before routing, and the event store backing
//! `Last-Event-ID` resumability.
//!
//! # Architecture
//!
//! - [`config`] - server, client, and reconnection configuration
//! - [`validation`] - ordered Origin/Accept/Content-Type/version/session checks
//! - [`event_store`] - per-stream bounded event rings for replay
//! - [`sse`] - SSE frames and the incremental client decoder
//! - [`server`] - per-session [`StreamableHttpTransport`]
//! - [`host`] - the listener binding and session registry
//! - [`client`] - [`HttpClientTransport`]

pub mod client;
pub mod config;
pub mod event_store;
pub mod host;
pub mod server;
pub mod sse;
pub mod validation;

// Re-export main types for convenience
pub use client::HttpClientTransport;
pub use config::{HttpClientConfig, HttpServerConfig, OriginPolicy, ReconnectPolicy};
pub use event_store::{SseEventStore, StreamKey};
pub use host::{EngineFactory, ServerHandle, StreamableHttpServer};
pub use server::StreamableHttpTransport;
pub use sse::{SseDecoder, SseEvent, SseFrame};
