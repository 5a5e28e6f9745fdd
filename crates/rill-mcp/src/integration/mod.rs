//! Integration Layer
//!
//! High-level MCP client and server facades over the engine: capability
//! negotiation, typed handler registration, and the elicitation
//! round-trip helpers.

pub mod client;
pub mod server;

// Re-export main types for convenience
pub use client::{
    ElicitationHandler, McpClient, McpClientBuilder, McpClientConfig, ProgressCallback,
};
pub use server::{McpServer, McpServerBuilder, McpServerConfig};
