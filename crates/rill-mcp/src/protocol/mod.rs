//! Protocol Layer
//!
//! JSON-RPC 2.0 message types, the `_meta` codec, the protocol error
//! model, and the typed MCP structures used by the engine and facades.
//!
//! # Architecture
//!
//! - [`message`] - JSON-RPC 2.0 message types and batch body parsing
//! - [`meta`] - `_meta` key grammar, progress tokens, general fields
//! - [`errors`] - error kinds with wire codes and lossless round-trip
//! - [`types`] - handshake, capabilities, progress/cancel, elicitation
//! - [`constants`] - method names, header names, defaults

pub mod constants;
pub mod errors;
pub mod message;
pub mod meta;
pub mod types;

// Re-export commonly used types for convenience
pub use constants::{defaults, headers, methods};
pub use errors::{ErrorObject, McpError, McpResult};
pub use message::{
    JsonRpcMessage, JsonRpcMessageTrait, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    ParsedBody, RequestId,
};
pub use meta::{is_valid_meta_key, GeneralFields, MetaFields, ProgressToken, RequestMeta};
pub use types::{
    negotiate_version, CallToolResult, CancelledParams, ClientCapabilities, ClientInfo, Content,
    ElicitationAction, ElicitationCapabilities, ElicitationRequest, ElicitationResult,
    InitializeRequest, InitializeResponse, LoggingCapabilities, ProgressParams, PromptCapabilities,
    ProtocolVersion, ResourceCapabilities, RootsCapabilities, SamplingCapabilities,
    ServerCapabilities, ServerInfo, ToolCapabilities,
};
