//! HTTP Validation Pipeline
//!
//! Ordered validators run before routing: Origin, Accept, Content-Type,
//! protocol version, then session. The order is fixed because later
//! validators assume earlier predicates. Each failure maps to an HTTP
//! status with a JSON-RPC shaped error body.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use url::Url;

// Layer 3: Internal module imports
use super::config::{HttpServerConfig, OriginPolicy};
use crate::protocol::{headers as mcp_headers, JsonRpcResponse, McpError, ProtocolVersion};

/// The request shape being validated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// POST with or without a JSON body
    Post { has_body: bool },
    /// Standalone SSE subscription
    Get,
    /// Session termination
    Delete,
}

/// A validation failure with its HTTP status
#[derive(Debug)]
pub struct ValidationError {
    /// HTTP status the failure maps to
    pub status: StatusCode,
    /// JSON-RPC shaped error for the body
    pub error: McpError,
}

impl ValidationError {
    fn new(status: StatusCode, error: McpError) -> Self {
        Self { status, error }
    }
}

impl IntoResponse for ValidationError {
    fn into_response(self) -> Response {
        let body = JsonRpcResponse::from_error(&self.error, None);
        (self.status, Json(body)).into_response()
    }
}

/// Run the fixed validator sequence for a request
///
/// Session presence/lookup is validated by the host after this pipeline
/// because it needs the registry and, for POST, a body peek.
pub fn validate_request(
    config: &HttpServerConfig,
    kind: RequestKind,
    headers: &HeaderMap,
) -> Result<(), ValidationError> {
    validate_origin(&config.origin_policy, headers)?;
    if config.require_sse_accept {
        validate_accept(kind, headers)?;
    }
    validate_content_type(kind, headers)?;
    validate_protocol_version(headers)?;
    Ok(())
}

/// Origin whitelist / loopback check
pub fn validate_origin(policy: &OriginPolicy, headers: &HeaderMap) -> Result<(), ValidationError> {
    let Some(origin) = header_str(headers, header::ORIGIN.as_str()) else {
        // Non-browser clients send no Origin; nothing to check.
        return Ok(());
    };

    let allowed = match policy {
        OriginPolicy::Any => true,
        OriginPolicy::Whitelist(list) => list.iter().any(|allowed| allowed == origin),
        OriginPolicy::LocalhostOnly => is_loopback_origin(origin),
    };

    if allowed {
        Ok(())
    } else {
        Err(ValidationError::new(
            StatusCode::BAD_REQUEST,
            McpError::invalid_request(format!("origin not allowed: {origin}")),
        ))
    }
}

/// Accept header check (`sseRequired` mode)
///
/// POST with a body must accept both `application/json` and
/// `text/event-stream`; GET must accept `text/event-stream`.
pub fn validate_accept(kind: RequestKind, headers: &HeaderMap) -> Result<(), ValidationError> {
    let accept = header_str(headers, header::ACCEPT.as_str()).unwrap_or("");
    let ok = match kind {
        RequestKind::Post { has_body: true } => {
            accepts(accept, "application/json") && accepts(accept, "text/event-stream")
        }
        RequestKind::Get => accepts(accept, "text/event-stream"),
        RequestKind::Post { has_body: false } | RequestKind::Delete => true,
    };

    if ok {
        Ok(())
    } else {
        Err(ValidationError::new(
            StatusCode::NOT_ACCEPTABLE,
            McpError::invalid_request(format!("unacceptable Accept header: {accept:?}")),
        ))
    }
}

/// Content-Type check: a POST body must be `application/json`
pub fn validate_content_type(kind: RequestKind, headers: &HeaderMap) -> Result<(), ValidationError> {
    if !matches!(kind, RequestKind::Post { has_body: true }) {
        return Ok(());
    }
    let content_type = header_str(headers, header::CONTENT_TYPE.as_str()).unwrap_or("");
    let media_type = content_type.split(';').next().unwrap_or("").trim();

    if media_type.eq_ignore_ascii_case("application/json") {
        Ok(())
    } else {
        Err(ValidationError::new(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            McpError::invalid_request(format!("unsupported Content-Type: {content_type:?}")),
        ))
    }
}

/// Protocol version header check
///
/// An absent header assumes the server default; a present header must
/// name a supported version.
pub fn validate_protocol_version(headers: &HeaderMap) -> Result<(), ValidationError> {
    let Some(version) = header_str(headers, mcp_headers::MCP_PROTOCOL_VERSION) else {
        return Ok(());
    };

    let supported = ProtocolVersion::new(version)
        .map(|v| v.is_supported())
        .unwrap_or(false);
    if supported {
        Ok(())
    } else {
        Err(ValidationError::new(
            StatusCode::BAD_REQUEST,
            McpError::invalid_request(format!("unsupported protocol version: {version}")),
        ))
    }
}

/// Extract the session header, if present
pub fn extract_session_id(headers: &HeaderMap) -> Option<String> {
    header_str(headers, mcp_headers::MCP_SESSION_ID).map(str::to_string)
}

/// Extract the `Last-Event-ID` header, if present
pub fn extract_last_event_id(headers: &HeaderMap) -> Option<String> {
    header_str(headers, mcp_headers::LAST_EVENT_ID).map(str::to_string)
}

/// Missing session header on a request that requires one
pub fn missing_session_error() -> ValidationError {
    ValidationError::new(
        StatusCode::BAD_REQUEST,
        McpError::invalid_request("missing Mcp-Session-Id header"),
    )
}

/// Session header names a session the host does not know
pub fn unknown_session_error(session_id: &str) -> ValidationError {
    ValidationError::new(
        StatusCode::NOT_FOUND,
        McpError::invalid_request(format!("unknown session: {session_id}")),
    )
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Whether an Accept header admits the given media type
fn accepts(accept: &str, media_type: &str) -> bool {
    accept.split(',').any(|range| {
        let range = range.split(';').next().unwrap_or("").trim();
        if range == "*/*" || range.eq_ignore_ascii_case(media_type) {
            return true;
        }
        match (range.split_once('/'), media_type.split_once('/')) {
            (Some((range_type, "*")), Some((media, _))) => range_type.eq_ignore_ascii_case(media),
            _ => false,
        }
    })
}

fn is_loopback_origin(origin: &str) -> bool {
    let Ok(url) = Url::parse(origin) else {
        return false;
    };
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "[::1]" | "::1"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::try_from(*name).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn loopback_origins_pass_localhost_policy() {
        let policy = OriginPolicy::LocalhostOnly;
        for origin in [
            "http://localhost",
            "http://localhost:3000",
            "https://127.0.0.1:8443",
            "http://[::1]:8080",
        ] {
            let h = headers(&[("origin", origin)]);
            assert!(validate_origin(&policy, &h).is_ok(), "origin {origin}");
        }

        let h = headers(&[("origin", "https://evil.example.com")]);
        let err = validate_origin(&policy, &h).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn absent_origin_passes() {
        assert!(validate_origin(&OriginPolicy::LocalhostOnly, &HeaderMap::new()).is_ok());
    }

    #[test]
    fn post_requires_dual_accept() {
        let kind = RequestKind::Post { has_body: true };

        let h = headers(&[("accept", "application/json, text/event-stream")]);
        assert!(validate_accept(kind, &h).is_ok());

        let h = headers(&[("accept", "application/json")]);
        assert_eq!(
            validate_accept(kind, &h).unwrap_err().status,
            StatusCode::NOT_ACCEPTABLE
        );

        let h = headers(&[("accept", "*/*")]);
        assert!(validate_accept(kind, &h).is_ok());
    }

    #[test]
    fn get_requires_event_stream_accept() {
        let h = headers(&[("accept", "text/event-stream")]);
        assert!(validate_accept(RequestKind::Get, &h).is_ok());

        let h = headers(&[("accept", "application/json")]);
        assert_eq!(
            validate_accept(RequestKind::Get, &h).unwrap_err().status,
            StatusCode::NOT_ACCEPTABLE
        );
    }

    #[test]
    fn content_type_allows_parameters() {
        let kind = RequestKind::Post { has_body: true };

        let h = headers(&[("content-type", "application/json; charset=utf-8")]);
        assert!(validate_content_type(kind, &h).is_ok());

        let h = headers(&[("content-type", "text/plain")]);
        assert_eq!(
            validate_content_type(kind, &h).unwrap_err().status,
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
    }

    #[test]
    fn protocol_version_header_is_optional_but_checked() {
        assert!(validate_protocol_version(&HeaderMap::new()).is_ok());

        let h = headers(&[("mcp-protocol-version", "2025-03-26")]);
        assert!(validate_protocol_version(&h).is_ok());

        let h = headers(&[("mcp-protocol-version", "1999-01-01")]);
        assert_eq!(
            validate_protocol_version(&h).unwrap_err().status,
            StatusCode::BAD_REQUEST
        );
    }
}
