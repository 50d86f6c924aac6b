// Domain error types - every failure maps to a JSON-RPC error the caller can read

use thiserror::Error;

/// JSON-RPC code for a malformed inbound envelope
pub const CODE_INVALID_REQUEST: i32 = -32600;

/// JSON-RPC code for an upstream body the proxy could not decode
pub const CODE_INTERNAL_ERROR: i32 = -32603;

/// Proxy-defined code: the upstream could not be reached (or the handshake failed)
pub const CODE_UPSTREAM_UNREACHABLE: i32 = -32001;

/// Proxy-defined code: the upstream rejected the session after the renewal retry
pub const CODE_SESSION_INVALID: i32 = -32002;

/// Proxy-defined code: the upstream call exceeded its timeout
pub const CODE_TIMEOUT: i32 = -32003;

/// Main error type for the proxy
///
/// `Clone` is required because a single handshake result is shared by every
/// caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProxyError {
    /// Malformed inbound envelope (HTTP 400)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Network failure or failed handshake (HTTP 503)
    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    /// Upstream rejected the credentials twice for one request (HTTP 502)
    #[error("Upstream rejected the session after renewal")]
    SessionInvalid,

    /// Upstream call exceeded the configured timeout (HTTP 504)
    #[error("Upstream request timed out after {0}s")]
    Timeout(u64),

    /// Upstream answered with a body the proxy could not decode (HTTP 502)
    #[error("Invalid upstream response: {0}")]
    InvalidResponse(String),

    /// Configuration error (startup only)
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl ProxyError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            ProxyError::InvalidRequest(_) => 400,
            ProxyError::UpstreamUnreachable(_) => 503,
            ProxyError::SessionInvalid => 502,
            ProxyError::Timeout(_) => 504,
            ProxyError::InvalidResponse(_) => 502,
            ProxyError::ConfigurationError(_) => 500,
        }
    }

    /// Get the JSON-RPC error code reported to the caller
    pub fn jsonrpc_code(&self) -> i32 {
        match self {
            ProxyError::InvalidRequest(_) => CODE_INVALID_REQUEST,
            ProxyError::UpstreamUnreachable(_) => CODE_UPSTREAM_UNREACHABLE,
            ProxyError::SessionInvalid => CODE_SESSION_INVALID,
            ProxyError::Timeout(_) => CODE_TIMEOUT,
            ProxyError::InvalidResponse(_) => CODE_INTERNAL_ERROR,
            ProxyError::ConfigurationError(_) => CODE_INTERNAL_ERROR,
        }
    }

    /// Get user-friendly error message (no upstream internals)
    pub fn user_message(&self) -> String {
        match self {
            ProxyError::InvalidRequest(reason) => format!("Invalid request: {}", reason),
            ProxyError::UpstreamUnreachable(_) => "Proxy error: upstream unreachable".to_string(),
            ProxyError::SessionInvalid => "Proxy error: upstream session rejected".to_string(),
            ProxyError::Timeout(_) => "Proxy error: upstream request timeout".to_string(),
            ProxyError::InvalidResponse(_) => "Proxy error: invalid upstream response".to_string(),
            ProxyError::ConfigurationError(_) => "Internal error".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ProxyError::InvalidRequest("x".to_string()).status_code(), 400);
        assert_eq!(ProxyError::UpstreamUnreachable("x".to_string()).status_code(), 503);
        assert_eq!(ProxyError::SessionInvalid.status_code(), 502);
        assert_eq!(ProxyError::Timeout(5).status_code(), 504);
    }

    #[test]
    fn test_jsonrpc_codes_are_distinct() {
        let codes = [
            ProxyError::InvalidRequest("x".to_string()).jsonrpc_code(),
            ProxyError::UpstreamUnreachable("x".to_string()).jsonrpc_code(),
            ProxyError::SessionInvalid.jsonrpc_code(),
            ProxyError::Timeout(5).jsonrpc_code(),
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_user_messages_no_upstream_detail() {
        let err = ProxyError::UpstreamUnreachable("connect to 10.0.0.7:9080 refused".to_string());
        let user_msg = err.user_message();

        assert!(!user_msg.contains("10.0.0.7"));
        assert_eq!(user_msg, "Proxy error: upstream unreachable");
    }

    #[test]
    fn test_invalid_request_reason_preserved() {
        let err = ProxyError::InvalidRequest("missing method".to_string());
        assert!(err.user_message().contains("missing method"));
    }
}
