// Configuration management

use crate::core::errors::ProxyError;
use crate::proxy::InvalidSessionSignature;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use url::Url;

const DEFAULT_HANDSHAKE_BODY: &str = r#"{"jsonrpc":"2.0","method":"tools/list","id":"init"}"#;

/// Application configuration loaded from environment variables
///
/// Everything upstream-specific (handshake shape, session carrier names,
/// the "session invalid" signature) is configuration, not code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Upstream configuration
    pub upstream_base_url: String,
    pub session_max_age_secs: u64,
    pub request_timeout_secs: u64,

    // Listener configuration
    pub listen_host: String,
    pub listen_port: u16,

    // Session carrier
    pub session_header: String,
    pub session_cookie: String,

    // Handshake
    pub handshake_method: String,
    pub handshake_path: Option<String>,
    pub handshake_body: String,

    // Session-invalid signature
    pub session_invalid_statuses: Vec<u16>,
    pub session_invalid_pattern: Option<String>,

    // Middleware configuration
    pub health_timeout_ms: u64,
    pub body_size_limit_bytes: usize,
    pub gateway_timeout_secs: u64,
    pub eager_session: bool,

    // Logging configuration
    pub log_level: String,
    pub log_format: String, // "json" or "text"
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Supports `.env` file loading in development (via dotenv crate).
    ///
    /// # Returns
    /// * `Result<Self, ProxyError>` - Config instance or validation error
    pub fn from_env() -> Result<Self, ProxyError> {
        // Skip in test environment to avoid interfering with test environment variables
        #[cfg(not(test))]
        {
            dotenv::dotenv().ok(); // Ignore errors (file may not exist)
        }

        let request_timeout_secs = Self::parse_u64_or_default("REQUEST_TIMEOUT", 30)?;

        let config = Self {
            upstream_base_url: Self::get_env_or_default("UPSTREAM_BASE_URL", "http://localhost:9080/mcp"),
            session_max_age_secs: Self::parse_u64_or_default("SESSION_MAX_AGE", 3600)?,
            request_timeout_secs,
            listen_host: Self::get_env_or_default("LISTEN_HOST", "0.0.0.0"),
            listen_port: Self::parse_port()?,
            session_header: Self::get_env_or_default("SESSION_HEADER", "mcp-session-id"),
            session_cookie: Self::get_env_or_default("SESSION_COOKIE", "mcp_session_id"),
            handshake_method: Self::get_env_or_default("HANDSHAKE_METHOD", "POST").to_uppercase(),
            handshake_path: Self::get_optional_env("HANDSHAKE_PATH"),
            handshake_body: Self::get_env_or_default("HANDSHAKE_BODY", DEFAULT_HANDSHAKE_BODY),
            session_invalid_statuses: Self::parse_status_list(
                &Self::get_env_or_default("SESSION_INVALID_STATUS", "400,404"),
            )?,
            session_invalid_pattern: Self::parse_pattern(
                &Self::get_env_or_default("SESSION_INVALID_PATTERN", "session"),
            ),
            health_timeout_ms: Self::parse_u64_or_default("HEALTH_TIMEOUT_MS", 2000)?,
            body_size_limit_bytes: Self::parse_usize_or_default("BODY_SIZE_LIMIT_BYTES", 2 * 1024 * 1024)?,
            gateway_timeout_secs: Self::parse_u64_or_default(
                "GATEWAY_TIMEOUT",
                Self::default_gateway_timeout(request_timeout_secs),
            )?,
            eager_session: Self::parse_bool(&Self::get_env_or_default("EAGER_SESSION", "true"))?,
            log_level: Self::get_env_or_default("LOG_LEVEL", "info"),
            log_format: Self::get_env_or_default("LOG_FORMAT", "json"),
        };

        config.validate()?;

        Ok(config)
    }

    /// Bind address for the listener
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }

    pub fn session_max_age(&self) -> Duration {
        Duration::from_secs(self.session_max_age_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs)
    }

    /// Upstream JSON-RPC endpoint
    pub fn upstream_url(&self) -> Result<Url, ProxyError> {
        Url::parse(&self.upstream_base_url).map_err(|e| {
            ProxyError::ConfigurationError(format!(
                "Invalid UPSTREAM_BASE_URL '{}': {}",
                self.upstream_base_url, e
            ))
        })
    }

    /// Handshake target: the upstream endpoint, or `HANDSHAKE_PATH` resolved against it
    pub fn handshake_url(&self) -> Result<Url, ProxyError> {
        let base = self.upstream_url()?;
        match self.handshake_path.as_deref() {
            None => Ok(base),
            Some(path) => base.join(path).map_err(|e| {
                ProxyError::ConfigurationError(format!("Invalid HANDSHAKE_PATH '{}': {}", path, e))
            }),
        }
    }

    /// Health probe target: the parent of the upstream endpoint
    pub fn health_url(&self) -> Result<Url, ProxyError> {
        let base = self.upstream_url()?;
        base.join(".").map_err(|e| {
            ProxyError::ConfigurationError(format!("Cannot derive health URL: {}", e))
        })
    }

    /// The configured "session invalid" signature
    pub fn invalid_session_signature(&self) -> InvalidSessionSignature {
        InvalidSessionSignature::new(
            self.session_invalid_statuses.clone(),
            self.session_invalid_pattern.clone(),
        )
    }

    /// Two upstream attempts, each possibly preceded by a handshake, plus slack
    fn default_gateway_timeout(request_timeout_secs: u64) -> u64 {
        request_timeout_secs.saturating_mul(4).saturating_add(5)
    }

    /// Get environment variable or return default value
    fn get_env_or_default(key: &str, default: &str) -> String {
        env::var(key).unwrap_or_else(|_| default.to_string())
    }

    /// Get optional environment variable
    fn get_optional_env(key: &str) -> Option<String> {
        match env::var(key) {
            Ok(value) if !value.is_empty() => Some(value),
            _ => None,
        }
    }

    /// Parse port from LISTEN_PORT environment variable
    fn parse_port() -> Result<u16, ProxyError> {
        let port_str = env::var("LISTEN_PORT").unwrap_or_else(|_| "8080".to_string());
        let port = port_str.parse::<u16>()
            .map_err(|e| ProxyError::ConfigurationError(
                format!("Invalid LISTEN_PORT value '{}': {}", port_str, e)
            ))?;

        if port == 0 {
            return Err(ProxyError::ConfigurationError(
                "LISTEN_PORT must be between 1 and 65535".to_string()
            ));
        }

        Ok(port)
    }

    /// Parse u64 from environment variable or return default
    fn parse_u64_or_default(key: &str, default: u64) -> Result<u64, ProxyError> {
        match env::var(key) {
            Ok(value) => Self::parse_positive(&value, key),
            _ => Ok(default),
        }
    }

    /// Parse usize from environment variable or return default
    fn parse_usize_or_default(key: &str, default: usize) -> Result<usize, ProxyError> {
        match env::var(key) {
            Ok(value) => {
                let parsed = Self::parse_positive(&value, key)?;
                usize::try_from(parsed).map_err(|_| ProxyError::ConfigurationError(
                    format!("{} value '{}' is too large", key, value)
                ))
            }
            _ => Ok(default),
        }
    }

    /// Parse a strictly positive integer
    fn parse_positive(value: &str, env_key: &str) -> Result<u64, ProxyError> {
        let parsed = value.trim().parse::<u64>()
            .map_err(|e| ProxyError::ConfigurationError(
                format!("Invalid {} value '{}': {}", env_key, value, e)
            ))?;

        if parsed == 0 {
            return Err(ProxyError::ConfigurationError(
                format!("{} must be greater than 0", env_key)
            ));
        }

        Ok(parsed)
    }

    /// Parse a comma-separated list of HTTP status codes; empty disables status matching
    fn parse_status_list(value: &str) -> Result<Vec<u16>, ProxyError> {
        value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                let code = s.parse::<u16>().map_err(|e| ProxyError::ConfigurationError(
                    format!("Invalid SESSION_INVALID_STATUS entry '{}': {}", s, e)
                ))?;
                if !(100..=599).contains(&code) {
                    return Err(ProxyError::ConfigurationError(
                        format!("SESSION_INVALID_STATUS entry {} is not an HTTP status", code)
                    ));
                }
                Ok(code)
            })
            .collect()
    }

    /// Empty pattern disables body matching
    fn parse_pattern(value: &str) -> Option<String> {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    fn parse_bool(value: &str) -> Result<bool, ProxyError> {
        match value.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ProxyError::ConfigurationError(
                format!("Invalid boolean value '{}'", other)
            )),
        }
    }

    /// Validate all configuration values
    fn validate(&self) -> Result<(), ProxyError> {
        Self::validate_url(&self.upstream_base_url, "UPSTREAM_BASE_URL")?;
        self.handshake_url()?;
        self.health_url()?;

        Self::validate_method(&self.handshake_method)?;
        Self::validate_header_name(&self.session_header)?;

        if self.session_cookie.is_empty() {
            return Err(ProxyError::ConfigurationError(
                "SESSION_COOKIE must not be empty".to_string()
            ));
        }

        if serde_json::from_str::<serde_json::Value>(&self.handshake_body).is_err() {
            return Err(ProxyError::ConfigurationError(
                "HANDSHAKE_BODY must be valid JSON".to_string()
            ));
        }

        if self.session_invalid_statuses.is_empty() && self.session_invalid_pattern.is_none() {
            return Err(ProxyError::ConfigurationError(
                "SESSION_INVALID_STATUS and SESSION_INVALID_PATTERN cannot both be empty".to_string()
            ));
        }

        Self::validate_log_level(&self.log_level)?;
        Self::validate_log_format(&self.log_format)?;

        Ok(())
    }

    /// Validate URL format; only http(s) upstreams are supported
    fn validate_url(url: &str, description: &str) -> Result<(), ProxyError> {
        let parsed = Url::parse(url)
            .map_err(|e| ProxyError::ConfigurationError(
                format!("Invalid {} '{}': {}", description, url, e)
            ))?;

        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(ProxyError::ConfigurationError(
                format!("{} must use http or https, got '{}'", description, parsed.scheme())
            ));
        }
        Ok(())
    }

    fn validate_method(method: &str) -> Result<(), ProxyError> {
        reqwest::Method::from_bytes(method.as_bytes())
            .map(|_| ())
            .map_err(|_| ProxyError::ConfigurationError(
                format!("Invalid HANDSHAKE_METHOD '{}'", method)
            ))
    }

    fn validate_header_name(name: &str) -> Result<(), ProxyError> {
        reqwest::header::HeaderName::from_bytes(name.as_bytes())
            .map(|_| ())
            .map_err(|_| ProxyError::ConfigurationError(
                format!("Invalid SESSION_HEADER '{}'", name)
            ))
    }

    /// Validate log level
    fn validate_log_level(level: &str) -> Result<(), ProxyError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&level.to_lowercase().as_str()) {
            return Err(ProxyError::ConfigurationError(
                format!("Invalid LOG_LEVEL '{}': must be one of {}", level, valid_levels.join(", "))
            ));
        }
        Ok(())
    }

    /// Validate log format
    fn validate_log_format(format: &str) -> Result<(), ProxyError> {
        if format != "json" && format != "text" {
            return Err(ProxyError::ConfigurationError(
                format!("Invalid LOG_FORMAT '{}': must be 'json' or 'text'", format)
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Create a test configuration for unit tests
    ///
    /// This bypasses environment variable loading for use in tests that
    /// don't need real configuration.
    pub fn test_config() -> Self {
        Self {
            upstream_base_url: "http://127.0.0.1:9080/mcp".to_string(),
            session_max_age_secs: 3600,
            request_timeout_secs: 5,
            listen_host: "127.0.0.1".to_string(),
            listen_port: 8080,
            session_header: "mcp-session-id".to_string(),
            session_cookie: "mcp_session_id".to_string(),
            handshake_method: "POST".to_string(),
            handshake_path: None,
            handshake_body: DEFAULT_HANDSHAKE_BODY.to_string(),
            session_invalid_statuses: vec![400, 404],
            session_invalid_pattern: Some("session".to_string()),
            health_timeout_ms: 500,
            body_size_limit_bytes: 2 * 1024 * 1024,
            gateway_timeout_secs: 25,
            eager_session: false,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
        }
    }
}
