use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;

/// Failures of the forwarding core. Upstream non-2xx responses are not errors,
/// they are relayed verbatim.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("No route matched path {0}")]
    NoRouteMatched(String),

    #[error("Upstream {url} did not respond within {timeout_ms}ms")]
    UpstreamTimeout { url: String, timeout_ms: u64 },

    #[error("Failed to connect to upstream {url}: {message}")]
    UpstreamConnectionFailure { url: String, message: String },

    #[error("Upstream request to {url} failed: {message}")]
    UpstreamRequest { url: String, message: String },

    #[error("Invalid header {name}: {message}")]
    InvalidHeader { name: String, message: String },

    #[error("Failed to read request body: {0}")]
    BodyRead(String),

    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// Logged by the router, never rendered to the client
    #[error("Token capture failed: {0}")]
    TokenCapture(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoRouteMatched(_) => StatusCode::NOT_FOUND,
            ProxyError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::UpstreamConnectionFailure { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamRequest { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::InvalidHeader { .. } => StatusCode::BAD_REQUEST,
            ProxyError::BodyRead(_) => StatusCode::BAD_REQUEST,
            ProxyError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::TokenCapture(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ProxyError::NoRouteMatched(_) => "no_route_matched",
            ProxyError::UpstreamTimeout { .. } => "upstream_timeout",
            ProxyError::UpstreamConnectionFailure { .. } => "upstream_connection_failure",
            ProxyError::UpstreamRequest { .. } => "upstream_request_failed",
            ProxyError::InvalidHeader { .. } => "invalid_header",
            ProxyError::BodyRead(_) => "invalid_request_body",
            ProxyError::PayloadTooLarge { .. } => "payload_too_large",
            ProxyError::TokenCapture(_) => "token_capture_failed",
        }
    }

    /// Classify a transport error from the outbound call
    pub fn from_transport(error: reqwest::Error, url: &str, timeout_ms: u64) -> Self {
        if error.is_timeout() {
            ProxyError::UpstreamTimeout {
                url: url.to_string(),
                timeout_ms,
            }
        } else if error.is_connect() {
            ProxyError::UpstreamConnectionFailure {
                url: url.to_string(),
                message: error.to_string(),
            }
        } else {
            ProxyError::UpstreamRequest {
                url: url.to_string(),
                message: error.to_string(),
            }
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(json!({
                "error": {
                    "code": self.code(),
                    "message": self.to_string(),
                }
            })),
        )
            .into_response()
    }
}
