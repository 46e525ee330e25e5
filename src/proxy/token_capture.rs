// Captures the discussion-service token issued on user creation
use axum::http::HeaderMap;

use crate::proxy::error::ProxyError;
use crate::proxy::route::RouteRule;
use crate::proxy::session::{SessionHandle, DISCUSSION_TOKEN_SLOT};

/// Response header carrying the issued token
pub const TOKEN_RESPONSE_HEADER: &str = "nodebb_auth_token";

/// What the sink did with a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Rule is not token-issuing or the path is not the issuing endpoint
    Skipped,
    Stored,
}

/// Store the token carried by a token-issuing response into the caller's session.
///
/// Only runs for issuing rules on their exact endpoint. Errors are for the caller to
/// log; they never affect the relayed response.
pub fn capture_token(
    rule: &RouteRule,
    original_path: &str,
    response_headers: &HeaderMap,
    session: Option<&SessionHandle>,
) -> Result<CaptureOutcome, ProxyError> {
    if !rule.is_token_issuing || !rule.is_exact_endpoint(original_path) {
        return Ok(CaptureOutcome::Skipped);
    }

    let session = session.ok_or_else(|| {
        ProxyError::TokenCapture(format!("no session to store token for {}", original_path))
    })?;

    let token = response_headers
        .get(TOKEN_RESPONSE_HEADER)
        .ok_or_else(|| {
            ProxyError::TokenCapture(format!(
                "response for {} has no {} header",
                original_path, TOKEN_RESPONSE_HEADER
            ))
        })?
        .to_str()
        .map_err(|e| ProxyError::TokenCapture(format!("token header is not text: {}", e)))?
        .trim();

    if token.is_empty() {
        return Err(ProxyError::TokenCapture(format!(
            "empty {} header for {}",
            TOKEN_RESPONSE_HEADER, original_path
        )));
    }

    session.set(DISCUSSION_TOKEN_SLOT, token.to_string());
    tracing::info!("Stored discussion token for session {}", session.id());
    Ok(CaptureOutcome::Stored)
}
