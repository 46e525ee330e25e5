// Outbound header computation for proxied requests
use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use bytes::Bytes;

use crate::proxy::error::ProxyError;
use crate::proxy::identity::Identity;
use crate::proxy::route::RouteRule;
use crate::proxy::session::{SessionHandle, DISCUSSION_TOKEN_SLOT};

pub const X_CHANNEL_ID: &str = "x-channel-id";
pub const X_AUTHENTICATED_USER_TOKEN: &str = "x-authenticated-user-token";
pub const X_AUTHENTICATED_USERID: &str = "x-authenticated-userid";

/// Connection-scoped headers that must not cross the proxy
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Process-wide service credentials stamped on every outbound call
#[derive(Debug, Clone, Default)]
pub struct ServiceCredentials {
    pub channel_id: String,
    pub api_key: String,
}

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Compute the header set for the upstream call.
///
/// Inbound headers pass through except hop-by-hop ones, `Host` (rewritten by the client
/// for the target), `Content-Length` (recomputed from `body`) and any client-sent identity
/// headers. The channel id, service
/// key and propagated identity are then written over whatever the client sent. Consuming
/// routes swap the service key for the session's cached bearer token when one exists.
pub fn build_headers(
    inbound: &HeaderMap,
    rule: &RouteRule,
    identity: &Identity,
    session: Option<&SessionHandle>,
    body: Option<&Bytes>,
    credentials: &ServiceCredentials,
) -> Result<HeaderMap, ProxyError> {
    let mut headers = HeaderMap::with_capacity(inbound.len() + 4);
    for (name, value) in inbound {
        if is_hop_by_hop(name)
            || name == header::HOST
            || name == header::CONTENT_LENGTH
            || name == X_AUTHENTICATED_USERID
            || name == X_AUTHENTICATED_USER_TOKEN
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    headers.insert(
        HeaderName::from_static(X_CHANNEL_ID),
        header_value(X_CHANNEL_ID, &credentials.channel_id)?,
    );
    headers.insert(
        header::AUTHORIZATION,
        header_value("authorization", &credentials.api_key)?,
    );
    headers.insert(
        HeaderName::from_static(X_AUTHENTICATED_USER_TOKEN),
        header_value(X_AUTHENTICATED_USER_TOKEN, &identity.user_token)?,
    );
    headers.insert(
        HeaderName::from_static(X_AUTHENTICATED_USERID),
        header_value(X_AUTHENTICATED_USERID, &identity.user_id)?,
    );

    if rule.is_token_consuming && !rule.is_token_issuing {
        let cached = session
            .and_then(|s| s.get(DISCUSSION_TOKEN_SLOT))
            .filter(|token| !token.is_empty());
        match cached {
            Some(token) => {
                headers.insert(
                    header::AUTHORIZATION,
                    header_value("authorization", &format!("Bearer {}", token))?,
                );
            }
            None => {
                tracing::debug!(
                    "No cached discussion token for {}, using service key",
                    rule.mount_prefix
                );
            }
        }
    }

    if let Some(body) = body {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
    }

    Ok(headers)
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, ProxyError> {
    HeaderValue::from_str(value).map_err(|e| ProxyError::InvalidHeader {
        name: name.to_string(),
        message: e.to_string(),
    })
}
