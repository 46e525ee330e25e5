// Upstream client - the transport primitive behind every proxied call
use axum::body::Body;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use serde_json::Value;
use tokio::time::Duration;

use crate::proxy::config::UpstreamProxyConfig;
use crate::proxy::error::ProxyError;
use crate::proxy::headers::is_hop_by_hop;

const CONNECT_TIMEOUT_MS: u64 = 5_000;

/// One outbound call, built fresh per inbound request
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub timeout_ms: u64,
}

/// Stateless apart from the pooled connection client, safe to share across tasks
pub struct UpstreamClient {
    http_client: reqwest::Client,
}

impl UpstreamClient {
    pub fn new(proxy_config: Option<&UpstreamProxyConfig>) -> Self {
        Self {
            http_client: crate::utils::http::create_client_with_proxy(
                CONNECT_TIMEOUT_MS,
                proxy_config,
            ),
        }
    }

    /// Perform the outbound call. Resolves once upstream status and headers arrive;
    /// the timeout keeps running while the body is streamed.
    pub async fn forward(&self, request: ForwardRequest) -> Result<reqwest::Response, ProxyError> {
        let ForwardRequest {
            method,
            url,
            headers,
            body,
            timeout_ms,
        } = request;

        let mut builder = self
            .http_client
            .request(method, &url)
            .headers(headers)
            .timeout(Duration::from_millis(timeout_ms));
        if let Some(body) = body {
            builder = builder.body(body);
        }

        builder
            .send()
            .await
            .map_err(|e| ProxyError::from_transport(e, &url, timeout_ms))
    }

    /// Turn the upstream response into a client response without buffering the body
    pub fn relay(response: reqwest::Response) -> Response {
        let status = response.status();
        let mut headers = HeaderMap::with_capacity(response.headers().len());
        for (name, value) in response.headers() {
            if !is_hop_by_hop(name) {
                headers.append(name.clone(), value.clone());
            }
        }

        let mut relayed = Response::new(Body::from_stream(response.bytes_stream()));
        *relayed.status_mut() = status;
        *relayed.headers_mut() = headers;
        relayed
    }

    /// Send a JSON request and read back the JSON (or text) body with its status
    pub async fn send_json(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        headers: HeaderMap,
        timeout_ms: u64,
    ) -> Result<(StatusCode, Value), ProxyError> {
        let mut builder = self
            .http_client
            .request(method, url)
            .headers(headers)
            .timeout(Duration::from_millis(timeout_ms));
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProxyError::from_transport(e, url, timeout_ms))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProxyError::from_transport(e, url, timeout_ms))?;

        let value = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok((status, value))
    }
}
