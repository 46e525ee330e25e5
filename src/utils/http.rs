use reqwest::{redirect, Client, Proxy};
use std::time::Duration;

const USER_AGENT: &str = concat!("learning-gateway/", env!("CARGO_PKG_VERSION"));

/// Create an HTTP client with specified proxy configuration.
///
/// Only the connect phase is bounded here; whole-call timeouts are applied per request.
/// Redirects are never followed, 3xx responses go back to the caller as-is.
pub fn create_client_with_proxy(
    connect_timeout_ms: u64,
    proxy_config: Option<&crate::proxy::config::UpstreamProxyConfig>,
) -> Client {
    let mut builder = Client::builder()
        .connect_timeout(Duration::from_millis(connect_timeout_ms))
        .user_agent(USER_AGENT)
        .redirect(redirect::Policy::none());

    if let Some(config) = proxy_config {
        if config.enabled && !config.url.is_empty() {
            match Proxy::all(&config.url) {
                Ok(proxy) => {
                    builder = builder.proxy(proxy);
                    tracing::info!("HTTP client upstream proxy enabled: {}", config.url);
                }
                Err(e) => {
                    tracing::error!("Invalid proxy address: {}, error: {}", config.url, e);
                }
            }
        }
    }

    builder.build().unwrap_or_else(|e| {
        tracing::error!("Falling back to default HTTP client: {}", e);
        Client::new()
    })
}
