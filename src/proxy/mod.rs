// proxy module - reverse proxy gateway

pub mod config;
pub mod error;
pub mod headers;
pub mod identity;
pub mod route;
pub mod server;
pub mod session;
pub mod token_capture;

pub mod handlers; // Gateway and profile-details handlers
pub mod middleware; // Axum middleware
pub mod upstream; // Outbound transport

#[cfg(test)]
pub(crate) mod test_support;

pub use config::ProxyConfig;
pub use error::ProxyError;
pub use route::{RewritePolicy, RouteRule, RouteTable};
pub use server::{AppState, GatewayServer};
