// Middleware module - Axum middleware

pub mod cors;
pub mod request_log;

pub use cors::cors_layer;
pub use request_log::request_log_middleware;
