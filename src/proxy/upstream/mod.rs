// Upstream module - outbound transport

pub mod client;

pub use client::{ForwardRequest, UpstreamClient};
