// Request logging middleware
use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Log every request and make sure it carries a request id, which is also
/// forwarded upstream and echoed on the response
pub async fn request_log_middleware(mut request: Request, next: Next) -> Response {
    let header_name = HeaderName::from_static(REQUEST_ID_HEADER);
    let request_id = match request.headers().get(&header_name) {
        Some(existing) => existing.clone(),
        None => {
            let generated = HeaderValue::from_str(&uuid::Uuid::new_v4().to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("unknown"));
            request
                .headers_mut()
                .insert(header_name.clone(), generated.clone());
            generated
        }
    };

    tracing::info!(
        "Request: {} {} ({})",
        request.method(),
        request.uri(),
        request_id.to_str().unwrap_or_default()
    );

    let mut response = next.run(request).await;
    tracing::debug!("Response: {} ({:?})", response.status(), request_id);
    response.headers_mut().insert(header_name, request_id);
    response
}
