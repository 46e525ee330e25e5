// Gateway handler - route selection, header injection, forwarding, token capture
use axum::{
    body::Body,
    extract::{Request, State},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use tracing::{error, info, warn};

use crate::proxy::error::ProxyError;
use crate::proxy::headers::build_headers;
use crate::proxy::server::AppState;
use crate::proxy::session::SessionHandle;
use crate::proxy::token_capture::capture_token;
use crate::proxy::upstream::{ForwardRequest, UpstreamClient};

/// Fallback handler for everything mounted under the proxy slug
pub async fn handle_proxy(State(state): State<AppState>, request: Request) -> Response {
    match route_request(&state, request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

/// Forward one inbound request according to the matching route rule
pub async fn route_request(state: &AppState, request: Request) -> Result<Response, ProxyError> {
    let (parts, body) = request.into_parts();
    let original_path = parts.uri.path().to_string();
    let original_url = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| original_path.clone());

    let rule = state.routes.find(&original_path).ok_or_else(|| {
        warn!("No route matched {} {}", parts.method, original_url);
        ProxyError::NoRouteMatched(original_path.clone())
    })?;

    let session = SessionHandle::from_headers(
        &parts.headers,
        &state.config.session_cookie,
        state.sessions.clone(),
    );
    let identity = state.identity.extract(&parts.headers, session.as_ref());
    let target_url = rule.rewrite(&original_url, &identity.user_id);

    info!(
        "REQ_URL_ORIGINAL {} {} -> {} (route {})",
        parts.method, original_url, target_url, rule.mount_prefix
    );

    let failed = |e: ProxyError| {
        error!(
            "Proxy call failed: {} {} -> {}: {}",
            parts.method, original_url, target_url, e
        );
        e
    };

    let body = read_body(body, state.config.body_limit_bytes)
        .await
        .map_err(failed)?;
    let body = (!body.is_empty()).then_some(body);

    let headers = build_headers(
        &parts.headers,
        rule,
        &identity,
        session.as_ref(),
        body.as_ref(),
        &state.credentials,
    )
    .map_err(failed)?;

    let response = state
        .upstream
        .forward(ForwardRequest {
            method: parts.method.clone(),
            url: target_url.clone(),
            headers,
            body,
            timeout_ms: rule.timeout_millis,
        })
        .await
        .map_err(failed)?;

    if !response.status().is_success() {
        info!(
            "Upstream {} answered {} for {}",
            target_url,
            response.status(),
            original_url
        );
    }

    if rule.is_token_issuing {
        if let Err(e) = capture_token(rule, &original_path, response.headers(), session.as_ref()) {
            warn!("{} ({} -> {})", e, original_url, target_url);
        }
    }

    Ok(UpstreamClient::relay(response))
}

/// Buffer the inbound body, refusing anything over `limit` bytes
async fn read_body(body: Body, limit: usize) -> Result<Bytes, ProxyError> {
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            Err(ProxyError::PayloadTooLarge { limit })
        }
        Err(e) => Err(ProxyError::BodyRead(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use crate::proxy::headers::{X_AUTHENTICATED_USERID, X_CHANNEL_ID};
    use crate::proxy::identity::SESSION_USER_ID;
    use crate::proxy::route::{RewritePolicy, RouteRule, RouteTable};
    use crate::proxy::server::{build_router, AppState};
    use crate::proxy::test_support::spawn_stub;
    use crate::proxy::token_capture::TOKEN_RESPONSE_HEADER;
    use crate::proxy::ProxyConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, HeaderMap, Request, StatusCode, Uri};
    use axum::response::Redirect;
    use axum::routing::{any, get as get_route, post};
    use axum::Router;
    use std::time::{Duration, Instant};
    use tokio::io::AsyncReadExt;
    use tokio::sync::oneshot;
    use tower::ServiceExt;

    fn test_config() -> ProxyConfig {
        ProxyConfig {
            channel_id: "channel-1".to_string(),
            api_key: "Bearer service-key".to_string(),
            ..ProxyConfig::default()
        }
    }

    fn gateway(rules: Vec<RouteRule>) -> Router {
        gateway_with_state(rules).0
    }

    fn gateway_with_state(rules: Vec<RouteRule>) -> (Router, AppState) {
        let state = AppState::new(test_config(), RouteTable::new(rules).unwrap());
        (build_router(state.clone()), state)
    }

    fn rule(mount: &str, strip: &str, origin: &str, policy: RewritePolicy) -> RouteRule {
        RouteRule::new(mount, strip, origin, policy, 2_000)
    }

    /// Upstream that echoes the request URI it received
    fn echo_uri() -> Router {
        Router::new().fallback(|uri: Uri| async move { uri.to_string() })
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn get_with_session(uri: &str, session: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::COOKIE, format!("connect.sid={}", session))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_strip_prefix_forwards_remaining_path() {
        let origin = spawn_stub(echo_uri()).await;
        let app = gateway(vec![rule(
            "/proxies/v8/learner",
            "/proxies/v8/learner",
            &origin,
            RewritePolicy::StripPrefix,
        )]);

        let response = app.oneshot(get("/proxies/v8/learner/x/y?a=1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "/x/y?a=1");
    }

    #[tokio::test]
    async fn test_download_path_crosses_as_one_segment() {
        let origin = spawn_stub(echo_uri()).await;
        let app = gateway(vec![rule(
            "/proxies/v8/content-store",
            "/proxies/v8/content-store",
            &origin,
            RewritePolicy::StripPrefixAndPercentEncodeDownloadSegment,
        )]);

        let response = app
            .oneshot(get("/proxies/v8/content-store/download/a/b/c"))
            .await
            .unwrap();
        assert_eq!(body_text(response).await, "/download/a%2Fb%2Fc");
    }

    fn user_read_rule(origin: &str) -> RouteRule {
        rule(
            "/proxies/v8/user/v1/read",
            "/proxies/v8/user/v1/read",
            &format!("{}/private/user/v1/read", origin),
            RewritePolicy::StripPrefixAndAppendUserId,
        )
    }

    #[tokio::test]
    async fn test_append_user_id_uses_local_part() {
        let origin = spawn_stub(echo_uri()).await;
        let (app, state) = gateway_with_state(vec![user_read_rule(&origin)]);
        state
            .sessions
            .set("session-u", SESSION_USER_ID, "provider:abc123".to_string());

        let response = app
            .oneshot(get_with_session("/proxies/v8/user/v1/read", "session-u"))
            .await
            .unwrap();
        let path = body_text(response).await;
        assert_eq!(path, "/private/user/v1/read/abc123");
        assert!(!path.contains("provider"));
    }

    #[tokio::test]
    async fn test_client_cannot_choose_forwarded_user_id() {
        let origin = spawn_stub(Router::new().fallback(
            |uri: Uri, headers: HeaderMap| async move {
                let user = headers
                    .get(X_AUTHENTICATED_USERID)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("<none>")
                    .to_string();
                format!("{} {}", uri.path(), user)
            },
        ))
        .await;
        let app = gateway(vec![user_read_rule(&origin)]);

        let request = Request::builder()
            .uri("/proxies/v8/user/v1/read")
            .header(X_AUTHENTICATED_USERID, "victim-42")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let forwarded = body_text(response).await;
        assert!(!forwarded.contains("victim-42"), "forwarded {}", forwarded);
        assert_eq!(forwarded, "/private/user/v1/read/ ");
    }

    #[tokio::test]
    async fn test_outbound_headers_and_body() {
        let origin = spawn_stub(Router::new().fallback(
            |headers: HeaderMap, body: String| async move {
                let value = |name: &str| {
                    headers
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("<none>")
                        .to_string()
                };
                serde_json::json!({
                    "channel": value(X_CHANNEL_ID),
                    "authorization": value("authorization"),
                    "user": value(X_AUTHENTICATED_USERID),
                    "content_length": value("content-length"),
                    "custom": value("x-custom"),
                    "body": body,
                })
                .to_string()
            },
        ))
        .await;
        let app = gateway(vec![rule(
            "/proxies/v8/api",
            "/proxies/v8",
            &origin,
            RewritePolicy::StripPrefix,
        )]);

        let request = Request::builder()
            .method("POST")
            .uri("/proxies/v8/api/course/v1/create")
            .header("x-custom", "kept")
            .header(header::AUTHORIZATION, "Bearer from-client")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"name":"course"}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let echoed: serde_json::Value =
            serde_json::from_str(&body_text(response).await).unwrap();

        assert_eq!(echoed["channel"], "channel-1");
        assert_eq!(echoed["authorization"], "Bearer service-key");
        assert_eq!(echoed["user"], "");
        assert_eq!(echoed["custom"], "kept");
        assert_eq!(echoed["content_length"], "17");
        assert_eq!(echoed["body"], r#"{"name":"course"}"#);
    }

    #[tokio::test]
    async fn test_issued_token_is_reused_within_session_only() {
        let origin = spawn_stub(
            Router::new()
                .route(
                    "/user/v1/create",
                    post(|| async { ([(TOKEN_RESPONSE_HEADER, "tok-1")], "created") }),
                )
                .fallback(|headers: HeaderMap| async move {
                    headers
                        .get(header::AUTHORIZATION)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("<none>")
                        .to_string()
                }),
        )
        .await;
        let app = gateway(vec![
            rule(
                "/proxies/v8/discussion/user/v1/create",
                "/proxies/v8/discussion",
                &origin,
                RewritePolicy::StripPrefix,
            )
            .token_issuing(),
            rule(
                "/proxies/v8/discussion",
                "/proxies/v8/discussion",
                &origin,
                RewritePolicy::StripPrefix,
            )
            .token_consuming(),
        ]);

        let create = Request::builder()
            .method("POST")
            .uri("/proxies/v8/discussion/user/v1/create")
            .header(header::COOKIE, "connect.sid=session-a")
            .body(Body::from("{}"))
            .unwrap();
        let response = app.clone().oneshot(create).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[TOKEN_RESPONSE_HEADER], "tok-1");
        assert_eq!(body_text(response).await, "created");

        let same = app
            .clone()
            .oneshot(get_with_session("/proxies/v8/discussion/api/topics", "session-a"))
            .await
            .unwrap();
        assert_eq!(body_text(same).await, "Bearer tok-1");

        let other = app
            .clone()
            .oneshot(get_with_session("/proxies/v8/discussion/api/topics", "session-b"))
            .await
            .unwrap();
        assert_eq!(body_text(other).await, "Bearer service-key");

        let anonymous = app
            .oneshot(get("/proxies/v8/discussion/api/topics"))
            .await
            .unwrap();
        assert_eq!(body_text(anonymous).await, "Bearer service-key");
    }

    #[tokio::test]
    async fn test_capture_failure_still_relays_response() {
        let origin = spawn_stub(Router::new().route(
            "/user/v1/create",
            post(|| async { (StatusCode::CREATED, "no token here") }),
        ))
        .await;
        let app = gateway(vec![rule(
            "/proxies/v8/discussion/user/v1/create",
            "/proxies/v8/discussion",
            &origin,
            RewritePolicy::StripPrefix,
        )
        .token_issuing()]);

        let request = Request::builder()
            .method("POST")
            .uri("/proxies/v8/discussion/user/v1/create")
            .header(header::COOKIE, "connect.sid=s1")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(body_text(response).await, "no token here");
    }

    #[tokio::test]
    async fn test_concurrent_requests_do_not_cross_talk() {
        const STUBS: usize = 100;
        const DELAY_MS: u64 = 100;

        let mut rules = Vec::with_capacity(STUBS);
        for i in 0..STUBS {
            let origin = spawn_stub(Router::new().fallback(move || async move {
                tokio::time::sleep(Duration::from_millis(DELAY_MS)).await;
                format!("stub-{}", i)
            }))
            .await;
            let mount = format!("/proxies/v8/svc{}", i);
            rules.push(rule(&mount, &mount, &origin, RewritePolicy::StripPrefix));
        }
        let app = gateway(rules);

        let started = Instant::now();
        let calls = (0..STUBS).map(|i| {
            let app = app.clone();
            async move {
                let response = app
                    .oneshot(get(&format!("/proxies/v8/svc{}/ping", i)))
                    .await
                    .unwrap();
                (i, body_text(response).await)
            }
        });
        let results = futures::future::join_all(calls).await;
        let elapsed = started.elapsed();

        for (i, body) in results {
            assert_eq!(body, format!("stub-{}", i));
        }
        // Serial execution would take STUBS * DELAY_MS
        assert!(
            elapsed < Duration::from_millis(STUBS as u64 * DELAY_MS / 2),
            "took {:?}",
            elapsed
        );
    }

    #[tokio::test]
    async fn test_hanging_upstream_yields_gateway_timeout() {
        let origin = spawn_stub(Router::new().fallback(|| async {
            std::future::pending::<()>().await;
            "never"
        }))
        .await;
        let app = gateway(vec![RouteRule::new(
            "/proxies/v8/slow",
            "/proxies/v8/slow",
            &origin,
            RewritePolicy::StripPrefix,
            300,
        )]);

        let started = Instant::now();
        let response = app.oneshot(get("/proxies/v8/slow/x")).await.unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert!(started.elapsed() < Duration::from_millis(300 + 2_000));
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["error"]["code"], "upstream_timeout");
    }

    #[tokio::test]
    async fn test_unreachable_upstream_yields_bad_gateway() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let origin = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let app = gateway(vec![rule(
            "/proxies/v8/down",
            "/proxies/v8/down",
            &origin,
            RewritePolicy::StripPrefix,
        )]);
        let response = app.oneshot(get("/proxies/v8/down/x")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_upstream_error_status_passes_through() {
        let origin = spawn_stub(Router::new().route(
            "/broken",
            any(|| async { (StatusCode::UNPROCESSABLE_ENTITY, r#"{"err":"bad"}"#) }),
        ))
        .await;
        let app = gateway(vec![rule(
            "/proxies/v8/learner",
            "/proxies/v8/learner",
            &origin,
            RewritePolicy::StripPrefix,
        )]);

        let response = app.oneshot(get("/proxies/v8/learner/broken")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body_text(response).await, r#"{"err":"bad"}"#);
    }

    #[tokio::test]
    async fn test_unmatched_path_is_not_found() {
        let app = gateway(vec![rule(
            "/proxies/v8/learner",
            "/proxies/v8/learner",
            "http://127.0.0.1:9",
            RewritePolicy::StripPrefix,
        )]);
        let response = app.oneshot(get("/proxies/v8/unknown/x")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["error"]["code"], "no_route_matched");
    }

    #[tokio::test]
    async fn test_upstream_redirect_is_relayed_not_followed() {
        let origin = spawn_stub(
            Router::new()
                .route("/moved", get_route(|| async { Redirect::temporary("/final") }))
                .route("/final", get_route(|| async { "followed" })),
        )
        .await;
        let app = gateway(vec![rule(
            "/proxies/v8/learner",
            "/proxies/v8/learner",
            &origin,
            RewritePolicy::StripPrefix,
        )]);

        let response = app.oneshot(get("/proxies/v8/learner/moved")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers()[header::LOCATION], "/final");
    }

    #[tokio::test]
    async fn test_client_disconnect_abandons_upstream_call() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let origin = format!("http://{}", listener.local_addr().unwrap());
        let (received_tx, received_rx) = oneshot::channel::<()>();
        let (closed_tx, closed_rx) = oneshot::channel::<()>();

        // Reads the request, never answers, reports when the gateway hangs up
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let _ = received_tx.send(());
            loop {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            let _ = closed_tx.send(());
        });

        let app = gateway(vec![RouteRule::new(
            "/proxies/v8/slow",
            "/proxies/v8/slow",
            &origin,
            RewritePolicy::StripPrefix,
            30_000,
        )]);
        let call = tokio::spawn(app.oneshot(get("/proxies/v8/slow/x")));

        tokio::time::timeout(Duration::from_secs(5), received_rx)
            .await
            .unwrap()
            .unwrap();
        call.abort();

        tokio::time::timeout(Duration::from_secs(5), closed_rx)
            .await
            .expect("upstream connection was kept open after the caller went away")
            .unwrap();
    }

    #[tokio::test]
    async fn test_oversized_body_is_payload_too_large() {
        let origin = spawn_stub(echo_uri()).await;
        let config = ProxyConfig {
            body_limit_bytes: 8,
            ..test_config()
        };
        let routes = RouteTable::new(vec![rule(
            "/proxies/v8/api",
            "/proxies/v8",
            &origin,
            RewritePolicy::StripPrefix,
        )])
        .unwrap();
        let app = build_router(AppState::new(config, routes));

        let request = Request::builder()
            .method("POST")
            .uri("/proxies/v8/api/upload")
            .body(Body::from("0123456789abcdef"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["error"]["code"], "payload_too_large");
    }
}
