use crate::proxy::config::ProxyConfig;
use crate::proxy::headers::ServiceCredentials;
use crate::proxy::identity::{IdentityExtractor, SessionIdentityExtractor};
use crate::proxy::route::RouteTable;
use crate::proxy::session::{spawn_session_sweeper, InMemorySessionStore, SessionStore};
use crate::proxy::upstream::UpstreamClient;
use axum::{
    extract::DefaultBodyLimit,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

/// Axum application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub routes: Arc<RouteTable>,
    pub credentials: Arc<ServiceCredentials>,
    pub sessions: Arc<dyn SessionStore>,
    pub identity: Arc<dyn IdentityExtractor>,
    pub upstream: Arc<UpstreamClient>,
}

impl AppState {
    /// State with the in-memory session store and session-backed identity
    pub fn new(config: ProxyConfig, routes: RouteTable) -> Self {
        let sessions = InMemorySessionStore::with_idle_timeout(Duration::from_secs(
            config.session_idle_timeout_secs,
        ));
        let identity = SessionIdentityExtractor::new(config.trust_identity_headers);
        Self::with_collaborators(config, routes, Arc::new(sessions), Arc::new(identity))
    }

    pub fn with_collaborators(
        config: ProxyConfig,
        routes: RouteTable,
        sessions: Arc<dyn SessionStore>,
        identity: Arc<dyn IdentityExtractor>,
    ) -> Self {
        let credentials = ServiceCredentials {
            channel_id: config.channel_id.clone(),
            api_key: config.api_key.clone(),
        };
        let upstream = UpstreamClient::new(Some(&config.upstream_proxy));
        Self {
            config: Arc::new(config),
            routes: Arc::new(routes),
            credentials: Arc::new(credentials),
            sessions,
            identity,
            upstream: Arc::new(upstream),
        }
    }
}

/// Build the gateway router: health check, profile-details relays, and the proxy fallback
pub fn build_router(state: AppState) -> Router {
    use crate::proxy::handlers;

    let body_limit = state.config.body_limit_bytes;
    Router::new()
        .route("/healthz", get(health_check_handler))
        .nest(
            handlers::profile_details::PROFILE_DETAILS_MOUNT,
            handlers::profile_details::routes(),
        )
        .fallback(handlers::gateway::handle_proxy)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(
            crate::proxy::middleware::request_log_middleware,
        ))
        .layer(crate::proxy::middleware::cors_layer())
        .with_state(state)
}

/// Gateway server instance
pub struct GatewayServer {
    shutdown_tx: Option<oneshot::Sender<()>>,
    sweeper: tokio::task::JoinHandle<()>,
    state: AppState,
}

impl GatewayServer {
    /// Start the gateway server
    pub async fn start(
        host: String,
        port: u16,
        state: AppState,
    ) -> Result<(Self, tokio::task::JoinHandle<()>), String> {
        let app = build_router(state.clone());

        // Bind address
        let addr = format!("{}:{}", host, port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| format!("Failed to bind address {}: {}", addr, e))?;

        tracing::info!(
            "Gateway started at http://{} with {} routes",
            addr,
            state.routes.rules().len()
        );

        // Create shutdown channel
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let sweeper = spawn_session_sweeper(
            state.sessions.clone(),
            Duration::from_secs(state.config.session_sweep_interval_secs),
        );

        let server_instance = Self {
            shutdown_tx: Some(shutdown_tx),
            sweeper,
            state,
        };

        // Start server in new task
        let handle = tokio::spawn(async move {
            use hyper::server::conn::http1;
            use hyper_util::rt::TokioIo;
            use hyper_util::service::TowerToHyperService;

            loop {
                tokio::select! {
                    res = listener.accept() => {
                        match res {
                            Ok((stream, _)) => {
                                let io = TokioIo::new(stream);
                                let service = TowerToHyperService::new(app.clone());

                                // Dropping the connection drops the handler and its upstream call
                                tokio::task::spawn(async move {
                                    if let Err(err) = http1::Builder::new()
                                        .serve_connection(io, service)
                                        .with_upgrades()
                                        .await
                                    {
                                        debug!("Connection handling finished or errored: {:?}", err);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept connection: {:?}", e);
                            }
                        }
                    }
                    _ = &mut shutdown_rx => {
                        tracing::info!("Gateway stopped listening");
                        break;
                    }
                }
            }
        });

        Ok((server_instance, handle))
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Stop server
    pub fn stop(mut self) {
        self.sweeper.abort();
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Health check handler
async fn health_check_handler() -> Response {
    Json(serde_json::json!({
        "status": "ok"
    }))
    .into_response()
}
