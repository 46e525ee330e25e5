use serde::{Deserialize, Serialize};

use crate::proxy::route::RouteRule;

/// Gateway service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Whether LAN access is allowed
    /// - false: only local access on 127.0.0.1 (default)
    /// - true: listen on 0.0.0.0
    #[serde(default)]
    pub allow_lan_access: bool,

    /// Listening port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Value sent upstream as `X-Channel-Id`
    #[serde(default)]
    pub channel_id: String,

    /// Service API key, the default outbound `Authorization` value
    #[serde(default)]
    pub api_key: String,

    /// Cookie carrying the client session id
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,

    /// Sessions untouched for this long are dropped (seconds)
    #[serde(default = "default_session_idle_timeout_secs")]
    pub session_idle_timeout_secs: u64,

    /// How often idle sessions are swept (seconds)
    #[serde(default = "default_session_sweep_interval_secs")]
    pub session_sweep_interval_secs: u64,

    /// Accept `x-authenticated-userid` / `x-authenticated-user-token` / `rootorg` from the
    /// inbound request when the session has no identity.
    /// Only enable behind an edge that authenticates and overwrites those headers.
    #[serde(default)]
    pub trust_identity_headers: bool,

    /// Default per-call upstream timeout (milliseconds)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Timeout for slow downstreams such as uploads and content store reads
    #[serde(default = "default_long_request_timeout_ms")]
    pub long_request_timeout_ms: u64,

    /// Timeout for bulk registry operations
    #[serde(default = "default_very_long_request_timeout_ms")]
    pub very_long_request_timeout_ms: u64,

    /// Maximum inbound body size forwarded upstream
    #[serde(default = "default_body_limit_bytes")]
    pub body_limit_bytes: usize,

    /// Upstream proxy configuration
    #[serde(default)]
    pub upstream_proxy: UpstreamProxyConfig,

    /// Backend service base URLs
    #[serde(default)]
    pub services: ServiceEndpoints,

    /// Additional route rules appended to the standard table
    #[serde(default)]
    pub extra_routes: Vec<RouteRule>,

    /// Directory holding bulk registry migration inputs
    #[serde(default)]
    pub user_bulk_upload_dir: Option<String>,
}

/// Upstream proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpstreamProxyConfig {
    /// Whether enabled
    pub enabled: bool,
    /// Proxy address (http://, https://, socks5://)
    pub url: String,
}

/// Base URLs of the services sitting behind the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceEndpoints {
    pub learner: String,
    pub learner_vm: String,
    pub sunbird_api: String,
    pub knowledge_mw: String,
    pub content_store: String,
    pub content_private: String,
    pub discussion_hub: String,
    pub upload: String,
    pub search: String,
    pub question: String,
    pub user_profile: String,
    pub network_hub: String,
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self {
            learner: "http://learner-service:9000".to_string(),
            learner_vm: "http://learner-service:9000".to_string(),
            sunbird_api: "http://kong:8000".to_string(),
            knowledge_mw: "http://knowledge-mw-service:5000".to_string(),
            content_store: "http://content-service:9000".to_string(),
            content_private: "http://content-service:9000".to_string(),
            discussion_hub: "http://nodebb-service:4567".to_string(),
            upload: "http://content-service:9000".to_string(),
            search: "http://search-service:9000/v3/search".to_string(),
            question: "http://assessment-service:9000".to_string(),
            user_profile: "http://user-profile-service:7001".to_string(),
            network_hub: "http://registry-service:8081".to_string(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            allow_lan_access: false,
            port: default_port(),
            channel_id: String::new(),
            api_key: String::new(),
            session_cookie: default_session_cookie(),
            session_idle_timeout_secs: default_session_idle_timeout_secs(),
            session_sweep_interval_secs: default_session_sweep_interval_secs(),
            trust_identity_headers: false,
            request_timeout_ms: default_request_timeout_ms(),
            long_request_timeout_ms: default_long_request_timeout_ms(),
            very_long_request_timeout_ms: default_very_long_request_timeout_ms(),
            body_limit_bytes: default_body_limit_bytes(),
            upstream_proxy: UpstreamProxyConfig::default(),
            services: ServiceEndpoints::default(),
            extra_routes: Vec::new(),
            user_bulk_upload_dir: None,
        }
    }
}

fn default_port() -> u16 {
    3007
}

fn default_session_cookie() -> String {
    "connect.sid".to_string()
}

fn default_session_idle_timeout_secs() -> u64 {
    24 * 60 * 60
}

fn default_session_sweep_interval_secs() -> u64 {
    60
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_long_request_timeout_ms() -> u64 {
    60_000
}

fn default_very_long_request_timeout_ms() -> u64 {
    300_000
}

fn default_body_limit_bytes() -> usize {
    100 * 1024 * 1024
}

impl ProxyConfig {
    /// Get the actual listen address
    /// - allow_lan_access = false: "127.0.0.1"
    /// - allow_lan_access = true: "0.0.0.0"
    pub fn get_bind_address(&self) -> &str {
        if self.allow_lan_access {
            "0.0.0.0"
        } else {
            "127.0.0.1"
        }
    }
}
