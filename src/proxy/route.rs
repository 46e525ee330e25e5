// Route table - declarative description of every URL family the gateway forwards
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::proxy::config::ProxyConfig;

pub const PROXY_SLUG: &str = "/proxies/v8";

const DOWNLOAD_MARKER: &str = "/download/";

/// How the inbound path is turned into the upstream target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RewritePolicy {
    /// Always forward to `target_origin` as-is, the inbound path is ignored
    None,
    StripPrefix,
    /// Strip, then append the local part of the caller's user id as the last segment
    StripPrefixAndAppendUserId,
    /// Strip, then collapse everything after `/download/` into a single encoded segment
    StripPrefixAndPercentEncodeDownloadSegment,
    /// Replace the first `marker` occurrence with `/` before stripping
    ReplaceUrlMarker { marker: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRule {
    /// Path prefix this rule is bound under
    pub mount_prefix: String,
    pub path_prefix_to_strip: String,
    pub target_origin: String,
    pub rewrite_policy: RewritePolicy,
    pub timeout_millis: u64,
    /// Response carries a bearer token that must be cached in the session
    #[serde(default)]
    pub is_token_issuing: bool,
    /// Request must present the cached session token instead of the API key
    #[serde(default)]
    pub is_token_consuming: bool,
}

impl RouteRule {
    pub fn new(
        mount_prefix: &str,
        path_prefix_to_strip: &str,
        target_origin: &str,
        rewrite_policy: RewritePolicy,
        timeout_millis: u64,
    ) -> Self {
        Self {
            mount_prefix: normalize_prefix(mount_prefix),
            path_prefix_to_strip: normalize_prefix(path_prefix_to_strip),
            target_origin: target_origin.to_string(),
            rewrite_policy,
            timeout_millis,
            is_token_issuing: false,
            is_token_consuming: false,
        }
    }

    pub fn token_issuing(mut self) -> Self {
        self.is_token_issuing = true;
        self
    }

    pub fn token_consuming(mut self) -> Self {
        self.is_token_consuming = true;
        self
    }

    /// Prefix match on a `/` segment boundary
    pub fn matches(&self, path: &str) -> bool {
        match path.strip_prefix(self.mount_prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/') || self.mount_prefix.is_empty(),
            None => false,
        }
    }

    /// True when `path` is exactly the endpoint this rule is mounted at
    pub fn is_exact_endpoint(&self, path: &str) -> bool {
        path.trim_end_matches('/') == self.mount_prefix
    }

    /// Build the upstream URL for an inbound `path_and_query`
    pub fn rewrite(&self, path_and_query: &str, user_id: &str) -> String {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path_and_query, None),
        };

        let target = match &self.rewrite_policy {
            RewritePolicy::None => return self.target_origin.clone(),
            RewritePolicy::StripPrefix => join_url(&self.target_origin, self.strip(path)),
            RewritePolicy::StripPrefixAndAppendUserId => {
                let base = join_url(&self.target_origin, self.strip(path));
                format!("{}/{}", base.trim_end_matches('/'), local_user_id(user_id))
            }
            RewritePolicy::StripPrefixAndPercentEncodeDownloadSegment => {
                let remainder = encode_download_segment(self.strip(path));
                join_url(&self.target_origin, &remainder)
            }
            RewritePolicy::ReplaceUrlMarker { marker } => {
                let replaced = if marker.is_empty() {
                    path.to_string()
                } else {
                    path.replacen(marker.as_str(), "/", 1)
                };
                join_url(&self.target_origin, self.strip(&replaced))
            }
        };

        match query {
            Some(query) if !query.is_empty() => format!("{}?{}", target, query),
            _ => target,
        }
    }

    fn strip<'a>(&self, path: &'a str) -> &'a str {
        path.strip_prefix(self.path_prefix_to_strip.as_str())
            .unwrap_or(path)
    }
}

/// Immutable rule set, longest mount prefix wins
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl RouteTable {
    pub fn new(rules: Vec<RouteRule>) -> AppResult<Self> {
        for rule in &rules {
            url::Url::parse(&rule.target_origin).map_err(|e| {
                AppError::Config(format!(
                    "Invalid target origin {} for route {}: {}",
                    rule.target_origin, rule.mount_prefix, e
                ))
            })?;
            if rule.is_token_issuing && rule.is_token_consuming {
                return Err(AppError::Config(format!(
                    "Route {} cannot both issue and consume the session token",
                    rule.mount_prefix
                )));
            }
        }

        let mut rules: Vec<RouteRule> = rules
            .into_iter()
            .map(|mut rule| {
                rule.mount_prefix = normalize_prefix(&rule.mount_prefix);
                rule.path_prefix_to_strip = normalize_prefix(&rule.path_prefix_to_strip);
                rule
            })
            .collect();
        // Stable sort keeps declaration order between equal-length prefixes
        rules.sort_by(|a, b| b.mount_prefix.len().cmp(&a.mount_prefix.len()));

        Ok(Self { rules })
    }

    /// Standard route families plus any configured extras
    pub fn standard(config: &ProxyConfig) -> AppResult<Self> {
        let services = &config.services;
        let default_timeout = config.request_timeout_ms;
        let long_timeout = config.long_request_timeout_ms;
        let very_long_timeout = config.very_long_request_timeout_ms;
        let slug = |suffix: &str| format!("{}{}", PROXY_SLUG, suffix);

        let mut rules = vec![
            RouteRule::new(
                &slug("/learner"),
                &slug("/learner"),
                &services.learner,
                RewritePolicy::StripPrefix,
                default_timeout,
            ),
            RouteRule::new(
                &slug("/learnervm/private"),
                &slug("/learnervm/private"),
                &services.learner_vm,
                RewritePolicy::StripPrefix,
                default_timeout,
            ),
            RouteRule::new(
                &slug("/api"),
                PROXY_SLUG,
                &services.sunbird_api,
                RewritePolicy::StripPrefix,
                default_timeout,
            ),
            RouteRule::new(
                &slug("/content"),
                PROXY_SLUG,
                &services.knowledge_mw,
                RewritePolicy::StripPrefix,
                default_timeout,
            ),
            RouteRule::new(
                &slug("/private"),
                &slug("/private"),
                &services.content_private,
                RewritePolicy::StripPrefix,
                default_timeout,
            ),
            RouteRule::new(
                &slug("/content-store"),
                &slug("/content-store"),
                &services.content_store,
                RewritePolicy::StripPrefixAndPercentEncodeDownloadSegment,
                long_timeout,
            ),
            RouteRule::new(
                &slug("/action"),
                &slug("/action"),
                &services.upload,
                RewritePolicy::StripPrefix,
                long_timeout,
            ),
            RouteRule::new(
                &slug("/user/v1/read"),
                &slug("/user/v1/read"),
                &format!("{}/private/user/v1/read", services.learner.trim_end_matches('/')),
                RewritePolicy::StripPrefixAndAppendUserId,
                default_timeout,
            ),
            RouteRule::new(
                &slug("/composite/v1/search"),
                &slug("/composite/v1/search"),
                &services.search,
                RewritePolicy::None,
                default_timeout,
            ),
            RouteRule::new(
                &slug("/assessment"),
                PROXY_SLUG,
                &services.question,
                RewritePolicy::ReplaceUrlMarker {
                    marker: "/assessment/".to_string(),
                },
                default_timeout,
            ),
            RouteRule::new(
                &slug("/registry"),
                &slug("/registry"),
                &services.network_hub,
                RewritePolicy::StripPrefix,
                very_long_timeout,
            ),
            RouteRule::new(
                &slug("/discussion/user/v1/create"),
                &slug("/discussion"),
                &services.discussion_hub,
                RewritePolicy::StripPrefix,
                default_timeout,
            )
            .token_issuing(),
            RouteRule::new(
                &slug("/discussion"),
                &slug("/discussion"),
                &services.discussion_hub,
                RewritePolicy::StripPrefix,
                default_timeout,
            )
            .token_consuming(),
        ];
        rules.extend(config.extra_routes.iter().cloned());

        Self::new(rules)
    }

    pub fn find(&self, path: &str) -> Option<&RouteRule> {
        self.rules.iter().find(|rule| rule.matches(path))
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }
}

/// `provider:localId` -> `localId`
pub fn local_user_id(user_id: &str) -> &str {
    user_id.rsplit(':').next().unwrap_or_default()
}

fn encode_download_segment(path: &str) -> String {
    match path.find(DOWNLOAD_MARKER) {
        Some(index) => {
            let (head, tail) = path.split_at(index + DOWNLOAD_MARKER.len());
            format!("{}{}", head, tail.replace('/', "%2F"))
        }
        None => path.to_string(),
    }
}

fn join_url(origin: &str, path: &str) -> String {
    if path.is_empty() {
        return origin.to_string();
    }
    if path.starts_with('/') {
        format!("{}{}", origin.trim_end_matches('/'), path)
    } else if origin.ends_with('/') {
        format!("{}{}", origin, path)
    } else {
        format!("{}/{}", origin, path)
    }
}

fn normalize_prefix(prefix: &str) -> String {
    prefix.trim_end_matches('/').to_string()
}
