// Caller identity, resolved once per inbound request
use axum::http::HeaderMap;

use crate::proxy::session::SessionHandle;

pub const SESSION_USER_ID: &str = "userId";
pub const SESSION_USER_TOKEN: &str = "userToken";
pub const SESSION_ROOT_ORG: &str = "rootOrg";

const HEADER_USER_ID: &str = "x-authenticated-userid";
const HEADER_USER_TOKEN: &str = "x-authenticated-user-token";
const HEADER_ROOT_ORG: &str = "rootorg";

/// Identity values forwarded upstream. Missing values are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub user_token: String,
    pub root_org: String,
}

/// Yields the already-validated caller identity for a request
pub trait IdentityExtractor: Send + Sync {
    fn user_id(&self, headers: &HeaderMap, session: Option<&SessionHandle>) -> Option<String>;
    fn user_token(&self, headers: &HeaderMap, session: Option<&SessionHandle>) -> Option<String>;
    fn root_org(&self, headers: &HeaderMap, session: Option<&SessionHandle>) -> Option<String>;

    fn extract(&self, headers: &HeaderMap, session: Option<&SessionHandle>) -> Identity {
        Identity {
            user_id: self.user_id(headers, session).unwrap_or_default(),
            user_token: self.user_token(headers, session).unwrap_or_default(),
            root_org: self.root_org(headers, session).unwrap_or_default(),
        }
    }
}

/// Reads identity stored in the session by the login flow.
///
/// Inbound identity headers are ignored unless `trust_headers` is set, in which case they
/// fill in whatever the session lacks.
#[derive(Debug, Default, Clone)]
pub struct SessionIdentityExtractor {
    trust_headers: bool,
}

impl SessionIdentityExtractor {
    pub fn new(trust_headers: bool) -> Self {
        Self { trust_headers }
    }

    fn lookup(
        &self,
        headers: &HeaderMap,
        session: Option<&SessionHandle>,
        session_key: &str,
        header_name: &str,
    ) -> Option<String> {
        session
            .and_then(|s| s.get(session_key))
            .filter(|v| !v.is_empty())
            .or_else(|| {
                if !self.trust_headers {
                    return None;
                }
                headers
                    .get(header_name)
                    .and_then(|h| h.to_str().ok())
                    .map(|s| s.to_string())
            })
    }
}

impl IdentityExtractor for SessionIdentityExtractor {
    fn user_id(&self, headers: &HeaderMap, session: Option<&SessionHandle>) -> Option<String> {
        self.lookup(headers, session, SESSION_USER_ID, HEADER_USER_ID)
    }

    fn user_token(&self, headers: &HeaderMap, session: Option<&SessionHandle>) -> Option<String> {
        self.lookup(headers, session, SESSION_USER_TOKEN, HEADER_USER_TOKEN)
    }

    fn root_org(&self, headers: &HeaderMap, session: Option<&SessionHandle>) -> Option<String> {
        self.lookup(headers, session, SESSION_ROOT_ORG, HEADER_ROOT_ORG)
    }
}
