// Profile details handlers - JSON relays to the profile and registry services
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use once_cell::sync::Lazy;
use serde_json::{json, Map, Value};
use tracing::{error, info};

use crate::proxy::headers::is_hop_by_hop;
use crate::proxy::identity::Identity;
use crate::proxy::server::AppState;
use crate::proxy::session::SessionHandle;

pub const PROFILE_DETAILS_MOUNT: &str = "/protected/v8/user/profileDetails";

const MIGRATE_REGISTRY_FILE: &str = "migrateRegistry.json";
const DEFAULT_BULK_UPLOAD_DIR: &str = "user_upload";

pub static ERROR_NO_ORG_DATA: Lazy<Value> = Lazy::new(|| {
    json!({
        "status": "FAILED",
        "error": "ORG_DATA_NOT_FOUND",
        "message": "org and rootOrg headers are required"
    })
});

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/createUserRegistry", post(create_user_registry))
        .route("/getUserRegistry", get(get_user_registry))
        .route("/getUserRegistryById/:id", get(get_user_registry_by_id))
        .route("/userProfileStatus", get(user_profile_status))
        .route("/setUserProfileStatus", post(set_user_profile_status))
        .route("/getMasterLanguages", get(get_master_languages))
        .route("/getMasterNationalities", get(get_master_nationalities))
        .route("/getProfilePageMeta", get(get_profile_page_meta))
        .route("/migrateRegistry", get(migrate_registry))
        .route("/createUser", post(create_user))
}

fn profile_endpoint(state: &AppState, name: &str) -> String {
    format!(
        "{}/public/v8/profileDetails/{}",
        state.config.services.user_profile.trim_end_matches('/'),
        name
    )
}

fn caller_identity(state: &AppState, headers: &HeaderMap) -> Identity {
    let session = SessionHandle::from_headers(
        headers,
        &state.config.session_cookie,
        state.sessions.clone(),
    );
    state.identity.extract(headers, session.as_ref())
}

/// `body` with `fields` merged in; non-object bodies are replaced
fn with_fields(body: Value, fields: Vec<(&str, Value)>) -> Value {
    let mut object = match body {
        Value::Object(object) => object,
        _ => Map::new(),
    };
    for (key, value) in fields {
        object.insert(key.to_string(), value);
    }
    Value::Object(object)
}

fn forwardable_headers(inbound: &HeaderMap) -> HeaderMap {
    inbound
        .iter()
        .filter(|(name, _)| {
            !is_hop_by_hop(name) && *name != header::HOST && *name != header::CONTENT_LENGTH
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

fn failure(context: &str, message: impl std::fmt::Display) -> Response {
    error!("{} > {}", context, message);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": message.to_string() })),
    )
        .into_response()
}

fn upstream_refused(context: &str, step: &str, status: StatusCode, body: Value) -> Response {
    error!("{} > {} answered {}", context, step, status);
    (status, Json(body)).into_response()
}

/// Send upstream and relay status + body. Transport failures become 500.
async fn relay_json(
    state: &AppState,
    method: Method,
    url: &str,
    body: Option<Value>,
    headers: HeaderMap,
    timeout_ms: u64,
    context: &str,
) -> Response {
    match state
        .upstream
        .send_json(method, url, body.as_ref(), headers, timeout_ms)
        .await
    {
        Ok((status, value)) => (status, Json(value)).into_response(),
        Err(e) => failure(context, e),
    }
}

async fn create_user_registry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let user_id = caller_identity(&state, &headers).user_id;
    info!("Create user registry for {}", user_id);
    let body = with_fields(body, vec![("userId", Value::String(user_id))]);
    relay_json(
        &state,
        Method::POST,
        &profile_endpoint(&state, "createUserRegistry"),
        Some(body),
        HeaderMap::new(),
        state.config.long_request_timeout_ms,
        "ERROR CREATING USER REGISTRY",
    )
    .await
}

async fn get_user_registry(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let user_id = caller_identity(&state, &headers).user_id;
    fetch_user_registry(&state, user_id).await
}

async fn get_user_registry_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let user_id = if id.trim().is_empty() {
        caller_identity(&state, &headers).user_id
    } else {
        id
    };
    fetch_user_registry(&state, user_id).await
}

async fn fetch_user_registry(state: &AppState, user_id: String) -> Response {
    info!("Get user registry for {}", user_id);
    relay_json(
        state,
        Method::POST,
        &profile_endpoint(state, "getUserRegistry"),
        Some(json!({ "userId": user_id })),
        HeaderMap::new(),
        state.config.request_timeout_ms,
        "ERROR FETCHING USER REGISTRY",
    )
    .await
}

async fn user_profile_status(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let org = headers.get("org").filter(|v| !v.is_empty());
    let root_org = headers.get("rootorg").filter(|v| !v.is_empty()).cloned();
    let (Some(_), Some(root_org)) = (org, root_org) else {
        return (StatusCode::BAD_REQUEST, Json(ERROR_NO_ORG_DATA.clone())).into_response();
    };

    let wid = caller_identity(&state, &headers).user_id;
    let mut upstream_headers = HeaderMap::new();
    upstream_headers.insert("rootorg", root_org);
    relay_json(
        &state,
        Method::POST,
        &profile_endpoint(&state, "userProfileStatus"),
        Some(json!({ "wid": wid })),
        upstream_headers,
        state.config.request_timeout_ms,
        "ERROR FETCHING USER PROFILE STATUS",
    )
    .await
}

async fn set_user_profile_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let wid = caller_identity(&state, &headers).user_id;
    let body = with_fields(body, vec![("wid", Value::String(wid))]);
    relay_json(
        &state,
        Method::POST,
        &profile_endpoint(&state, "setUserProfileStatus"),
        Some(body),
        forwardable_headers(&headers),
        state.config.request_timeout_ms,
        "ERROR SETTING USER PROFILE STATUS",
    )
    .await
}

async fn get_master_languages(State(state): State<AppState>) -> Response {
    fetch_master(&state, "getMasterLanguages", "ERROR FETCHING MASTER LANGUAGES").await
}

async fn get_master_nationalities(State(state): State<AppState>) -> Response {
    fetch_master(
        &state,
        "getMasterNationalities",
        "ERROR FETCHING MASTER NATIONALITIES",
    )
    .await
}

async fn get_profile_page_meta(State(state): State<AppState>) -> Response {
    fetch_master(&state, "getProfilePageMeta", "ERROR FETCHING PROFILE PAGE META").await
}

async fn fetch_master(state: &AppState, name: &str, context: &str) -> Response {
    relay_json(
        state,
        Method::GET,
        &profile_endpoint(state, name),
        None,
        HeaderMap::new(),
        state.config.request_timeout_ms,
        context,
    )
    .await
}

/// Migrate the wids listed in `migrateRegistry.json` to the new profile registry
async fn migrate_registry(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let dir = state
        .config
        .user_bulk_upload_dir
        .clone()
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| {
            std::env::current_dir()
                .unwrap_or_default()
                .join(DEFAULT_BULK_UPLOAD_DIR)
        });
    let path = dir.join(MIGRATE_REGISTRY_FILE);

    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) => return failure(&format!("ERROR READING {}", path.display()), e),
    };
    let parsed: Value = match serde_json::from_str(&content) {
        Ok(parsed) => parsed,
        Err(e) => return failure(&format!("ERROR PARSING {}", path.display()), e),
    };
    let wid_list = parsed.get("widList").cloned().unwrap_or(Value::Array(Vec::new()));

    let user_id = caller_identity(&state, &headers).user_id;
    info!("Migrating the registry ({} entries)", wid_list.as_array().map_or(0, |l| l.len()));
    relay_json(
        &state,
        Method::POST,
        &profile_endpoint(&state, "migrateRegistry"),
        Some(json!({ "userId": user_id, "widList": wid_list })),
        HeaderMap::new(),
        state.config.very_long_request_timeout_ms,
        "ERROR MIGRATING USER REGISTRY",
    )
    .await
}

/// Create the learner account, then its registry profile
async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let details = &body["personalDetails"];
    let (Some(email), Some(first_name), Some(last_name)) = (
        details["email"].as_str(),
        details["firstName"].as_str(),
        details["lastName"].as_str(),
    ) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "personalDetails.email, firstName and lastName are required" })),
        )
            .into_response();
    };
    let channel = caller_identity(&state, &headers).root_org;
    let learner = state.config.services.learner.trim_end_matches('/');
    let timeout_ms = state.config.request_timeout_ms;
    const CONTEXT: &str = "ERROR CREATING USER";

    let search = json!({
        "request": { "query": "", "filters": { "email": email.to_lowercase() } }
    });
    let found = match state
        .upstream
        .send_json(
            Method::POST,
            &format!("{}/private/user/v1/search", learner),
            Some(&search),
            HeaderMap::new(),
            timeout_ms,
        )
        .await
    {
        Ok((status, value)) if !status.is_success() => {
            return upstream_refused(CONTEXT, "user search", status, value)
        }
        Ok((_, value)) => value["result"]["response"]["count"].as_u64().unwrap_or(0),
        Err(e) => return failure(CONTEXT, e),
    };
    if found > 0 {
        return (StatusCode::BAD_REQUEST, "Email address already exist").into_response();
    }

    let signup = json!({
        "request": {
            "channel": channel,
            "email": email,
            "emailVerified": true,
            "firstName": first_name,
            "lastName": last_name,
        }
    });
    let created = match state
        .upstream
        .send_json(
            Method::POST,
            &format!("{}/v1/user/signup", learner),
            Some(&signup),
            HeaderMap::new(),
            timeout_ms,
        )
        .await
    {
        Ok((status, value)) if !status.is_success() => {
            return upstream_refused(CONTEXT, "signup", status, value)
        }
        Ok((_, value)) => value,
        Err(e) => return failure(CONTEXT, e),
    };
    if created["responseCode"] == "CLIENT_ERROR" {
        return (StatusCode::BAD_REQUEST, "Not able to create User in SunBird").into_response();
    }
    let Some(user_id) = created["result"]["userId"].as_str().map(str::to_string) else {
        return failure(CONTEXT, "signup response carries no userId");
    };

    let mut registry_headers = HeaderMap::new();
    match HeaderValue::from_str(&user_id) {
        Ok(value) => {
            registry_headers.insert("wid", value);
        }
        Err(e) => return failure(CONTEXT, e),
    }
    let registry_url = format!(
        "{}/v1/user/create/profile?userId={}",
        state.config.services.network_hub.trim_end_matches('/'),
        user_id
    );
    let registry = default_user_registry(email, first_name, last_name);
    match state
        .upstream
        .send_json(
            Method::POST,
            &registry_url,
            Some(&registry),
            registry_headers,
            timeout_ms,
        )
        .await
    {
        Ok((status, value)) if !status.is_success() => {
            upstream_refused(CONTEXT, "registry creation", status, value)
        }
        Ok((_, Value::Null)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Not able to create User Registry in Opensaber",
        )
            .into_response(),
        Ok(_) => Json(json!({
            "email": email,
            "firstName": first_name,
            "lastName": last_name,
            "userId": user_id,
        }))
        .into_response(),
        Err(e) => failure(CONTEXT, e),
    }
}

fn default_user_registry(email: &str, first_name: &str, last_name: &str) -> Value {
    json!({
        "academics": [
            { "nameOfInstitute": "", "nameOfQualification": "", "type": "X_STANDARD", "yearOfPassing": "" },
            { "nameOfInstitute": "", "nameOfQualification": "", "type": "XII_STANDARD", "yearOfPassing": "" }
        ],
        "employmentDetails": {
            "allotmentYearOfService": "",
            "cadre": "",
            "civilListNo": "",
            "departmentName": "",
            "dojOfService": "",
            "employeeCode": "",
            "officialPostalAddress": "",
            "payType": "",
            "pinCode": "",
            "service": ""
        },
        "interests": { "hobbies": [], "professional": [] },
        "personalDetails": {
            "firstname": first_name,
            "primaryEmail": email,
            "surname": last_name
        },
        "professionalDetails": [ { "name": "" } ],
        "skills": { "additionalSkills": "", "certificateDetails": "" }
    })
}
