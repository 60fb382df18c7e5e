use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use vigil_storage::{HttpTargetRow, HttpTargetUpdate, NewHttpTarget};

use crate::api::{ApiError, ApiResult};
use crate::auth::AuthedClient;
use crate::runtime::EvalIntent;
use crate::state::AppState;

const ALLOWED_METHODS: &[&str] = &["GET", "HEAD", "POST", "PUT", "DELETE", "OPTIONS", "PATCH"];

#[derive(Debug, Deserialize, ToSchema)]
pub struct HttpTargetIn {
    pub name: String,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub accepted_status_codes: Vec<u16>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_check_interval_seconds")]
    pub check_interval_seconds: u64,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct HttpTargetPatch {
    pub name: Option<String>,
    pub url: Option<String>,
    pub method: Option<String>,
    pub accepted_status_codes: Option<Vec<u16>>,
    pub timeout_seconds: Option<u64>,
    pub check_interval_seconds: Option<u64>,
    pub is_active: Option<bool>,
}

#[derive(Serialize, ToSchema)]
pub struct HttpTargetResponse {
    pub id: String,
    pub name: String,
    pub url: String,
    pub method: String,
    pub accepted_status_codes: Vec<u16>,
    pub timeout_seconds: u64,
    pub check_interval_seconds: u64,
    pub is_active: bool,
    pub state: String,
    pub last_check_at: Option<DateTime<Utc>>,
    pub last_status: Option<i32>,
    pub last_latency_ms: Option<i64>,
}

#[derive(Serialize, ToSchema)]
pub struct CreatedResponse {
    pub id: String,
}

#[derive(Serialize, ToSchema)]
pub struct CheckResponse {
    pub ok: bool,
    pub status: u16,
    pub latency_ms: i64,
    pub error: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_timeout_seconds() -> u64 {
    10
}

fn default_check_interval_seconds() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn row_to_response(row: HttpTargetRow) -> HttpTargetResponse {
    HttpTargetResponse {
        id: row.id,
        name: row.name,
        url: row.url,
        method: row.method,
        accepted_status_codes: row.accepted_status_codes,
        timeout_seconds: (row.timeout_ms / 1000).max(0) as u64,
        check_interval_seconds: row.check_interval_s.max(0) as u64,
        is_active: row.is_active,
        state: row.state.to_string(),
        last_check_at: row.last_check_at,
        last_status: row.last_status,
        last_latency_ms: row.last_latency_ms,
    }
}

fn validate_url(url: &str) -> ApiResult<()> {
    let lower = url.to_ascii_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return Err(ApiError::validation_field(
            &["body", "url"],
            "URL scheme must be http or https",
        ));
    }
    Ok(())
}

fn validate_method(method: &str) -> ApiResult<String> {
    let upper = method.to_uppercase();
    if !ALLOWED_METHODS.contains(&upper.as_str()) {
        return Err(ApiError::validation_field(
            &["body", "method"],
            &format!("method must be one of {}", ALLOWED_METHODS.join(", ")),
        ));
    }
    Ok(upper)
}

/// Scope check: targets are addressed by id, but only within the caller's
/// tenant. A foreign id is indistinguishable from a missing one.
async fn owned_target(state: &AppState, auth: &AuthedClient, id: &str) -> ApiResult<HttpTargetRow> {
    match state.store.get_http_target(id).await? {
        Some(row) if row.client_id == auth.client_id => Ok(row),
        _ => Err(ApiError::not_found(&format!("HTTP target '{id}' not found"))),
    }
}

/// Lists the caller's HTTP targets.
#[utoipa::path(
    get,
    path = "/api/v1/http-targets",
    tag = "HttpTargets",
    security(("api_key" = [])),
    responses(
        (status = 200, description = "Targets for the authenticated client", body = Vec<HttpTargetResponse>),
        (status = 401, description = "Missing or invalid API key")
    )
)]
pub async fn list_targets(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthedClient>,
) -> ApiResult<impl IntoResponse> {
    let rows = state.store.list_http_targets(&auth.client_id).await?;
    let items: Vec<HttpTargetResponse> = rows.into_iter().map(row_to_response).collect();
    Ok(Json(items))
}

/// Creates an HTTP target. Concurrent identical creates converge: one
/// caller gets 201, the other a 409 carrying `existing_id`.
#[utoipa::path(
    post,
    path = "/api/v1/http-targets",
    tag = "HttpTargets",
    security(("api_key" = [])),
    request_body = HttpTargetIn,
    responses(
        (status = 201, description = "Created", body = CreatedResponse),
        (status = 409, description = "URL already registered for this client"),
        (status = 422, description = "Invalid scheme, method, or field value")
    )
)]
pub async fn create_target(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthedClient>,
    Json(payload): Json<HttpTargetIn>,
) -> ApiResult<impl IntoResponse> {
    validate_url(&payload.url)?;
    let method = validate_method(&payload.method)?;
    if payload.name.trim().is_empty() {
        return Err(ApiError::validation_field(
            &["body", "name"],
            "name must not be empty",
        ));
    }

    let row = state
        .store
        .create_http_target(
            &auth.client_id,
            &NewHttpTarget {
                name: payload.name,
                url: payload.url,
                method,
                accepted_status_codes: payload.accepted_status_codes,
                timeout_ms: (payload.timeout_seconds.max(1) * 1000) as i64,
                check_interval_s: payload.check_interval_seconds.max(1) as i64,
                is_active: payload.is_active,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(CreatedResponse { id: row.id })))
}

/// Updates an HTTP target.
#[utoipa::path(
    put,
    path = "/api/v1/http-targets/{id}",
    tag = "HttpTargets",
    security(("api_key" = [])),
    params(("id" = String, Path, description = "Target id")),
    request_body = HttpTargetPatch,
    responses(
        (status = 200, description = "Updated", body = HttpTargetResponse),
        (status = 404, description = "Unknown target"),
        (status = 422, description = "Invalid scheme or method")
    )
)]
pub async fn update_target(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthedClient>,
    Path(id): Path<String>,
    Json(payload): Json<HttpTargetPatch>,
) -> ApiResult<impl IntoResponse> {
    owned_target(&state, &auth, &id).await?;

    if let Some(ref url) = payload.url {
        validate_url(url)?;
    }
    let method = match payload.method {
        Some(ref m) => Some(validate_method(m)?),
        None => None,
    };

    let updated = state
        .store
        .update_http_target(
            &id,
            &HttpTargetUpdate {
                name: payload.name,
                url: payload.url,
                method,
                accepted_status_codes: payload.accepted_status_codes,
                timeout_ms: payload.timeout_seconds.map(|s| (s.max(1) * 1000) as i64),
                check_interval_s: payload.check_interval_seconds.map(|s| s.max(1) as i64),
                is_active: payload.is_active,
            },
        )
        .await?
        .ok_or_else(|| ApiError::not_found(&format!("HTTP target '{id}' not found")))?;

    Ok(Json(row_to_response(updated)))
}

/// Deletes an HTTP target and, via cascade, its incidents.
#[utoipa::path(
    delete,
    path = "/api/v1/http-targets/{id}",
    tag = "HttpTargets",
    security(("api_key" = [])),
    params(("id" = String, Path, description = "Target id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Unknown target")
    )
)]
pub async fn delete_target(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthedClient>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    owned_target(&state, &auth, &id).await?;
    state.store.delete_http_target(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Runs one immediate probe of the target and returns the raw outcome.
/// The result also flows into the evaluator like a scheduled probe.
#[utoipa::path(
    post,
    path = "/api/v1/http-targets/{id}/check",
    tag = "HttpTargets",
    security(("api_key" = [])),
    params(("id" = String, Path, description = "Target id")),
    responses(
        (status = 200, description = "Probe outcome", body = CheckResponse),
        (status = 404, description = "Unknown target")
    )
)]
pub async fn check_target(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthedClient>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let target = owned_target(&state, &auth, &id).await?;

    let client = crate::probe::build_probe_client(state.config.prober.max_redirects)
        .map_err(|e| ApiError::internal(&e.to_string()))?;
    let outcome = crate::probe::probe_target(&client, &target).await;

    state
        .store
        .record_probe_result(&target.id, outcome.ts, outcome.status, outcome.latency_ms)
        .await?;
    state.eval.dispatch(EvalIntent::Probe(outcome.clone())).await;

    Ok(Json(CheckResponse {
        ok: outcome.ok,
        status: outcome.status,
        latency_ms: outcome.latency_ms,
        error: outcome.error,
    }))
}
