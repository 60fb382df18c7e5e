use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use vigil_storage::MachineRow;

use crate::api::{ApiError, ApiResult, Paginated, PaginationParams};
use crate::auth::AuthedClient;
use crate::state::AppState;

#[derive(Serialize, ToSchema)]
pub struct MachineResponse {
    pub id: String,
    pub hostname: String,
    pub os: Option<String>,
    pub fingerprint: String,
    pub is_active: bool,
    /// `online` when the machine reported within its heartbeat window.
    pub status: String,
    pub registered_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
}

fn row_to_response(row: MachineRow, heartbeat_minutes: i64, now: DateTime<Utc>) -> MachineResponse {
    let online = row
        .last_seen
        .map(|seen| now - seen < Duration::minutes(heartbeat_minutes))
        .unwrap_or(false);
    MachineResponse {
        id: row.id,
        hostname: row.hostname,
        os: row.os,
        fingerprint: row.fingerprint,
        is_active: row.is_active,
        status: if online { "online" } else { "offline" }.to_string(),
        registered_at: row.registered_at,
        last_seen: row.last_seen,
    }
}

/// Machines for the authenticated client, most recently seen first.
#[utoipa::path(
    get,
    path = "/api/v1/machines",
    tag = "Machines",
    security(("api_key" = [])),
    params(PaginationParams),
    responses(
        (status = 200, description = "Machine page", body = Paginated<MachineResponse>),
        (status = 401, description = "Missing or invalid API key")
    )
)]
pub async fn list_machines(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthedClient>,
    Query(pagination): Query<PaginationParams>,
) -> ApiResult<impl IntoResponse> {
    let limit = pagination.limit();
    let offset = pagination.offset();

    let settings = state.store.get_settings(&auth.client_id).await?;
    let heartbeat_minutes = if settings.heartbeat_threshold_minutes > 0 {
        settings.heartbeat_threshold_minutes
    } else {
        state.config.heartbeat_threshold_minutes_default
    };

    let total = state.store.count_machines(&auth.client_id).await?;
    let rows = state
        .store
        .list_machines(&auth.client_id, limit, offset)
        .await?;

    let now = Utc::now();
    Ok(Json(Paginated {
        items: rows
            .into_iter()
            .map(|r| row_to_response(r, heartbeat_minutes, now))
            .collect::<Vec<_>>(),
        total,
        limit,
        offset,
    }))
}

async fn owned_machine(state: &AppState, auth: &AuthedClient, id: &str) -> ApiResult<MachineRow> {
    match state.store.get_machine(id).await? {
        Some(row) if row.client_id == auth.client_id => Ok(row),
        _ => Err(ApiError::not_found(&format!("machine '{id}' not found"))),
    }
}

/// One machine's detail.
#[utoipa::path(
    get,
    path = "/api/v1/machines/{id}",
    tag = "Machines",
    security(("api_key" = [])),
    params(("id" = String, Path, description = "Machine id")),
    responses(
        (status = 200, description = "Machine detail", body = MachineResponse),
        (status = 404, description = "Unknown machine")
    )
)]
pub async fn get_machine(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthedClient>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let row = owned_machine(&state, &auth, &id).await?;
    let settings = state.store.get_settings(&auth.client_id).await?;
    let heartbeat_minutes = if settings.heartbeat_threshold_minutes > 0 {
        settings.heartbeat_threshold_minutes
    } else {
        state.config.heartbeat_threshold_minutes_default
    };
    Ok(Json(row_to_response(row, heartbeat_minutes, Utc::now())))
}

/// Metric instances bound to one machine.
#[utoipa::path(
    get,
    path = "/api/v1/machines/{id}/metrics",
    tag = "Machines",
    security(("api_key" = [])),
    params(("id" = String, Path, description = "Machine id")),
    responses(
        (status = 200, description = "Instances on the machine", body = Vec<crate::api::metrics::MetricResponse>),
        (status = 404, description = "Unknown machine")
    )
)]
pub async fn machine_metrics(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthedClient>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    owned_machine(&state, &auth, &id).await?;
    let details = state.store.list_instances_for_machine(&id).await?;
    let items: Vec<crate::api::metrics::MetricResponse> = details
        .into_iter()
        .map(crate::api::metrics::detail_to_response)
        .collect();
    Ok(Json(items))
}
